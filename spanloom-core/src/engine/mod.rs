//! The correlation engine.
//!
//! [`Tracker`] owns the [`SpanRegistry`] and applies host signals to it:
//!
//! ```text
//! unit created ──► correlation ──► open phase + unit spans
//! tool before/after ──► tools ──► aggregate + span markers (+ handoffs)
//! unit idle/error ──► registry.close_unit ──► flushed unit span
//! interval tick ──► gc ──► expired records force-closed
//! ```
//!
//! The tracker is synchronous and single-owner; the dispatcher drives it from
//! one task so handlers and sweeps never interleave mid-operation.

mod aggregate;
mod correlation;
mod gc;
mod records;
mod registry;
mod tools;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::trace::Tracer;
use tracing::{debug, info};

pub use aggregate::{MAX_TOOL_ERRORS, ToolAggregate, ToolErrorEntry, ToolStats};
pub use correlation::{Correlation, CorrelationPolicy, DelegationSignal, ParentSource};
pub use gc::{
    HANDOFF_TTL, SWEEP_INTERVAL, SweepReport, TOOL_EXECUTION_TTL, TtlPolicy, UNIT_TTL,
};
pub use records::{HandoffRecord, PhaseRecord, ToolExecution, UnitKind, UnitRecord};
pub use registry::{
    CloseOutcome, CloseReason, ErrorInfo, PhaseAttrs, SpanRegistry, TableCounts, UnitAttrs,
};

use crate::clock::Clock;
use crate::hooks::MessageUpdatedData;

/// Turns host lifecycle signals into span operations.
pub struct Tracker<T: Tracer> {
    registry: SpanRegistry<T>,
    clock: Arc<dyn Clock>,
    correlation: CorrelationPolicy,
    ttl: TtlPolicy,
}

impl<T> Tracker<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: SpanRegistry::new(tracer),
            clock,
            correlation: CorrelationPolicy::default(),
            ttl: TtlPolicy::default(),
        }
    }

    pub fn with_correlation(mut self, policy: CorrelationPolicy) -> Self {
        self.correlation = policy;
        self
    }

    pub fn with_ttl(mut self, policy: TtlPolicy) -> Self {
        self.ttl = policy;
        self
    }

    pub fn registry(&self) -> &SpanRegistry<T> {
        &self.registry
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn correlation(&self) -> &CorrelationPolicy {
        &self.correlation
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The unit finished normally.
    pub fn on_unit_idle(&mut self, id: &str) -> CloseOutcome {
        let outcome = self
            .registry
            .close_unit(id, CloseReason::Idle, None, self.now());
        if let Some(stats) = outcome.stats() {
            info!(unit = id, tools = stats.total_count, "unit completed");
        }
        outcome
    }

    /// The host reported the unit as failed.
    pub fn on_unit_error(&mut self, id: &str, error: ErrorInfo) -> CloseOutcome {
        let outcome = self
            .registry
            .close_unit(id, CloseReason::Error, Some(error), self.now());
        if outcome.stats().is_some() {
            info!(unit = id, "unit failed");
        }
        outcome
    }

    /// Fold a message update into its unit.
    ///
    /// Messages never create units: a message for an unknown id usually
    /// trails a unit that already closed.
    pub fn on_message(&mut self, data: &MessageUpdatedData) -> bool {
        let now = self.now();
        match self.registry.unit_mut(&data.unit_id) {
            Some(unit) => {
                unit.touch(now);
                unit.record_message(data);
                true
            }
            None => {
                debug!(unit = %data.unit_id, "message for unknown unit ignored");
                false
            }
        }
    }

    /// Live unit record, opened lazily as a root when no creation event was
    /// seen.
    pub(crate) fn ensure_unit(&mut self, id: &str, now: DateTime<Utc>) -> &mut UnitRecord {
        if self.registry.unit(id).is_none() {
            debug!(unit = id, "synthesizing unit from tool activity");
        }
        let unit = self
            .registry
            .open_unit(id, UnitAttrs::lazy_root(), None, now);
        unit.touch(now);
        unit
    }
}
