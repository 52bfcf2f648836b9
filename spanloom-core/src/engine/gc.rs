//! TTL sweep over the record tables.
//!
//! Tool executions expire fastest, handoffs next, units (and their phases)
//! last. Units age from the last event that touched them; executions and
//! handoffs age from creation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use opentelemetry::trace::Tracer;
use serde::{Deserialize, Serialize};
use spanloom_observe::{SpanMarkerExt, attributes as attr, markers};
use tracing::{debug, info, warn};

use super::Tracker;
use super::registry::{CloseOutcome, CloseReason, duration_ms, to_i64};
use crate::clock::elapsed;

/// Pending tool executions older than this are dropped.
pub const TOOL_EXECUTION_TTL: Duration = Duration::from_secs(5 * 60);
/// Undelivered handoffs older than this are dropped.
pub const HANDOFF_TTL: Duration = Duration::from_secs(10 * 60);
/// Units (and their phases) idle for longer than this are force-closed.
pub const UNIT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// How often the dispatcher runs a sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Time-to-live per table plus the sweep cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub tool_execution: Duration,
    pub handoff: Duration,
    pub unit: Duration,
    pub sweep_interval: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            tool_execution: TOOL_EXECUTION_TTL,
            handoff: HANDOFF_TTL,
            unit: UNIT_TTL,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// What one sweep (or the shutdown flush) removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tools_expired: usize,
    pub handoffs_expired: usize,
    pub units_closed: usize,
    pub phases_orphaned: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.tools_expired + self.handoffs_expired + self.units_closed + self.phases_orphaned
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.tools_expired += other.tools_expired;
        self.handoffs_expired += other.handoffs_expired;
        self.units_closed += other.units_closed;
        self.phases_orphaned += other.phases_orphaned;
    }
}

fn cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl<T> Tracker<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    /// Force-finalize every record older than its table's TTL.
    ///
    /// Safe to call at any time between events; running it twice in a row
    /// is a no-op the second time.
    pub fn sweep(&mut self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::default();

        let tool_cutoff = cutoff(now, self.ttl.tool_execution);
        let stale: Vec<String> = self
            .registry
            .executions()
            .filter(|exec| exec.started_at < tool_cutoff)
            .map(|exec| exec.call_id.clone())
            .collect();
        for call_id in stale {
            let Some(exec) = self.registry.take_execution(&call_id) else {
                continue;
            };
            if let Some(unit) = self.registry.unit(&exec.unit_id) {
                unit.context.mark(
                    markers::TOOL_EXPIRED,
                    now,
                    vec![
                        KeyValue::new(attr::TOOL_NAME, exec.tool.clone()),
                        KeyValue::new(attr::TOOL_CALL_ID, exec.call_id.clone()),
                        KeyValue::new(attr::TOOL_SEQUENCE, to_i64(exec.sequence)),
                        KeyValue::new(
                            attr::TOOL_AGE_MS,
                            duration_ms(elapsed(exec.started_at, now)),
                        ),
                    ],
                );
            }
            warn!(call = %exec.call_id, tool = %exec.tool, unit = %exec.unit_id, "tool execution expired");
            report.tools_expired += 1;
        }

        let handoff_cutoff = cutoff(now, self.ttl.handoff);
        for handoff in self.registry.drain_handoffs_older_than(handoff_cutoff) {
            if let Some(unit) = self.registry.unit(&handoff.dispatcher_id) {
                unit.context.mark(
                    markers::HANDOFF_EXPIRED,
                    now,
                    vec![
                        KeyValue::new(attr::AGENT_TYPE, handoff.delegated_type.clone()),
                        KeyValue::new(attr::TOOL_CALL_ID, handoff.call_id.clone()),
                    ],
                );
            }
            warn!(
                unit = %handoff.dispatcher_id,
                agent = %handoff.delegated_type,
                "handoff expired before the delegate started"
            );
            report.handoffs_expired += 1;
        }

        let unit_cutoff = cutoff(now, self.ttl.unit);
        let stale: Vec<(String, DateTime<Utc>)> = self
            .registry
            .units()
            .filter(|unit| unit.last_seen < unit_cutoff)
            .map(|unit| (unit.id.clone(), unit.last_seen))
            .collect();
        for (id, last_seen) in stale {
            if let Some(unit) = self.registry.unit(&id) {
                unit.context.mark(
                    markers::EXPIRED,
                    now,
                    vec![KeyValue::new(
                        attr::DURATION_MS,
                        duration_ms(elapsed(last_seen, now)),
                    )],
                );
            }
            if let CloseOutcome::Closed(_) =
                self.registry
                    .close_unit(&id, CloseReason::Expired, None, now)
            {
                warn!(unit = %id, "unit expired without a terminating event");
                report.units_closed += 1;
            }
        }

        report.phases_orphaned = self.close_orphans(now);

        if report.is_empty() {
            debug!("sweep found nothing to reap");
        } else {
            info!(?report, "sweep reaped stale records");
        }
        report
    }

    /// Close every live record with `reason`, regardless of age.
    pub fn flush_all(&mut self, reason: CloseReason) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport {
            tools_expired: self.registry.counts().executions,
            handoffs_expired: self.registry.counts().handoffs,
            ..SweepReport::default()
        };

        for id in self.registry.unit_ids() {
            if let CloseOutcome::Closed(_) = self.registry.close_unit(&id, reason, None, now) {
                report.units_closed += 1;
            }
        }
        report.phases_orphaned = self.close_orphans(now);

        info!(reason = reason.as_str(), ?report, "flushed live records");
        report
    }

    fn close_orphans(&mut self, now: DateTime<Utc>) -> usize {
        let mut closed = 0;
        for id in self.registry.phase_ids() {
            if self.registry.unit(&id).is_none() && self.registry.close_orphan_phase(&id, now) {
                warn!(phase = %id, "closed phase without a unit");
                closed += 1;
            }
        }
        closed
    }
}
