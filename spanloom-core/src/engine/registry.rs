//! Span registry: the live record tables and the operations that open and
//! close their spans.
//!
//! All tables are keyed by a single id and every mutation is a single-key
//! insert or remove, so a sweep interleaved between two events never sees a
//! half-built unit/phase pair.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use spanloom_observe::{SpanMarkerExt, SpanStatus, attributes as attr, spans};
use tracing::debug;

use super::aggregate::ToolStats;
use super::records::{HandoffRecord, PhaseRecord, ToolExecution, UnitKind, UnitRecord};
use crate::clock::elapsed;

/// Why a unit or phase span was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The unit finished normally.
    Idle,
    /// The host reported the unit as failed.
    Error,
    /// The TTL sweep reaped it.
    Expired,
    /// A phase whose unit disappeared.
    Orphan,
    /// Process shutdown flushed it.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Idle => "idle",
            CloseReason::Error => "error",
            CloseReason::Expired => "expired",
            CloseReason::Orphan => "orphan",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Error details reported by the host for a failed unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub name: Option<String>,
    pub message: Option<String>,
}

impl ErrorInfo {
    fn description(&self) -> String {
        match (&self.name, &self.message) {
            (Some(name), Some(message)) => format!("{name}: {message}"),
            (Some(only), None) | (None, Some(only)) => only.clone(),
            (None, None) => "unit error".to_string(),
        }
    }
}

/// Result of closing a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed(ToolStats),
    /// No live record for that id; nothing was done.
    AlreadyClosed,
}

impl CloseOutcome {
    pub fn stats(&self) -> Option<&ToolStats> {
        match self {
            CloseOutcome::Closed(stats) => Some(stats),
            CloseOutcome::AlreadyClosed => None,
        }
    }
}

/// Attributes known when a unit opens.
#[derive(Debug, Clone)]
pub struct UnitAttrs {
    pub kind: UnitKind,
    pub title: Option<String>,
    pub directory: Option<String>,
    pub parent_id: Option<String>,
    pub delegated_type: Option<String>,
    pub phase: Option<String>,
    pub ticket: Option<String>,
    pub lazy: bool,
}

impl UnitAttrs {
    pub fn root() -> Self {
        Self {
            kind: UnitKind::Root,
            title: None,
            directory: None,
            parent_id: None,
            delegated_type: None,
            phase: None,
            ticket: None,
            lazy: false,
        }
    }

    pub fn lazy_root() -> Self {
        Self {
            lazy: true,
            ..Self::root()
        }
    }

    fn span_name(&self) -> String {
        match (self.kind, &self.delegated_type) {
            (UnitKind::Delegated, Some(agent)) => format!("{}{agent}", spans::AGENT_PREFIX),
            _ => spans::SESSION.to_string(),
        }
    }
}

/// Attributes of a phase.
#[derive(Debug, Clone)]
pub struct PhaseAttrs {
    pub delegated_type: String,
    pub description: Option<String>,
    pub ticket: Option<String>,
}

/// The store of live records.
///
/// Constructed once per process (or per test) and injected into the
/// tracker; nothing here is global.
pub struct SpanRegistry<T: Tracer> {
    tracer: T,
    units: HashMap<String, UnitRecord>,
    phases: HashMap<String, PhaseRecord>,
    handoffs: HashMap<String, VecDeque<HandoffRecord>>,
    executions: HashMap<String, ToolExecution>,
}

impl<T> SpanRegistry<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            units: HashMap::new(),
            phases: HashMap::new(),
            handoffs: HashMap::new(),
            executions: HashMap::new(),
        }
    }

    /// Start a unit record.
    ///
    /// With a parent context the span descends from it, otherwise it starts a
    /// new trace. Opening an id that is already live returns the existing
    /// record untouched.
    pub fn open_unit(
        &mut self,
        id: &str,
        attrs: UnitAttrs,
        parent: Option<&Context>,
        now: DateTime<Utc>,
    ) -> &mut UnitRecord {
        match self.units.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                debug!(unit = id, "unit already open");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let mut initial = vec![
                    KeyValue::new(attr::SESSION_ID, id.to_string()),
                    KeyValue::new(attr::SESSION_KIND, attrs.kind.as_str()),
                    KeyValue::new(attr::SESSION_LAZY, attrs.lazy),
                ];
                optional_attr(&mut initial, attr::SESSION_TITLE, &attrs.title);
                optional_attr(&mut initial, attr::SESSION_DIRECTORY, &attrs.directory);
                optional_attr(&mut initial, attr::SESSION_PARENT_ID, &attrs.parent_id);
                optional_attr(&mut initial, attr::AGENT_TYPE, &attrs.delegated_type);
                optional_attr(&mut initial, attr::PHASE_NAME, &attrs.phase);
                optional_attr(&mut initial, attr::TICKET_ID, &attrs.ticket);

                // Empty context: a root unit always begins a fresh trace.
                let root = Context::new();
                let context = start_span(
                    &self.tracer,
                    attrs.span_name(),
                    initial,
                    parent.unwrap_or(&root),
                    now,
                );

                let mut record = UnitRecord::new(id.to_string(), attrs.kind, context, now);
                record.title = attrs.title;
                record.directory = attrs.directory;
                record.parent_id = attrs.parent_id;
                record.delegated_type = attrs.delegated_type;
                record.phase = attrs.phase;
                record.ticket = attrs.ticket;
                record.lazy = attrs.lazy;

                debug!(unit = id, kind = record.kind.as_str(), lazy = record.lazy, "unit opened");
                entry.insert(record)
            }
        }
    }

    /// Start a phase record under an explicit parent context.
    pub fn open_phase(
        &mut self,
        id: &str,
        name: &str,
        attrs: PhaseAttrs,
        parent: &Context,
        now: DateTime<Utc>,
    ) -> &PhaseRecord {
        match self.phases.entry(id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut initial = vec![
                    KeyValue::new(attr::PHASE_NAME, name.to_string()),
                    KeyValue::new(attr::AGENT_TYPE, attrs.delegated_type.clone()),
                    KeyValue::new(attr::SESSION_ID, id.to_string()),
                ];
                optional_attr(&mut initial, attr::HANDOFF_DESCRIPTION, &attrs.description);
                optional_attr(&mut initial, attr::TICKET_ID, &attrs.ticket);

                let context = start_span(
                    &self.tracer,
                    format!("{}{name}", spans::PHASE_PREFIX),
                    initial,
                    parent,
                    now,
                );
                entry.insert(PhaseRecord {
                    id: id.to_string(),
                    name: name.to_string(),
                    delegated_type: attrs.delegated_type,
                    context,
                    created_at: now,
                    description: attrs.description,
                    ticket: attrs.ticket,
                })
            }
        }
    }

    /// Finalize and remove a unit, closing its phase first.
    ///
    /// The unit's pending tool executions and undelivered handoffs are
    /// dropped with it. Closing an unknown id reports
    /// [`CloseOutcome::AlreadyClosed`].
    pub fn close_unit(
        &mut self,
        id: &str,
        reason: CloseReason,
        error: Option<ErrorInfo>,
        now: DateTime<Utc>,
    ) -> CloseOutcome {
        let Some(unit) = self.units.remove(id) else {
            debug!(unit = id, "close for unknown unit: already closed");
            return CloseOutcome::AlreadyClosed;
        };

        let status = status_for(reason, error.as_ref());

        // Phase first, same end timestamp: the phase span still contains the unit.
        if let Some(phase) = self.phases.remove(id) {
            finish_phase(&phase, reason, &status, now);
        }

        let abandoned = self.drop_executions_for(id);
        self.handoffs.remove(id);

        let stats = unit.tools.stats();
        let mut attributes = vec![
            KeyValue::new(attr::MESSAGES_COUNT, to_i64(unit.message_count)),
            KeyValue::new(attr::TOKENS_INPUT, to_i64(unit.tokens.input)),
            KeyValue::new(attr::TOKENS_OUTPUT, to_i64(unit.tokens.output)),
            KeyValue::new(attr::TOKENS_REASONING, to_i64(unit.tokens.reasoning)),
            KeyValue::new(attr::TOKENS_CACHE_READ, to_i64(unit.tokens.cache_read)),
            KeyValue::new(attr::TOKENS_CACHE_WRITE, to_i64(unit.tokens.cache_write)),
            KeyValue::new(attr::TOOLS_TOTAL_COUNT, to_i64(stats.total_count)),
            KeyValue::new(attr::TOOLS_SUMMARY, stats.summary.clone()),
            KeyValue::new(
                attr::TOOLS_DURATION_MS,
                duration_ms(stats.total_duration),
            ),
            KeyValue::new(attr::TOOLS_ERROR_COUNT, to_i64(stats.error_count)),
            KeyValue::new(attr::TOOLS_ERRORS, stats.errors_json()),
            KeyValue::new(attr::TOOLS_ABANDONED, to_i64(abandoned)),
            KeyValue::new(attr::SUCCESS, status.is_ok()),
            KeyValue::new(
                attr::DURATION_MS,
                duration_ms(elapsed(unit.created_at, now)),
            ),
            KeyValue::new(attr::CLOSE_REASON, reason.as_str()),
        ];
        optional_attr(&mut attributes, attr::SESSION_TITLE, &unit.title);
        optional_attr(&mut attributes, attr::AGENT_MODE, &unit.mode);
        optional_attr(&mut attributes, attr::MODEL_ID, &unit.model_id);
        optional_attr(&mut attributes, attr::PROVIDER_ID, &unit.provider_id);
        optional_attr(&mut attributes, attr::TICKET_ID, &unit.ticket);
        if let Some(error) = &error {
            optional_attr(&mut attributes, attr::ERROR_NAME, &error.name);
            optional_attr(&mut attributes, attr::ERROR_MESSAGE, &error.message);
        }

        unit.context.record_all(attributes);
        unit.context.finish(&status, now);

        debug!(unit = id, reason = reason.as_str(), "unit closed");
        CloseOutcome::Closed(stats)
    }

    /// Force-close a phase whose unit is gone.
    pub fn close_orphan_phase(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.phases.remove(id) {
            Some(phase) => {
                let status = status_for(CloseReason::Orphan, None);
                finish_phase(&phase, CloseReason::Orphan, &status, now);
                true
            }
            None => false,
        }
    }

    fn drop_executions_for(&mut self, unit_id: &str) -> u64 {
        let before = self.executions.len();
        self.executions.retain(|_, exec| exec.unit_id != unit_id);
        (before - self.executions.len()) as u64
    }

    pub fn unit(&self, id: &str) -> Option<&UnitRecord> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: &str) -> Option<&mut UnitRecord> {
        self.units.get_mut(id)
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseRecord> {
        self.phases.get(id)
    }

    /// Oldest pending handoff from a dispatcher.
    pub fn handoff(&self, dispatcher_id: &str) -> Option<&HandoffRecord> {
        self.handoffs.get(dispatcher_id).and_then(VecDeque::front)
    }

    pub fn execution(&self, call_id: &str) -> Option<&ToolExecution> {
        self.executions.get(call_id)
    }

    pub fn push_handoff(&mut self, record: HandoffRecord) {
        self.handoffs
            .entry(record.dispatcher_id.clone())
            .or_default()
            .push_back(record);
    }

    /// Remove and return one handoff from `dispatcher_id`, preferring one
    /// whose delegated type matches `wanted`.
    pub fn take_handoff(
        &mut self,
        dispatcher_id: &str,
        wanted: Option<&str>,
    ) -> Option<HandoffRecord> {
        let queue = self.handoffs.get_mut(dispatcher_id)?;
        let index = wanted
            .and_then(|t| queue.iter().position(|h| h.delegated_type == t))
            .unwrap_or(0);
        let taken = queue.remove(index);
        if queue.is_empty() {
            self.handoffs.remove(dispatcher_id);
        }
        taken
    }

    /// Find the dispatcher holding the oldest pending handoff of a type.
    pub fn find_handoff_by_type(&self, delegated_type: &str) -> Option<String> {
        self.handoffs
            .values()
            .flatten()
            .filter(|h| h.delegated_type == delegated_type)
            .min_by_key(|h| h.created_at)
            .map(|h| h.dispatcher_id.clone())
    }

    pub fn insert_execution(&mut self, exec: ToolExecution) {
        self.executions.insert(exec.call_id.clone(), exec);
    }

    pub fn take_execution(&mut self, call_id: &str) -> Option<ToolExecution> {
        self.executions.remove(call_id)
    }

    pub fn unit_ids(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn phase_ids(&self) -> Vec<String> {
        self.phases.keys().cloned().collect()
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    pub(crate) fn executions(&self) -> impl Iterator<Item = &ToolExecution> {
        self.executions.values()
    }

    /// Drop every handoff created before `cutoff`, returning them.
    pub(crate) fn drain_handoffs_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<HandoffRecord> {
        let mut expired = Vec::new();
        self.handoffs.retain(|_, queue| {
            queue.retain(|h| {
                if h.created_at < cutoff {
                    expired.push(h.clone());
                    false
                } else {
                    true
                }
            });
            !queue.is_empty()
        });
        expired
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            units: self.units.len(),
            phases: self.phases.len(),
            handoffs: self.handoffs.values().map(VecDeque::len).sum(),
            executions: self.executions.len(),
        }
    }
}

/// Sizes of the four record tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub units: usize,
    pub phases: usize,
    pub handoffs: usize,
    pub executions: usize,
}

impl TableCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn start_span<T: Tracer>(
    tracer: &T,
    name: String,
    attributes: Vec<KeyValue>,
    parent: &Context,
    now: DateTime<Utc>,
) -> Context
where
    T::Span: Send + Sync + 'static,
{
    let span = tracer
        .span_builder(name)
        .with_kind(SpanKind::Internal)
        .with_start_time(SystemTime::from(now))
        .with_attributes(attributes)
        .start_with_context(tracer, parent);
    Context::new().with_span(span)
}

fn status_for(reason: CloseReason, error: Option<&ErrorInfo>) -> SpanStatus {
    match reason {
        CloseReason::Idle => SpanStatus::Ok,
        CloseReason::Error => {
            SpanStatus::Error(error.map(ErrorInfo::description).unwrap_or_else(|| "unit error".to_string()))
        }
        other => SpanStatus::Error(other.as_str().to_string()),
    }
}

fn finish_phase(phase: &PhaseRecord, reason: CloseReason, status: &SpanStatus, now: DateTime<Utc>) {
    phase.context.record_all(vec![
        KeyValue::new(attr::SUCCESS, status.is_ok()),
        KeyValue::new(attr::DURATION_MS, duration_ms(elapsed(phase.created_at, now))),
        KeyValue::new(attr::CLOSE_REASON, reason.as_str()),
    ]);
    phase.context.finish(status, now);
}

fn optional_attr(out: &mut Vec<KeyValue>, key: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        out.push(KeyValue::new(key, v.clone()));
    }
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn duration_ms(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Status, TracerProvider as _};
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::{Tracer as SdkTracer, TracerProvider};

    fn registry() -> (SpanRegistry<SdkTracer>, InMemorySpanExporter, TracerProvider) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let registry = SpanRegistry::new(provider.tracer("test"));
        (registry, exporter, provider)
    }

    fn attr_of(span: &opentelemetry_sdk::export::trace::SpanData, key: &str) -> Option<opentelemetry::Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    #[test]
    fn open_unit_is_idempotent() {
        let (mut registry, exporter, _provider) = registry();
        let now = Utc::now();

        registry.open_unit("u1", UnitAttrs::root(), None, now);
        registry.open_unit("u1", UnitAttrs::lazy_root(), None, now);

        assert_eq!(registry.counts().units, 1);
        assert!(!registry.unit("u1").unwrap().lazy);
        registry.close_unit("u1", CloseReason::Idle, None, now);
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
    }

    #[test]
    fn close_unknown_unit_is_already_closed() {
        let (mut registry, exporter, _provider) = registry();
        let outcome = registry.close_unit("ghost", CloseReason::Idle, None, Utc::now());
        assert_eq!(outcome, CloseOutcome::AlreadyClosed);
        assert!(outcome.stats().is_none());
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn close_unit_finishes_phase_with_same_timestamp() {
        let (mut registry, exporter, _provider) = registry();
        let start = Utc::now();
        let end = start + chrono::Duration::seconds(3);

        let parent = registry.open_unit("p1", UnitAttrs::root(), None, start).context.clone();
        let phase_cx = registry
            .open_phase(
                "c1",
                "review",
                PhaseAttrs {
                    delegated_type: "reviewer".to_string(),
                    description: None,
                    ticket: None,
                },
                &parent,
                start,
            )
            .context
            .clone();
        registry.open_unit(
            "c1",
            UnitAttrs {
                kind: UnitKind::Delegated,
                delegated_type: Some("reviewer".to_string()),
                ..UnitAttrs::root()
            },
            Some(&phase_cx),
            start,
        );

        registry.close_unit("c1", CloseReason::Idle, None, end);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "phase:review");
        assert_eq!(spans[1].name, "agent:reviewer");
        assert_eq!(spans[0].end_time, spans[1].end_time);
        assert_eq!(spans[1].parent_span_id, spans[0].span_context.span_id());
        assert!(registry.phase("c1").is_none());
        assert!(registry.unit("p1").is_some());
    }

    #[test]
    fn error_close_carries_error_details() {
        let (mut registry, exporter, _provider) = registry();
        let now = Utc::now();
        registry.open_unit("u1", UnitAttrs::root(), None, now);

        registry.close_unit(
            "u1",
            CloseReason::Error,
            Some(ErrorInfo {
                name: Some("ProviderAuthError".to_string()),
                message: Some("bad key".to_string()),
            }),
            now,
        );

        let spans = exporter.get_finished_spans().unwrap();
        let span = &spans[0];
        assert_eq!(
            span.status,
            Status::error("ProviderAuthError: bad key")
        );
        assert_eq!(attr_of(span, attr::SUCCESS), Some(false.into()));
        assert_eq!(
            attr_of(span, attr::ERROR_NAME),
            Some("ProviderAuthError".to_string().into())
        );
    }

    #[test]
    fn close_drops_pending_executions_and_handoffs() {
        let (mut registry, exporter, _provider) = registry();
        let now = Utc::now();
        let parent = registry.open_unit("u1", UnitAttrs::root(), None, now).context.snapshot();
        registry.insert_execution(ToolExecution {
            call_id: "c1".to_string(),
            unit_id: "u1".to_string(),
            tool: "bash".to_string(),
            started_at: now,
            sequence: 1,
            args_preview: String::new(),
        });
        registry.push_handoff(HandoffRecord {
            dispatcher_id: "u1".to_string(),
            call_id: "c2".to_string(),
            delegated_type: "worker".to_string(),
            description: None,
            parent,
            created_at: now,
        });

        registry.close_unit("u1", CloseReason::Idle, None, now);

        assert!(registry.counts().is_empty());
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(attr_of(&spans[0], attr::TOOLS_ABANDONED), Some(1i64.into()));
    }

    #[test]
    fn take_handoff_prefers_matching_type() {
        let (mut registry, _exporter, _provider) = registry();
        let now = Utc::now();
        let parent = registry.open_unit("u1", UnitAttrs::root(), None, now).context.snapshot();
        for (call, agent) in [("c1", "explore"), ("c2", "worker")] {
            registry.push_handoff(HandoffRecord {
                dispatcher_id: "u1".to_string(),
                call_id: call.to_string(),
                delegated_type: agent.to_string(),
                description: None,
                parent: parent.clone(),
                created_at: now,
            });
        }

        assert_eq!(registry.find_handoff_by_type("worker").as_deref(), Some("u1"));
        let taken = registry.take_handoff("u1", Some("worker")).unwrap();
        assert_eq!(taken.call_id, "c2");
        assert_eq!(registry.handoff("u1").unwrap().call_id, "c1");
        let taken = registry.take_handoff("u1", Some("worker")).unwrap();
        assert_eq!(taken.call_id, "c1");
        assert!(registry.handoff("u1").is_none());
        assert!(registry.take_handoff("u1", None).is_none());
    }
}
