//! Span vocabulary and marker helpers for spanloom traces.
//!
//! This module provides:
//! - Standard span, attribute and marker names for consistent telemetry
//! - `SpanStatus` for the final outcome of a unit or phase span
//! - `SpanMarkerExt` for annotating and finishing the span held by a `Context`

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use opentelemetry::trace::{SpanContext, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

/// Span names produced by the engine.
pub mod spans {
    /// Root unit span.
    pub const SESSION: &str = "session";
    /// Prefix for delegated unit spans (`agent:<type>`).
    pub const AGENT_PREFIX: &str = "agent:";
    /// Prefix for phase spans (`phase:<phase>`).
    pub const PHASE_PREFIX: &str = "phase:";
}

/// Standard attribute names for spanloom telemetry.
pub mod attributes {
    pub const SESSION_ID: &str = "session.id";
    pub const SESSION_TITLE: &str = "session.title";
    pub const SESSION_KIND: &str = "session.kind";
    pub const SESSION_LAZY: &str = "session.lazy";
    pub const SESSION_DIRECTORY: &str = "session.directory";
    pub const SESSION_PARENT_ID: &str = "session.parent_id";
    pub const AGENT_TYPE: &str = "agent.type";
    pub const AGENT_MODE: &str = "agent.mode";
    pub const PHASE_NAME: &str = "phase.name";
    pub const MODEL_ID: &str = "model.id";
    pub const PROVIDER_ID: &str = "provider.id";
    pub const TICKET_ID: &str = "ticket.id";
    pub const HANDOFF_DESCRIPTION: &str = "handoff.description";
    pub const MESSAGES_COUNT: &str = "messages.count";
    pub const TOKENS_INPUT: &str = "tokens.input";
    pub const TOKENS_OUTPUT: &str = "tokens.output";
    pub const TOKENS_REASONING: &str = "tokens.reasoning";
    pub const TOKENS_CACHE_READ: &str = "tokens.cache_read";
    pub const TOKENS_CACHE_WRITE: &str = "tokens.cache_write";
    pub const TOOLS_TOTAL_COUNT: &str = "tools.total_count";
    pub const TOOLS_SUMMARY: &str = "tools.summary";
    pub const TOOLS_DURATION_MS: &str = "tools.duration_ms";
    pub const TOOLS_ERROR_COUNT: &str = "tools.error_count";
    pub const TOOLS_ERRORS: &str = "tools.errors";
    pub const TOOLS_ABANDONED: &str = "tools.abandoned";
    pub const SUCCESS: &str = "success";
    pub const DURATION_MS: &str = "duration_ms";
    pub const CLOSE_REASON: &str = "close.reason";
    pub const ERROR_NAME: &str = "error.name";
    pub const ERROR_MESSAGE: &str = "error.message";

    // Marker attributes
    pub const TOOL_NAME: &str = "tool.name";
    pub const TOOL_CALL_ID: &str = "tool.call_id";
    pub const TOOL_SEQUENCE: &str = "tool.sequence";
    pub const TOOL_ARGS_PREVIEW: &str = "tool.args_preview";
    pub const TOOL_OUTPUT_PREVIEW: &str = "tool.output_preview";
    pub const TOOL_DURATION_MS: &str = "tool.duration_ms";
    pub const TOOL_REPORTED_DURATION_MS: &str = "tool.reported_duration_ms";
    pub const TOOL_AGE_MS: &str = "tool.age_ms";
}

/// Point-in-time markers added to unit spans.
pub mod markers {
    pub const TOOL_START: &str = "tool.start";
    pub const TOOL_END: &str = "tool.end";
    pub const TOOL_ERROR: &str = "tool.error";
    pub const TOOL_EXPIRED: &str = "tool.expired";
    pub const HANDOFF_CREATED: &str = "handoff.created";
    pub const HANDOFF_EXPIRED: &str = "handoff.expired";
    pub const EXPIRED: &str = "expired";
    pub const CORRELATION_UNRESOLVED: &str = "correlation.unresolved";
}

/// Final status of a unit or phase span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    /// Span completed successfully
    #[default]
    Ok,
    /// Span completed with an error
    Error(String),
}

impl SpanStatus {
    /// Whether this status counts as success.
    pub fn is_ok(&self) -> bool {
        matches!(self, SpanStatus::Ok)
    }

    fn to_otel(&self) -> Status {
        match self {
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error(description) => Status::error(description.clone()),
        }
    }
}

/// Extension trait for `opentelemetry::Context` carrying a live span.
///
/// All timestamps are supplied by the caller so span timing follows the
/// engine clock rather than the wall clock at call time.
pub trait SpanMarkerExt {
    /// Add a point-in-time marker to the span.
    fn mark(&self, name: &'static str, at: DateTime<Utc>, attributes: Vec<KeyValue>);

    /// Set attributes on the span.
    fn record_all(&self, attributes: Vec<KeyValue>);

    /// Set the final status and end the span.
    fn finish(&self, status: &SpanStatus, at: DateTime<Utc>);

    /// Snapshot the propagable identity of the span.
    fn snapshot(&self) -> SpanContext;
}

impl SpanMarkerExt for Context {
    fn mark(&self, name: &'static str, at: DateTime<Utc>, attributes: Vec<KeyValue>) {
        self.span()
            .add_event_with_timestamp(name, SystemTime::from(at), attributes);
    }

    fn record_all(&self, attributes: Vec<KeyValue>) {
        self.span().set_attributes(attributes);
    }

    fn finish(&self, status: &SpanStatus, at: DateTime<Utc>) {
        let span = self.span();
        span.set_status(status.to_otel());
        span.end_with_timestamp(SystemTime::from(at));
    }

    fn snapshot(&self) -> SpanContext {
        self.span().span_context().clone()
    }
}
