//! Observability plumbing for spanloom.
//!
//! This crate provides:
//! - OpenTelemetry tracer provider construction with credential gating
//! - The span, attribute and marker vocabulary shared by the engine
//! - Helpers for marking and finishing spans held in a `Context`

pub mod context;
pub mod tracer;

pub use context::{SpanMarkerExt, SpanStatus, attributes, markers, spans};
pub use tracer::{
    ExportTarget, INSTRUMENTATION_SCOPE, TracerConfig, TracerError, TracingGuard, build_provider,
};
