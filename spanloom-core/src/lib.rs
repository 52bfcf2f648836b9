//! spanloom-core: trace correlation for multi-agent hosts
//!
//! This crate turns the lifecycle event stream of an agent host into a
//! nested OpenTelemetry trace:
//!
//! - **Host events** - [`HostEvent`] and the socket [`HookReceiver`] feeding it
//! - **Correlation** - [`Tracker`] classifies units as root or delegated and
//!   attaches delegated units to their dispatcher's trace
//! - **Tool activity** - per-unit aggregates and span markers
//! - **Garbage collection** - TTL sweeps that guarantee every span closes
//! - **Dispatch** - [`Dispatcher`] drives all of the above from one task
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use opentelemetry::trace::TracerProvider as _;
//! use opentelemetry_sdk::trace::TracerProvider;
//! use spanloom_core::{Dispatcher, HostEvent, SystemClock, Tracker};
//!
//! let provider = TracerProvider::builder().build();
//! let tracker = Tracker::new(provider.tracer("spanloom"), Arc::new(SystemClock));
//! let mut dispatcher = Dispatcher::new(tracker);
//!
//! let event = HostEvent::from_json_line(r#"{"type":"session.created","id":"u1"}"#)?;
//! dispatcher.handle(event);
//! # Ok::<(), spanloom_core::EventDecodeError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   mpsc    ┌────────────────────────────────────┐
//! │ HookReceiver │ ────────► │ Dispatcher (single task)           │
//! └──────────────┘           │  ┌──────────────────────────────┐  │
//!                            │  │ Tracker                      │  │
//!                            │  │  correlation · tools · gc    │  │
//!                            │  │  ┌────────────────────────┐  │  │
//!                            │  │  │ SpanRegistry           │  │  │
//!                            │  │  │ units phases handoffs  │  │  │
//!                            │  │  │ executions             │  │  │
//!                            │  │  └────────────────────────┘  │  │
//!                            │  └──────────────────────────────┘  │
//!                            └─────────────────┬──────────────────┘
//!                                              ▼
//!                                   OpenTelemetry exporter
//! ```

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod extract;
pub mod hooks;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Dispatcher, RunSummary};
pub use engine::{
    CloseOutcome, CloseReason, Correlation, CorrelationPolicy, DelegationSignal, ErrorInfo,
    ParentSource, SpanRegistry, SweepReport, ToolStats, Tracker, TtlPolicy,
};
pub use error::{EventDecodeError, SpanloomError};
pub use hooks::{HookReceiver, HookReceiverConfig, HostEvent};
