//! Error types for spanloom-core
//!
//! The correlation engine itself never fails towards the host: every
//! abnormal condition degrades to a less complete trace. These errors cover
//! the edges around it (event decoding, the receiver socket, telemetry setup).

use thiserror::Error;

use spanloom_observe::TracerError;

/// Top-level error type for spanloom-core
#[derive(Error, Debug)]
pub enum SpanloomError {
    #[error("Receiver error: {0}")]
    Receiver(#[from] std::io::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TracerError),

    #[error("Event decode error: {0}")]
    Decode(#[from] EventDecodeError),
}

/// Errors decoding one line of the host event stream
#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error("Empty event line")]
    Empty,

    #[error("Malformed or unknown event: {0}")]
    Json(#[from] serde_json::Error),
}
