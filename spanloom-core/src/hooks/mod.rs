//! Host event ingestion
//!
//! The agent host reports unit lifecycle, message and tool activity as
//! newline-delimited JSON. A small hook script pipes each event into
//! `spanloom send`, which writes it to the receiver socket.
//!
//! ## Event Types
//!
//! - **session.created / session.idle / session.error** - unit lifecycle
//! - **message.updated** - model, mode and token usage of a unit
//! - **message.part.updated** - tool invocation status changes
//! - **tool.execute.before / tool.execute.after** - hooks bracketing each tool call
//!
//! ## Architecture
//!
//! ```text
//! Agent host ---> Hook Script ---> spanloom send ---> Unix Socket ---> HookReceiver ---> Dispatcher
//! ```

mod receiver;
mod types;

pub use receiver::{HookReceiver, HookReceiverConfig, forward_lines};
pub use types::{
    EventKind, HostEvent, MessageRole, MessageUpdatedData, TokenCounts, ToolAfterData,
    ToolBeforeData, ToolPartStatus, ToolPartUpdatedData, UnitCreatedData, UnitErrorData,
    UnitIdleData,
};
