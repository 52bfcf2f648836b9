//! Host event types
//!
//! These types represent the lifecycle events and tool hooks emitted by the
//! agent host, one JSON object per line, tagged by `type`.
//!
//! The enum is closed: unknown tags fail to decode and are logged by the
//! receiver instead of reaching the engine.

use serde::{Deserialize, Serialize};

use crate::error::EventDecodeError;

/// Kind of host event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    UnitCreated,
    UnitIdle,
    UnitError,
    MessageUpdated,
    ToolPartUpdated,
    ToolBefore,
    ToolAfter,
}

impl EventKind {
    /// Wire tag of this event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UnitCreated => "session.created",
            EventKind::UnitIdle => "session.idle",
            EventKind::UnitError => "session.error",
            EventKind::MessageUpdated => "message.updated",
            EventKind::ToolPartUpdated => "message.part.updated",
            EventKind::ToolBefore => "tool.execute.before",
            EventKind::ToolAfter => "tool.execute.after",
        }
    }
}

/// A unit (session) was created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCreatedData {
    /// Correlation id of the new unit
    pub id: String,
    /// Id of the unit that spawned this one, when the host reports it
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Free-text title
    #[serde(default)]
    pub title: Option<String>,
    /// Working directory of the unit
    #[serde(default)]
    pub directory: Option<String>,
}

/// A unit finished its work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitIdleData {
    pub id: String,
}

/// A unit failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitErrorData {
    pub id: String,
    #[serde(default)]
    pub error_name: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Token counts reported on an assistant message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
}

/// Role of a message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A message inside a unit was created or updated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdatedData {
    pub unit_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub role: MessageRole,
    /// Agent mode the message was produced in
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub tokens: Option<TokenCounts>,
    /// Whether the message is final
    #[serde(default)]
    pub completed: bool,
}

/// Status of a tool invocation part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPartStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// A tool invocation part changed status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPartUpdatedData {
    pub call_id: String,
    pub unit_id: String,
    #[serde(default)]
    pub tool: Option<String>,
    pub status: ToolPartStatus,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Hook fired before a tool runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBeforeData {
    pub unit_id: String,
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Hook fired after a tool returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAfterData {
    pub call_id: String,
    pub tool: String,
    /// Short summary of the tool output
    #[serde(default)]
    pub output: Option<String>,
    /// Duration as measured by the host
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// An event received from the agent host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostEvent {
    #[serde(rename = "session.created")]
    UnitCreated(UnitCreatedData),
    #[serde(rename = "session.idle")]
    UnitIdle(UnitIdleData),
    #[serde(rename = "session.error")]
    UnitError(UnitErrorData),
    #[serde(rename = "message.updated")]
    MessageUpdated(MessageUpdatedData),
    #[serde(rename = "message.part.updated")]
    ToolPartUpdated(ToolPartUpdatedData),
    #[serde(rename = "tool.execute.before")]
    ToolBefore(ToolBeforeData),
    #[serde(rename = "tool.execute.after")]
    ToolAfter(ToolAfterData),
}

impl HostEvent {
    /// Decode one line of the host event stream
    pub fn from_json_line(line: &str) -> Result<Self, EventDecodeError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(EventDecodeError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Get the unit id this event belongs to, if it carries one
    ///
    /// `tool.execute.after` only carries a call id.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            HostEvent::UnitCreated(data) => Some(&data.id),
            HostEvent::UnitIdle(data) => Some(&data.id),
            HostEvent::UnitError(data) => Some(&data.id),
            HostEvent::MessageUpdated(data) => Some(&data.unit_id),
            HostEvent::ToolPartUpdated(data) => Some(&data.unit_id),
            HostEvent::ToolBefore(data) => Some(&data.unit_id),
            HostEvent::ToolAfter(_) => None,
        }
    }

    /// Get the event kind
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::UnitCreated(_) => EventKind::UnitCreated,
            HostEvent::UnitIdle(_) => EventKind::UnitIdle,
            HostEvent::UnitError(_) => EventKind::UnitError,
            HostEvent::MessageUpdated(_) => EventKind::MessageUpdated,
            HostEvent::ToolPartUpdated(_) => EventKind::ToolPartUpdated,
            HostEvent::ToolBefore(_) => EventKind::ToolBefore,
            HostEvent::ToolAfter(_) => EventKind::ToolAfter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_created_decoding() {
        let line = r#"{"type":"session.created","id":"u2","parent_id":"u1","title":"Scan repo (@explore subagent)"}"#;
        let event = HostEvent::from_json_line(line).unwrap();

        assert_eq!(event.kind(), EventKind::UnitCreated);
        assert_eq!(event.unit_id(), Some("u2"));
        let HostEvent::UnitCreated(data) = event else {
            panic!("expected UnitCreated");
        };
        assert_eq!(data.parent_id.as_deref(), Some("u1"));
        assert!(data.directory.is_none());
    }

    #[test]
    fn test_tool_before_serialization() {
        let event = HostEvent::ToolBefore(ToolBeforeData {
            unit_id: "u1".to_string(),
            call_id: "c1".to_string(),
            tool: "bash".to_string(),
            args: serde_json::json!({"command": "ls -la"}),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool.execute.before""#));
        assert!(json.contains("ls -la"));

        let parsed = HostEvent::from_json_line(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_tool_after_has_no_unit_id() {
        let line = r#"{"type":"tool.execute.after","call_id":"c1","tool":"read"}"#;
        let event = HostEvent::from_json_line(line).unwrap();
        assert_eq!(event.kind(), EventKind::ToolAfter);
        assert!(event.unit_id().is_none());
    }

    #[test]
    fn test_message_updated_defaults() {
        let line = r#"{"type":"message.updated","unit_id":"u1","role":"assistant","tokens":{"input":10}}"#;
        let HostEvent::MessageUpdated(data) = HostEvent::from_json_line(line).unwrap() else {
            panic!("expected MessageUpdated");
        };
        assert_eq!(data.role, MessageRole::Assistant);
        assert!(!data.completed);
        let tokens = data.tokens.unwrap();
        assert_eq!(tokens.input, 10);
        assert_eq!(tokens.output, 0);
    }

    #[test]
    fn test_tool_part_status_decoding() {
        let line = r#"{"type":"message.part.updated","call_id":"c9","unit_id":"u1","status":"error","error":"permission denied"}"#;
        let HostEvent::ToolPartUpdated(data) = HostEvent::from_json_line(line).unwrap() else {
            panic!("expected ToolPartUpdated");
        };
        assert_eq!(data.status, ToolPartStatus::Error);
        assert_eq!(data.error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let line = r#"{"type":"session.compacted","id":"u1"}"#;
        assert!(matches!(
            HostEvent::from_json_line(line),
            Err(EventDecodeError::Json(_))
        ));
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let line = r#"{"type":"session.idle"}"#;
        assert!(HostEvent::from_json_line(line).is_err());
    }

    #[test]
    fn test_blank_line_is_empty_error() {
        assert!(matches!(
            HostEvent::from_json_line("   "),
            Err(EventDecodeError::Empty)
        ));
    }

    #[test]
    fn test_kind_tags_match_wire_names() {
        let event = HostEvent::UnitError(UnitErrorData {
            id: "u1".to_string(),
            error_name: Some("ProviderAuthError".to_string()),
            error_message: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind().as_str());
    }
}
