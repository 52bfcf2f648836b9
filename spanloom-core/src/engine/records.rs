//! Live record types held by the span registry.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use opentelemetry::Context;
use opentelemetry::trace::SpanContext;

use crate::hooks::{MessageUpdatedData, TokenCounts};

use super::aggregate::ToolAggregate;

/// Whether a unit started its own trace or descends from a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Root,
    Delegated,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Root => "root",
            UnitKind::Delegated => "delegated",
        }
    }
}

/// One executing work item.
#[derive(Debug)]
pub struct UnitRecord {
    pub id: String,
    pub kind: UnitKind,
    /// Trace context holding the unit's live span.
    pub context: Context,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub title: Option<String>,
    pub directory: Option<String>,
    pub parent_id: Option<String>,
    pub phase: Option<String>,
    pub delegated_type: Option<String>,
    pub mode: Option<String>,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub ticket: Option<String>,
    /// Synthesized without a creation event.
    pub lazy: bool,
    pub tools: ToolAggregate,
    pub message_count: u64,
    pub tokens: TokenCounts,
    next_sequence: u64,
    seen_messages: HashSet<String>,
    finalized_messages: HashSet<String>,
}

impl UnitRecord {
    pub(crate) fn new(id: String, kind: UnitKind, context: Context, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            context,
            created_at: now,
            last_seen: now,
            title: None,
            directory: None,
            parent_id: None,
            phase: None,
            delegated_type: None,
            mode: None,
            model_id: None,
            provider_id: None,
            ticket: None,
            lazy: false,
            tools: ToolAggregate::new(),
            message_count: 0,
            tokens: TokenCounts::default(),
            next_sequence: 0,
            seen_messages: HashSet::new(),
            finalized_messages: HashSet::new(),
        }
    }

    /// Allocate the next tool sequence number (1-based, strictly increasing).
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Fold a message update into the unit's counters.
    ///
    /// A message id is counted once; its tokens are added once, when the
    /// message is reported completed. Updates without an id only count when
    /// completed.
    pub fn record_message(&mut self, data: &MessageUpdatedData) {
        if let Some(mode) = &data.mode {
            self.mode = Some(mode.clone());
        }
        if let Some(model) = &data.model_id {
            self.model_id = Some(model.clone());
        }
        if let Some(provider) = &data.provider_id {
            self.provider_id = Some(provider.clone());
        }

        let add_tokens = match &data.message_id {
            Some(id) => {
                if self.seen_messages.insert(id.clone()) {
                    self.message_count += 1;
                }
                data.completed && self.finalized_messages.insert(id.clone())
            }
            None => {
                if data.completed {
                    self.message_count += 1;
                }
                data.completed
            }
        };

        if add_tokens && let Some(tokens) = &data.tokens {
            self.tokens.input = self.tokens.input.saturating_add(tokens.input);
            self.tokens.output = self.tokens.output.saturating_add(tokens.output);
            self.tokens.reasoning = self.tokens.reasoning.saturating_add(tokens.reasoning);
            self.tokens.cache_read = self.tokens.cache_read.saturating_add(tokens.cache_read);
            self.tokens.cache_write = self.tokens.cache_write.saturating_add(tokens.cache_write);
        }
    }
}

/// The workflow stage wrapping a delegated unit, keyed by the unit's id.
#[derive(Debug)]
pub struct PhaseRecord {
    pub id: String,
    pub name: String,
    pub delegated_type: String,
    pub context: Context,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
    pub ticket: Option<String>,
}

/// Bridge from a dispatching unit to the unit it delegated to.
#[derive(Debug, Clone)]
pub struct HandoffRecord {
    /// Id of the dispatching unit.
    pub dispatcher_id: String,
    pub call_id: String,
    pub delegated_type: String,
    pub description: Option<String>,
    /// Dispatcher span identity at dispatch time.
    pub parent: SpanContext,
    pub created_at: DateTime<Utc>,
}

/// In-flight tool invocation.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub call_id: String,
    pub unit_id: String,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub sequence: u64,
    pub args_preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::MessageRole;

    fn unit() -> UnitRecord {
        UnitRecord::new("u1".to_string(), UnitKind::Root, Context::new(), Utc::now())
    }

    fn message(id: Option<&str>, completed: bool, input: u64) -> MessageUpdatedData {
        MessageUpdatedData {
            unit_id: "u1".to_string(),
            message_id: id.map(str::to_string),
            role: MessageRole::Assistant,
            mode: Some("build".to_string()),
            model_id: Some("claude-sonnet-4".to_string()),
            provider_id: Some("anthropic".to_string()),
            tokens: Some(TokenCounts {
                input,
                output: 5,
                ..Default::default()
            }),
            completed,
        }
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut unit = unit();
        assert_eq!(unit.next_sequence(), 1);
        assert_eq!(unit.next_sequence(), 2);
        assert_eq!(unit.next_sequence(), 3);
    }

    #[test]
    fn streaming_updates_count_once() {
        let mut unit = unit();
        unit.record_message(&message(Some("m1"), false, 100));
        unit.record_message(&message(Some("m1"), false, 120));
        unit.record_message(&message(Some("m1"), true, 150));
        unit.record_message(&message(Some("m1"), true, 150));

        assert_eq!(unit.message_count, 1);
        assert_eq!(unit.tokens.input, 150);
        assert_eq!(unit.tokens.output, 5);
        assert_eq!(unit.model_id.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(unit.mode.as_deref(), Some("build"));
    }

    #[test]
    fn anonymous_messages_count_when_completed() {
        let mut unit = unit();
        unit.record_message(&message(None, false, 10));
        unit.record_message(&message(None, true, 10));
        assert_eq!(unit.message_count, 1);
        assert_eq!(unit.tokens.input, 10);
    }

    #[test]
    fn token_totals_saturate_instead_of_overflowing() {
        let mut unit = unit();
        unit.record_message(&message(Some("m1"), true, u64::MAX));
        unit.record_message(&message(Some("m2"), true, 1));

        assert_eq!(unit.message_count, 2);
        assert_eq!(unit.tokens.input, u64::MAX);
        assert_eq!(unit.tokens.output, 10);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut unit = unit();
        let later = unit.last_seen + chrono::Duration::seconds(10);
        unit.touch(later);
        unit.touch(later - chrono::Duration::seconds(5));
        assert_eq!(unit.last_seen, later);
    }

    #[test]
    fn unit_kind_labels() {
        assert_eq!(UnitKind::Root.as_str(), "root");
        assert_eq!(UnitKind::Delegated.as_str(), "delegated");
    }
}
