//! Per-unit tool execution statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of error-log entries retained per unit.
pub const MAX_TOOL_ERRORS: usize = 20;

/// One failed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolErrorEntry {
    pub tool: String,
    pub message: String,
    pub at: DateTime<Utc>,
    pub call_id: String,
    pub sequence: u64,
}

/// Accumulates tool activity for a single unit.
///
/// Owned exclusively by its unit record and flushed into the unit span when
/// the unit closes.
#[derive(Debug, Clone, Default)]
pub struct ToolAggregate {
    counts: BTreeMap<String, u64>,
    errors: Vec<ToolErrorEntry>,
    error_count: u64,
    total_duration: Duration,
    total_count: u64,
}

impl ToolAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one started invocation of `tool`.
    pub fn record_start(&mut self, tool: &str) {
        *self.counts.entry(tool.to_string()).or_default() += 1;
        self.total_count += 1;
    }

    pub fn add_duration(&mut self, elapsed: Duration) {
        self.total_duration += elapsed;
    }

    /// Append to the error log. Entries past [`MAX_TOOL_ERRORS`] are counted
    /// but not retained.
    pub fn record_error(&mut self, entry: ToolErrorEntry) {
        self.error_count += 1;
        if self.errors.len() < MAX_TOOL_ERRORS {
            self.errors.push(entry);
        }
    }

    pub fn count_for(&self, tool: &str) -> u64 {
        self.counts.get(tool).copied().unwrap_or(0)
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn errors(&self) -> &[ToolErrorEntry] {
        &self.errors
    }

    /// Summarize for the unit span.
    pub fn stats(&self) -> ToolStats {
        ToolStats {
            total_count: self.total_count,
            summary: self
                .counts
                .iter()
                .map(|(name, count)| format!("{name}:{count}"))
                .collect::<Vec<_>>()
                .join(","),
            total_duration: self.total_duration,
            error_count: self.error_count,
            errors: self.errors.clone(),
        }
    }
}

/// Flushed summary of a [`ToolAggregate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolStats {
    pub total_count: u64,
    /// `name:count` pairs, comma-joined and sorted by tool name.
    pub summary: String,
    pub total_duration: Duration,
    pub error_count: u64,
    pub errors: Vec<ToolErrorEntry>,
}

impl ToolStats {
    /// The retained error log as a JSON array.
    pub fn errors_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sequence: u64) -> ToolErrorEntry {
        ToolErrorEntry {
            tool: "bash".to_string(),
            message: "exit 1".to_string(),
            at: Utc::now(),
            call_id: format!("c{sequence}"),
            sequence,
        }
    }

    #[test]
    fn counts_by_tool_name() {
        let mut agg = ToolAggregate::new();
        agg.record_start("read");
        agg.record_start("bash");
        agg.record_start("read");

        assert_eq!(agg.count_for("read"), 2);
        assert_eq!(agg.count_for("bash"), 1);
        assert_eq!(agg.count_for("edit"), 0);
        assert_eq!(agg.total_count(), 3);
        assert_eq!(agg.stats().summary, "bash:1,read:2");
    }

    #[test]
    fn durations_accumulate() {
        let mut agg = ToolAggregate::new();
        agg.add_duration(Duration::from_millis(50));
        agg.add_duration(Duration::from_millis(25));
        assert_eq!(agg.stats().total_duration, Duration::from_millis(75));
    }

    #[test]
    fn error_log_is_capped_but_counted() {
        let mut agg = ToolAggregate::new();
        for i in 0..(MAX_TOOL_ERRORS as u64 + 5) {
            agg.record_error(entry(i));
        }

        let stats = agg.stats();
        assert_eq!(stats.errors.len(), MAX_TOOL_ERRORS);
        assert_eq!(stats.error_count, MAX_TOOL_ERRORS as u64 + 5);
        assert_eq!(stats.errors[0].sequence, 0);
    }

    #[test]
    fn empty_stats() {
        let stats = ToolAggregate::new().stats();
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.summary, "");
        assert_eq!(stats.errors_json(), "[]");
    }

    #[test]
    fn errors_serialize_as_json_array() {
        let mut agg = ToolAggregate::new();
        agg.record_error(entry(3));
        let json = agg.stats().errors_json();
        assert!(json.starts_with('['));
        assert!(json.contains(r#""call_id":"c3""#));
        assert!(json.contains(r#""sequence":3"#));
    }
}
