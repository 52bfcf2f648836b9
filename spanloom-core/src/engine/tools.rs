//! Tool activity recorder: tool start/end/error signals become aggregate
//! updates and markers on the owning unit span.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::Tracer;
use serde_json::Value;
use spanloom_observe::{SpanMarkerExt, attributes as attr, markers};
use tracing::{debug, info};

use super::Tracker;
use super::aggregate::ToolErrorEntry;
use super::records::{HandoffRecord, ToolExecution};
use super::registry::{duration_ms, to_i64};
use crate::clock::elapsed;
use crate::extract::{OUTPUT_PREVIEW_CHARS, args_preview, delegate_request, preview};
use crate::hooks::{ToolPartStatus, ToolPartUpdatedData};

impl<T> Tracker<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    /// Record the start of a tool invocation.
    ///
    /// Opens the unit lazily if no creation event was seen. A delegate-work
    /// tool also queues a handoff carrying the unit's span identity.
    /// Returns the allocated sequence number, or `None` when the call id is
    /// already in flight.
    pub fn on_tool_start(
        &mut self,
        unit_id: &str,
        call_id: &str,
        tool: &str,
        args: &Value,
    ) -> Option<u64> {
        if self.registry.execution(call_id).is_some() {
            debug!(call = call_id, "tool start already recorded");
            return None;
        }

        let now = self.now();
        let args_preview = args_preview(args);
        let request = delegate_request(tool, args);

        let unit = self.ensure_unit(unit_id, now);
        let sequence = unit.next_sequence();
        unit.tools.record_start(tool);
        unit.context.mark(
            markers::TOOL_START,
            now,
            vec![
                KeyValue::new(attr::TOOL_NAME, tool.to_string()),
                KeyValue::new(attr::TOOL_CALL_ID, call_id.to_string()),
                KeyValue::new(attr::TOOL_SEQUENCE, to_i64(sequence)),
                KeyValue::new(attr::TOOL_ARGS_PREVIEW, args_preview.clone()),
            ],
        );

        let handoff = request.map(|request| {
            let mut marker = vec![
                KeyValue::new(attr::AGENT_TYPE, request.delegated_type.clone()),
                KeyValue::new(attr::TOOL_CALL_ID, call_id.to_string()),
            ];
            if let Some(description) = &request.description {
                marker.push(KeyValue::new(attr::HANDOFF_DESCRIPTION, description.clone()));
            }
            unit.context.mark(markers::HANDOFF_CREATED, now, marker);

            HandoffRecord {
                dispatcher_id: unit_id.to_string(),
                call_id: call_id.to_string(),
                delegated_type: request.delegated_type,
                description: request.description,
                parent: unit.context.snapshot(),
                created_at: now,
            }
        });

        if let Some(handoff) = handoff {
            info!(
                unit = unit_id,
                agent = %handoff.delegated_type,
                "handoff queued"
            );
            self.registry.push_handoff(handoff);
        }

        self.registry.insert_execution(ToolExecution {
            call_id: call_id.to_string(),
            unit_id: unit_id.to_string(),
            tool: tool.to_string(),
            started_at: now,
            sequence,
            args_preview,
        });
        Some(sequence)
    }

    /// Record a completed invocation.
    ///
    /// Elapsed time is measured from the recorded start; the host's own
    /// duration, when given, is kept alongside as
    /// `tool.reported_duration_ms`. Unknown call ids are ignored.
    pub fn on_tool_end(
        &mut self,
        call_id: &str,
        output: Option<&str>,
        reported_ms: Option<u64>,
    ) -> Option<Duration> {
        let now = self.now();
        let Some(exec) = self.registry.take_execution(call_id) else {
            debug!(call = call_id, "tool end for unknown call");
            return None;
        };
        let took = elapsed(exec.started_at, now);

        if let Some(unit) = self.registry.unit_mut(&exec.unit_id) {
            unit.touch(now);
            unit.tools.add_duration(took);

            let mut marker = vec![
                KeyValue::new(attr::TOOL_NAME, exec.tool.clone()),
                KeyValue::new(attr::TOOL_CALL_ID, exec.call_id.clone()),
                KeyValue::new(attr::TOOL_SEQUENCE, to_i64(exec.sequence)),
                KeyValue::new(attr::TOOL_DURATION_MS, duration_ms(took)),
            ];
            if let Some(ms) = reported_ms {
                marker.push(KeyValue::new(attr::TOOL_REPORTED_DURATION_MS, to_i64(ms)));
            }
            if let Some(output) = output {
                marker.push(KeyValue::new(
                    attr::TOOL_OUTPUT_PREVIEW,
                    preview(output, OUTPUT_PREVIEW_CHARS),
                ));
            }
            unit.context.mark(markers::TOOL_END, now, marker);
        }
        Some(took)
    }

    /// Record a failed invocation. Returns whether a pending call was found.
    pub fn on_tool_error(&mut self, call_id: &str, message: &str) -> bool {
        let now = self.now();
        let Some(exec) = self.registry.take_execution(call_id) else {
            debug!(call = call_id, "tool error for unknown call");
            return false;
        };
        let took = elapsed(exec.started_at, now);
        let message = preview(message, OUTPUT_PREVIEW_CHARS);

        if let Some(unit) = self.registry.unit_mut(&exec.unit_id) {
            unit.touch(now);
            unit.tools.add_duration(took);
            unit.tools.record_error(ToolErrorEntry {
                tool: exec.tool.clone(),
                message: message.clone(),
                at: now,
                call_id: exec.call_id.clone(),
                sequence: exec.sequence,
            });
            unit.context.mark(
                markers::TOOL_ERROR,
                now,
                vec![
                    KeyValue::new(attr::TOOL_NAME, exec.tool.clone()),
                    KeyValue::new(attr::TOOL_CALL_ID, exec.call_id.clone()),
                    KeyValue::new(attr::TOOL_SEQUENCE, to_i64(exec.sequence)),
                    KeyValue::new(attr::TOOL_DURATION_MS, duration_ms(took)),
                    KeyValue::new(attr::ERROR_MESSAGE, message),
                ],
            );
        }
        true
    }

    /// Apply a tool part progress update.
    ///
    /// `running` starts an unseen call, `completed` ends it and `error`
    /// fails it. Whichever of the part update or the before/after hooks
    /// arrives first wins; the other becomes a no-op.
    pub fn on_tool_part(&mut self, part: &ToolPartUpdatedData) {
        match part.status {
            ToolPartStatus::Pending => {}
            ToolPartStatus::Running => {
                if let Some(tool) = &part.tool {
                    let args = part.input.clone().unwrap_or(Value::Null);
                    self.on_tool_start(&part.unit_id, &part.call_id, tool, &args);
                }
            }
            ToolPartStatus::Completed => {
                self.on_tool_end(&part.call_id, None, None);
            }
            ToolPartStatus::Error => {
                let message = part.error.as_deref().unwrap_or("tool error");
                self.on_tool_error(&part.call_id, message);
            }
        }
    }
}
