//! Event dispatcher: routes host events into the [`Tracker`] and runs the
//! GC sweep on the same task.

use std::time::Duration;

use opentelemetry::trace::Tracer;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{CloseReason, ErrorInfo, SweepReport, Tracker};
use crate::hooks::HostEvent;

/// Totals for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub sweeps: u64,
    /// Everything reaped by periodic sweeps.
    pub reaped: SweepReport,
    /// Everything still live at shutdown.
    pub flushed: SweepReport,
}

/// Owns the tracker and applies events to it one at a time.
pub struct Dispatcher<T: Tracer> {
    tracker: Tracker<T>,
}

impl<T> Dispatcher<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracker: Tracker<T>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Tracker<T> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker<T> {
        &mut self.tracker
    }

    pub fn into_tracker(self) -> Tracker<T> {
        self.tracker
    }

    /// Apply a single event.
    pub fn handle(&mut self, event: HostEvent) {
        debug!(kind = event.kind().as_str(), unit = ?event.unit_id(), "dispatching event");
        match event {
            HostEvent::UnitCreated(data) => {
                self.tracker.on_unit_created(&data);
            }
            HostEvent::UnitIdle(data) => {
                self.tracker.on_unit_idle(&data.id);
            }
            HostEvent::UnitError(data) => {
                self.tracker.on_unit_error(
                    &data.id,
                    ErrorInfo {
                        name: data.error_name,
                        message: data.error_message,
                    },
                );
            }
            HostEvent::MessageUpdated(data) => {
                self.tracker.on_message(&data);
            }
            HostEvent::ToolPartUpdated(data) => {
                self.tracker.on_tool_part(&data);
            }
            HostEvent::ToolBefore(data) => {
                self.tracker
                    .on_tool_start(&data.unit_id, &data.call_id, &data.tool, &data.args);
            }
            HostEvent::ToolAfter(data) => {
                self.tracker
                    .on_tool_end(&data.call_id, data.output.as_deref(), data.duration_ms);
            }
        }
    }

    /// Process events until `shutdown` fires or every sender is dropped.
    ///
    /// Sweeps run every `TtlPolicy::sweep_interval`. On exit every live
    /// span is closed with reason `shutdown`.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<HostEvent>,
        shutdown: CancellationToken,
    ) -> RunSummary {
        let period = self.tracker.ttl().sweep_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut summary = RunSummary::default();
        info!(sweep_interval = ?period, "Dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            summary.events += 1;
                            self.handle(event);
                        }
                        None => {
                            info!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    summary.sweeps += 1;
                    summary.reaped.merge(self.tracker.sweep());
                }
            }
        }

        summary.flushed = self.tracker.flush_all(CloseReason::Shutdown);
        info!(events = summary.events, sweeps = summary.sweeps, "Dispatcher stopped");
        summary
    }
}
