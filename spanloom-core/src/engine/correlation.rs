//! Root/delegated classification of newly created units.

use opentelemetry::trace::{TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use serde::{Deserialize, Serialize};
use spanloom_observe::{SpanMarkerExt, attributes as attr, markers};
use tracing::{debug, info, warn};

use super::Tracker;
use super::records::UnitKind;
use super::registry::{PhaseAttrs, UnitAttrs};
use crate::extract::{delegated_type_from_title, phase_for, ticket_tag};
use crate::hooks::UnitCreatedData;

/// Delegated type assumed when neither the handoff nor the title names one.
const FALLBACK_TYPE: &str = "general";

/// A signal that can classify a unit as delegated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationSignal {
    /// The creation event names a parent unit.
    ParentId,
    /// The title carries the host's sub-agent suffix.
    TitlePattern,
}

/// Order in which delegation signals are tried; the first to resolve wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationPolicy {
    pub order: Vec<DelegationSignal>,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self {
            order: vec![DelegationSignal::ParentId, DelegationSignal::TitlePattern],
        }
    }
}

/// Where a delegated unit's parent context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSource {
    /// Snapshot carried by a pending handoff.
    Handoff,
    /// The dispatcher unit's live span.
    ParentUnit,
    /// A root synthesized on demand for a dispatcher never observed.
    LazyParent,
}

/// How a creation event was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Root,
    Delegated {
        dispatcher_id: String,
        source: ParentSource,
    },
    /// The title says delegated but no dispatcher could be found; the unit
    /// started its own trace.
    Unresolved { delegated_type: String },
    /// The id was already live; nothing was opened.
    Duplicate,
}

impl<T> Tracker<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    /// Classify a new unit and open its span (and phase span, if delegated).
    pub fn on_unit_created(&mut self, data: &UnitCreatedData) -> Correlation {
        let now = self.now();

        if let Some(existing) = self.registry.unit_mut(&data.id) {
            existing.touch(now);
            if existing.lazy
                && existing.title.is_none()
                && let Some(title) = &data.title
            {
                existing.title = Some(title.clone());
                existing
                    .context
                    .record_all(vec![KeyValue::new(attr::SESSION_TITLE, title.clone())]);
            }
            debug!(unit = %data.id, "duplicate creation ignored");
            return Correlation::Duplicate;
        }

        let title_type = data.title.as_deref().and_then(delegated_type_from_title);
        let parent_id = data.parent_id.as_deref().filter(|p| *p != data.id);

        let mut dispatcher = None;
        for signal in &self.correlation.order {
            match signal {
                DelegationSignal::ParentId => {
                    if let Some(parent) = parent_id {
                        dispatcher = Some(parent.to_string());
                        break;
                    }
                }
                DelegationSignal::TitlePattern => {
                    if let Some(agent) = &title_type
                        && let Some(found) = self.registry.find_handoff_by_type(agent)
                    {
                        dispatcher = Some(found);
                        break;
                    }
                }
            }
        }

        match dispatcher {
            Some(dispatcher_id) => self.open_delegated(data, dispatcher_id, title_type),
            None => self.open_root(data, parent_id, title_type),
        }
    }

    fn open_delegated(
        &mut self,
        data: &UnitCreatedData,
        dispatcher_id: String,
        title_type: Option<String>,
    ) -> Correlation {
        let now = self.now();
        let handoff = self
            .registry
            .take_handoff(&dispatcher_id, title_type.as_deref());

        let (parent_cx, source) = match &handoff {
            Some(h) => (
                Context::new().with_remote_span_context(h.parent.clone()),
                ParentSource::Handoff,
            ),
            None => match self.registry.unit_mut(&dispatcher_id) {
                Some(parent) => {
                    parent.touch(now);
                    (parent.context.clone(), ParentSource::ParentUnit)
                }
                None => {
                    info!(unit = %data.id, parent = %dispatcher_id, "parent unseen, synthesizing lazy root");
                    let parent = self.registry.open_unit(
                        &dispatcher_id,
                        UnitAttrs::lazy_root(),
                        None,
                        now,
                    );
                    (parent.context.clone(), ParentSource::LazyParent)
                }
            },
        };
        if source == ParentSource::Handoff
            && let Some(parent) = self.registry.unit_mut(&dispatcher_id)
        {
            parent.touch(now);
        }

        let (handoff_type, description) = match handoff {
            Some(h) => (Some(h.delegated_type), h.description),
            None => (None, None),
        };
        let delegated_type = handoff_type
            .or(title_type)
            .unwrap_or_else(|| FALLBACK_TYPE.to_string());
        let ticket = data
            .title
            .as_deref()
            .and_then(ticket_tag)
            .or_else(|| description.as_deref().and_then(ticket_tag));
        let phase = phase_for(&delegated_type);

        let phase_cx = self
            .registry
            .open_phase(
                &data.id,
                phase,
                PhaseAttrs {
                    delegated_type: delegated_type.clone(),
                    description,
                    ticket: ticket.clone(),
                },
                &parent_cx,
                now,
            )
            .context
            .clone();

        self.registry.open_unit(
            &data.id,
            UnitAttrs {
                kind: UnitKind::Delegated,
                title: data.title.clone(),
                directory: data.directory.clone(),
                parent_id: Some(dispatcher_id.clone()),
                delegated_type: Some(delegated_type.clone()),
                phase: Some(phase.to_string()),
                ticket,
                lazy: false,
            },
            Some(&phase_cx),
            now,
        );

        info!(
            unit = %data.id,
            parent = %dispatcher_id,
            agent = %delegated_type,
            phase,
            ?source,
            "delegated unit opened"
        );
        Correlation::Delegated {
            dispatcher_id,
            source,
        }
    }

    fn open_root(
        &mut self,
        data: &UnitCreatedData,
        parent_id: Option<&str>,
        title_type: Option<String>,
    ) -> Correlation {
        let now = self.now();
        let unit = self.registry.open_unit(
            &data.id,
            UnitAttrs {
                title: data.title.clone(),
                directory: data.directory.clone(),
                parent_id: parent_id.map(str::to_string),
                delegated_type: title_type.clone(),
                ticket: data.title.as_deref().and_then(ticket_tag),
                ..UnitAttrs::root()
            },
            None,
            now,
        );

        match title_type {
            Some(delegated_type) => {
                unit.context.mark(
                    markers::CORRELATION_UNRESOLVED,
                    now,
                    vec![KeyValue::new(attr::AGENT_TYPE, delegated_type.clone())],
                );
                warn!(unit = %data.id, agent = %delegated_type, "no dispatcher found for delegated unit");
                Correlation::Unresolved { delegated_type }
            }
            None => {
                info!(unit = %data.id, "root unit opened");
                Correlation::Root
            }
        }
    }
}
