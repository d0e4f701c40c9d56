use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::kind::ToggleKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindSource {
    StateDump,
    Annotation,
    Filter,
}

impl KindSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KindSource::StateDump => "state dump",
            KindSource::Annotation => "annotation",
            KindSource::Filter => "toggle type filter",
        }
    }
}

/// Structured side channel for ingestion. The reconciliation code reports
/// through an [`EventSink`] instead of logging, so it can be exercised
/// without capturing log output.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    UnknownKind {
        raw: String,
        source: KindSource,
    },
    MissingName {
        ida: String,
        context: String,
    },
    StateCollected {
        ida: String,
        env: String,
        kind: ToggleKind,
        count: usize,
    },
    CourseOverride {
        ida: String,
        env: String,
        name: String,
        course_id: String,
    },
    AnnotationGroupDropped {
        source_file: String,
        group_id: i64,
    },
    AnnotationUnmatched {
        ida: String,
        kind: ToggleKind,
        name: String,
    },
    AnnotationsCollected {
        ida: String,
        kind: ToggleKind,
        annotated: usize,
    },
    Reclassified {
        ida: String,
        name: String,
        from: ToggleKind,
        to: ToggleKind,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ReportEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ReportEvent) {
        match event {
            ReportEvent::UnknownKind { raw, source } => {
                warn!(kind = %raw, source = source.as_str(), "toggle kind not recognized, filing as Unknown");
            }
            ReportEvent::MissingName { ida, context } => {
                warn!(ida = %ida, "skipping {context} without a toggle name");
            }
            ReportEvent::StateCollected {
                ida,
                env,
                kind,
                count,
            } => {
                info!(ida = %ida, env = %env, "collected {kind}: {count}");
            }
            ReportEvent::CourseOverride {
                ida,
                env,
                name,
                course_id,
            } => {
                debug!(ida = %ida, env = %env, "course override for {course_id} on {name}");
            }
            ReportEvent::AnnotationGroupDropped {
                source_file,
                group_id,
            } => {
                debug!(file = %source_file, group = group_id, "annotation group carries no data");
            }
            ReportEvent::AnnotationUnmatched { ida, kind, name } => {
                info!(ida = %ida, "no state found for annotated {kind} {name}");
            }
            ReportEvent::AnnotationsCollected {
                ida,
                kind,
                annotated,
            } => {
                info!(ida = %ida, "collected annotated {kind}: {annotated}");
            }
            ReportEvent::Reclassified {
                ida,
                name,
                from,
                to,
            } => {
                info!(ida = %ida, "reclassified {name} from {from} to {to}");
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ReportEvent) {}
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }
}
