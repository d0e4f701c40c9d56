mod annotation;
mod error;
mod events;
mod ida;
mod kind;
mod render;
mod report;
mod state;
mod summary;
mod timestamp;
mod toggle;

pub use annotation::{
    group_annotations, parse_annotation_report, AnnotationEntry, AnnotationGroup,
    AnnotationReport, ToggleAnnotation,
};
pub use error::{ReportError, Result};
pub use events::{EventSink, KindSource, NullSink, RecordingSink, ReportEvent, TracingSink};
pub use ida::{parse_state_dump, DumpRecord, Ida, IdaConfig, StateDump};
pub use kind::ToggleKind;
pub use render::{
    filter_rows, sort_rows, sorted_headers, KindFilter, ReportTable, Row, ANNOTATION_SUFFIX,
    STATE_SUFFIX,
};
pub use report::{build_report, ReportMode, ReportOptions, DEFAULT_PRIORITY};
pub use state::{
    CourseFlagFields, FieldMap, FlagFields, KindFields, OverrideChoice, ToggleState,
};
pub use summary::summarize;
pub use timestamp::Timestamp;
pub use toggle::Toggle;
