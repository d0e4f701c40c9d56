use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotation::{group_annotations, AnnotationGroup, AnnotationReport};
use crate::error::Result;
use crate::events::{EventSink, KindSource, ReportEvent, TracingSink};
use crate::kind::ToggleKind;
use crate::render::Row;
use crate::state::{FieldMap, OverrideChoice, ToggleState};
use crate::toggle::Toggle;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdaConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DumpRecord {
    pub model: String,
    #[serde(default)]
    pub pk: Option<Value>,
    #[serde(default)]
    pub fields: FieldMap,
}

/// A runtime state dump: either Django `dumpdata` rows or a toggle state
/// report keyed by category (`waffle_flags`, `waffle_switches`, ...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StateDump {
    Records(Vec<DumpRecord>),
    Report(IndexMap<String, Value>),
}

pub fn parse_state_dump(raw: &str) -> Result<StateDump> {
    Ok(serde_json::from_str(raw)?)
}

/// An independently deployed application and the toggles it owns,
/// partitioned by kind.
pub struct Ida {
    name: String,
    config: IdaConfig,
    toggles: BTreeMap<ToggleKind, BTreeMap<String, Toggle>>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Ida {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ida")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("toggles", &self.toggles)
            .finish_non_exhaustive()
    }
}

impl Ida {
    pub fn new(name: impl Into<String>, config: IdaConfig) -> Self {
        Self {
            name: name.into(),
            config,
            toggles: BTreeMap::new(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        self.config.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn config(&self) -> &IdaConfig {
        &self.config
    }

    pub fn kinds(&self) -> impl Iterator<Item = ToggleKind> + '_ {
        self.toggles.keys().copied()
    }

    pub fn toggles(&self, kind: ToggleKind) -> impl Iterator<Item = &Toggle> {
        self.toggles.get(&kind).into_iter().flat_map(|bucket| bucket.values())
    }

    pub fn get(&self, kind: ToggleKind, name: &str) -> Option<&Toggle> {
        self.toggles.get(&kind)?.get(name)
    }

    pub fn contains(&self, kind: ToggleKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    pub fn len(&self) -> usize {
        self.toggles.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ToggleKind, &Toggle)> {
        self.toggles
            .iter()
            .flat_map(|(kind, bucket)| bucket.values().map(move |toggle| (*kind, toggle)))
    }

    /// Moves a toggle between kind collections, keeping its states and
    /// annotation. This is the only way a toggle changes collection. When
    /// the target already holds a toggle of that name the two are merged.
    pub fn reclassify(&mut self, name: &str, from: ToggleKind, to: ToggleKind) -> bool {
        if from == to {
            return false;
        }
        let Some(bucket) = self.toggles.get_mut(&from) else {
            return false;
        };
        let Some(moved) = bucket.remove(name) else {
            return false;
        };
        if bucket.is_empty() {
            self.toggles.remove(&from);
        }
        let target = self.toggles.entry(to).or_default();
        match target.get_mut(name) {
            Some(existing) => {
                for state in moved.states().iter().cloned() {
                    existing.add_state(state);
                }
                if existing.annotation().is_none() {
                    if let Some(annotation) = moved.annotation().cloned() {
                        existing.attach_annotation(annotation);
                    }
                }
            }
            None => {
                target.insert(name.to_string(), moved);
            }
        }
        self.sink.emit(ReportEvent::Reclassified {
            ida: self.name.clone(),
            name: name.to_string(),
            from,
            to,
        });
        true
    }

    fn resolve_kind(&mut self, kind: ToggleKind, name: &str) -> ToggleKind {
        if !kind.is_flag_family() {
            return kind;
        }
        if self.contains(ToggleKind::CourseWaffleFlag, name) {
            return ToggleKind::CourseWaffleFlag;
        }
        if kind == ToggleKind::CourseWaffleFlag && self.contains(ToggleKind::WaffleFlag, name) {
            self.reclassify(name, ToggleKind::WaffleFlag, ToggleKind::CourseWaffleFlag);
        }
        kind
    }

    /// Lookup-or-create for a record about to be filed under `kind`,
    /// applying the course flag promotion rule for the flag family.
    pub fn entry(&mut self, kind: ToggleKind, name: &str) -> &mut Toggle {
        self.filed_entry(kind, name).1
    }

    /// Same as [`Ida::entry`], also returning the kind the toggle is filed
    /// under.
    fn filed_entry(&mut self, kind: ToggleKind, name: &str) -> (ToggleKind, &mut Toggle) {
        let kind = self.resolve_kind(kind, name);
        let toggle = self
            .toggles
            .entry(kind)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| Toggle::new(name));
        (kind, toggle)
    }

    pub fn add_state_dump(&mut self, dump: StateDump, env: &str) {
        let mut collected: BTreeMap<ToggleKind, usize> = BTreeMap::new();
        match dump {
            StateDump::Records(records) => {
                for record in records {
                    if let Some(kind) = self.add_dump_record(&record.model, record.fields, env) {
                        *collected.entry(kind).or_default() += 1;
                    }
                }
            }
            StateDump::Report(categories) => {
                for (category, entries) in categories {
                    let Value::Array(entries) = entries else {
                        continue;
                    };
                    for entry in entries {
                        let Value::Object(fields) = entry else {
                            continue;
                        };
                        if let Some(kind) = self.add_report_entry(&category, fields, env) {
                            *collected.entry(kind).or_default() += 1;
                        }
                    }
                }
            }
        }
        for (kind, count) in collected {
            self.sink.emit(ReportEvent::StateCollected {
                ida: self.name.clone(),
                env: env.to_string(),
                kind,
                count,
            });
        }
    }

    fn add_dump_record(&mut self, model: &str, fields: FieldMap, env: &str) -> Option<ToggleKind> {
        let kind = ToggleKind::normalize(model, KindSource::StateDump, self.sink.as_ref());
        if kind == ToggleKind::CourseWaffleFlag && fields.contains_key("waffle_flag") {
            return self.add_course_override_row(&fields, env);
        }
        self.add_state(kind, fields, env)
    }

    fn add_report_entry(&mut self, category: &str, fields: FieldMap, env: &str) -> Option<ToggleKind> {
        let mut kind = ToggleKind::normalize(category, KindSource::StateDump, self.sink.as_ref());
        if let Some(class) = fields
            .get("class")
            .and_then(Value::as_str)
            .and_then(ToggleKind::from_name)
        {
            kind = class;
        }
        if kind == ToggleKind::WaffleFlag && fields.contains_key("course_overrides") {
            kind = ToggleKind::CourseWaffleFlag;
        }
        self.add_state(kind, fields, env)
    }

    fn add_state(&mut self, kind: ToggleKind, fields: FieldMap, env: &str) -> Option<ToggleKind> {
        let Some(name) = fields.get("name").and_then(scalar_text) else {
            self.sink.emit(ReportEvent::MissingName {
                ida: self.name.clone(),
                context: format!("{kind} state record"),
            });
            return None;
        };
        let state = ToggleState::from_fields(kind, env, fields);
        self.entry(kind, &name).add_state(state);
        Some(kind)
    }

    fn add_course_override_row(&mut self, fields: &FieldMap, env: &str) -> Option<ToggleKind> {
        let Some(name) = fields.get("waffle_flag").and_then(scalar_text) else {
            self.sink.emit(ReportEvent::MissingName {
                ida: self.name.clone(),
                context: "course override record".to_string(),
            });
            return None;
        };
        let course_id = fields
            .get("course_id")
            .and_then(scalar_text)
            .unwrap_or_default();
        let choice = OverrideChoice::from_value(fields.get("override_choice").unwrap_or(&Value::Null));
        self.entry(ToggleKind::CourseWaffleFlag, &name)
            .add_course_override(env, course_id.clone(), choice);
        self.sink.emit(ReportEvent::CourseOverride {
            ida: self.name.clone(),
            env: env.to_string(),
            name,
            course_id,
        });
        Some(ToggleKind::CourseWaffleFlag)
    }

    pub fn add_annotation_report(&mut self, report: &AnnotationReport) {
        let groups = group_annotations(report, self.sink.as_ref());
        for group in groups {
            self.add_annotation_group(group);
        }
        for (kind, bucket) in &self.toggles {
            let annotated = bucket
                .values()
                .filter(|toggle| toggle.annotation().is_some())
                .count();
            self.sink.emit(ReportEvent::AnnotationsCollected {
                ida: self.name.clone(),
                kind: *kind,
                annotated,
            });
        }
    }

    pub fn add_annotation_group(&mut self, group: AnnotationGroup) {
        let Some(name) = group.name else {
            self.sink.emit(ReportEvent::MissingName {
                ida: self.name.clone(),
                context: format!("annotation group {}", group.annotation.group_id()),
            });
            return;
        };
        let kind = ToggleKind::normalize(
            group.kind_name.as_deref().unwrap_or_default(),
            KindSource::Annotation,
            self.sink.as_ref(),
        );
        let mut annotation = group.annotation;
        if let Some(repo_url) = &self.config.github_url {
            annotation.link_source(repo_url);
        }
        let (kind, toggle) = self.filed_entry(kind, &name);
        let unmatched = toggle.states().is_empty();
        toggle.attach_annotation(annotation);
        if unmatched {
            self.sink.emit(ReportEvent::AnnotationUnmatched {
                ida: self.name.clone(),
                kind,
                name,
            });
        }
    }

    /// Points every annotation at its anchor in the rendered docs.
    pub fn assign_doc_links(&mut self) {
        let ida = self.name.clone();
        for bucket in self.toggles.values_mut() {
            for toggle in bucket.values_mut() {
                if let Some(annotation) = toggle.annotation_mut() {
                    let link = annotation.doc_anchor(&ida);
                    annotation.set_doc_link(link);
                }
            }
        }
    }

    pub fn full_rows(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for (kind, toggle) in self.iter() {
            rows.extend(toggle.flatten(self.display_name(), kind)?);
        }
        Ok(rows)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::parse_annotation_report;
    use crate::events::{NullSink, RecordingSink};
    use serde_json::json;

    fn ida() -> Ida {
        Ida::new("lms", IdaConfig::default()).with_sink(Arc::new(NullSink))
    }

    fn dump(value: Value) -> StateDump {
        serde_json::from_value(value).unwrap()
    }

    const COURSE_ANNOTATION: &str = r#"
lms/djangoapps/courseware/toggles.py:
  - annotation_data: courseware.some_flag
    annotation_token: '.. toggle_name:'
    filename: lms/djangoapps/courseware/toggles.py
    line_number: 28
    report_group_id: 3
  - annotation_data: [CourseWaffleFlag]
    annotation_token: '.. toggle_implementation:'
    filename: lms/djangoapps/courseware/toggles.py
    line_number: 29
    report_group_id: 3
"#;

    fn flag_row(name: &str, everyone: Value) -> Value {
        json!({"model": "waffle.flag", "pk": 1, "fields": {
            "name": name,
            "everyone": everyone,
            "created": "2017-06-21T16:06:20.833Z",
            "modified": "2020-04-01T18:31:24.930Z"
        }})
    }

    fn override_row(name: &str, course: &str, choice: &str) -> Value {
        json!({"model": "waffle_utils.waffleflagcourseoverridemodel", "pk": 9, "fields": {
            "waffle_flag": name,
            "course_id": course,
            "override_choice": choice,
            "enabled": true
        }})
    }

    #[test]
    fn repeated_sightings_merge_into_one_toggle() {
        let mut ida = ida();
        ida.add_state_dump(dump(json!([flag_row("f", json!(true))])), "prod");
        ida.add_state_dump(dump(json!([flag_row("f", json!(false))])), "stage");
        assert_eq!(ida.len(), 1);
        let toggle = ida.get(ToggleKind::WaffleFlag, "f").unwrap();
        let envs: Vec<&str> = toggle.envs().collect();
        assert_eq!(envs, vec!["prod", "stage"]);
    }

    #[test]
    fn override_then_annotation_promotes_once() {
        let mut ida = ida();
        ida.add_state_dump(
            dump(json!([
                flag_row("courseware.some_flag", Value::Null),
                override_row("courseware.some_flag", "course-v1:a", "on")
            ])),
            "prod",
        );
        ida.add_annotation_report(&parse_annotation_report(COURSE_ANNOTATION).unwrap());
        assert!(!ida.contains(ToggleKind::WaffleFlag, "courseware.some_flag"));
        let toggle = ida
            .get(ToggleKind::CourseWaffleFlag, "courseware.some_flag")
            .unwrap();
        assert!(toggle.annotation().is_some());
        assert_eq!(toggle.states().len(), 1);
        assert_eq!(toggle.states()[0].course_counts(), Some((1, 0)));
    }

    #[test]
    fn annotation_then_state_reaches_same_end_state() {
        let mut ida = ida();
        ida.add_annotation_report(&parse_annotation_report(COURSE_ANNOTATION).unwrap());
        ida.add_state_dump(
            dump(json!([
                flag_row("courseware.some_flag", Value::Null),
                override_row("courseware.some_flag", "course-v1:a", "on")
            ])),
            "prod",
        );
        assert_eq!(ida.len(), 1);
        let toggle = ida
            .get(ToggleKind::CourseWaffleFlag, "courseware.some_flag")
            .unwrap();
        assert!(toggle.annotation().is_some());
        assert_eq!(toggle.states().len(), 1);
        assert_eq!(toggle.states()[0].course_counts(), Some((1, 0)));
    }

    #[test]
    fn plain_flag_is_moved_when_course_kind_arrives() {
        let sink = Arc::new(RecordingSink::default());
        let mut ida = Ida::new("lms", IdaConfig::default()).with_sink(sink.clone());
        ida.add_state_dump(dump(json!([flag_row("x", json!(true))])), "prod");
        ida.add_state_dump(dump(json!([override_row("x", "course-v1:b", "off")])), "stage");
        assert!(ida.get(ToggleKind::WaffleFlag, "x").is_none());
        let toggle = ida.get(ToggleKind::CourseWaffleFlag, "x").unwrap();
        assert_eq!(toggle.states().len(), 2);
        assert!(sink.events().iter().any(|event| matches!(
            event,
            ReportEvent::Reclassified { from: ToggleKind::WaffleFlag, to: ToggleKind::CourseWaffleFlag, .. }
        )));
    }

    #[test]
    fn unmatched_annotation_reports_filed_kind() {
        let sink = Arc::new(RecordingSink::default());
        let mut ida = Ida::new("lms", IdaConfig::default()).with_sink(sink.clone());
        ida.entry(ToggleKind::CourseWaffleFlag, "courseware.some_flag");
        let plain = COURSE_ANNOTATION.replace("[CourseWaffleFlag]", "[WaffleFlag]");
        ida.add_annotation_report(&parse_annotation_report(&plain).unwrap());
        assert!(!ida.contains(ToggleKind::WaffleFlag, "courseware.some_flag"));
        let unmatched: Vec<ToggleKind> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ReportEvent::AnnotationUnmatched { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(unmatched, vec![ToggleKind::CourseWaffleFlag]);
    }

    #[test]
    fn reclassify_only_moves_existing_toggles() {
        let mut ida = ida();
        assert!(!ida.reclassify("missing", ToggleKind::WaffleFlag, ToggleKind::CourseWaffleFlag));
        ida.entry(ToggleKind::WaffleSwitch, "s");
        assert!(ida.reclassify("s", ToggleKind::WaffleSwitch, ToggleKind::Unknown));
        assert!(ida.contains(ToggleKind::Unknown, "s"));
        assert_eq!(ida.kinds().collect::<Vec<_>>(), vec![ToggleKind::Unknown]);
    }

    #[test]
    fn non_flag_kinds_bypass_promotion() {
        let mut ida = ida();
        ida.entry(ToggleKind::CourseWaffleFlag, "shared");
        ida.entry(ToggleKind::WaffleSwitch, "shared");
        assert!(ida.contains(ToggleKind::WaffleSwitch, "shared"));
        assert!(ida.contains(ToggleKind::CourseWaffleFlag, "shared"));
    }

    #[test]
    fn unknown_models_are_kept_and_reported() {
        let sink = Arc::new(RecordingSink::default());
        let mut ida = Ida::new("lms", IdaConfig::default()).with_sink(sink.clone());
        ida.add_state_dump(
            dump(json!([{"model": "waffle.sample", "pk": 1, "fields": {"name": "sampled", "percent": "10.0"}}])),
            "prod",
        );
        assert!(ida.contains(ToggleKind::Unknown, "sampled"));
        assert!(sink.events().iter().any(|event| matches!(
            event,
            ReportEvent::UnknownKind { raw, source: KindSource::StateDump } if raw == "waffle.sample"
        )));
    }

    #[test]
    fn report_format_dump_is_ingested() {
        let mut ida = ida();
        ida.add_state_dump(
            dump(json!({
                "waffle_flags": [
                    {"name": "plain.flag", "everyone": "yes", "computed_status": "on"},
                    {"name": "some.coursewaffleflag", "class": "CourseWaffleFlag",
                     "course_overrides": {"c1": "on", "c2": "on", "c3": "off"}}
                ],
                "waffle_switches": [{"name": "a.switch", "is_active": "false"}],
                "django_settings": [{"name": "FEATURES['X']", "is_active": true}]
            })),
            "prod",
        );
        assert_eq!(ida.kinds().count(), 4);
        let course = ida
            .get(ToggleKind::CourseWaffleFlag, "some.coursewaffleflag")
            .unwrap();
        assert_eq!(course.states()[0].course_counts(), Some((2, 1)));
        let switch = ida.get(ToggleKind::WaffleSwitch, "a.switch").unwrap();
        assert_eq!(switch.states()[0].is_active(), Some(false));
        assert!(ida.contains(ToggleKind::SettingToggle, "FEATURES['X']"));
    }

    #[test]
    fn github_url_links_annotations() {
        let config = IdaConfig {
            github_url: Some("https://github.com/org/platform".into()),
            ..IdaConfig::default()
        };
        let mut ida = Ida::new("lms", config).with_sink(Arc::new(NullSink));
        ida.add_annotation_report(&parse_annotation_report(COURSE_ANNOTATION).unwrap());
        ida.assign_doc_links();
        let annotation = ida
            .get(ToggleKind::CourseWaffleFlag, "courseware.some_flag")
            .unwrap()
            .annotation()
            .unwrap();
        assert_eq!(
            annotation.source_url(),
            Some("https://github.com/org/platform/blob/master/lms/djangoapps/courseware/toggles.py#L28-L29")
        );
        assert_eq!(
            annotation.doc_link(),
            Some("lms/index.rst#lms-djangoapps-courseware-toggles-py-3")
        );
    }

    #[test]
    fn malformed_dump_is_an_error() {
        assert!(parse_state_dump("[{\"model\": ").is_err());
    }

    #[test]
    fn display_name_overrides_rows() {
        let config = IdaConfig {
            display_name: Some("LMS".into()),
            ..IdaConfig::default()
        };
        let mut ida = Ida::new("lms", config).with_sink(Arc::new(NullSink));
        ida.add_state_dump(dump(json!([flag_row("f", json!(true))])), "prod");
        let rows = ida.full_rows().unwrap();
        assert_eq!(rows[0]["ida_name"], "LMS");
        assert_eq!(rows[0]["created_s"], "2017-06-21 16:06 UTC");
    }
}
