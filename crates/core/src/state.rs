use std::collections::BTreeMap;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::kind::ToggleKind;
use crate::render::cell_text;
use crate::timestamp::Timestamp;

pub type FieldMap = Map<String, Value>;

const NULL_SENTINELS: [&str; 4] = ["null", "Null", "NULL", "None"];

const FLAG_KEYS: [&str; 10] = [
    "everyone",
    "percent",
    "testing",
    "superusers",
    "staff",
    "authenticated",
    "rollout",
    "languages",
    "users",
    "groups",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagFields {
    pub everyone: Option<bool>,
    pub percent: Option<i64>,
    pub testing: bool,
    pub superusers: bool,
    pub staff: bool,
    pub authenticated: bool,
    pub rollout: bool,
    pub languages: Vec<String>,
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

impl FlagFields {
    fn take(fields: &mut FieldMap) -> Self {
        let mut take = |key: &str| fields.remove(key).unwrap_or(Value::Null);
        Self {
            everyone: tristate(&take("everyone")),
            percent: take("percent").as_i64(),
            testing: truthy(&take("testing")),
            superusers: truthy(&take("superusers")),
            staff: truthy(&take("staff")),
            authenticated: truthy(&take("authenticated")),
            rollout: truthy(&take("rollout")),
            languages: string_list(&take("languages")),
            users: string_list(&take("users")),
            groups: string_list(&take("groups")),
        }
    }

    /// `everyone` wins when explicitly set; otherwise any targeting rule
    /// turns the flag on.
    pub fn is_active(&self) -> bool {
        match self.everyone {
            Some(everyone) => everyone,
            None => {
                self.percent.map(|p| p > 0).unwrap_or(false)
                    || self.testing
                    || self.superusers
                    || self.staff
                    || self.authenticated
                    || !self.languages.is_empty()
                    || active_members(&self.users) > 0
                    || active_members(&self.groups) > 0
            }
        }
    }

    fn flatten_into(&self, out: &mut BTreeMap<String, String>) {
        let everyone = match self.everyone {
            Some(true) => "Yes",
            Some(false) => "No",
            None => "Unknown",
        };
        out.insert("everyone".into(), everyone.into());
        out.insert("percent".into(), self.percent.unwrap_or(0).to_string());
        for (key, value) in [
            ("testing", self.testing),
            ("superusers", self.superusers),
            ("staff", self.staff),
            ("authenticated", self.authenticated),
            ("rollout", self.rollout),
        ] {
            out.insert(key.into(), value.to_string());
        }
        out.insert("languages".into(), self.languages.join(","));
        out.insert("users".into(), active_members(&self.users).to_string());
        out.insert("groups".into(), active_members(&self.groups).to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideChoice {
    On,
    Off,
    Other(String),
}

impl OverrideChoice {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(true) => OverrideChoice::On,
            Value::Bool(false) => OverrideChoice::Off,
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "on" | "force_on" | "true" => OverrideChoice::On,
                "off" | "force_off" | "false" => OverrideChoice::Off,
                other => OverrideChoice::Other(other.to_string()),
            },
            other => OverrideChoice::Other(cell_text(other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseFlagFields {
    pub flag: Option<FlagFields>,
    pub overrides: BTreeMap<String, OverrideChoice>,
}

impl CourseFlagFields {
    pub fn forced_on(&self) -> usize {
        self.overrides
            .values()
            .filter(|choice| **choice == OverrideChoice::On)
            .count()
    }

    pub fn forced_off(&self) -> usize {
        self.overrides
            .values()
            .filter(|choice| **choice == OverrideChoice::Off)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindFields {
    Switch { active: bool },
    Flag(FlagFields),
    CourseFlag(CourseFlagFields),
    Setting { is_active: bool },
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleState {
    kind: ToggleKind,
    env: String,
    pub note: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub computed_status: Option<String>,
    pub fields: KindFields,
    pub extra: BTreeMap<String, Value>,
}

impl ToggleState {
    pub fn new(kind: ToggleKind, env: impl Into<String>) -> Self {
        let fields = match kind {
            ToggleKind::WaffleSwitch => KindFields::Switch { active: false },
            ToggleKind::WaffleFlag => KindFields::Flag(FlagFields::default()),
            ToggleKind::CourseWaffleFlag => KindFields::CourseFlag(CourseFlagFields::default()),
            ToggleKind::SettingToggle | ToggleKind::SettingDictToggle => {
                KindFields::Setting { is_active: false }
            }
            ToggleKind::Unknown => KindFields::Unknown,
        };
        Self {
            kind,
            env: env.into(),
            note: None,
            created: None,
            modified: None,
            computed_status: None,
            fields,
            extra: BTreeMap::new(),
        }
    }

    /// Builds a state from a raw field map. Fields the kind knows about are
    /// typed; everything else lands in `extra`. `name` is structural and
    /// dropped.
    pub fn from_fields(kind: ToggleKind, env: impl Into<String>, mut raw: FieldMap) -> Self {
        let mut state = Self::new(kind, env);
        raw.remove("name");
        state.note = optional_text(raw.remove("note"));
        state.created = optional_text(raw.remove("created"));
        state.modified = optional_text(raw.remove("modified"));
        state.computed_status = optional_text(raw.remove("computed_status"));
        state.fields = match kind {
            ToggleKind::WaffleSwitch => {
                let active = raw
                    .remove("active")
                    .or_else(|| raw.remove("is_active"))
                    .unwrap_or(Value::Null);
                KindFields::Switch {
                    active: truthy(&active),
                }
            }
            ToggleKind::WaffleFlag => KindFields::Flag(FlagFields::take(&mut raw)),
            ToggleKind::CourseWaffleFlag => {
                let flag = FLAG_KEYS
                    .iter()
                    .any(|key| raw.contains_key(*key))
                    .then(|| FlagFields::take(&mut raw));
                let overrides = raw
                    .remove("course_overrides")
                    .map(|value| parse_overrides(&value))
                    .unwrap_or_default();
                KindFields::CourseFlag(CourseFlagFields { flag, overrides })
            }
            ToggleKind::SettingToggle | ToggleKind::SettingDictToggle => {
                let active = raw.remove("is_active").unwrap_or(Value::Null);
                KindFields::Setting {
                    is_active: truthy(&active),
                }
            }
            ToggleKind::Unknown => KindFields::Unknown,
        };
        state.extra = raw.into_iter().collect();
        state
    }

    pub fn kind(&self) -> ToggleKind {
        self.kind
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn is_active(&self) -> Option<bool> {
        match &self.fields {
            KindFields::Switch { active } => Some(*active),
            KindFields::Flag(flag) => Some(flag.is_active()),
            KindFields::CourseFlag(course) => course.flag.as_ref().map(FlagFields::is_active),
            KindFields::Setting { is_active } => Some(*is_active),
            KindFields::Unknown => None,
        }
    }

    pub fn computed_status(&self) -> Option<String> {
        self.computed_status
            .clone()
            .filter(|status| !status.is_empty())
            .or_else(|| {
                self.is_active()
                    .map(|active| if active { "on" } else { "off" }.to_string())
            })
    }

    /// `(forced on, forced off)` course counts for course-scoped states.
    pub fn course_counts(&self) -> Option<(usize, usize)> {
        match &self.fields {
            KindFields::CourseFlag(course) => Some((course.forced_on(), course.forced_off())),
            _ => None,
        }
    }

    /// Records one course override, turning a plain flag state into a
    /// course-scoped one that keeps its flag fields.
    pub fn add_course_override(&mut self, course_id: impl Into<String>, choice: OverrideChoice) {
        self.promote_to_course();
        if let KindFields::CourseFlag(course) = &mut self.fields {
            course.overrides.insert(course_id.into(), choice);
        }
    }

    pub fn promote_to_course(&mut self) {
        let fields = std::mem::replace(&mut self.fields, KindFields::Unknown);
        self.fields = match fields {
            KindFields::Flag(flag) => KindFields::CourseFlag(CourseFlagFields {
                flag: Some(flag),
                overrides: BTreeMap::new(),
            }),
            KindFields::CourseFlag(course) => KindFields::CourseFlag(course),
            _ => KindFields::CourseFlag(CourseFlagFields::default()),
        };
        self.kind = ToggleKind::CourseWaffleFlag;
    }

    /// Fills the flag fields of a course state that so far only carries
    /// overrides. Common fields already set are kept. A state that cannot
    /// be folded in is handed back.
    pub fn absorb_flag(&mut self, other: ToggleState) -> std::result::Result<(), ToggleState> {
        let KindFields::CourseFlag(course) = &mut self.fields else {
            return Err(other);
        };
        if course.flag.is_some() {
            return Err(other);
        }
        let flag = match other.fields {
            KindFields::Flag(flag) => flag,
            KindFields::CourseFlag(CourseFlagFields {
                flag: Some(flag), ..
            }) => flag,
            _ => return Err(other),
        };
        course.flag = Some(flag);
        self.note = self.note.take().or(other.note);
        self.created = self.created.take().or(other.created);
        self.modified = self.modified.take().or(other.modified);
        self.computed_status = self.computed_status.take().or(other.computed_status);
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
        Ok(())
    }

    pub fn created_at(&self) -> Result<Option<Timestamp>> {
        self.created
            .as_deref()
            .map(|raw| Timestamp::parse("created", raw))
            .transpose()
    }

    pub fn modified_at(&self) -> Result<Option<Timestamp>> {
        self.modified
            .as_deref()
            .map(|raw| Timestamp::parse("modified", raw))
            .transpose()
    }

    /// Unsuffixed report columns for this state.
    pub fn flatten(&self) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.extra {
            out.insert(key.clone(), cell_text(value));
        }
        if let Some(note) = &self.note {
            out.insert("note".into(), note.clone());
        }
        if let Some(created) = self.created_at()? {
            out.insert("created".into(), created.display().to_string());
        }
        if let Some(modified) = self.modified_at()? {
            out.insert("modified".into(), modified.display().to_string());
        }
        match &self.fields {
            KindFields::Switch { active } => {
                out.insert("active".into(), active.to_string());
            }
            KindFields::Flag(flag) => flag.flatten_into(&mut out),
            KindFields::CourseFlag(course) => {
                if let Some(flag) = &course.flag {
                    flag.flatten_into(&mut out);
                }
                out.insert(
                    "num_courses_forced_on".into(),
                    course.forced_on().to_string(),
                );
                out.insert(
                    "num_courses_forced_off".into(),
                    course.forced_off().to_string(),
                );
            }
            KindFields::Setting { .. } | KindFields::Unknown => {}
        }
        if let Some(active) = self.is_active() {
            out.insert("is_active".into(), active.to_string());
        }
        if let Some(status) = self.computed_status() {
            out.insert("computed_status".into(), status);
        }
        Ok(out)
    }
}

fn active_members(entries: &[String]) -> usize {
    entries
        .iter()
        .filter(|entry| !NULL_SENTINELS.contains(&entry.as_str()))
        .count()
}

fn optional_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn truthy(value: &Value) -> bool {
    tristate(value).unwrap_or(false)
}

fn tristate(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Some(true),
            "no" | "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(cell_text)
            .filter(|entry| !entry.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_overrides(value: &Value) -> BTreeMap<String, OverrideChoice> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(course, choice)| (course.clone(), OverrideChoice::from_value(choice)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let course = item.get("course_id")?.as_str()?.to_string();
                let choice = item
                    .get("force")
                    .or_else(|| item.get("override_choice"))
                    .unwrap_or(&Value::Null);
                Some((course, OverrideChoice::from_value(choice)))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

pub(crate) fn distinct_notes<'a>(states: impl IntoIterator<Item = &'a ToggleState>) -> String {
    states
        .into_iter()
        .filter_map(|state| state.note.as_deref())
        .filter(|note| !note.is_empty())
        .unique()
        .join(", ")
}
