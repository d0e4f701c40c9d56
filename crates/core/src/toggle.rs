use crate::annotation::ToggleAnnotation;
use crate::error::Result;
use crate::kind::ToggleKind;
use crate::render::{Row, ANNOTATION_SUFFIX, STATE_SUFFIX};
use crate::state::{KindFields, OverrideChoice, ToggleState};

/// A named toggle with its per-environment states and, when declared in
/// source, its annotation. Either side may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle {
    name: String,
    states: Vec<ToggleState>,
    annotation: Option<ToggleAnnotation>,
}

impl Toggle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            annotation: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[ToggleState] {
        &self.states
    }

    pub fn annotation(&self) -> Option<&ToggleAnnotation> {
        self.annotation.as_ref()
    }

    pub fn annotation_mut(&mut self) -> Option<&mut ToggleAnnotation> {
        self.annotation.as_mut()
    }

    pub fn attach_annotation(&mut self, annotation: ToggleAnnotation) {
        self.annotation = Some(annotation);
    }

    /// Appends a state. A plain flag row for an environment whose course
    /// state so far only holds overrides is folded into that state instead.
    pub fn add_state(&mut self, mut state: ToggleState) {
        if matches!(state.fields, KindFields::Flag(_)) {
            if let Some(existing) = self.states.iter_mut().find(|existing| {
                existing.env() == state.env() && existing.kind() == ToggleKind::CourseWaffleFlag
            }) {
                match existing.absorb_flag(state) {
                    Ok(()) => return,
                    Err(rejected) => state = rejected,
                }
            }
        }
        self.states.push(state);
    }

    pub fn add_course_override(
        &mut self,
        env: &str,
        course_id: impl Into<String>,
        choice: OverrideChoice,
    ) {
        let position = self
            .states
            .iter()
            .position(|state| state.env() == env && state.kind().is_flag_family());
        let state = match position {
            Some(index) => &mut self.states[index],
            None => {
                self.states
                    .push(ToggleState::new(ToggleKind::CourseWaffleFlag, env));
                let last = self.states.len() - 1;
                &mut self.states[last]
            }
        };
        state.add_course_override(course_id, choice);
    }

    pub fn envs(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(ToggleState::env)
    }

    /// Full-mode rows: one per state, or a single row without environment
    /// when the toggle is only known from its annotation.
    pub fn flatten(&self, ida_name: &str, kind: ToggleKind) -> Result<Vec<Row>> {
        let mut base = Row::new();
        base.insert("name".into(), self.name.clone());
        base.insert("ida_name".into(), ida_name.to_string());
        base.insert("toggle_type".into(), kind.as_str().to_string());
        if let Some(annotation) = &self.annotation {
            for (key, value) in annotation.flatten() {
                base.insert(format!("{key}{ANNOTATION_SUFFIX}"), value);
            }
        }
        if self.states.is_empty() {
            return Ok(vec![base]);
        }
        let mut rows = Vec::with_capacity(self.states.len());
        for state in &self.states {
            let mut row = base.clone();
            row.insert("env_name".into(), state.env().to_string());
            for (key, value) in state.flatten()? {
                row.insert(format!("{key}{STATE_SUFFIX}"), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
