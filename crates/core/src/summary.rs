use std::collections::BTreeSet;

use itertools::Itertools;

use crate::error::Result;
use crate::ida::Ida;
use crate::kind::ToggleKind;
use crate::render::{Row, STATE_SUFFIX};
use crate::state::distinct_notes;
use crate::toggle::Toggle;

/// Columns the summarizer derives itself or that identify the toggle.
const DERIVED_COLUMNS: [&str; 4] = ["name", "ida_name", "toggle_type", "env_name"];
const PER_ENV_STATE_FIELDS: [&str; 4] = ["created", "modified", "note", "computed_status"];

struct Summarized<'a> {
    ida_name: &'a str,
    kind: ToggleKind,
    toggle: &'a Toggle,
    rows: Vec<Row>,
}

/// One row per toggle across all environments of every given application.
/// A column is carried over from the full rows only when it has a single
/// value within every toggle of the report.
pub fn summarize<'a>(idas: impl IntoIterator<Item = &'a Ida>) -> Result<Vec<Row>> {
    let mut summarized = Vec::new();
    for ida in idas {
        for (kind, toggle) in ida.iter() {
            summarized.push(Summarized {
                ida_name: ida.display_name(),
                kind,
                toggle,
                rows: toggle.flatten(ida.display_name(), kind)?,
            });
        }
    }

    let promoted = invariant_columns(&summarized);
    let mut out = Vec::with_capacity(summarized.len());
    for entry in &summarized {
        out.push(summary_row(entry, &promoted)?);
    }
    Ok(out)
}

fn is_excluded(column: &str) -> bool {
    if DERIVED_COLUMNS.contains(&column) {
        return true;
    }
    PER_ENV_STATE_FIELDS
        .iter()
        .chain(["is_active"].iter())
        .any(|field| column.strip_suffix(STATE_SUFFIX) == Some(*field))
}

fn invariant_columns(summarized: &[Summarized<'_>]) -> BTreeSet<String> {
    let candidates: BTreeSet<&str> = summarized
        .iter()
        .flat_map(|entry| entry.rows.iter())
        .flat_map(|row| row.keys().map(String::as_str))
        .filter(|column| !is_excluded(column))
        .collect();
    candidates
        .into_iter()
        .filter(|column| {
            summarized.iter().all(|entry| {
                entry
                    .rows
                    .iter()
                    .map(|row| row.get(*column).map(String::as_str).unwrap_or_default())
                    .all_equal()
            })
        })
        .map(str::to_string)
        .collect()
}

fn summary_row(entry: &Summarized<'_>, promoted: &BTreeSet<String>) -> Result<Row> {
    let states = entry.toggle.states();
    let mut row = Row::new();
    row.insert("name".into(), entry.toggle.name().to_string());
    row.insert("ida_name".into(), entry.ida_name.to_string());
    row.insert("toggle_type".into(), entry.kind.as_str().to_string());

    for column in promoted {
        if let Some(value) = entry.rows.iter().find_map(|r| r.get(column)) {
            row.insert(column.clone(), value.clone());
        }
    }

    let mut created = Vec::new();
    let mut modified = Vec::new();
    for state in states {
        created.extend(state.created_at()?);
        modified.extend(state.modified_at()?);
    }
    let oldest = created.into_iter().min();
    let newest = modified.into_iter().max();
    row.insert(
        "oldest_created".into(),
        oldest.map(|ts| ts.display().to_string()).unwrap_or_default(),
    );
    row.insert(
        "newest_modified".into(),
        newest.map(|ts| ts.display().to_string()).unwrap_or_default(),
    );
    row.insert("note".into(), distinct_notes(states));

    let mut statuses = Vec::with_capacity(states.len());
    for state in states {
        let status = state.computed_status();
        if let Some(status) = &status {
            row.entry(format!("computed_status_{}", state.env()))
                .or_insert_with(|| status.clone());
        }
        statuses.push(status);
    }
    if states.len() > 1 {
        let matching = statuses.iter().all(Option::is_some) && statuses.iter().all_equal();
        row.insert("all_envs_match".into(), matching.to_string());
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::ida::{IdaConfig, StateDump};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn ida() -> Ida {
        Ida::new("lms", IdaConfig::default()).with_sink(Arc::new(NullSink))
    }

    fn switch_dump(name: &str, active: bool, extra: Value) -> StateDump {
        let mut fields = json!({
            "name": name,
            "active": active,
            "created": "2019-04-23T14:21:44.765727Z",
            "modified": "2020-01-01T00:00:00Z"
        });
        if let (Some(target), Value::Object(more)) = (fields.as_object_mut(), extra) {
            target.extend(more);
        }
        serde_json::from_value(json!([{"model": "waffle.switch", "pk": 1, "fields": fields}]))
            .unwrap()
    }

    #[test]
    fn differing_envs_do_not_match() {
        let mut ida = ida();
        ida.add_state_dump(switch_dump("s", true, json!({})), "prod");
        ida.add_state_dump(switch_dump("s", false, json!({})), "stage");
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["computed_status_prod"], "on");
        assert_eq!(rows[0]["computed_status_stage"], "off");
        assert_eq!(rows[0]["all_envs_match"], "false");
    }

    #[test]
    fn agreeing_envs_match() {
        let mut ida = ida();
        ida.add_state_dump(switch_dump("s", true, json!({})), "prod");
        ida.add_state_dump(switch_dump("s", true, json!({})), "stage");
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows[0]["all_envs_match"], "true");
    }

    #[test]
    fn single_state_has_no_match_column() {
        let mut ida = ida();
        ida.add_state_dump(switch_dump("s", true, json!({})), "prod");
        let rows = summarize([&ida]).unwrap();
        assert!(!rows[0].contains_key("all_envs_match"));
        assert_eq!(rows[0]["oldest_created"], "2019-04-23 14:21 UTC");
        assert_eq!(rows[0]["newest_modified"], "2020-01-01 00:00 UTC");
    }

    #[test]
    fn missing_timestamps_and_notes_render_empty() {
        let mut ida = ida();
        let dump: StateDump = serde_json::from_value(json!([
            {"model": "waffle.switch", "pk": 1, "fields": {"name": "s", "active": true}}
        ]))
        .unwrap();
        ida.add_state_dump(dump, "prod");
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows[0].get("oldest_created").map(String::as_str), Some(""));
        assert_eq!(rows[0].get("newest_modified").map(String::as_str), Some(""));
        assert_eq!(rows[0].get("note").map(String::as_str), Some(""));
    }

    #[test]
    fn only_invariant_columns_are_promoted() {
        let mut ida = ida();
        ida.add_state_dump(
            switch_dump("s", true, json!({"code_owner": "team-a", "pk_hint": "1"})),
            "prod",
        );
        ida.add_state_dump(
            switch_dump("s", true, json!({"code_owner": "team-a", "pk_hint": "2"})),
            "stage",
        );
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows[0]["code_owner_s"], "team-a");
        assert!(!rows[0].contains_key("pk_hint_s"));
        assert!(!rows[0].contains_key("env_name"));
        assert!(!rows[0].contains_key("created_s"));
    }

    #[test]
    fn annotation_only_toggles_are_summarized() {
        let mut ida = ida();
        ida.entry(ToggleKind::WaffleSwitch, "declared.only");
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "declared.only");
        assert!(!rows[0].keys().any(|k| k.starts_with("computed_status_")));
    }

    #[test]
    fn notes_are_joined_across_envs() {
        let mut ida = ida();
        ida.add_state_dump(switch_dump("s", true, json!({"note": "alpha"})), "prod");
        ida.add_state_dump(switch_dump("s", true, json!({"note": "beta"})), "stage");
        let rows = summarize([&ida]).unwrap();
        assert_eq!(rows[0]["note"], "alpha, beta");
    }

    #[test]
    fn malformed_timestamp_is_fatal() {
        let mut ida = ida();
        ida.add_state_dump(
            switch_dump("s", true, json!({"created": "sometime"})),
            "prod",
        );
        assert!(summarize([&ida]).is_err());
    }
}
