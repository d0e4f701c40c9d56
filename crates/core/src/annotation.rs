use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::events::{EventSink, ReportEvent};
use crate::render::cell_text;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.\. toggle_(?P<token>.*):").expect("annotation token pattern"));

const BOOKKEEPING_TOKEN: &str = "documented";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub annotation_token: String,
    #[serde(default)]
    pub annotation_data: Value,
    #[serde(default)]
    pub line_number: Option<u64>,
    #[serde(default)]
    pub report_group_id: i64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub found_by: Option<String>,
}

impl AnnotationEntry {
    pub fn token(&self) -> String {
        clean_token(&self.annotation_token)
    }
}

/// Source file path -> entries, in file order.
pub type AnnotationReport = IndexMap<String, Vec<AnnotationEntry>>;

pub fn parse_annotation_report(raw: &str) -> Result<AnnotationReport> {
    if raw.trim().is_empty() {
        return Ok(AnnotationReport::new());
    }
    let parsed: Option<AnnotationReport> = serde_yaml::from_str(raw)?;
    Ok(parsed.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleAnnotation {
    source_file: String,
    group_id: i64,
    line_numbers: Vec<u64>,
    source_url: Option<String>,
    doc_link: Option<String>,
    data: IndexMap<String, Value>,
}

impl ToggleAnnotation {
    pub fn new(
        source_file: impl Into<String>,
        group_id: i64,
        line_numbers: Vec<u64>,
        data: IndexMap<String, Value>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            group_id,
            line_numbers,
            source_url: None,
            doc_link: None,
            data,
        }
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn line_numbers(&self) -> &[u64] {
        &self.line_numbers
    }

    pub fn line_range(&self) -> Option<(u64, u64)> {
        let min = self.line_numbers.iter().min()?;
        let max = self.line_numbers.iter().max()?;
        Some((*min, *max))
    }

    pub fn data(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    pub fn get(&self, token: &str) -> Option<&Value> {
        self.data.get(token)
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source_url.as_deref()
    }

    pub(crate) fn link_source(&mut self, repo_url: &str) {
        let mut url = format!(
            "{}/blob/master/{}",
            repo_url.trim_end_matches('/'),
            self.source_file
        );
        if let (Some(first), Some(last)) = (self.line_numbers.first(), self.line_numbers.last()) {
            url.push_str(&format!("#L{first}-L{last}"));
        }
        self.source_url = Some(url);
    }

    pub fn doc_link(&self) -> Option<&str> {
        self.doc_link.as_deref()
    }

    pub fn set_doc_link(&mut self, link: impl Into<String>) {
        self.doc_link = Some(link.into());
    }

    /// Anchor of this declaration in the rendered per-application docs.
    pub fn doc_anchor(&self, ida: &str) -> String {
        format!("{ida}/index.rst#{}-{}", slug(&self.source_file), self.group_id)
    }

    /// Unsuffixed report columns for this annotation.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .data
            .iter()
            .map(|(token, value)| (token.clone(), cell_text(value)))
            .collect();
        out.insert("source_file".into(), self.source_file.clone());
        if let Some((first, last)) = self.line_range() {
            out.insert("line_range".into(), format!("{first}-{last}"));
        }
        if let Some(url) = &self.source_url {
            out.insert("source_url".into(), url.clone());
        }
        if let Some(link) = &self.doc_link {
            out.insert("doc_link".into(), link.clone());
        }
        out
    }
}

/// One declared toggle extracted from an annotation report.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationGroup {
    pub name: Option<String>,
    pub kind_name: Option<String>,
    pub annotation: ToggleAnnotation,
}

/// Splits each file's entries by report group id. Group ids are not assumed
/// dense; groups come out in ascending id order per file.
pub fn group_annotations(report: &AnnotationReport, sink: &dyn EventSink) -> Vec<AnnotationGroup> {
    let mut groups = Vec::new();
    for (path, entries) in report {
        let ids: BTreeSet<i64> = entries.iter().map(|entry| entry.report_group_id).collect();
        for id in ids {
            let members: Vec<&AnnotationEntry> = entries
                .iter()
                .filter(|entry| entry.report_group_id == id)
                .collect();
            let source_file = members
                .iter()
                .find_map(|entry| entry.filename.as_deref())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(path.as_str())
                .to_string();
            let data: IndexMap<String, Value> = members
                .iter()
                .filter(|entry| !entry.annotation_token.contains(BOOKKEEPING_TOKEN))
                .map(|entry| (entry.token(), entry.annotation_data.clone()))
                .collect();
            if data.is_empty() {
                sink.emit(ReportEvent::AnnotationGroupDropped {
                    source_file,
                    group_id: id,
                });
                continue;
            }
            let name = first_scalar(&members, &["name"]);
            let kind_name = first_scalar(&members, &["implementation", "type"]);
            let line_numbers = members.iter().filter_map(|entry| entry.line_number).collect();
            groups.push(AnnotationGroup {
                name,
                kind_name,
                annotation: ToggleAnnotation::new(source_file, id, line_numbers, data),
            });
        }
    }
    groups
}

fn first_scalar(members: &[&AnnotationEntry], tokens: &[&str]) -> Option<String> {
    tokens.iter().find_map(|wanted| {
        members
            .iter()
            .find(|entry| entry.token() == *wanted)
            .and_then(|entry| match &entry.annotation_data {
                Value::Array(items) => items.first().map(cell_text),
                Value::Null => None,
                other => Some(cell_text(other)),
            })
            .filter(|value| !value.is_empty())
    })
}

fn clean_token(raw: &str) -> String {
    TOKEN
        .captures(raw)
        .map(|caps| caps["token"].to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
