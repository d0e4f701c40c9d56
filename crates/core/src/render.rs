use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use serde_json::Value;

use crate::error::Result;
use crate::events::{EventSink, KindSource};
use crate::kind::ToggleKind;

/// One output row: column name -> cell text.
pub type Row = BTreeMap<String, String>;

pub const STATE_SUFFIX: &str = "_s";
pub const ANNOTATION_SUFFIX: &str = "_a";

pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Restricts rows to a set of toggle kinds. An empty filter keeps all rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter {
    kinds: BTreeSet<ToggleKind>,
}

impl KindFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = ToggleKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Accepts one name or many; names are normalized the same way dump
    /// model names are.
    pub fn from_names<S: AsRef<str>>(names: &[S], sink: &dyn EventSink) -> Self {
        Self::from_kinds(
            names
                .iter()
                .map(|name| ToggleKind::normalize(name.as_ref(), KindSource::Filter, sink)),
        )
    }

    pub fn is_all(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn allows(&self, kind: ToggleKind) -> bool {
        self.is_all() || self.kinds.contains(&kind)
    }

    pub fn matches(&self, row: &Row) -> bool {
        if self.is_all() {
            return true;
        }
        row.get("toggle_type")
            .and_then(|name| ToggleKind::from_name(name))
            .map(|kind| self.kinds.contains(&kind))
            .unwrap_or(false)
    }
}

pub fn filter_rows(rows: Vec<Row>, filter: &KindFilter) -> Vec<Row> {
    rows.into_iter().filter(|row| filter.matches(row)).collect()
}

/// Stable sort by toggle name, then application, kind and environment.
pub fn sort_rows(rows: &mut [Row]) {
    rows.sort_by(|a, b| row_key(a).cmp(&row_key(b)));
}

fn row_key(row: &Row) -> [&str; 4] {
    ["name", "ida_name", "toggle_type", "env_name"].map(|column| {
        row.get(column).map(String::as_str).unwrap_or_default()
    })
}

fn provenance(column: &str) -> u8 {
    if column.ends_with(STATE_SUFFIX) {
        0
    } else if column.ends_with(ANNOTATION_SUFFIX) {
        1
    } else {
        2
    }
}

fn header_key<'a, S: AsRef<str>>(column: &'a str, priority: &[S]) -> (usize, bool, u8, &'a str) {
    let rank = priority
        .iter()
        .position(|wanted| wanted.as_ref() == column)
        .unwrap_or(priority.len());
    (rank, !column.contains("name"), provenance(column), column)
}

/// Union of all row keys ordered by: explicit priority, then columns whose
/// name contains "name", then state columns before annotation columns before
/// the rest, then alphabetically.
pub fn sorted_headers<S: AsRef<str>>(rows: &[Row], priority: &[S]) -> Vec<String> {
    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let mut headers: Vec<&str> = columns.into_iter().collect();
    headers.sort_by(|a, b| compare_headers(a, b, priority));
    headers.into_iter().map(str::to_string).collect()
}

fn compare_headers<S: AsRef<str>>(a: &str, b: &str, priority: &[S]) -> Ordering {
    header_key(a, priority).cmp(&header_key(b, priority))
}

/// A filtered, sorted set of rows with its column order fixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl ReportTable {
    pub fn new<S: AsRef<str>>(rows: Vec<Row>, filter: &KindFilter, priority: &[S]) -> Self {
        let mut rows = filter_rows(rows, filter);
        sort_rows(&mut rows);
        let headers = sorted_headers(&rows, priority);
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header line then one record per row. Missing cells are written
    /// empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.headers)?;
        for row in &self.rows {
            csv.write_record(
                self.headers
                    .iter()
                    .map(|column| row.get(column).map(String::as_str).unwrap_or_default()),
            )?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
