use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ida::Ida;
use crate::render::{KindFilter, ReportTable, Row};
use crate::summary::summarize;

pub const DEFAULT_PRIORITY: [&str; 7] = [
    "name",
    "ida_name",
    "toggle_type",
    "code_owner_s",
    "oldest_created",
    "newest_modified",
    "all_envs_match",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// One row per toggle per environment.
    #[default]
    Full,
    /// One row per toggle with cross-environment columns.
    Summary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub mode: ReportMode,
    pub filter: KindFilter,
    pub priority: Vec<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            mode: ReportMode::Full,
            filter: KindFilter::all(),
            priority: DEFAULT_PRIORITY.iter().map(|c| c.to_string()).collect(),
        }
    }
}

pub fn build_report<'a>(
    idas: impl IntoIterator<Item = &'a Ida>,
    options: &ReportOptions,
) -> Result<ReportTable> {
    let rows: Vec<Row> = match options.mode {
        ReportMode::Full => {
            let mut rows = Vec::new();
            for ida in idas {
                rows.extend(ida.full_rows()?);
            }
            rows
        }
        ReportMode::Summary => summarize(idas)?,
    };
    Ok(ReportTable::new(rows, &options.filter, options.priority.as_slice()))
}
