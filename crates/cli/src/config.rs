use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use toggle_report_core::{IdaConfig, ReportMode, DEFAULT_PRIORITY};

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default, deserialize_with = "one_or_many")]
    pub env: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub toggle_type: Vec<String>,
    #[serde(default)]
    pub priority_columns: Vec<String>,
    #[serde(default)]
    pub ida: BTreeMap<String, IdaConfig>,
}

impl ReportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: Option<Self> = serde_yaml::from_str(raw)?;
        Ok(parsed.unwrap_or_default())
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

/// Effective run settings after merging the command line over the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub envs: Vec<String>,
    pub toggle_types: Vec<String>,
    pub priority: Vec<String>,
    pub mode: ReportMode,
    pub doc_links: bool,
    pub idas: BTreeMap<String, IdaConfig>,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: ReportConfig) -> Self {
        let envs = if cli.envs.is_empty() {
            config.env
        } else {
            cli.envs.clone()
        };
        let toggle_types = if cli.toggle_types.is_empty() {
            config.toggle_type
        } else {
            cli.toggle_types.clone()
        };
        let priority = if config.priority_columns.is_empty() {
            DEFAULT_PRIORITY.iter().map(|c| c.to_string()).collect()
        } else {
            config.priority_columns
        };
        let mode = if cli.summarize {
            ReportMode::Summary
        } else {
            ReportMode::Full
        };
        Self {
            envs,
            toggle_types,
            priority,
            mode,
            doc_links: cli.doc_links,
            idas: config.ida,
        }
    }

    pub fn wants_env(&self, env: &str) -> bool {
        self.envs.is_empty() || self.envs.iter().any(|wanted| wanted == env)
    }

    pub fn ida_config(&self, ida: &str) -> IdaConfig {
        self.idas.get(ida).cloned().unwrap_or_default()
    }
}
