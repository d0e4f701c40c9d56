use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "toggle-report",
    about = "Reconcile feature toggle state dumps with code annotations into a CSV report"
)]
pub struct Cli {
    /// Directory holding `<ida>-annotations.yaml` reports
    pub annotations_dir: PathBuf,
    /// Directory of `<env>_env` folders with `<ida>_*.json` dumps, or one such folder
    pub toggle_data_dir: PathBuf,
    #[arg(default_value = "feature_toggle_report.csv")]
    pub output: PathBuf,
    /// Only read state for these environments
    #[arg(long = "env", action = ArgAction::Append)]
    pub envs: Vec<String>,
    /// Only report toggles of these kinds
    #[arg(long = "toggle-type", action = ArgAction::Append)]
    pub toggle_types: Vec<String>,
    /// One row per toggle instead of one per environment
    #[arg(long, action = ArgAction::SetTrue)]
    pub summarize: bool,
    #[arg(long = "doc-links", action = ArgAction::SetTrue)]
    pub doc_links: bool,
    /// YAML configuration; command-line values take priority
    #[arg(long)]
    pub configuration: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}
