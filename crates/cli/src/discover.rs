use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

static ENV_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<env>[a-z0-9]*)_env$").expect("env dir pattern"));
static DUMP_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<ida>[a-z0-9]*)_.*\.json$").expect("dump file pattern"));
static ANNOTATION_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ida>[a-z0-9]*)[-_]annotations\.ya?ml$").expect("annotation file pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDir {
    pub env: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub ida: String,
    pub path: PathBuf,
}

fn entries(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        out.push(entry.with_context(|| format!("failed to list {}", dir.display()))?);
    }
    Ok(out)
}

/// `<env>_env` children of the data directory, or the directory itself when
/// it carries such a name and has no env children.
pub fn env_dirs(data_dir: &Path) -> Result<Vec<EnvDir>> {
    let mut found = Vec::new();
    for entry in entries(data_dir)? {
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(caps) = ENV_DIR.captures(&name) {
            found.push(EnvDir {
                env: caps["env"].to_string(),
                path: entry.path().to_path_buf(),
            });
        }
    }
    if !found.is_empty() {
        return Ok(found);
    }
    let own_name = data_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match ENV_DIR.captures(&own_name) {
        Some(caps) => Ok(vec![EnvDir {
            env: caps["env"].to_string(),
            path: data_dir.to_path_buf(),
        }]),
        None => bail!(
            "{} holds no <env>_env directories and is not one itself",
            data_dir.display()
        ),
    }
}

fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<DataFile>> {
    let mut files = Vec::new();
    for entry in entries(dir)? {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(caps) = pattern.captures(&name) {
            files.push(DataFile {
                ida: caps["ida"].to_string(),
                path: entry.path().to_path_buf(),
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

pub fn dump_files(env_dir: &Path) -> Result<Vec<DataFile>> {
    matching_files(env_dir, &DUMP_FILE)
}

pub fn annotation_files(annotations_dir: &Path) -> Result<Vec<DataFile>> {
    matching_files(annotations_dir, &ANNOTATION_FILE)
}
