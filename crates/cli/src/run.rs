use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use toggle_report_core::{
    build_report, parse_annotation_report, parse_state_dump, EventSink, Ida, KindFilter,
    ReportOptions, ReportTable, StateDump, TracingSink,
};

use crate::cli::Cli;
use crate::config::{ReportConfig, Settings};
use crate::discover::{self, DataFile};

pub fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.configuration {
        Some(path) => ReportConfig::load(path)?,
        None => ReportConfig::default(),
    };
    let settings = Settings::resolve(cli, config);
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let table = generate(
        &cli.annotations_dir,
        &cli.toggle_data_dir,
        &settings,
        sink,
    )?;
    write_report(&table, &cli.output)?;
    info!(rows = table.len(), output = %cli.output.display(), "report written");
    Ok(())
}

struct Registry {
    idas: BTreeMap<String, Ida>,
    sink: Arc<dyn EventSink>,
}

impl Registry {
    fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            idas: BTreeMap::new(),
            sink,
        }
    }

    fn ida(&mut self, name: &str, settings: &Settings) -> &mut Ida {
        let sink = Arc::clone(&self.sink);
        self.idas
            .entry(name.to_string())
            .or_insert_with(|| Ida::new(name, settings.ida_config(name)).with_sink(sink))
    }
}

struct DecodedDump {
    env: String,
    file: DataFile,
    dump: StateDump,
}

fn decode_dump(env: String, file: DataFile) -> Result<DecodedDump> {
    let raw = fs::read_to_string(&file.path)
        .with_context(|| format!("failed to read state dump {}", file.path.display()))?;
    let dump = parse_state_dump(&raw)
        .with_context(|| format!("invalid state dump {}", file.path.display()))?;
    Ok(DecodedDump { env, file, dump })
}

pub fn generate(
    annotations_dir: &Path,
    toggle_data_dir: &Path,
    settings: &Settings,
    sink: Arc<dyn EventSink>,
) -> Result<ReportTable> {
    let mut jobs = Vec::new();
    for env_dir in discover::env_dirs(toggle_data_dir)? {
        if !settings.wants_env(&env_dir.env) {
            debug!(env = %env_dir.env, "skipping toggle state");
            continue;
        }
        for file in discover::dump_files(&env_dir.path)? {
            jobs.push((env_dir.env.clone(), file));
        }
    }

    let decoded: Vec<Result<DecodedDump>> = jobs
        .into_par_iter()
        .map(|(env, file)| decode_dump(env, file))
        .collect();

    let mut registry = Registry::new(Arc::clone(&sink));
    for item in decoded {
        let DecodedDump { env, file, dump } = item?;
        info!(ida = %file.ida, env = %env, "collecting toggle state from {}", file.path.display());
        registry.ida(&file.ida, settings).add_state_dump(dump, &env);
    }

    for file in discover::annotation_files(annotations_dir)? {
        let raw = fs::read_to_string(&file.path)
            .with_context(|| format!("failed to read annotations {}", file.path.display()))?;
        let report = parse_annotation_report(&raw)
            .with_context(|| format!("invalid annotation report {}", file.path.display()))?;
        info!(ida = %file.ida, "collecting annotations from {}", file.path.display());
        registry.ida(&file.ida, settings).add_annotation_report(&report);
    }

    if settings.doc_links {
        for ida in registry.idas.values_mut() {
            ida.assign_doc_links();
        }
    }

    let options = ReportOptions {
        mode: settings.mode,
        filter: KindFilter::from_names(settings.toggle_types.as_slice(), sink.as_ref()),
        priority: settings.priority.clone(),
    };
    let table = build_report(registry.idas.values(), &options)?;
    Ok(table)
}

fn write_report(table: &ReportTable, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(output)
        .with_context(|| format!("failed to create report {}", output.display()))?;
    table
        .write_csv(BufWriter::new(file))
        .with_context(|| format!("failed to write report {}", output.display()))?;
    Ok(())
}
