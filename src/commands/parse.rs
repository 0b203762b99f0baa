use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{Category, MetricCatalog, RecordingRegistrar};
use crate::cli::ParseArgs;
use crate::model::{MeasurementSpan, RunManifest, SeriesSummary};
use crate::store::{ConfigDescriptor, ExecutionContext, ParseOptions, RunResults, parse_run};
use crate::util::{now_utc_string, relative_path, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILENAME: &str = "run_manifest.json";

pub fn run(args: ParseArgs, context: &ExecutionContext) -> Result<()> {
    let options = ParseOptions {
        use_cache: args.use_cache,
        ..ParseOptions::default()
    };
    let run = parse_run(&args.run_dir, context, &options)?;

    let mut catalog = MetricCatalog::new();
    catalog
        .register(&mut RecordingRegistrar::default())
        .context("failed to register metric catalog")?;

    let manifest = build_manifest(&run, &catalog, &args.config_keys)?;

    if let Some(output) = &run.llm_load_test_output {
        if !output.defects.is_empty() {
            warn!(
                run_dir = %args.run_dir.display(),
                malformed = output.defects.len(),
                "run has malformed measurement records"
            );
        }
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.run_dir.join(MANIFEST_FILENAME));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote run manifest");
    info!(
        measurements = manifest.measurement_count.unwrap_or_default(),
        tracked_files = manifest.tracked_files.len(),
        series = manifest.series.len(),
        "parse completed"
    );

    Ok(())
}

pub fn build_manifest(
    run: &RunResults,
    catalog: &MetricCatalog,
    config_keys: &[String],
) -> Result<RunManifest> {
    let config_path = relative_path(&run.test_config.filepath, &run.run_dir)?;
    let config_values = config_values(&run.test_config, config_keys)?;
    let config_sections = run
        .test_config
        .raw_document()
        .as_mapping()
        .map(|mapping| {
            mapping
                .keys()
                .filter_map(|key| key.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut series = Vec::new();
    for role in catalog.roles() {
        for category in Category::ALL {
            for definition in catalog.definitions(role, category) {
                for labelled in catalog.series_for(run, role, &definition.name) {
                    series.push(SeriesSummary {
                        role: role.to_string(),
                        metric: definition.name.clone(),
                        label: labelled.label,
                        group: labelled.group,
                        points: labelled.series.values.len(),
                    });
                }
            }
        }
    }

    Ok(RunManifest {
        manifest_version: MANIFEST_VERSION,
        generated_at: now_utc_string(),
        run_dir: run.run_dir.display().to_string(),
        location: run.location.clone(),
        config_path: config_path.display().to_string(),
        settings: run.settings.clone(),
        config_sections,
        config_values,
        measurement_count: run
            .llm_load_test_output
            .as_ref()
            .map(|output| output.records.len()),
        measurement_span: run.llm_load_test_output.as_ref().and_then(MeasurementSpan::of),
        malformed_records: run
            .llm_load_test_output
            .as_ref()
            .map(|output| output.defects.clone())
            .unwrap_or_default(),
        tracked_files: run.tracked_files().to_vec(),
        series,
    })
}

/// Reads each `path` (required) or `path=default` out of the run configuration.
fn config_values(config: &ConfigDescriptor, config_keys: &[String]) -> Result<IndexMap<String, Value>> {
    let mut values = IndexMap::new();

    for raw in config_keys {
        let (path, lookup) = match raw.split_once('=') {
            Some((path, default)) => {
                let default: Value = serde_yaml::from_str(default.trim())
                    .unwrap_or_else(|_| Value::String(default.trim().to_string()));
                let path = path.trim();
                (path, config.get_or(path, default))
            }
            None => (raw.trim(), config.get_as::<Value>(raw.trim())),
        };
        let found = lookup.with_context(|| format!("failed to read configuration key {path}"))?;
        values.insert(path.to_string(), found);
    }

    Ok(values)
}
