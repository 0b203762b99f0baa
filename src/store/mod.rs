mod config;
mod important_files;
mod location;
mod prom;
mod shards;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::{ClusterInfo, PromSeries, RunLocation, Settings, ShardAggregate, TrackedArtifact};
use crate::util::{now_utc_string, write_json_pretty};

pub use config::{CONFIG_FILENAME, ConfigDescriptor};
pub use important_files::TrackedFiles;
pub use location::{ExecutionContext, resolve_location};
pub use prom::CapturedMetrics;
pub use shards::{ShardLayout, aggregate};

pub const SETTINGS_FILENAME: &str = "settings.yaml";
pub const CACHE_FILENAME: &str = ".perf_artifacts_cache.json";
const CACHE_VERSION: u32 = 1;

/// Everything parsed out of one run directory.
#[derive(Debug, Clone)]
pub struct RunResults {
    pub run_dir: PathBuf,
    pub location: RunLocation,
    pub test_config: ConfigDescriptor,
    pub settings: Settings,
    pub llm_load_test_output: Option<ShardAggregate>,
    pub metrics: CapturedMetrics,
    pub cluster_info: ClusterInfo,
    pub tracked: TrackedFiles,
}

impl RunResults {
    /// Captured series for `metric`, empty when the run never recorded it.
    pub fn get_metrics(&self, role: &str, metric: &str) -> &[PromSeries] {
        self.metrics.series(role, metric)
    }

    pub fn tracked_files(&self) -> &[TrackedArtifact] {
        self.tracked.files()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub use_cache: bool,
    pub layout: ShardLayout,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParseCache {
    cache_version: u32,
    generated_at: String,
    llm_load_test_output: Option<ShardAggregate>,
}

pub fn parse_run(
    run_dir: &Path,
    context: &ExecutionContext,
    options: &ParseOptions,
) -> Result<RunResults> {
    let mut tracked = TrackedFiles::new(run_dir);

    // re-parsed even when the shards come from the cache
    let location = resolve_location(run_dir, context);
    let test_config = ConfigDescriptor::load(&mut tracked)
        .with_context(|| format!("failed to load configuration of {}", run_dir.display()))?;
    let settings = load_settings(run_dir)?;
    let cluster_info = prom::load_cluster_info(run_dir)?;
    let metrics = prom::load_captured_metrics(run_dir)?;

    let cached = if options.use_cache {
        read_cache(run_dir)
    } else {
        None
    };

    let llm_load_test_output = match cached {
        Some(cache) => {
            if let Some(output) = &cache.llm_load_test_output {
                tracked.extend(output.files.iter().cloned());
            }
            info!(run_dir = %run_dir.display(), generated_at = %cache.generated_at, "loaded shards from cache");
            cache.llm_load_test_output
        }
        None => {
            let output = aggregate(run_dir, &options.layout, &mut tracked)?;
            if options.use_cache {
                if let Err(err) = write_cache(run_dir, &output) {
                    warn!(run_dir = %run_dir.display(), error = %format!("{err:#}"), "could not write cache");
                }
            }
            output
        }
    };

    Ok(RunResults {
        run_dir: run_dir.to_path_buf(),
        location,
        test_config,
        settings,
        llm_load_test_output,
        metrics,
        cluster_info,
        tracked,
    })
}

/// Parses every run below `root`; a run that fails is logged and left out.
pub fn parse_runs(
    root: &Path,
    context: &ExecutionContext,
    options: &ParseOptions,
) -> Result<Vec<RunResults>> {
    let run_dirs = discover_runs(root)?;
    let mut runs = Vec::with_capacity(run_dirs.len());

    for run_dir in run_dirs {
        match parse_run(&run_dir, context, options) {
            Ok(run) => runs.push(run),
            Err(err) => {
                error!(run_dir = %run_dir.display(), error = %format!("{err:#}"), "skipping run");
            }
        }
    }

    Ok(runs)
}

/// Directories below `root` holding a `config.yaml`, in path order.
pub fn discover_runs(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/{}",
        Pattern::escape(&root.to_string_lossy()),
        CONFIG_FILENAME
    );

    let mut run_dirs = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
        match entry {
            Ok(config_path) => {
                if let Some(parent) = config_path.parent() {
                    run_dirs.push(parent.to_path_buf());
                }
            }
            Err(err) => warn!(error = %err, "unreadable path while discovering runs"),
        }
    }
    run_dirs.sort();
    run_dirs.dedup();

    Ok(run_dirs)
}

fn load_settings(run_dir: &Path) -> Result<Settings> {
    let path = run_dir.join(SETTINGS_FILENAME);
    if !path.is_file() {
        warn!(run_dir = %run_dir.display(), "no settings recorded for run");
        return Ok(Settings::new());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let settings: Option<Settings> = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(settings.unwrap_or_default())
}

fn read_cache(run_dir: &Path) -> Option<ParseCache> {
    let path = run_dir.join(CACHE_FILENAME);
    let raw = fs::read(&path).ok()?;

    match serde_json::from_slice::<ParseCache>(&raw) {
        Ok(cache) if cache.cache_version == CACHE_VERSION => Some(cache),
        Ok(cache) => {
            info!(path = %path.display(), version = cache.cache_version, "ignoring outdated cache");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable cache");
            None
        }
    }
}

fn write_cache(run_dir: &Path, output: &Option<ShardAggregate>) -> Result<()> {
    let cache = ParseCache {
        cache_version: CACHE_VERSION,
        generated_at: now_utc_string(),
        llm_load_test_output: output.clone(),
    };
    write_json_pretty(&run_dir.join(CACHE_FILENAME), &cache)
}
