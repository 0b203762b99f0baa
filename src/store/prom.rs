use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ClusterInfo, PromSeries};

pub const METRICS_DIR: &str = "metrics";
pub const CLUSTER_INFO_FILENAME: &str = "cluster_info.yaml";

/// Series captured during a run, per cluster role then metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedMetrics {
    roles: BTreeMap<String, BTreeMap<String, Vec<PromSeries>>>,
}

impl CapturedMetrics {
    pub fn series(&self, role: &str, metric: &str) -> &[PromSeries] {
        self.roles
            .get(role)
            .and_then(|metrics| metrics.get(metric))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn insert(&mut self, role: &str, metric: &str, series: Vec<PromSeries>) {
        self.roles
            .entry(role.to_string())
            .or_default()
            .insert(metric.to_string(), series);
    }

    pub fn is_empty(&self) -> bool {
        self.roles.values().all(BTreeMap::is_empty)
    }
}

/// Reads `metrics/<role>.json` dumps; a run without the directory has none.
pub fn load_captured_metrics(run_dir: &Path) -> Result<CapturedMetrics> {
    let metrics_dir = run_dir.join(METRICS_DIR);
    let mut captured = CapturedMetrics::default();

    if !metrics_dir.is_dir() {
        debug!(run_dir = %run_dir.display(), "no captured metrics");
        return Ok(captured);
    }

    let mut dumps = Vec::new();
    for entry in fs::read_dir(&metrics_dir)
        .with_context(|| format!("failed to read {}", metrics_dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", metrics_dir.display()))?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            dumps.push(path);
        }
    }
    dumps.sort();

    for path in dumps {
        let Some(role) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let metrics: BTreeMap<String, Vec<PromSeries>> = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        debug!(role, metrics = metrics.len(), "loaded captured metrics");
        for (metric, series) in metrics {
            captured.insert(role, &metric, series);
        }
    }

    Ok(captured)
}

pub fn load_cluster_info(run_dir: &Path) -> Result<ClusterInfo> {
    let path = run_dir.join(CLUSTER_INFO_FILENAME);
    if !path.is_file() {
        debug!(run_dir = %run_dir.display(), "no cluster info recorded");
        return Ok(ClusterInfo::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let info: Option<ClusterInfo> = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(info.unwrap_or_default())
}
