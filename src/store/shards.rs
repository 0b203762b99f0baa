use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{info, warn};

use crate::model::{MalformedRecord, MeasurementRecord, ShardAggregate};
use crate::store::important_files::TrackedFiles;

/// Where a load-test tool leaves its shard files inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLayout {
    pub run_dir_pattern: String,
    pub output_dir: String,
    pub file_pattern: String,
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self {
            run_dir_pattern: "*__llm_load_test__run".to_string(),
            output_dir: "output".to_string(),
            file_pattern: "ghz-multiplexed-results-*.json".to_string(),
        }
    }
}

/// Concatenates every shard under `run_dir`, or `None` when the run has no
/// results directory at all.
pub fn aggregate(
    run_dir: &Path,
    layout: &ShardLayout,
    tracked: &mut TrackedFiles,
) -> Result<Option<ShardAggregate>> {
    let output_dirs: Vec<PathBuf> = glob_paths(
        run_dir,
        &format!("{}/{}", layout.run_dir_pattern, layout.output_dir),
    )?
    .into_iter()
    .filter(|path| path.is_dir())
    .collect();

    if output_dirs.is_empty() {
        warn!(
            run_dir = %run_dir.display(),
            pattern = %layout.run_dir_pattern,
            "results directory missing"
        );
        return Ok(None);
    }

    let mut aggregate = ShardAggregate::default();

    for output_dir in &output_dirs {
        let shard_files = glob_paths(output_dir, &layout.file_pattern)?;

        for shard_file in shard_files.into_iter().filter(|path| path.is_file()) {
            let relative = shard_file
                .strip_prefix(run_dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| shard_file.clone());
            tracked.register(&relative);
            if let Some(artifact) = tracked.get(&relative) {
                aggregate.files.push(artifact.clone());
            }

            let (records, defects) = parse_shard(&shard_file, &relative)?;
            aggregate.records.extend(records);
            aggregate.defects.extend(defects);
        }
    }

    if !aggregate.defects.is_empty() {
        warn!(
            run_dir = %run_dir.display(),
            malformed = aggregate.defects.len(),
            "shard files contain malformed records"
        );
    }

    info!(
        run_dir = %run_dir.display(),
        shards = aggregate.files.len(),
        records = aggregate.records.len(),
        "aggregated load-test shards"
    );

    Ok(Some(aggregate))
}

fn parse_shard(
    shard_file: &Path,
    relative: &Path,
) -> Result<(Vec<MeasurementRecord>, Vec<MalformedRecord>)> {
    let raw = fs::read(shard_file)
        .with_context(|| format!("failed to read {}", shard_file.display()))?;
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", shard_file.display()))?;

    let mut records = Vec::with_capacity(entries.len());
    let mut defects = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<MeasurementRecord>(entry) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(
                    file = %relative.display(),
                    index,
                    error = %err,
                    "malformed measurement record"
                );
                defects.push(MalformedRecord {
                    file: relative.to_path_buf(),
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok((records, defects))
}

/// Glob below `base`, which is escaped so its own characters never act as wildcards.
fn glob_paths(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = format!(
        "{}/{}",
        Pattern::escape(&base.to_string_lossy()),
        pattern
    );

    let mut paths = Vec::new();
    for entry in glob::glob(&full_pattern)
        .with_context(|| format!("invalid glob pattern: {full_pattern}"))?
    {
        match entry {
            Ok(path) => paths.push(path),
            Err(err) => warn!(error = %err, "unreadable path while scanning for shards"),
        }
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{ShardLayout, aggregate};
    use crate::store::important_files::TrackedFiles;

    fn write_shard(run_dir: &Path, name: &str, body: &str) {
        let output = run_dir.join("000__llm_load_test__run").join("output");
        fs::create_dir_all(&output).expect("create output dir");
        fs::write(output.join(name), body).expect("write shard");
    }

    #[test]
    fn missing_results_directory_yields_none() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut tracked = TrackedFiles::new(tmp.path());

        let result = aggregate(tmp.path(), &ShardLayout::default(), &mut tracked).expect("aggregate");
        assert!(result.is_none());
        assert!(tracked.files().is_empty());
    }

    #[test]
    fn empty_results_directory_is_zero_measurements() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("000__llm_load_test__run/output")).expect("mkdir");
        let mut tracked = TrackedFiles::new(tmp.path());

        let result = aggregate(tmp.path(), &ShardLayout::default(), &mut tracked)
            .expect("aggregate")
            .expect("directory exists");
        assert!(result.records.is_empty());
    }

    #[test]
    fn shards_concatenate_in_file_then_record_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_shard(
            tmp.path(),
            "ghz-multiplexed-results-0.json",
            r#"[{"average": 1.0, "p99": 3.0}, {"average": 2.0}]"#,
        );
        write_shard(
            tmp.path(),
            "ghz-multiplexed-results-1.json",
            r#"[{"average": 3.0}]"#,
        );
        write_shard(tmp.path(), "unrelated.json", r#"[{"average": 99.0}]"#);

        let mut tracked = TrackedFiles::new(tmp.path());
        let result = aggregate(tmp.path(), &ShardLayout::default(), &mut tracked)
            .expect("aggregate")
            .expect("directory exists");

        let averages: Vec<f64> = result.records.iter().map(|record| record.average).collect();
        assert_eq!(averages, vec![1.0, 2.0, 3.0]);
        assert_eq!(result.records[0].fields.get("p99"), Some(&serde_json::json!(3.0)));
        assert_eq!(result.files.len(), 2);
        assert_eq!(tracked.files().len(), 2);
        assert!(result.defects.is_empty());
    }

    #[test]
    fn records_without_average_are_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_shard(
            tmp.path(),
            "ghz-multiplexed-results-0.json",
            r#"[{"average": 1.5}, {"p50": 1.0}, "not a record"]"#,
        );

        let mut tracked = TrackedFiles::new(tmp.path());
        let result = aggregate(tmp.path(), &ShardLayout::default(), &mut tracked)
            .expect("aggregate")
            .expect("directory exists");

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.defects.len(), 2);
        assert_eq!(result.defects[0].index, 1);
        assert!(result.defects[0].reason.contains("average"));
        assert_eq!(result.defects[1].index, 2);
    }

    #[test]
    fn unparsable_shard_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_shard(tmp.path(), "ghz-multiplexed-results-0.json", "{ not json");

        let mut tracked = TrackedFiles::new(tmp.path());
        assert!(aggregate(tmp.path(), &ShardLayout::default(), &mut tracked).is_err());
    }

    #[test]
    fn chronological_order_needs_timestamps_on_every_record() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_shard(
            tmp.path(),
            "ghz-multiplexed-results-0.json",
            r#"[{"average": 1.0, "timestamp": "2024-05-02T10:00:00Z"},
                {"average": 2.0, "timestamp": 1714550400}]"#,
        );

        let mut tracked = TrackedFiles::new(tmp.path());
        let result = aggregate(tmp.path(), &ShardLayout::default(), &mut tracked)
            .expect("aggregate")
            .expect("directory exists");

        let ordered = result.chronological().expect("all stamped");
        assert_eq!(ordered[0].average, 2.0);
        assert_eq!(ordered[1].average, 1.0);

        let mut partial = result.clone();
        partial.records[0].fields.remove("timestamp");
        assert!(partial.chronological().is_none());
    }
}
