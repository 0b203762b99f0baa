use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::catalog::PlotSummary;

pub type LabelSet = BTreeMap<String, String>;

/// Run settings as recorded in `settings.yaml`.
pub type Settings = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLocation {
    pub source_url: Option<String>,
    pub artifacts_basedir: PathBuf,
    pub is_interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedArtifact {
    pub path: PathBuf,
    pub sha256: Option<String>,
}

/// One entry of a load-test shard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub average: f64,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl MeasurementRecord {
    /// Explicit `timestamp` field, as RFC 3339 text or epoch seconds.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.fields.get("timestamp")? {
            serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            serde_json::Value::Number(number) => {
                let micros = (number.as_f64()? * 1e6).round();
                DateTime::from_timestamp_micros(micros as i64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub file: PathBuf,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardAggregate {
    pub records: Vec<MeasurementRecord>,
    pub defects: Vec<MalformedRecord>,
    pub files: Vec<TrackedArtifact>,
}

impl ShardAggregate {
    /// Records in time order, only when every record carries a timestamp.
    pub fn chronological(&self) -> Option<Vec<&MeasurementRecord>> {
        let mut stamped = self
            .records
            .iter()
            .map(|record| record.timestamp().map(|ts| (ts, record)))
            .collect::<Option<Vec<_>>>()?;
        stamped.sort_by_key(|(ts, _)| *ts);
        Some(stamped.into_iter().map(|(_, record)| record).collect())
    }
}

/// Prometheus range-query result series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromSeries {
    pub metric: LabelSet,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub master: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub role: String,
    pub metric: String,
    pub label: String,
    pub group: Option<String>,
    pub points: usize,
}

/// First and last record time, when every record is stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementSpan {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

impl MeasurementSpan {
    pub fn of(aggregate: &ShardAggregate) -> Option<Self> {
        let ordered = aggregate.chronological()?;
        Some(Self {
            first: ordered.first()?.timestamp()?,
            last: ordered.last()?.timestamp()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub run_dir: String,
    pub location: RunLocation,
    pub config_path: String,
    pub settings: Settings,
    pub config_sections: Vec<String>,
    pub config_values: IndexMap<String, serde_json::Value>,
    pub measurement_count: Option<usize>,
    pub measurement_span: Option<MeasurementSpan>,
    pub malformed_records: Vec<MalformedRecord>,
    pub tracked_files: Vec<TrackedArtifact>,
    pub series: Vec<SeriesSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogDump {
    pub generated_at: String,
    pub registered: bool,
    pub plot_count: usize,
    pub metric_count: usize,
    pub plots: Vec<PlotSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortMember {
    pub run_dir: String,
    pub source_url: Option<String>,
    pub settings: Settings,
    pub measurement_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortSummary {
    pub cohort_key: IndexMap<String, serde_json::Value>,
    pub members: Vec<CohortMember>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortReport {
    pub report_version: u32,
    pub generated_at: String,
    pub results_root: String,
    pub comparison_keys: Vec<String>,
    pub ignored_keys: Vec<String>,
    pub sorting_keys: Vec<String>,
    pub run_count: usize,
    pub cohorts: Vec<CohortSummary>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MeasurementRecord, MeasurementSpan, ShardAggregate};

    fn record(timestamp: serde_json::Value) -> MeasurementRecord {
        serde_json::from_value(json!({"average": 1.0, "timestamp": timestamp})).expect("record")
    }

    #[test]
    fn fractional_epoch_seconds_keep_their_sign() {
        let before_epoch = record(json!(-1.5)).timestamp().expect("timestamp");
        assert_eq!(before_epoch.to_rfc3339(), "1969-12-31T23:59:58.500+00:00");

        let after_epoch = record(json!(1.25)).timestamp().expect("timestamp");
        assert_eq!(after_epoch.timestamp_millis(), 1250);
    }

    #[test]
    fn span_covers_first_and_last_record() {
        let aggregate = ShardAggregate {
            records: vec![
                record(json!("2024-05-01T10:00:05Z")),
                record(json!(1714557600.0)),
                record(json!("2024-05-01T10:00:02Z")),
            ],
            ..ShardAggregate::default()
        };

        let span = MeasurementSpan::of(&aggregate).expect("span");
        assert_eq!(span.first.timestamp(), 1714557600);
        assert_eq!(span.last.to_rfc3339(), "2024-05-01T10:00:05+00:00");

        let unstamped = ShardAggregate {
            records: vec![serde_json::from_value(json!({"average": 2.0})).expect("record")],
            ..ShardAggregate::default()
        };
        assert!(MeasurementSpan::of(&unstamped).is_none());
    }
}
