use std::cmp::Ordering;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::model::Settings;
use crate::store::RunResults;

/// Settings that split runs into separate cohorts.
pub const COMPARISON_KEYS: &[&str] = &["container_image"];
/// Settings that vary between otherwise comparable runs.
pub const IGNORED_KEYS: &[&str] = &["rhoai_version", "ocp_version"];
pub const SORTING_KEYS: &[&str] = &["model_name", "batch_size", "max_seq_length"];

pub type CohortKey = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionKeys {
    pub comparison_keys: Vec<String>,
    pub ignored_keys: Vec<String>,
    pub sorting_keys: Vec<String>,
    /// Partial cohort keys; a cohort matching every pair of one of them is dropped.
    pub ignored_entries: Vec<Settings>,
}

impl Default for RegressionKeys {
    fn default() -> Self {
        let owned = |keys: &[&str]| keys.iter().map(|key| key.to_string()).collect();
        Self {
            comparison_keys: owned(COMPARISON_KEYS),
            ignored_keys: owned(IGNORED_KEYS),
            sorting_keys: owned(SORTING_KEYS),
            ignored_entries: Vec::new(),
        }
    }
}

impl RegressionKeys {
    fn cohort_key(&self, settings: &Settings) -> CohortKey {
        self.comparison_keys
            .iter()
            .filter(|key| !self.ignored_keys.contains(key))
            .filter_map(|key| settings.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    fn is_ignored(&self, cohort_key: &CohortKey) -> bool {
        self.ignored_entries
            .iter()
            .filter(|entry| !entry.is_empty())
            .any(|entry| {
                entry.iter().all(|(key, value)| {
                    cohort_key
                        .iter()
                        .any(|(name, actual)| name == key && actual == value)
                })
            })
    }

    fn compare(&self, left: &Settings, right: &Settings) -> Ordering {
        self.sorting_keys
            .iter()
            .map(|key| compare_values(left.get(key), right.get(key)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug)]
pub struct RegressionCohort<'a, T> {
    pub cohort_key: CohortKey,
    pub members: Vec<&'a T>,
}

/// Groups runs by their recorded settings.
pub fn group<'a>(runs: &'a [RunResults], keys: &RegressionKeys) -> Vec<RegressionCohort<'a, RunResults>> {
    group_with(runs, keys, |run| run.settings.clone())
}

/// Groups `entries` into cohorts, reading each entry's settings through `settings_of`.
///
/// Cohorts come out in order of first appearance; members are stable-sorted by
/// the sorting keys with missing values last.
pub fn group_with<'a, T, F>(
    entries: &'a [T],
    keys: &RegressionKeys,
    settings_of: F,
) -> Vec<RegressionCohort<'a, T>>
where
    F: Fn(&T) -> Settings,
{
    let mut cohorts: IndexMap<String, (CohortKey, Vec<(Settings, &'a T)>)> = IndexMap::new();
    let mut dropped = 0usize;

    for entry in entries {
        let settings = settings_of(entry);
        let cohort_key = keys.cohort_key(&settings);
        if keys.is_ignored(&cohort_key) {
            dropped += 1;
            continue;
        }

        let identity = cohort_identity(&cohort_key);
        cohorts
            .entry(identity)
            .or_insert_with(|| (cohort_key, Vec::new()))
            .1
            .push((settings, entry));
    }

    let grouped: Vec<RegressionCohort<'a, T>> = cohorts
        .into_values()
        .map(|(cohort_key, mut members)| {
            members.sort_by(|(left, _), (right, _)| keys.compare(left, right));
            debug!(key = %cohort_identity(&cohort_key), members = members.len(), "cohort built");
            RegressionCohort {
                cohort_key,
                members: members.into_iter().map(|(_, entry)| entry).collect(),
            }
        })
        .collect();

    info!(
        entries = entries.len(),
        cohorts = grouped.len(),
        dropped,
        "grouped regression cohorts"
    );
    grouped
}

fn cohort_identity(cohort_key: &CohortKey) -> String {
    cohort_key
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => SortValue::of(left).cmp(&SortValue::of(right)),
    }
}

/// Sort key of a setting value: numbers (also when quoted) rank before text.
#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Number(f64),
    Text(String),
}

impl SortValue {
    fn of(value: &Value) -> Self {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        match value.as_f64().or_else(|| text.trim().parse::<f64>().ok()) {
            Some(number) => Self::Number(number),
            None => Self::Text(text),
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left.total_cmp(right),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
        }
    }
}

/// Parses `key=value[,key=value]` into a partial cohort key; values are read as
/// YAML scalars so `batch_size=16` matches a numeric setting.
pub fn parse_ignored_entry(raw: &str) -> anyhow::Result<Settings> {
    let mut entry = Settings::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("ignored entry `{raw}` is not a key=value list");
        };
        let value: Value = serde_yaml::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        entry.insert(key.trim().to_string(), value);
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(value: Value) -> Settings {
        serde_json::from_value(value).expect("settings object")
    }

    fn keys(comparison: &[&str], ignored: &[&str], sorting: &[&str]) -> RegressionKeys {
        let owned = |keys: &[&str]| keys.iter().map(|key| key.to_string()).collect();
        RegressionKeys {
            comparison_keys: owned(comparison),
            ignored_keys: owned(ignored),
            sorting_keys: owned(sorting),
            ignored_entries: Vec::new(),
        }
    }

    fn images(cohort: &RegressionCohort<'_, Settings>) -> Vec<Value> {
        cohort
            .members
            .iter()
            .map(|member| member["container_image"].clone())
            .collect()
    }

    #[test]
    fn ignored_keys_do_not_split_cohorts() {
        let entries = vec![
            settings(json!({"container_image": "a", "rhoai_version": "1"})),
            settings(json!({"container_image": "a", "rhoai_version": "2"})),
            settings(json!({"container_image": "b", "rhoai_version": "1"})),
        ];

        let cohorts = group_with(&entries, &keys(&["container_image"], &["rhoai_version"], &[]), Settings::clone);

        assert_eq!(cohorts.len(), 2);
        assert_eq!(cohorts[0].cohort_key, vec![("container_image".to_string(), json!("a"))]);
        assert_eq!(cohorts[0].members.len(), 2);
        assert_eq!(cohorts[1].cohort_key, vec![("container_image".to_string(), json!("b"))]);
        assert_eq!(cohorts[1].members.len(), 1);
    }

    #[test]
    fn ignored_keys_win_over_comparison_keys() {
        let entries = vec![
            settings(json!({"container_image": "a", "ocp_version": "4.14"})),
            settings(json!({"container_image": "a", "ocp_version": "4.15"})),
        ];

        let cohorts = group_with(
            &entries,
            &keys(&["container_image", "ocp_version"], &["ocp_version"], &[]),
            Settings::clone,
        );
        assert_eq!(cohorts.len(), 1);
        assert_eq!(cohorts[0].members.len(), 2);
    }

    #[test]
    fn members_sort_numerically_with_missing_last() {
        let entries = vec![
            settings(json!({"container_image": "a", "batch_size": 32, "id": 0})),
            settings(json!({"container_image": "a", "id": 1})),
            settings(json!({"container_image": "a", "batch_size": 4, "id": 2})),
            settings(json!({"container_image": "a", "batch_size": 16, "id": 3})),
            settings(json!({"container_image": "a", "batch_size": 4, "id": 4})),
        ];

        let cohorts = group_with(&entries, &keys(&["container_image"], &[], &["batch_size"]), Settings::clone);

        let order: Vec<Value> = cohorts[0].members.iter().map(|member| member["id"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(4), json!(3), json!(0), json!(1)]);
    }

    #[test]
    fn quoted_numbers_sort_with_plain_numbers() {
        let forward = vec![
            settings(json!({"container_image": "a", "batch_size": 10, "id": 0})),
            settings(json!({"container_image": "a", "batch_size": "10", "id": 1})),
            settings(json!({"container_image": "a", "batch_size": 9, "id": 2})),
            settings(json!({"container_image": "a", "batch_size": "large", "id": 3})),
        ];
        let keys = keys(&["container_image"], &[], &["batch_size"]);

        let ids = |entries: &[Settings]| -> Vec<Value> {
            group_with(entries, &keys, Settings::clone)[0]
                .members
                .iter()
                .map(|member| member["id"].clone())
                .collect()
        };
        assert_eq!(ids(&forward), vec![json!(2), json!(0), json!(1), json!(3)]);

        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(ids(&reversed), vec![json!(2), json!(1), json!(0), json!(3)]);
    }

    #[test]
    fn mixed_value_types_sort_without_panicking() {
        let entries: Vec<Settings> = (0..2000u64)
            .map(|index| {
                let size = (index * 7919) % 97;
                let batch_size = match index % 3 {
                    0 => json!(size),
                    1 => json!(size.to_string()),
                    _ => json!(format!("{size}.0")),
                };
                settings(json!({"container_image": "a", "batch_size": batch_size}))
            })
            .collect();

        let cohorts = group_with(&entries, &keys(&["container_image"], &[], &["batch_size"]), Settings::clone);
        let sizes: Vec<f64> = cohorts[0]
            .members
            .iter()
            .map(|member| match &member["batch_size"] {
                Value::String(text) => text.parse().expect("numeric text"),
                other => other.as_f64().expect("number"),
            })
            .collect();

        assert_eq!(sizes.len(), 2000);
        assert!(sizes.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn grouping_is_idempotent() {
        let entries = vec![
            settings(json!({"container_image": "b", "model_name": "llama"})),
            settings(json!({"container_image": "a", "model_name": "mistral"})),
            settings(json!({"container_image": "b", "model_name": "granite"})),
            settings(json!({"container_image": "a", "model_name": "granite"})),
        ];
        let keys = RegressionKeys::default();

        let first = group_with(&entries, &keys, Settings::clone);
        let flattened: Vec<Settings> = first
            .iter()
            .flat_map(|cohort| cohort.members.iter().map(|member| (*member).clone()))
            .collect();
        let second = group_with(&flattened, &keys, Settings::clone);

        assert_eq!(first.len(), second.len());
        for (left, right) in first.iter().zip(&second) {
            assert_eq!(left.cohort_key, right.cohort_key);
            assert_eq!(left.members, right.members);
        }
        assert_eq!(images(&first[0]), vec![json!("b"), json!("b")]);
        assert_eq!(first[0].members[0]["model_name"], json!("granite"));
    }

    #[test]
    fn ignored_entries_drop_whole_cohorts() {
        let entries = vec![
            settings(json!({"container_image": "a"})),
            settings(json!({"container_image": "b"})),
            settings(json!({"container_image": "a"})),
        ];
        let mut keys = keys(&["container_image"], &[], &[]);
        keys.ignored_entries = vec![
            parse_ignored_entry("container_image=a").expect("entry"),
            Settings::new(),
        ];

        let cohorts = group_with(&entries, &keys, Settings::clone);
        assert_eq!(cohorts.len(), 1);
        assert_eq!(images(&cohorts[0]), vec![json!("b")]);
    }

    #[test]
    fn ignored_entry_values_are_typed() {
        let entry = parse_ignored_entry("batch_size=16, container_image=quay.io/a:1").expect("entry");
        assert_eq!(entry["batch_size"], json!(16));
        assert_eq!(entry["container_image"], json!("quay.io/a:1"));
        assert!(parse_ignored_entry("batch_size").is_err());
    }
}
