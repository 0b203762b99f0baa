use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::RegressionArgs;
use crate::model::{CohortMember, CohortReport, CohortSummary};
use crate::regression::{RegressionCohort, RegressionKeys, group, parse_ignored_entry};
use crate::store::{ExecutionContext, ParseOptions, RunResults, parse_runs};
use crate::util::{now_utc_string, relative_path, write_json_pretty};

const REPORT_VERSION: u32 = 1;
pub const REPORT_FILENAME: &str = "regression_cohorts.json";

pub fn run(args: RegressionArgs, context: &ExecutionContext) -> Result<()> {
    let keys = regression_keys(&args)?;
    let options = ParseOptions {
        use_cache: args.use_cache,
        ..ParseOptions::default()
    };

    let runs = parse_runs(&args.results_root, context, &options)?;
    if runs.is_empty() {
        warn!(results_root = %args.results_root.display(), "no parsable runs found");
    }

    let cohorts = group(&runs, &keys);
    let summaries = cohorts
        .iter()
        .map(|cohort| summarize(&args, cohort))
        .collect::<Result<Vec<_>>>()?;

    let report = CohortReport {
        report_version: REPORT_VERSION,
        generated_at: now_utc_string(),
        results_root: args.results_root.display().to_string(),
        comparison_keys: keys.comparison_keys,
        ignored_keys: keys.ignored_keys,
        sorting_keys: keys.sorting_keys,
        run_count: runs.len(),
        cohorts: summaries,
    };

    let output_path = args
        .output_path
        .clone()
        .unwrap_or_else(|| args.results_root.join(REPORT_FILENAME));
    write_json_pretty(&output_path, &report)?;

    info!(path = %output_path.display(), "wrote regression cohort report");
    info!(
        runs = report.run_count,
        cohorts = report.cohorts.len(),
        "regression grouping completed"
    );

    Ok(())
}

/// Command-line keys replace the defaults list by list.
fn regression_keys(args: &RegressionArgs) -> Result<RegressionKeys> {
    let defaults = RegressionKeys::default();
    let pick = |given: &[String], default: Vec<String>| {
        if given.is_empty() {
            default
        } else {
            given.to_vec()
        }
    };

    let ignored_entries = args
        .ignored_entries
        .iter()
        .map(|raw| parse_ignored_entry(raw).with_context(|| format!("invalid --ignored-entry {raw}")))
        .collect::<Result<Vec<_>>>()?;

    Ok(RegressionKeys {
        comparison_keys: pick(&args.comparison_keys, defaults.comparison_keys),
        ignored_keys: pick(&args.ignored_keys, defaults.ignored_keys),
        sorting_keys: pick(&args.sorting_keys, defaults.sorting_keys),
        ignored_entries,
    })
}

fn summarize(args: &RegressionArgs, cohort: &RegressionCohort<'_, RunResults>) -> Result<CohortSummary> {
    let members = cohort
        .members
        .iter()
        .map(|run| -> Result<CohortMember> {
            Ok(CohortMember {
                run_dir: relative_path(&run.run_dir, &args.results_root)?
                    .display()
                    .to_string(),
                source_url: run.location.source_url.clone(),
                settings: run.settings.clone(),
                measurement_count: run
                    .llm_load_test_output
                    .as_ref()
                    .map(|output| output.records.len()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CohortSummary {
        cohort_key: cohort.cohort_key.iter().cloned().collect(),
        members,
    })
}
