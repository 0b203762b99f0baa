use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::store::ExecutionContext;

#[derive(Parser, Debug)]
#[command(
    name = "perf-artifacts",
    version,
    about = "Benchmark run artifact ingestion, metric catalog and regression cohorts"
)]
pub struct Cli {
    /// Run in report-generation mode instead of interactive browsing.
    #[arg(long, global = true, default_value_t = false)]
    pub generate: bool,

    #[arg(long, global = true, env = "JOB_NAME_SAFE")]
    pub job_name: Option<String>,

    /// Root of the CI artifact tree, used to compute relative source URLs.
    #[arg(long, global = true, env = "ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext {
            generate: self.generate,
            job_name: self.job_name.clone().filter(|name| !name.is_empty()),
            artifact_dir: self.artifact_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Parse(ParseArgs),
    Catalog(CatalogArgs),
    Regression(RegressionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    #[arg(long)]
    pub run_dir: PathBuf,

    /// Where to write the run manifest; defaults to `<run-dir>/run_manifest.json`.
    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Configuration value to copy into the manifest, as `path` (required) or
    /// `path=default`.
    #[arg(long = "config-key")]
    pub config_keys: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub use_cache: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RoleFilter {
    All,
    Sutest,
    Driver,
}

impl RoleFilter {
    pub fn matches(self, role: &str) -> bool {
        match self {
            Self::All => true,
            Self::Sutest => role == "sutest",
            Self::Driver => role == "driver",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    #[arg(long, value_enum, default_value_t = RoleFilter::All)]
    pub role: RoleFilter,

    /// Perform registration and dump the registered plots instead of a dry listing.
    #[arg(long, default_value_t = false)]
    pub register: bool,

    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RegressionArgs {
    #[arg(long)]
    pub results_root: PathBuf,

    #[arg(long = "comparison-key")]
    pub comparison_keys: Vec<String>,

    #[arg(long = "ignored-key")]
    pub ignored_keys: Vec<String>,

    #[arg(long = "sorting-key")]
    pub sorting_keys: Vec<String>,

    /// Cohort keys to leave out of the report, as `key=value[,key=value...]`.
    #[arg(long = "ignored-entry")]
    pub ignored_entries: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub use_cache: bool,

    #[arg(long)]
    pub output_path: Option<PathBuf>,
}
