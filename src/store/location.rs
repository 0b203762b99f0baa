use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use url::Url;

use crate::model::RunLocation;
use crate::util::relative_path;

pub const SOURCE_URL_FILENAME: &str = "source_url";
pub const MISSING_SOURCE_URL: &str = "/missing/source/url";
const REPLOT_JOB_SUFFIX: &str = "-plot";

/// How the process was launched; built once from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub generate: bool,
    pub job_name: Option<String>,
    pub artifact_dir: Option<PathBuf>,
}

impl ExecutionContext {
    pub fn is_interactive(&self) -> bool {
        !self.generate
    }

    fn is_replot_job(&self) -> bool {
        self.job_name
            .as_deref()
            .is_some_and(|name| name.ends_with(REPLOT_JOB_SUFFIX))
    }
}

pub fn resolve_location(run_dir: &Path, context: &ExecutionContext) -> RunLocation {
    let mut source_url = read_source_url(run_dir);
    let mut artifacts_basedir = source_url.as_deref().map(basedir_from_url);

    debug!(
        run_dir = %run_dir.display(),
        source_url = source_url.as_deref().unwrap_or_default(),
        "recorded source url"
    );

    if context.is_interactive() {
        return RunLocation {
            source_url,
            artifacts_basedir: run_dir.to_path_buf(),
            is_interactive: true,
        };
    }

    let job_name = context.job_name.as_deref().unwrap_or_default();

    if context.is_replot_job() {
        if source_url.is_none() {
            warn!(
                job_name,
                run_dir = %run_dir.display(),
                "source url should be recorded when running from a replot job"
            );
            source_url = Some(MISSING_SOURCE_URL.to_string());
            artifacts_basedir = Some(run_dir.to_path_buf());
        }
    } else if let Some(relative) = context
        .artifact_dir
        .as_deref()
        .and_then(|artifact_dir| relative_to_artifact_dir(run_dir, artifact_dir))
    {
        source_url = Some(relative.display().to_string());
        artifacts_basedir = Some(relative);
    } else {
        warn!(
            job_name,
            artifact_dir = %context
                .artifact_dir
                .as_deref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            run_dir = %run_dir.display(),
            "unknown execution environment"
        );
        artifacts_basedir = Some(std::path::absolute(run_dir).unwrap_or_else(|_| run_dir.to_path_buf()));
    }

    RunLocation {
        source_url,
        artifacts_basedir: artifacts_basedir.unwrap_or_else(|| run_dir.to_path_buf()),
        is_interactive: false,
    }
}

fn relative_to_artifact_dir(run_dir: &Path, artifact_dir: &Path) -> Option<PathBuf> {
    match relative_path(run_dir, artifact_dir) {
        Ok(relative) => Some(relative),
        Err(err) => {
            warn!(
                run_dir = %run_dir.display(),
                artifact_dir = %artifact_dir.display(),
                error = %err,
                "could not compute path relative to the artifact directory"
            );
            None
        }
    }
}

fn read_source_url(run_dir: &Path) -> Option<String> {
    let path = run_dir.join(SOURCE_URL_FILENAME);
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not read source url file");
            None
        }
    }
}

/// Path component of a recorded URL; bare paths are taken as-is.
fn basedir_from_url(source_url: &str) -> PathBuf {
    match Url::parse(source_url) {
        Ok(url) => PathBuf::from(url.path()),
        Err(_) => PathBuf::from(source_url),
    }
}
