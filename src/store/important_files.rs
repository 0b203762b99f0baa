use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};

use crate::model::TrackedArtifact;
use crate::util::sha256_file;

/// Files a run result is built from, relative to the run directory.
pub const IMPORTANT_FILES: &[&str] = &[
    "config.yaml",
    "*__llm_load_test__run/output/ghz-multiplexed-results*.json",
];

pub fn is_important(relative: &Path) -> bool {
    let text = relative.to_string_lossy();
    IMPORTANT_FILES.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|pattern| pattern.matches(&text))
            .unwrap_or(false)
    })
}

/// Records which files fed a run's result, with their digests.
#[derive(Debug, Clone)]
pub struct TrackedFiles {
    run_dir: PathBuf,
    files: Vec<TrackedArtifact>,
}

impl TrackedFiles {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            files: Vec::new(),
        }
    }

    /// Registers `relative` and returns the full path to open.
    pub fn register(&mut self, relative: &Path) -> PathBuf {
        let full_path = self.run_dir.join(relative);

        if self.files.iter().any(|file| file.path == relative) {
            return full_path;
        }

        if !is_important(relative) {
            debug!(path = %relative.display(), "tracking a file outside the important-files list");
        }

        let sha256 = if full_path.is_file() {
            match sha256_file(&full_path) {
                Ok(digest) => Some(digest),
                Err(err) => {
                    warn!(path = %full_path.display(), error = %err, "could not hash tracked file");
                    None
                }
            }
        } else {
            None
        };

        self.files.push(TrackedArtifact {
            path: relative.to_path_buf(),
            sha256,
        });

        full_path
    }

    pub fn extend(&mut self, artifacts: impl IntoIterator<Item = TrackedArtifact>) {
        for artifact in artifacts {
            if !self.files.iter().any(|file| file.path == artifact.path) {
                self.files.push(artifact);
            }
        }
    }

    pub fn get(&self, relative: &Path) -> Option<&TrackedArtifact> {
        self.files.iter().find(|file| file.path == relative)
    }

    pub fn files(&self) -> &[TrackedArtifact] {
        &self.files
    }
}
