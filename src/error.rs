use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("required file not found: {}", .0.display())]
    MissingRequiredFile(PathBuf),

    #[error("key '{key}' not found in {}", .file.display())]
    MissingRequiredKey { key: String, file: PathBuf },

    #[error("invalid key path '{path}': {reason}")]
    InvalidKeyPath { path: String, reason: String },

    #[error("metric '{name}' registered twice for cluster role '{role}'")]
    DuplicateMetricName { role: String, name: String },

    #[error("metric catalog already registered")]
    CatalogAlreadyRegistered,

    #[error("failed to parse yaml {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
