use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use tracing::error;

use crate::error::ArtifactError;
use crate::store::important_files::TrackedFiles;

pub const CONFIG_FILENAME: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    AnyChild,
    Index(usize),
}

/// Parsed dotted path such as `tests.notebooks[0].name` or `clusters.*.role`.
///
/// A leading `$.` is accepted and ignored. `*` and `[*]` match every child in
/// document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    steps: Vec<Step>,
}

impl KeyPath {
    pub fn parse(raw: &str) -> Result<Self, ArtifactError> {
        let invalid = |reason: &str| ArtifactError::InvalidKeyPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let segment_regex =
            Regex::new(r"^(?P<name>[^\[\]]*)(?P<indexes>(?:\[(?:\d+|\*)\])*)$")
                .map_err(|err| invalid(&err.to_string()))?;
        let index_regex =
            Regex::new(r"\[(\d+|\*)\]").map_err(|err| invalid(&err.to_string()))?;

        let body = raw.strip_prefix("$.").unwrap_or(raw).trim();
        if body.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut steps = Vec::new();
        for segment in body.split('.') {
            let captures = segment_regex
                .captures(segment)
                .ok_or_else(|| invalid(&format!("malformed segment '{segment}'")))?;

            let name = captures.name("name").map(|m| m.as_str()).unwrap_or_default();
            let indexes = captures
                .name("indexes")
                .map(|m| m.as_str())
                .unwrap_or_default();

            if name.is_empty() && indexes.is_empty() {
                return Err(invalid("empty segment"));
            }

            match name {
                "" => {}
                "*" => steps.push(Step::AnyChild),
                key => steps.push(Step::Key(key.to_string())),
            }

            for index in index_regex.captures_iter(indexes) {
                match &index[1] {
                    "*" => steps.push(Step::AnyChild),
                    digits => {
                        let position = digits
                            .parse::<usize>()
                            .map_err(|_| invalid(&format!("index out of range '{digits}'")))?;
                        steps.push(Step::Index(position));
                    }
                }
            }
        }

        Ok(Self { steps })
    }

    /// First match in document order.
    pub fn find<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        first_match(document, &self.steps)
    }
}

fn first_match<'a>(value: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(value);
    };

    match step {
        Step::Key(key) => value.get(key.as_str()).and_then(|child| first_match(child, rest)),
        Step::Index(index) => value.get(*index).and_then(|child| first_match(child, rest)),
        Step::AnyChild => match value {
            Value::Mapping(mapping) => mapping.values().find_map(|child| first_match(child, rest)),
            Value::Sequence(items) => items.iter().find_map(|child| first_match(child, rest)),
            _ => None,
        },
    }
}

/// A run's `config.yaml`, with path-based lookup.
#[derive(Debug, Clone)]
pub struct ConfigDescriptor {
    pub filepath: PathBuf,
    raw_document: Value,
}

impl ConfigDescriptor {
    /// Loads `config.yaml` from the run directory `tracked` was created for.
    pub fn load(tracked: &mut TrackedFiles) -> Result<Self, ArtifactError> {
        let path = tracked.register(Path::new(CONFIG_FILENAME));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let raw = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ArtifactError::MissingRequiredFile(path.to_path_buf())
            } else {
                ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let document: Value = serde_yaml::from_str(&raw).map_err(|source| ArtifactError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::from_document(path, document))
    }

    pub fn from_document(path: &Path, document: Value) -> Self {
        let raw_document = if document.is_null() {
            error!(path = %path.display(), "config file is empty");
            Value::Mapping(Mapping::new())
        } else {
            document
        };

        Self {
            filepath: path.to_path_buf(),
            raw_document,
        }
    }

    pub fn raw_document(&self) -> &Value {
        &self.raw_document
    }

    pub fn get_opt(&self, key: &str) -> Result<Option<&Value>, ArtifactError> {
        let path = KeyPath::parse(key)?;
        Ok(path.find(&self.raw_document))
    }

    pub fn get(&self, key: &str) -> Result<&Value, ArtifactError> {
        self.get_opt(key)?
            .ok_or_else(|| ArtifactError::MissingRequiredKey {
                key: key.to_string(),
                file: self.filepath.clone(),
            })
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ArtifactError> {
        let value = self.get(key)?;
        self.deserialize(value)
    }

    /// Typed lookup falling back to `default` when the key is absent.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ArtifactError> {
        match self.get_opt(key)? {
            Some(value) => self.deserialize(value),
            None => Ok(default),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, value: &Value) -> Result<T, ArtifactError> {
        serde_yaml::from_value(value.clone()).map_err(|source| ArtifactError::Yaml {
            path: self.filepath.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use serde_yaml::Value;

    use super::{ConfigDescriptor, KeyPath};
    use crate::error::ArtifactError;
    use crate::store::important_files::TrackedFiles;

    const CONFIG: &str = r#"
tests:
  notebooks:
    namespace: rhods-notebooks
    users:
      - name: psapuser0
        count: 4
      - name: psapuser1
        count: 8
clusters:
  sutest:
    role: system-under-test
  driver:
    role: load-driver
"#;

    fn descriptor() -> ConfigDescriptor {
        let document: Value = serde_yaml::from_str(CONFIG).expect("valid yaml");
        ConfigDescriptor::from_document(Path::new("config.yaml"), document)
    }

    #[test]
    fn get_returns_nested_value() {
        let config = descriptor();
        let value = config.get("tests.notebooks.namespace").expect("key present");
        assert_eq!(value.as_str(), Some("rhods-notebooks"));

        let count: u32 = config.get_as("$.tests.notebooks.users[1].count").expect("typed");
        assert_eq!(count, 8);
    }

    #[test]
    fn get_without_default_reports_missing_key() {
        let config = descriptor();
        let err = config.get("tests.notebooks.image").expect_err("key absent");
        assert!(matches!(err, ArtifactError::MissingRequiredKey { ref key, .. } if key == "tests.notebooks.image"));
    }

    #[test]
    fn get_or_returns_default_unmodified() {
        let config = descriptor();
        let fallback = Value::String("quay.io/default:latest".to_string());
        let value = config
            .get_or("tests.notebooks.image", fallback.clone())
            .expect("lookup");
        assert_eq!(value, fallback);

        let present: String = config
            .get_or("tests.notebooks.namespace", "other".to_string())
            .expect("lookup");
        assert_eq!(present, "rhods-notebooks");
    }

    #[test]
    fn wildcards_return_first_match_in_document_order() {
        let config = descriptor();
        let role = config.get("clusters.*.role").expect("wildcard match");
        assert_eq!(role.as_str(), Some("system-under-test"));

        let name = config.get("tests.notebooks.users[*].name").expect("index wildcard");
        assert_eq!(name.as_str(), Some("psapuser0"));
    }

    #[test]
    fn lookups_leave_the_document_untouched() {
        let config = descriptor();
        let before = config.raw_document().clone();
        let _ = config.get("tests.notebooks.users[0].name");
        let _ = config.get_or("does.not.exist", 1_u32);
        assert_eq!(config.raw_document(), &before);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(KeyPath::parse("").is_err());
        assert!(KeyPath::parse("a..b").is_err());
        assert!(KeyPath::parse("a[x]").is_err());
        assert!(KeyPath::parse("a[0][*]").is_ok());
    }

    #[test]
    fn load_requires_the_config_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut tracked = TrackedFiles::new(tmp.path());
        let err = ConfigDescriptor::load(&mut tracked).expect_err("missing file");
        assert!(matches!(err, ArtifactError::MissingRequiredFile(_)));
    }

    #[test]
    fn empty_config_loads_as_empty_mapping() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("config.yaml"), "").expect("write config");

        let mut tracked = TrackedFiles::new(tmp.path());
        let config = ConfigDescriptor::load(&mut tracked).expect("empty config loads");
        assert!(config.raw_document().as_mapping().is_some_and(|m| m.is_empty()));
        assert_eq!(tracked.files().len(), 1);
    }
}
