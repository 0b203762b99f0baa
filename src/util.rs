use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Lexical relative path from `base` to `target`; may start with `..`.
///
/// Both paths are made absolute against the current directory first, nothing
/// is resolved on disk.
pub fn relative_path(target: &Path, base: &Path) -> Result<PathBuf> {
    let target = std::path::absolute(target)
        .with_context(|| format!("failed to make path absolute: {}", target.display()))?;
    let base = std::path::absolute(base)
        .with_context(|| format!("failed to make path absolute: {}", base.display()))?;

    let target_parts: Vec<Component<'_>> = normalized(&target);
    let base_parts: Vec<Component<'_>> = normalized(&base);

    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }

    if relative.as_os_str().is_empty() {
        relative.push(".");
    }

    Ok(relative)
}

fn normalized(path: &Path) -> Vec<Component<'_>> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(component);
                }
            }
            other => parts.push(other),
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::relative_path;

    #[test]
    fn relative_path_descends_into_children() {
        let relative = relative_path(Path::new("/ci/artifacts/001__test/run"), Path::new("/ci/artifacts"))
            .expect("relative path");
        assert_eq!(relative, PathBuf::from("001__test/run"));
    }

    #[test]
    fn relative_path_climbs_out_of_the_base() {
        let relative = relative_path(Path::new("/data/runs/a"), Path::new("/ci/artifacts"))
            .expect("relative path");
        assert_eq!(relative, PathBuf::from("../../data/runs/a"));
    }

    #[test]
    fn relative_path_of_the_base_itself_is_dot() {
        let relative =
            relative_path(Path::new("/ci/artifacts/"), Path::new("/ci/artifacts")).expect("relative path");
        assert_eq!(relative, PathBuf::from("."));
    }
}
