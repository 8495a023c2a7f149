//! Configuration loading and validation

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CapstanError, CapstanResult};

use super::{
    DeploymentConfig, RepositoryConfig, DEFAULT_BRANCH, DEFAULT_DOWNLOAD_TIMEOUT_SECS,
    DEFAULT_HOST,
};

/// Non-fatal configuration warning surfaced to CLI users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
    pub line: Option<usize>,
}

/// Top-level fields that double as the implicit single-repository shape.
///
/// Any of these alongside a `[repositories.*]` table is a contradiction.
const REPOSITORY_SHAPE_FIELDS: &[&str] =
    &["username", "repository", "branch", "directory", "key", "flush"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    maintenance: Option<bool>,
    host: Option<String>,
    site_root: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    download_timeout_secs: Option<u64>,
    before: Vec<String>,
    after: Vec<String>,

    // single-repository shape
    username: Option<String>,
    repository: Option<String>,
    branch: Option<String>,
    directory: Option<PathBuf>,
    key: Option<String>,
    flush: Option<bool>,

    repositories: BTreeMap<String, RawRepository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRepository {
    username: Option<String>,
    repository: Option<String>,
    branch: Option<String>,
    directory: Option<PathBuf>,
    host: Option<String>,
    key: Option<String>,
    flush: Option<bool>,
    before: Vec<String>,
    after: Vec<String>,
}

/// Load configuration and collect non-fatal warnings (e.g. unknown keys).
pub fn load_with_warnings(path: &Path) -> CapstanResult<(DeploymentConfig, Vec<ConfigWarning>)> {
    let content = fs::read_to_string(path)?;

    let mut unknown_paths: Vec<String> = Vec::new();
    let deserializer = toml::de::Deserializer::new(&content);

    let raw: RawConfig = serde_ignored::deserialize(deserializer, |p| {
        unknown_paths.push(p.to_string());
    })
    .map_err(|e| CapstanError::InvalidConfig {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let warnings = unknown_paths
        .into_iter()
        .map(|path_str| {
            let key = path_str
                .split('.')
                .next_back()
                .unwrap_or(path_str.as_str())
                .to_string();
            ConfigWarning {
                line: find_line_number(&content, &key),
                key,
                file: path.to_path_buf(),
            }
        })
        .collect();

    let config = resolve(raw, path)?;
    Ok((config, warnings))
}

/// Load configuration, discarding warnings.
pub fn load(path: &Path) -> CapstanResult<DeploymentConfig> {
    load_with_warnings(path).map(|(config, _)| config)
}

/// Turn the raw file shape into a validated [`DeploymentConfig`].
fn resolve(mut raw: RawConfig, file: &Path) -> CapstanResult<DeploymentConfig> {
    let host = raw
        .host
        .take()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let raw_repositories = if raw.repositories.is_empty() {
        // single-repository mode: the top level is the repository
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "default".to_string(),
            RawRepository {
                username: raw.username.take(),
                repository: raw.repository.take(),
                branch: raw.branch.take(),
                directory: raw.directory.take(),
                host: None,
                key: raw.key.take(),
                flush: raw.flush,
                before: Vec::new(),
                after: Vec::new(),
            },
        );
        repositories
    } else {
        for field in REPOSITORY_SHAPE_FIELDS {
            let present = match *field {
                "username" => raw.username.is_some(),
                "repository" => raw.repository.is_some(),
                "branch" => raw.branch.is_some(),
                "directory" => raw.directory.is_some(),
                "key" => raw.key.is_some(),
                "flush" => raw.flush.is_some(),
                _ => false,
            };
            if present {
                return Err(CapstanError::ConfigConflict {
                    field: field.to_string(),
                });
            }
        }
        std::mem::take(&mut raw.repositories)
    };

    let mut repositories = BTreeMap::new();
    for (name, repo) in raw_repositories {
        repositories.insert(name.clone(), resolve_repository(name, repo, &host)?);
    }

    let site_root = raw.site_root.ok_or_else(|| CapstanError::InvalidConfig {
        file: file.to_path_buf(),
        message: "missing required field 'site_root'".to_string(),
    })?;
    if !site_root.is_absolute() {
        return Err(CapstanError::InvalidConfig {
            file: file.to_path_buf(),
            message: format!("'site_root' must be an absolute path, got '{}'", site_root.display()),
        });
    }

    let temp_dir = raw
        .temp_dir
        .unwrap_or_else(|| std::env::temp_dir().join("capstan"));

    Ok(DeploymentConfig {
        maintenance: raw.maintenance.unwrap_or(true),
        host,
        site_root,
        temp_dir,
        download_timeout: Duration::from_secs(
            raw.download_timeout_secs
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        ),
        before: raw.before,
        after: raw.after,
        repositories,
    })
}

fn resolve_repository(
    name: String,
    raw: RawRepository,
    default_host: &str,
) -> CapstanResult<RepositoryConfig> {
    let username = required(&name, "username", raw.username)?;
    let repository = required(&name, "repository", raw.repository)?;

    let directory = raw
        .directory
        .filter(|d| !d.as_os_str().is_empty())
        .ok_or_else(|| CapstanError::MissingRepositoryField {
            name: name.clone(),
            field: "directory".to_string(),
        })?;
    if !directory.is_absolute() {
        return Err(CapstanError::RelativeDirectory { name, directory });
    }

    let branch = raw
        .branch
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    let host = raw
        .host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| default_host.to_string());

    Ok(RepositoryConfig {
        name,
        username,
        repository,
        branch,
        directory,
        host,
        key: raw.key,
        flush: raw.flush.unwrap_or(false),
        before: raw.before,
        after: raw.after,
    })
}

fn required(name: &str, field: &str, value: Option<String>) -> CapstanResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CapstanError::MissingRepositoryField {
            name: name.to_string(),
            field: field.to_string(),
        })
}

/// Best-effort line lookup for a warning key.
fn find_line_number(content: &str, key: &str) -> Option<usize> {
    content
        .lines()
        .position(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with(key)
                && trimmed[key.len()..]
                    .trim_start()
                    .starts_with('=')
        })
        .map(|idx| idx + 1)
}
