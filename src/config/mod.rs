//! Deployment configuration
//!
//! Configuration is loaded once at startup from a TOML file and is immutable
//! afterwards. A deployment either describes exactly one implicit repository
//! (repository fields at the top level) or an explicit named set under
//! `[repositories.<name>]`, never both.

mod loader;


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CapstanResult;

pub use loader::{load, load_with_warnings, ConfigWarning};

/// Default download host when a repository does not override it
pub const DEFAULT_HOST: &str = "github.com";

/// Default branch when a repository leaves it unset or empty
pub const DEFAULT_BRANCH: &str = "master";

/// Default bound on a single archive download
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// One configured repository, keyed by a unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Unique name within the deployment (map key, repeated here for logging)
    pub name: String,
    /// Owner of the remote repository
    pub username: String,
    /// Remote repository name
    pub repository: String,
    /// Branch whose snapshot is deployed
    pub branch: String,
    /// Absolute target directory the snapshot is extracted into
    pub directory: PathBuf,
    /// Download host, inherited from the deployment default when unset
    pub host: String,
    /// Shared webhook secret; `None` means no signature is required
    pub key: Option<String>,
    /// Clear the target directory's contents before extraction
    pub flush: bool,
    /// Hook names run before this repository's sync step
    pub before: Vec<String>,
    /// Hook names run after this repository's sync step
    pub after: Vec<String>,
}

impl RepositoryConfig {
    /// Archive download URL for this repository.
    ///
    /// A host that already carries a scheme is used verbatim as the base,
    /// otherwise `https://` is assumed.
    pub fn download_url(&self) -> String {
        let base = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.host)
        };
        format!(
            "{}/{}/{}/archive/{}.zip",
            base, self.username, self.repository, self.branch
        )
    }

    /// Archive-root prefix the extracted subtree is stripped of.
    pub fn archive_prefix(&self) -> String {
        format!("{}-{}/", self.repository, self.branch)
    }
}

/// Process-wide deployment configuration.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// Swap in the maintenance page while syncing (when the marker exists)
    pub maintenance: bool,
    /// Default download host for repositories without an override
    pub host: String,
    /// Site root holding the live entry point and the maintenance marker
    pub site_root: PathBuf,
    /// Working directory for downloads, cache, and the run lock
    pub temp_dir: PathBuf,
    /// Bound on a single archive download
    pub download_timeout: Duration,
    /// Hook names run once before the whole sync
    pub before: Vec<String>,
    /// Hook names run once after the whole sync
    pub after: Vec<String>,
    /// Repositories in stable name order
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl DeploymentConfig {
    /// Load configuration from a TOML file, discarding warnings.
    pub fn load(path: &Path) -> CapstanResult<Self> {
        loader::load(path)
    }

    /// Scratch directory downloads land in; removed entirely after each run.
    pub fn scratch_dir(&self) -> PathBuf {
        self.temp_dir.join("downloads")
    }

    /// Cache directory recreated empty after each run.
    pub fn cache_dir(&self) -> PathBuf {
        self.temp_dir.join("cache")
    }

    /// Lock file serializing runs against this site root.
    pub fn lock_path(&self) -> PathBuf {
        self.temp_dir.join(".capstan.lock")
    }
}
