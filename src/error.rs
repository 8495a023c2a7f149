//! Error types for Capstan
//!
//! Uses `thiserror` for library errors. Request-scoped errors reject a whole
//! webhook delivery before any repository is touched; repository-scoped errors
//! are recorded per repository and never abort sibling repositories.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Capstan operations
pub type CapstanResult<T> = Result<T, CapstanError>;

/// Main error type for Capstan operations
#[derive(Error, Debug)]
pub enum CapstanError {
    /// Configuration file could not be parsed
    #[error("invalid configuration in {file}: {message}")]
    InvalidConfig { file: PathBuf, message: String },

    /// Repository-shaped fields given at the top level alongside a named set
    #[error("'{field}' can't be specified at the top level when using multiple repositories")]
    ConfigConflict { field: String },

    /// A required repository field is missing or empty
    #[error("repository '{name}' is missing required field '{field}'")]
    MissingRepositoryField { name: String, field: String },

    /// Target directory is not an absolute path
    #[error("directory '{directory}' of repository '{name}' must be an absolute path")]
    RelativeDirectory { name: String, directory: PathBuf },

    /// A hook named in the configuration has no registered implementation
    #[error("hook '{name}' is not registered")]
    MissingHook { name: String },

    /// Request body could not be read
    #[error("couldn't read input")]
    UnreadableInput,

    /// Request body is not valid JSON
    #[error("couldn't decode json data")]
    UndecodableData,

    /// A keyed repository failed signature verification
    #[error("secret is needed to authenticate this request for repository '{repository}'")]
    Unauthenticated { repository: String },

    /// A before-hook declined the step
    #[error("callback prohibited sync of '{step}'")]
    HookAborted { step: String },

    /// A hook raised an error (distinct from declining the step)
    #[error("callback for '{step}' failed: {message}")]
    HookFailed { step: String, message: String },

    /// Archive download failed on the network level
    #[error("{url} couldn't be downloaded: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Archive download completed with a non-success status
    #[error("{url} couldn't be downloaded: HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    /// The downloaded file is not a readable zip archive
    #[error("the zipped file from {url} couldn't be extracted: {message}")]
    Archive { url: String, message: String },

    /// Maintenance backup is gone while the site is down (data loss)
    #[error("couldn't reproduce the old entry point: '{path}' is missing")]
    BackupMissing { path: PathBuf },

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CapstanError {
    /// True for errors that reject a delivery before any repository is synced.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CapstanError::UnreadableInput
                | CapstanError::UndecodableData
                | CapstanError::Unauthenticated { .. }
                | CapstanError::HookAborted { .. }
                | CapstanError::HookFailed { .. }
        )
    }
}
