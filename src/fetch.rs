//! Snapshot archive download and extraction
//!
//! Downloads a branch snapshot as a zip archive into a scratch directory and
//! extracts the repository subtree into the target directory. The download
//! lands in a uniquely-named temp file whose RAII guard removes it on every
//! exit path, success or failure.

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use zip::ZipArchive;

use crate::config::RepositoryConfig;
use crate::error::{CapstanError, CapstanResult};

/// Seam between the sync engine and the network.
///
/// The engine only needs "make this repository's snapshot appear in its
/// target directory"; tests substitute recording or failing implementations.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, repo: &RepositoryConfig) -> CapstanResult<()>;
}

/// Downloads snapshot archives over HTTPS and extracts them.
pub struct ArchiveFetcher {
    client: reqwest::blocking::Client,
    scratch_dir: PathBuf,
}

impl ArchiveFetcher {
    /// Build a fetcher whose downloads are bounded by `timeout` and land in
    /// `scratch_dir` (created on first use).
    pub fn new(scratch_dir: impl Into<PathBuf>, timeout: Duration) -> CapstanResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            scratch_dir: scratch_dir.into(),
        })
    }

    fn download(&self, repo: &RepositoryConfig, url: &str) -> CapstanResult<tempfile::NamedTempFile> {
        fs::create_dir_all(&self.scratch_dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(
                "{}-{}-{}.zip-",
                repo.username, repo.repository, repo.branch
            ))
            .tempfile_in(&self.scratch_dir)?;

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|source| CapstanError::Download {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CapstanError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .copy_to(temp.as_file_mut())
            .map_err(|source| CapstanError::Download {
                url: url.to_string(),
                source,
            })?;

        Ok(temp)
    }
}

impl Fetcher for ArchiveFetcher {
    fn fetch(&self, repo: &RepositoryConfig) -> CapstanResult<()> {
        let url = repo.download_url();
        debug!(repository = %repo.name, %url, "downloading snapshot");

        // Holding the guard keeps the temp file alive until extraction is
        // done; dropping it removes the file even on the error paths.
        let temp = self.download(repo, &url)?;

        let file = temp.reopen()?;
        let mut archive = ZipArchive::new(file).map_err(|e| CapstanError::Archive {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if repo.flush && repo.directory.exists() {
            flush_dir(&repo.directory)?;
        }
        fs::create_dir_all(&repo.directory)?;

        let extracted = extract_subtree(&mut archive, &repo.archive_prefix(), &repo.directory)
            .map_err(|e| match e {
                ExtractError::Archive(message) => CapstanError::Archive {
                    url: url.clone(),
                    message,
                },
                ExtractError::Io(e) => CapstanError::Io(e),
            })?;

        info!(
            repository = %repo.name,
            files = extracted,
            directory = %repo.directory.display(),
            "snapshot extracted"
        );
        Ok(())
    }
}

/// Remove a directory's contents without touching the directory itself.
///
/// An empty directory is a no-op, not an error.
pub fn flush_dir(dir: &Path) -> CapstanResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[derive(Debug)]
enum ExtractError {
    Archive(String),
    Io(io::Error),
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        ExtractError::Io(e)
    }
}

/// Extract the entries under `prefix` into `target`, stripping the prefix.
///
/// Entries outside the prefix, and entries whose names would escape the
/// target directory, are skipped. Returns the number of files written.
fn extract_subtree<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    prefix: &str,
    target: &Path,
) -> Result<usize, ExtractError> {
    let prefix = Path::new(prefix.trim_end_matches('/')).to_path_buf();
    let mut extracted = 0;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;

        let Some(name) = entry.enclosed_name() else {
            continue;
        };
        let Ok(relative) = name.strip_prefix(&prefix).map(Path::to_path_buf) else {
            continue;
        };

        let dest = target.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    Ok(extracted)
}
