//! Maintenance page swap
//!
//! While repositories are being synced the live entry point can be replaced
//! with a placeholder page. The swap is gated by a marker file whose mere
//! presence enables the feature; the backup copy of the entry point is the
//! on-disk signal that the site is currently down.
//!
//! The restore is deliberately asymmetric: the backup only overwrites the
//! entry point when the entry point is missing or still byte-identical to the
//! placeholder. Anything else means some other process legitimately replaced
//! it during the window, and it is left alone. The backup is consumed either
//! way, so `turn_on` is idempotent in effect.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CapstanError, CapstanResult};

/// Live entry point served to visitors
pub const INDEX_FILE: &str = "index.html";
/// Backup of the entry point while the site is down
pub const BACKUP_FILE: &str = "index.html.backup";
/// Sentinel enabling maintenance behavior; content is irrelevant
pub const MARKER_FILE: &str = ".maintenance";

/// Swaps the live entry point for a placeholder and back.
#[derive(Debug, Clone)]
pub struct MaintenancePage {
    site_root: PathBuf,
}

impl MaintenancePage {
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
        }
    }

    /// Placeholder content written over the live entry point.
    ///
    /// The trailing comment carries a hash of the snippet so the restore path
    /// can recognize its own output even after deploys change everything
    /// around it.
    pub fn content() -> String {
        let snippet = "<!DOCTYPE html>\n\
            <html lang=\"en\">\n\
            <head>\n\
            <meta charset=\"utf-8\">\n\
            <meta http-equiv=\"refresh\" content=\"30\">\n\
            <title>Maintenance</title>\n\
            </head>\n\
            <body>\n\
            <h1>Down for maintenance</h1>\n\
            <p>A new version is being deployed. This page refreshes itself.</p>\n\
            </body>\n\
            </html>";
        let digest = Sha256::digest(snippet.as_bytes());
        format!("{}\n\n<!-- {:x} -->\n", snippet, digest)
    }

    /// Whether the marker file enables maintenance for this site root.
    pub fn is_configured(&self) -> bool {
        self.site_root.join(MARKER_FILE).exists()
    }

    fn index_path(&self) -> PathBuf {
        self.site_root.join(INDEX_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.site_root.join(BACKUP_FILE)
    }

    /// Take the site down: back up the entry point, then overwrite it with
    /// the placeholder.
    ///
    /// Fails loudly when the entry point cannot be read; a site that cannot
    /// be backed up must not be overwritten.
    pub fn shutdown(&self) -> CapstanResult<()> {
        fs::copy(self.index_path(), self.backup_path())?;
        fs::write(self.index_path(), Self::content())?;
        debug!(site_root = %self.site_root.display(), "maintenance page is up");
        Ok(())
    }

    /// Bring the site back: restore the entry point from the backup when
    /// nothing else replaced it, and consume the backup.
    pub fn turn_on(&self) -> CapstanResult<()> {
        let backup_path = self.backup_path();
        let backup = match fs::read(&backup_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CapstanError::BackupMissing { path: backup_path })
            }
            Err(e) => return Err(e.into()),
        };

        let live = read_optional(&self.index_path())?;
        let ours = live
            .as_deref()
            .map(|bytes| bytes == Self::content().as_bytes())
            .unwrap_or(true);

        if ours {
            fs::write(self.index_path(), &backup)?;
        }

        fs::remove_file(&backup_path)?;
        debug!(
            site_root = %self.site_root.display(),
            restored = ours,
            "maintenance page is down"
        );
        Ok(())
    }
}

/// Read a file, mapping "not there" (or unreadable content) to `None`.
fn read_optional(path: &Path) -> CapstanResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(_) => Ok(None),
    }
}
