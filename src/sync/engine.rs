//! The orchestration state machine

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use tracing::{error, info, warn};

use crate::config::DeploymentConfig;
use crate::error::{CapstanError, CapstanResult};
use crate::fetch::{ArchiveFetcher, Fetcher};
use crate::hooks::{run_after, run_before, HookEvent, HookRegistry, NamedHook};
use crate::lock::SiteLock;
use crate::maintenance::MaintenancePage;
use crate::signature;

use super::{CacheInvalidator, SyncReport, WebhookDelivery};

struct RepoHooks {
    before: Vec<NamedHook>,
    after: Vec<NamedHook>,
}

/// Drives one webhook delivery end to end.
///
/// Construction resolves every hook name in the configuration against the
/// registry, so a dangling hook reference fails at startup rather than
/// mid-deployment. The engine is generic over [`Fetcher`], defaulting to the
/// real [`ArchiveFetcher`]; use `new_with_fetcher()` to substitute one (e.g.
/// for testing).
pub struct SyncEngine<F: Fetcher = ArchiveFetcher> {
    config: DeploymentConfig,
    maintenance: MaintenancePage,
    fetcher: F,
    cache: Box<dyn CacheInvalidator>,
    before: Vec<NamedHook>,
    after: Vec<NamedHook>,
    repo_hooks: BTreeMap<String, RepoHooks>,
}

impl<F: Fetcher> std::fmt::Debug for SyncEngine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine").finish_non_exhaustive()
    }
}

impl SyncEngine<ArchiveFetcher> {
    /// Create an engine with the real archive fetcher.
    pub fn new(
        config: DeploymentConfig,
        registry: &HookRegistry,
        cache: Box<dyn CacheInvalidator>,
    ) -> CapstanResult<Self> {
        let fetcher = ArchiveFetcher::new(config.scratch_dir(), config.download_timeout)?;
        Self::new_with_fetcher(config, registry, cache, fetcher)
    }
}

impl<F: Fetcher> SyncEngine<F> {
    /// Create an engine with a custom [`Fetcher`].
    pub fn new_with_fetcher(
        config: DeploymentConfig,
        registry: &HookRegistry,
        cache: Box<dyn CacheInvalidator>,
        fetcher: F,
    ) -> CapstanResult<Self> {
        let before = registry.resolve(&config.before)?;
        let after = registry.resolve(&config.after)?;

        let mut repo_hooks = BTreeMap::new();
        for (name, repo) in &config.repositories {
            repo_hooks.insert(
                name.clone(),
                RepoHooks {
                    before: registry.resolve(&repo.before)?,
                    after: registry.resolve(&repo.after)?,
                },
            );
        }

        let maintenance = MaintenancePage::new(&config.site_root);

        Ok(Self {
            config,
            maintenance,
            fetcher,
            cache,
            before,
            after,
            repo_hooks,
        })
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Process one delivery.
    ///
    /// Request-scoped failures (undecodable body, failed authentication, a
    /// global before-hook declining) come back as `Err` before any repository
    /// is touched. Everything after that point is isolated per repository and
    /// the run finishes with a report.
    pub fn run(&self, delivery: &WebhookDelivery) -> CapstanResult<SyncReport> {
        // Serializes whole runs against this site root; a concurrent
        // delivery blocks here until the current one finishes.
        let _guard = SiteLock::acquire(&self.config.lock_path())?;

        let body = delivery.body.as_slice();

        run_before("sync", &self.before, &HookEvent::BeforeAll { body })?;

        // The payload itself is not consumed here; decoding is a sanity
        // check on the delivery, and hooks get the raw bytes.
        serde_json::from_slice::<serde_json::Value>(body)
            .map_err(|_| CapstanError::UndecodableData)?;

        self.authenticate(body, delivery.signature.as_deref())?;

        let mut down = false;
        if self.config.maintenance && self.maintenance.is_configured() {
            match self.maintenance.shutdown() {
                Ok(()) => down = true,
                Err(e) => warn!(error = %e, "couldn't shut the page down, syncing anyway"),
            }
        }

        let errors = self.sync_repositories(body);

        run_after("sync", &self.after, &HookEvent::AfterAll);

        if let Err(e) = self.cache.invalidate_all() {
            warn!(error = %e, "cache invalidation failed");
        }
        self.reset_work_dirs();

        if down {
            if let Err(e) = self.maintenance.turn_on() {
                // Backup corruption lands here; the sync itself already
                // happened, so the run still reports finished.
                error!(error = %e, "couldn't bring the page back up");
            }
        }

        info!(repositories = self.config.repositories.len(), errors = errors.len(), "sync finished");
        Ok(SyncReport::finished(errors))
    }

    /// Check the signature for every keyed repository.
    ///
    /// The loop deliberately never short-circuits: each keyed repository gets
    /// its own diagnostic log line before the request is rejected.
    fn authenticate(&self, body: &[u8], header: Option<&str>) -> CapstanResult<()> {
        let mut failed: Option<String> = None;

        for (name, repo) in &self.config.repositories {
            let Some(key) = &repo.key else { continue };
            if let Err(reason) = signature::verify(key.as_bytes(), body, header) {
                warn!(repository = %name, %reason, "signature verification failed");
                failed.get_or_insert_with(|| name.clone());
            }
        }

        match failed {
            Some(repository) => Err(CapstanError::Unauthenticated { repository }),
            None => Ok(()),
        }
    }

    /// Sync every repository in name order, isolating failures.
    fn sync_repositories(&self, body: &[u8]) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();

        for (name, repo) in &self.config.repositories {
            let hooks = &self.repo_hooks[name];

            let outcome = run_before(
                name,
                &hooks.before,
                &HookEvent::BeforeRepository {
                    body,
                    repository: repo,
                },
            )
            .and_then(|()| self.fetcher.fetch(repo));

            if let Err(e) = outcome {
                warn!(repository = %name, error = %e, "syncing failed");
                errors.insert(name.clone(), e.to_string());
            }

            // After-hooks observe the step regardless of its outcome.
            run_after(name, &hooks.after, &HookEvent::AfterRepository { repository: repo });
        }

        errors
    }

    /// Drop the scratch directory and recreate the cache directory empty.
    fn reset_work_dirs(&self) {
        for dir in [self.config.cache_dir(), self.config.scratch_dir()] {
            if let Err(e) = fs::remove_dir_all(&dir) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(directory = %dir.display(), error = %e, "couldn't remove work directory");
                }
            }
        }
        if let Err(e) = fs::create_dir_all(self.config.cache_dir()) {
            warn!(error = %e, "couldn't recreate cache directory");
        }
    }
}
