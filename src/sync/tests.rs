use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::config::{DeploymentConfig, RepositoryConfig};
use crate::error::{CapstanError, CapstanResult};
use crate::fetch::Fetcher;
use crate::hooks::{HookEvent, HookOutcome, HookRegistry};
use crate::maintenance::{MaintenancePage, BACKUP_FILE, INDEX_FILE, MARKER_FILE};
use crate::signature;

/// Records which repositories were fetched; optionally fails one by name.
#[derive(Clone, Default)]
struct RecordingFetcher {
    fetched: Arc<Mutex<Vec<String>>>,
    fail: Option<String>,
}

impl RecordingFetcher {
    fn failing(name: &str) -> Self {
        Self {
            fetched: Arc::default(),
            fail: Some(name.to_string()),
        }
    }

    fn names(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch(&self, repo: &RepositoryConfig) -> CapstanResult<()> {
        self.fetched.lock().unwrap().push(repo.name.clone());
        if self.fail.as_deref() == Some(repo.name.as_str()) {
            return Err(CapstanError::DownloadStatus {
                url: repo.download_url(),
                status: 404,
            });
        }
        Ok(())
    }
}

fn repository(name: &str, root: &Path) -> RepositoryConfig {
    RepositoryConfig {
        name: name.to_string(),
        username: "acme".to_string(),
        repository: name.to_string(),
        branch: "master".to_string(),
        directory: root.join(name),
        host: "github.com".to_string(),
        key: None,
        flush: false,
        before: Vec::new(),
        after: Vec::new(),
    }
}

fn config(site: &TempDir, names: &[&str]) -> DeploymentConfig {
    let mut repositories = BTreeMap::new();
    for name in names {
        repositories.insert(name.to_string(), repository(name, site.path()));
    }
    DeploymentConfig {
        maintenance: true,
        host: "github.com".to_string(),
        site_root: site.path().to_path_buf(),
        temp_dir: site.path().join("tmp"),
        download_timeout: Duration::from_secs(5),
        before: Vec::new(),
        after: Vec::new(),
        repositories,
    }
}

fn engine(
    config: DeploymentConfig,
    registry: &HookRegistry,
    fetcher: RecordingFetcher,
) -> SyncEngine<RecordingFetcher> {
    SyncEngine::new_with_fetcher(config, registry, Box::new(NoopCache), fetcher).unwrap()
}

fn delivery() -> WebhookDelivery {
    WebhookDelivery::new(&b"{}"[..], None)
}

fn signed_delivery(secret: &str, body: &[u8]) -> WebhookDelivery {
    let digest = signature::compute("sha256", secret.as_bytes(), body).unwrap();
    WebhookDelivery::new(body, Some(format!("sha256={}", hex::encode(digest))))
}

fn abort_hook() -> impl crate::hooks::Hook {
    |_: &HookEvent<'_>| -> anyhow::Result<HookOutcome> { Ok(HookOutcome::Abort) }
}

#[test]
fn test_middle_repository_abort_is_isolated() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["repo1", "repo2", "repo3"]);
    cfg.repositories.get_mut("repo2").unwrap().before = vec!["decline".to_string()];

    let mut registry = HookRegistry::new();
    registry.register("decline", abort_hook());

    let fetcher = RecordingFetcher::default();
    let report = engine(cfg, &registry, fetcher.clone())
        .run(&delivery())
        .unwrap();

    assert!(report.errors.contains_key("repo2"));
    assert!(!report.errors.contains_key("repo1"));
    assert!(!report.errors.contains_key("repo3"));
    assert_eq!(fetcher.names(), vec!["repo1", "repo3"]);
}

#[test]
fn test_missing_signature_rejects_before_any_fetch() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["site"]);
    cfg.repositories.get_mut("site").unwrap().key = Some("s3cr3t".to_string());

    let fetcher = RecordingFetcher::default();
    let err = engine(cfg, &HookRegistry::new(), fetcher.clone())
        .run(&delivery())
        .unwrap_err();

    assert!(matches!(err, CapstanError::Unauthenticated { .. }));
    assert!(fetcher.names().is_empty(), "no download may happen on rejection");
}

#[test]
fn test_wrong_secret_rejects() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["site"]);
    cfg.repositories.get_mut("site").unwrap().key = Some("right".to_string());

    let fetcher = RecordingFetcher::default();
    let err = engine(cfg, &HookRegistry::new(), fetcher.clone())
        .run(&signed_delivery("wrong", b"{}"))
        .unwrap_err();

    assert!(matches!(err, CapstanError::Unauthenticated { repository } if repository == "site"));
    assert!(fetcher.names().is_empty());
}

#[test]
fn test_repository_without_key_never_requires_signature() {
    let site = TempDir::new().unwrap();
    let cfg = config(&site, &["site"]);

    let fetcher = RecordingFetcher::default();
    let report = engine(cfg, &HookRegistry::new(), fetcher.clone())
        .run(&delivery())
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(fetcher.names(), vec!["site"]);
}

#[test]
fn test_valid_signature_swaps_and_restores_maintenance_page() {
    let site = TempDir::new().unwrap();
    fs::write(site.path().join(INDEX_FILE), "the real site").unwrap();
    fs::write(site.path().join(MARKER_FILE), "").unwrap();

    let mut cfg = config(&site, &["site"]);
    cfg.repositories.get_mut("site").unwrap().key = Some("s3cr3t".to_string());
    cfg.repositories.get_mut("site").unwrap().before = vec!["observe".to_string()];

    // Observe the live entry point mid-run: it must be the placeholder.
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in_hook = observed.clone();
    let index_path = site.path().join(INDEX_FILE);
    let mut registry = HookRegistry::new();
    registry.register(
        "observe",
        move |_: &HookEvent<'_>| -> anyhow::Result<HookOutcome> {
            observed_in_hook
                .lock()
                .unwrap()
                .push(fs::read_to_string(&index_path)?);
            Ok(HookOutcome::Continue)
        },
    );

    let fetcher = RecordingFetcher::default();
    let report = engine(cfg, &registry, fetcher.clone())
        .run(&signed_delivery("s3cr3t", b"{}"))
        .unwrap();

    assert_eq!(report.status, "finished");
    assert!(report.is_clean());
    assert_eq!(fetcher.names(), vec!["site"]);

    let mid_run = observed.lock().unwrap();
    assert_eq!(mid_run.as_slice(), [MaintenancePage::content()].as_slice());

    let after = fs::read_to_string(site.path().join(INDEX_FILE)).unwrap();
    assert_eq!(after, "the real site");
    assert!(!site.path().join(BACKUP_FILE).exists());
}

#[test]
fn test_maintenance_skipped_without_marker() {
    let site = TempDir::new().unwrap();
    fs::write(site.path().join(INDEX_FILE), "the real site").unwrap();

    let cfg = config(&site, &["site"]);
    let report = engine(cfg, &HookRegistry::new(), RecordingFetcher::default())
        .run(&delivery())
        .unwrap();

    assert!(report.is_clean());
    assert!(!site.path().join(BACKUP_FILE).exists());
    assert_eq!(
        fs::read_to_string(site.path().join(INDEX_FILE)).unwrap(),
        "the real site"
    );
}

#[test]
fn test_maintenance_disabled_ignores_marker() {
    let site = TempDir::new().unwrap();
    fs::write(site.path().join(INDEX_FILE), "the real site").unwrap();
    fs::write(site.path().join(MARKER_FILE), "").unwrap();

    let mut cfg = config(&site, &["site"]);
    cfg.maintenance = false;

    engine(cfg, &HookRegistry::new(), RecordingFetcher::default())
        .run(&delivery())
        .unwrap();

    assert!(!site.path().join(BACKUP_FILE).exists());
}

#[test]
fn test_fetch_failure_is_isolated_per_repository() {
    let site = TempDir::new().unwrap();
    let cfg = config(&site, &["repo1", "repo2", "repo3"]);

    let fetcher = RecordingFetcher::failing("repo2");
    let report = engine(cfg, &HookRegistry::new(), fetcher.clone())
        .run(&delivery())
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors["repo2"].contains("couldn't be downloaded"));
    assert_eq!(fetcher.names(), vec!["repo1", "repo2", "repo3"]);
}

#[test]
fn test_after_hooks_run_when_before_aborts() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["site"]);
    cfg.repositories.get_mut("site").unwrap().before = vec!["decline".to_string()];
    cfg.repositories.get_mut("site").unwrap().after = vec!["tally".to_string()];

    let calls = Arc::new(Mutex::new(0usize));
    let calls_in_hook = calls.clone();

    let mut registry = HookRegistry::new();
    registry.register("decline", abort_hook());
    registry.register(
        "tally",
        move |_: &HookEvent<'_>| -> anyhow::Result<HookOutcome> {
            *calls_in_hook.lock().unwrap() += 1;
            Ok(HookOutcome::Continue)
        },
    );

    let report = engine(cfg, &registry, RecordingFetcher::default())
        .run(&delivery())
        .unwrap();

    assert!(report.errors.contains_key("site"));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn test_undecodable_body_is_rejected() {
    let site = TempDir::new().unwrap();
    let cfg = config(&site, &["site"]);

    let fetcher = RecordingFetcher::default();
    let err = engine(cfg, &HookRegistry::new(), fetcher.clone())
        .run(&WebhookDelivery::new(&b"not json"[..], None))
        .unwrap_err();

    assert!(matches!(err, CapstanError::UndecodableData));
    assert!(fetcher.names().is_empty());
}

#[test]
fn test_global_before_abort_rejects_the_delivery() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["site"]);
    cfg.before = vec!["decline".to_string()];

    let mut registry = HookRegistry::new();
    registry.register("decline", abort_hook());

    let fetcher = RecordingFetcher::default();
    let err = engine(cfg, &registry, fetcher.clone())
        .run(&delivery())
        .unwrap_err();

    assert!(matches!(err, CapstanError::HookAborted { step } if step == "sync"));
    assert!(fetcher.names().is_empty());
}

#[test]
fn test_unregistered_hook_fails_at_construction() {
    let site = TempDir::new().unwrap();
    let mut cfg = config(&site, &["site"]);
    cfg.before = vec!["ghost".to_string()];

    let err = SyncEngine::new_with_fetcher(
        cfg,
        &HookRegistry::new(),
        Box::new(NoopCache),
        RecordingFetcher::default(),
    )
    .unwrap_err();

    assert!(matches!(err, CapstanError::MissingHook { name } if name == "ghost"));
}

#[test]
fn test_work_dirs_are_reset_after_a_run() {
    let site = TempDir::new().unwrap();
    let cfg = config(&site, &["site"]);
    let cache_dir = cfg.cache_dir();
    let scratch_dir = cfg.scratch_dir();

    fs::create_dir_all(&scratch_dir).unwrap();
    fs::write(scratch_dir.join("leftover.zip"), "stale").unwrap();
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("entry"), "stale").unwrap();

    engine(cfg, &HookRegistry::new(), RecordingFetcher::default())
        .run(&delivery())
        .unwrap();

    assert!(!scratch_dir.exists(), "scratch directory is removed entirely");
    assert!(cache_dir.exists(), "cache directory is recreated");
    assert!(fs::read_dir(&cache_dir).unwrap().next().is_none());
}
