//! Common test utilities for Capstan scenario tests.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use capstan::config::{DeploymentConfig, RepositoryConfig};
use capstan::signature;
use capstan::sync::WebhookDelivery;

/// Build a zip archive holding `files` under `prefix/`, the way a hosting
/// provider packages a branch snapshot.
pub fn snapshot_zip(prefix: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer
        .add_directory(format!("{prefix}/"), options)
        .unwrap();
    for (name, content) in files {
        writer
            .start_file(format!("{prefix}/{name}"), options)
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// A delivery of `body` signed with HMAC-SHA256 under `secret`.
pub fn signed_delivery(secret: &str, body: &[u8]) -> WebhookDelivery {
    let digest = signature::compute("sha256", secret.as_bytes(), body).unwrap();
    WebhookDelivery::new(body, Some(format!("sha256={}", hex::encode(digest))))
}

/// Single-repository deployment of `acme/site@main` from `host` into
/// `<site_root>/app`, signed with `s3cr3t`.
pub fn deployment(site_root: &Path, host: &str) -> DeploymentConfig {
    let mut repositories = BTreeMap::new();
    repositories.insert(
        "default".to_string(),
        RepositoryConfig {
            name: "default".to_string(),
            username: "acme".to_string(),
            repository: "site".to_string(),
            branch: "main".to_string(),
            directory: site_root.join("app"),
            host: host.to_string(),
            key: Some("s3cr3t".to_string()),
            flush: false,
            before: Vec::new(),
            after: Vec::new(),
        },
    );

    DeploymentConfig {
        maintenance: true,
        host: host.to_string(),
        site_root: site_root.to_path_buf(),
        temp_dir: site_root.join("tmp"),
        download_timeout: Duration::from_secs(10),
        before: Vec::new(),
        after: Vec::new(),
        repositories,
    }
}
