//! Package records kept as one JSON document per package.
//!
//! Writes go through a temp file and a rename so a crash never leaves a
//! truncated record behind.

use std::path::PathBuf;

use aipstore_common::backend::PackageStore;
use aipstore_common::documents::Package;
use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::debug;

pub struct FilePackageStore {
    dir: PathBuf,
}

impl FilePackageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, uuid: &str) -> anyhow::Result<PathBuf> {
        if uuid.is_empty() || uuid.contains(|c: char| c == '/' || c == '\\') || uuid.starts_with('.') {
            bail!("Invalid package uuid: {:?}", uuid);
        }
        Ok(self.dir.join(format!("{}.json", uuid)))
    }
}

#[async_trait]
impl PackageStore for FilePackageStore {
    async fn load(&self, uuid: &str) -> anyhow::Result<Package> {
        let path = self.record_path(uuid)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Package {} not found at {}", uuid, path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    async fn save(&self, package: &Package) -> anyhow::Result<()> {
        let path = self.record_path(&package.uuid)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let json = serde_json::to_vec_pretty(package)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .context("Failed to write temp file")?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context("Atomic rename failed")?;

        debug!(package = %package.uuid, status = %package.status, "Package saved");
        Ok(())
    }
}
