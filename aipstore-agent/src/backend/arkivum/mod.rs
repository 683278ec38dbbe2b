//! Arkivum replication appliance backend.
//!
//! Packages are written into the appliance's watched directory (locally or
//! with rsync over ssh), then registered over its REST API. The request id
//! returned by registration is kept in the package's attributes and used
//! to poll replication, cache and fixity status afterwards.

pub mod api;

use std::path::Path;
use std::sync::Arc;

use aipstore_common::backend::{
    relative_path, ssh_target, BackendAdapter, Mailer, PackageStore, Space, UnsupportedOperation,
};
use aipstore_common::documents::{
    BrowseListing, FixityReport, Package, PackageShape, PackageStatus, StatusUpdate,
};
use aipstore_common::premis::{self, PremisError};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use self::api::{
    compression_algorithm, id_string, normalize_timestamp, quote_path, replication_state, Endpoints,
    FileInfo, FileReleaseStatus, ManifestStatus, ReplicationState,
};
use crate::config::ArkivumConfig;
use crate::notifications;

#[derive(Debug, thiserror::Error)]
pub enum ArkivumError {
    #[error("Error in connection for {method} to {url}")]
    Transport {
        method: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Response from Arkivum server was {status}")]
    Protocol {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("JSON could not be parsed from {what}")]
    Format {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    State(String),
    #[error("Arkivum does not implement fixity for compressed packages")]
    Unsupported,
    #[error("Unable to contact Arkivum")]
    NotRegistered,
    #[error(transparent)]
    Pointer(#[from] PremisError),
    #[error("Failed to save package {uuid}: {reason}")]
    Store { uuid: String, reason: anyhow::Error },
}

pub struct ArkivumAdapter {
    config: ArkivumConfig,
    endpoints: Endpoints,
    client: reqwest::Client,
    space: Arc<dyn Space>,
    store: Arc<dyn PackageStore>,
    mailer: Arc<dyn Mailer>,
}

impl ArkivumAdapter {
    pub fn new(
        config: ArkivumConfig,
        space: Arc<dyn Space>,
        store: Arc<dyn PackageStore>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        if config.insecure_skip_verify {
            warn!(host = %config.host, "TLS certificate verification disabled for Arkivum");
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoints: Endpoints::new(config.base_url()),
            config,
            client,
            space,
            store,
            mailer,
        })
    }

    /// Tell the appliance about a package that has landed at `dest_path`
    /// and record the request id it hands back.
    pub async fn register(
        &self,
        dest_path: &Path,
        package: &mut Package,
    ) -> Result<String, ArkivumError> {
        let relative = relative_path(self.space.path(), dest_path);
        let relative = relative.to_string_lossy();

        let (url, request) = match &package.shape {
            PackageShape::Compressed { pointer_file } => {
                let xml = tokio::fs::read_to_string(pointer_file).await.map_err(|source| {
                    PremisError::Io { path: pointer_file.clone(), source }
                })?;
                let fixity = premis::parse_fixity(&xml, pointer_file)?;
                let payload = serde_json::json!({
                    "size": fixity.size,
                    "checksum": fixity.checksum,
                    "checksumAlgorithm": fixity.algorithm,
                    "compressionAlgorithm": compression_algorithm(&package.current_path),
                });
                let url = self.endpoints.file_release(&relative);
                debug!(url = %url, payload = %payload, "Arkivum POST");
                let request = self.client.post(&url).json(&payload);
                (url, request)
            }
            PackageShape::Uncompressed => {
                let bagit_path = format!("/{}", relative.trim_start_matches('/'));
                let url = self.endpoints.manifest_release();
                debug!(url = %url, bagit_path = %bagit_path, "Arkivum POST");
                let form = Form::new()
                    .text("bagitPath", bagit_path)
                    .part("", Part::bytes(Vec::<u8>::new()).file_name(""));
                let request = self.client.post(&url).multipart(form);
                (url, request)
            }
        };

        let response = request.send().await.map_err(|source| ArkivumError::Transport {
            method: "POST",
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ArkivumError::Transport {
            method: "POST",
            url: url.clone(),
            source,
        })?;
        debug!(status = %status, body = %body, "Arkivum response");

        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            warn!(status = %status, body = %body, "Arkivum rejected registration");
            return Err(ArkivumError::Protocol { url, status, body });
        }

        let json: serde_json::Value = serde_json::from_str(&body).map_err(|source| {
            ArkivumError::Format { what: "registration response", source }
        })?;
        let request_id = json.get("id").and_then(id_string).ok_or_else(|| {
            ArkivumError::State(format!(
                "Could not get request ID from Arkivum's response {}",
                body
            ))
        })?;

        package.set_arkivum_identifier(request_id.clone());
        self.save(package).await?;
        info!(package = %package.uuid, request_id = %request_id, "Registered package with Arkivum");
        Ok(request_id)
    }

    /// Fetch the raw status payload for `package`.
    ///
    /// A package without a request id is registered first; this is the only
    /// place registration is retried.
    pub async fn fetch_status(
        &self,
        package: &mut Package,
    ) -> Result<serde_json::Value, ArkivumError> {
        if package.arkivum_identifier().is_none() {
            let dest = package.full_path(self.space.path());
            if let Err(e) = self.register(&dest, package).await {
                warn!(package = %package.uuid, error = %e, "Re-registration with Arkivum failed");
            }
        }
        let Some(request_id) = package.arkivum_identifier() else {
            warn!(package = %package.uuid, "Unable to contact Arkivum");
            return Err(ArkivumError::NotRegistered);
        };

        let url = match package.shape {
            PackageShape::Compressed { .. } => self.endpoints.file_release_status(&request_id),
            PackageShape::Uncompressed => self.endpoints.manifest_status(&request_id),
        };
        self.get_json(&url, "package info").await
    }

    /// Poll replication state and advance the package to `Uploaded` once
    /// the appliance reports it green.
    pub async fn reconcile(&self, package: &mut Package) -> Result<StatusUpdate, ArkivumError> {
        info!(package = %package.uuid, status = %package.status, "Package status");
        let payload = self.fetch_status(package).await?;

        let replication = match &package.shape {
            PackageShape::Compressed { .. } => payload
                .get("fileInformation")
                .and_then(replication_state)
                .unwrap_or_default(),
            PackageShape::Uncompressed => match replication_state(&payload) {
                Some(state) => state,
                // The manifest status sometimes omits replicationState
                // while the bag's tag file still reports it.
                None => {
                    let url = self
                        .endpoints
                        .bag_info(&package.location, &package.current_path);
                    let info = self.get_json(&url, "file info").await?;
                    replication_state(&info).unwrap_or_default()
                }
            },
        };

        if ReplicationState::parse(&replication) == ReplicationState::Green
            && package.status != PackageStatus::Uploaded
        {
            package.status = PackageStatus::Uploaded;
            self.save(package).await?;
        }
        info!(package = %package.uuid, status = %package.status, "Package status");

        Ok(StatusUpdate {
            status: Some(package.status),
            message: format!("Replication status: {}", replication),
        })
    }

    /// Whether (a file in) `package` is in the appliance's local cache.
    pub async fn locality(
        &self,
        package: &mut Package,
        path: Option<&str>,
        email_nonlocal: bool,
    ) -> Result<bool, ArkivumError> {
        debug!(
            package = %package.uuid,
            path = ?path,
            email_nonlocal,
            "Checking whether file is local"
        );

        let (info, checked_path) = match (package.is_compressed(), path) {
            (true, _) => {
                let status: FileReleaseStatus =
                    parse(self.fetch_status(package).await?, "package info")?;
                let info = status.file_information.ok_or_else(|| {
                    ArkivumError::State("Arkivum response has no fileInformation".to_string())
                })?;
                (info, path.map(str::to_string))
            }
            (false, Some(path)) => (self.file_info(package, path).await?, Some(path.to_string())),
            (false, None) => {
                let status: ManifestStatus =
                    parse(self.fetch_status(package).await?, "package info")?;
                if status.local.is_some() {
                    let info = FileInfo {
                        id: status.id,
                        replication_state: status.replication_state,
                        local: status.local,
                    };
                    (info, None)
                } else {
                    // HEURISTIC: judge the whole bag by one of its files.
                    // Only sound if the appliance caches bags as a unit.
                    warn!(
                        package = %package.uuid,
                        "Cannot determine if uncompressed package is locally available! Checking single file."
                    );
                    let sample = first_file(&package.full_path(self.space.path()))?;
                    (self.file_info(package, &sample).await?, Some(sample))
                }
            }
        };

        debug!(local = ?info.local, "File info local");
        if info.local == Some(true) {
            return Ok(true);
        }

        if email_nonlocal {
            let arkivum_id = info.id.as_ref().and_then(id_string);
            notifications::notify_not_local(
                self.mailer.as_ref(),
                package,
                checked_path.as_deref(),
                arkivum_id.as_deref(),
            )
            .await;
        }
        Ok(false)
    }

    /// Map the appliance's fixity report for an uncompressed bag.
    pub async fn fixity(&self, package: &mut Package) -> Result<FixityReport, ArkivumError> {
        if package.is_compressed() {
            return Err(ArkivumError::Unsupported);
        }
        let status: ManifestStatus = parse(self.fetch_status(package).await?, "package info")?;

        // Fixity compares states exactly; only reconcile accepts any case.
        let replication = status.replication_state.as_deref();
        let check = status.status.as_deref();
        let errors = status.failures.unwrap_or_default();

        let (success, message) = if check == Some("Completed") && replication == Some("green") {
            (Some(true), String::new())
        } else if check == Some("Scheduled") || replication == Some("amber") {
            (None, "Arkivum fixity check in progress".to_string())
        } else if errors.len() > 1 {
            (Some(false), "invalid bag".to_string())
        } else if let Some(failure) = errors.first() {
            (Some(false), failure.reason.clone())
        } else {
            return Err(ArkivumError::State(format!(
                "Arkivum reported fixity status {} without any failures",
                check.unwrap_or("(none)")
            )));
        };

        let timestamp = status.fixity_last_checked.as_deref().and_then(|raw| {
            let normalized = normalize_timestamp(raw);
            if normalized.is_none() {
                warn!(timestamp = %raw, "Unrecognized fixityLastChecked timestamp");
            }
            normalized
        });

        Ok(FixityReport { success, errors, message, timestamp })
    }

    async fn file_info(&self, package: &Package, path: &str) -> Result<FileInfo, ArkivumError> {
        let url_path = format!(
            "{}/{}/{}",
            package.location.trim_matches('/'),
            package.current_path.trim_matches('/'),
            path.trim_start_matches('/')
        );
        let url = self.endpoints.file_info(&quote_path(&url_path));
        parse(self.get_json(&url, "file info").await?, "file info")
    }

    async fn get_json(
        &self,
        url: &str,
        what: &'static str,
    ) -> Result<serde_json::Value, ArkivumError> {
        info!(url = %url, "Arkivum GET");
        let response = self.client.get(url).send().await.map_err(|source| {
            ArkivumError::Transport { method: "GET", url: url.to_string(), source }
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ArkivumError::Transport {
            method: "GET",
            url: url.to_string(),
            source,
        })?;
        info!(status = %status, body = %body, "Arkivum response");

        if status != StatusCode::OK {
            return Err(ArkivumError::Protocol { url: url.to_string(), status, body });
        }
        serde_json::from_str(&body).map_err(|source| ArkivumError::Format { what, source })
    }

    async fn save(&self, package: &Package) -> Result<(), ArkivumError> {
        self.store.save(package).await.map_err(|reason| ArkivumError::Store {
            uuid: package.uuid.clone(),
            reason,
        })
    }
}

fn parse<T: DeserializeOwned>(
    value: serde_json::Value,
    what: &'static str,
) -> Result<T, ArkivumError> {
    serde_json::from_value(value).map_err(|source| ArkivumError::Format { what, source })
}

/// First file of a top-down walk of `root`, files before subdirectories,
/// relative to `root`.
fn first_file(root: &Path) -> Result<String, ArkivumError> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file())
        .and_then(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .ok_or_else(|| ArkivumError::State(format!("No files found in {}", root.display())))
}

#[async_trait]
impl BackendAdapter for ArkivumAdapter {
    async fn browse(&self, path: &str) -> anyhow::Result<BrowseListing> {
        match self.config.remote() {
            Some((user, host)) => {
                let dir = format!("{}/", path.trim_end_matches('/'));
                self.space.browse_rsync(&ssh_target(user, host, &dir)).await
            }
            None => self.space.browse_local(Path::new(path)).await,
        }
    }

    async fn delete_path(&self, path: &str) -> anyhow::Result<()> {
        let url = self.endpoints.delete(path);
        info!(url = %url, "Arkivum DELETE");
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("Error in connection for DELETE to {}", url))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        info!(status = %status, body = %body, "Arkivum response");
        if status != StatusCode::NO_CONTENT {
            anyhow::bail!("Unable to delete {}", path);
        }
        Ok(())
    }

    async fn move_to_storage_service(
        &self,
        src_path: &str,
        dest_path: &Path,
    ) -> anyhow::Result<()> {
        let src = match self.config.remote() {
            Some((user, host)) => ssh_target(user, host, src_path),
            None => src_path.to_string(),
        };
        self.space.create_local_directory(dest_path).await?;
        self.space
            .move_rsync(&src, &dest_path.to_string_lossy(), false)
            .await
    }

    async fn move_from_storage_service(
        &self,
        src_path: &Path,
        dest_path: &Path,
    ) -> anyhow::Result<()> {
        let (dest, try_mv_local) = match self.config.remote() {
            Some((user, host)) => {
                self.space.create_rsync_directory(dest_path, user, host).await?;
                (ssh_target(user, host, &dest_path.to_string_lossy()), false)
            }
            None => {
                self.space.create_local_directory(dest_path).await?;
                (dest_path.to_string_lossy().into_owned(), true)
            }
        };
        self.space
            .move_rsync(&src_path.to_string_lossy(), &dest, try_mv_local)
            .await
    }

    async fn post_move_from_storage_service(
        &self,
        _staging_path: &Path,
        dest_path: &Path,
        package: Option<&mut Package>,
    ) -> anyhow::Result<()> {
        let Some(package) = package else {
            return Ok(());
        };
        if let Some(request_id) = package.arkivum_identifier() {
            info!(package = %package.uuid, request_id = %request_id, "Package already registered with Arkivum");
            return Ok(());
        }
        let name = package.to_string();
        self.register(dest_path, package)
            .await
            .map(|_| ())
            .with_context(|| format!("Unable to notify Arkivum of {}", name))
    }

    async fn update_package_status(&self, package: &mut Package) -> StatusUpdate {
        match self.reconcile(package).await {
            Ok(update) => update,
            Err(e) => {
                warn!(package = %package.uuid, error = %e, "Failed to update package status");
                StatusUpdate { status: None, message: e.to_string() }
            }
        }
    }

    async fn is_file_local(
        &self,
        package: &mut Package,
        path: Option<&str>,
        email_nonlocal: bool,
    ) -> Option<bool> {
        match self.locality(package, path, email_nonlocal).await {
            Ok(local) => Some(local),
            Err(e) => {
                warn!(package = %package.uuid, error = %e, "Failed to fetch file information");
                None
            }
        }
    }

    async fn check_package_fixity(
        &self,
        package: &mut Package,
    ) -> Result<FixityReport, UnsupportedOperation> {
        match self.fixity(package).await {
            Ok(report) => Ok(report),
            Err(e @ ArkivumError::Unsupported) => Err(UnsupportedOperation(e.to_string())),
            Err(e) => {
                warn!(package = %package.uuid, error = %e, "Fixity check failed");
                Ok(FixityReport::failed(e.to_string()))
            }
        }
    }
}
