use std::path::{Path, PathBuf};

use crate::documents::{BrowseListing, FixityReport, Package, StatusUpdate};

/// Trait implemented by all storage space adapters.
///
/// The host is responsible for package bookkeeping, scheduling and user
/// interaction; the adapter is responsible only for moving bytes in and out
/// of the space and for answering status, locality and fixity queries about
/// packages it holds.
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    /// List the contents of `path` inside the space.
    async fn browse(&self, path: &str) -> anyhow::Result<BrowseListing>;

    /// Remove `path` from the space.
    async fn delete_path(&self, path: &str) -> anyhow::Result<()>;

    /// Copy `src_path` out of the space into local staging at `dest_path`.
    async fn move_to_storage_service(&self, src_path: &str, dest_path: &Path)
        -> anyhow::Result<()>;

    /// Copy `src_path` from local staging into the space at `dest_path`.
    async fn move_from_storage_service(&self, src_path: &Path, dest_path: &Path)
        -> anyhow::Result<()>;

    /// Hook run once a package has landed in the space.
    async fn post_move_from_storage_service(
        &self,
        staging_path: &Path,
        dest_path: &Path,
        package: Option<&mut Package>,
    ) -> anyhow::Result<()>;

    /// Poll replication status, possibly advancing `package.status`.
    async fn update_package_status(&self, package: &mut Package) -> StatusUpdate;

    /// `Some(true)` if (a file in) the package is locally cached,
    /// `Some(false)` if it is not, `None` if that could not be determined.
    async fn is_file_local(
        &self,
        package: &mut Package,
        path: Option<&str>,
        email_nonlocal: bool,
    ) -> Option<bool>;

    async fn check_package_fixity(
        &self,
        package: &mut Package,
    ) -> Result<FixityReport, UnsupportedOperation>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UnsupportedOperation(pub String);

/// Filesystem side of a space: where its root is and how bytes get moved.
#[async_trait::async_trait]
pub trait Space: Send + Sync {
    fn path(&self) -> &Path;

    /// Create the parent directories of `path` on this machine.
    async fn create_local_directory(&self, path: &Path) -> anyhow::Result<()>;

    /// Create the parent directories of `path` on `user@host`.
    async fn create_rsync_directory(&self, path: &Path, user: &str, host: &str)
        -> anyhow::Result<()>;

    /// Copy `src` to `dest`, either of which may be an `user@host:path`
    /// rsync target. With `try_mv_local` a plain rename is attempted first.
    async fn move_rsync(&self, src: &str, dest: &str, try_mv_local: bool) -> anyhow::Result<()>;

    async fn browse_local(&self, path: &Path) -> anyhow::Result<BrowseListing>;

    async fn browse_rsync(&self, target: &str) -> anyhow::Result<BrowseListing>;
}

/// Persistence for package records owned by the host.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    async fn load(&self, uuid: &str) -> anyhow::Result<Package>;

    async fn save(&self, package: &Package) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub subject: String,
    pub message: String,
    pub recipients: Vec<String>,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Addresses of every active superuser, without duplicates.
    async fn active_superusers(&self) -> Vec<String>;

    async fn send_mail(&self, mail: &Mail) -> anyhow::Result<()>;
}

/// Path of `dest` relative to the space root `root`.
/// Paths outside the root are returned with leading slashes stripped.
pub fn relative_path(root: &Path, dest: &Path) -> PathBuf {
    match dest.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => PathBuf::from(dest.to_string_lossy().trim_start_matches('/')),
    }
}

/// Build an `user@host:path` rsync target.
pub fn ssh_target(user: &str, host: &str, path: &str) -> String {
    format!("{}@{}:{}", user, host, path)
}
