//! Filesystem transport for a space: local directories plus rsync, which
//! also reaches remote machines over ssh.

use std::path::{Path, PathBuf};

use aipstore_common::backend::{ssh_target, Space};
use aipstore_common::documents::BrowseListing;
use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

pub struct LocalSpace {
    path: PathBuf,
    rsync: PathBuf,
}

impl LocalSpace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), rsync: PathBuf::from("rsync") }
    }

    async fn run_rsync(&self, args: &[String]) -> anyhow::Result<String> {
        info!(args = ?args, "rsync");
        let output = Command::new(&self.rsync)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.rsync.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            bail!(
                "rsync exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        debug!(stdout = %stdout, "rsync complete");
        Ok(stdout)
    }
}

#[async_trait]
impl Space for LocalSpace {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn create_local_directory(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Ok(())
    }

    async fn create_rsync_directory(
        &self,
        path: &Path,
        user: &str,
        host: &str,
    ) -> anyhow::Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        // Mirror the directory chain in an empty tree and sync it onto the
        // remote root, which creates every missing level at once.
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let relative = parent.strip_prefix("/").unwrap_or(parent);
        tokio::fs::create_dir_all(scratch.path().join(relative))
            .await
            .context("Failed to create scratch directory tree")?;

        let args = vec![
            "-vv".to_string(),
            "--protect-args".to_string(),
            "--chmod=ug=rwx,o=rx".to_string(),
            "--recursive".to_string(),
            format!("{}/", scratch.path().display()),
            ssh_target(user, host, "/"),
        ];
        self.run_rsync(&args).await.map(|_| ())
    }

    async fn move_rsync(&self, src: &str, dest: &str, try_mv_local: bool) -> anyhow::Result<()> {
        if try_mv_local {
            match tokio::fs::rename(src, dest).await {
                Ok(()) => {
                    debug!(src = %src, dest = %dest, "Moved with rename");
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "Rename failed, falling back to rsync"),
            }
        }

        // A trailing slash makes rsync copy a directory's contents into dest.
        let src = if Path::new(src).is_dir() {
            format!("{}/", src.trim_end_matches('/'))
        } else {
            src.to_string()
        };
        let args = vec![
            "-t".to_string(),
            "-O".to_string(),
            "--protect-args".to_string(),
            "-vv".to_string(),
            "--chmod=Fug+rw,o-rwx,Dug+rwx,o-rwx".to_string(),
            "-r".to_string(),
            "--remove-source-files".to_string(),
            src,
            dest.to_string(),
        ];
        self.run_rsync(&args).await.map(|_| ())
    }

    async fn browse_local(&self, path: &Path) -> anyhow::Result<BrowseListing> {
        let mut listing = BrowseListing::default();
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to read directory {}", path.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            names.push((name, meta.is_dir(), meta.len()));
        }
        names.sort();

        for (name, is_dir, size) in names {
            if is_dir {
                listing.directories.push(name.clone());
            } else {
                listing
                    .properties
                    .insert(name.clone(), serde_json::json!({ "size": size }));
            }
            listing.entries.push(name);
        }
        Ok(listing)
    }

    async fn browse_rsync(&self, target: &str) -> anyhow::Result<BrowseListing> {
        let args = vec![
            "--protect-args".to_string(),
            "--list-only".to_string(),
            "--exclude=.*".to_string(),
            target.to_string(),
        ];
        let stdout = self.run_rsync(&args).await?;
        Ok(parse_rsync_listing(&stdout))
    }
}

/// Parse `rsync --list-only` output, e.g.
/// `drwxr-xr-x          4,096 2015/10/12 14:15:16 aips`.
pub fn parse_rsync_listing(output: &str) -> BrowseListing {
    let mut listing = BrowseListing::default();
    for line in output.lines() {
        let Some((fields, name)) = split_listing_line(line) else {
            continue;
        };
        if name == "." || name.starts_with('.') {
            continue;
        }
        if fields[0].starts_with('d') {
            listing.directories.push(name.to_string());
        } else if let Ok(size) = fields[1].replace(',', "").parse::<u64>() {
            listing
                .properties
                .insert(name.to_string(), serde_json::json!({ "size": size }));
        }
        listing.entries.push(name.to_string());
    }
    listing.directories.sort();
    listing.entries.sort();
    listing
}

fn split_listing_line(line: &str) -> Option<([&str; 4], &str)> {
    let mut rest = line.trim_start();
    let mut fields = [""; 4];
    for field in fields.iter_mut() {
        let (head, tail) = rest.split_once(char::is_whitespace)?;
        *field = head;
        rest = tail.trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rsync_listing() {
        let output = "\
drwxr-xr-x          4,096 2015/10/12 14:15:16 .
drwxr-xr-x          4,096 2015/10/12 14:15:16 aips
-rw-r--r--      1,451,820 2015/10/12 14:15:16 pkg 0d4e.7z
-rw-r--r--             12 2015/10/12 14:15:16 .hidden
";
        let listing = parse_rsync_listing(output);
        assert_eq!(listing.directories, vec!["aips"]);
        assert_eq!(listing.entries, vec!["aips", "pkg 0d4e.7z"]);
        assert_eq!(listing.properties["pkg 0d4e.7z"]["size"], 1451820);
    }

    #[test]
    fn test_parse_rsync_listing_ignores_noise() {
        let listing = parse_rsync_listing("receiving incremental file list\n\n");
        assert!(listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_browse_local() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("aips")).unwrap();
        std::fs::write(dir.path().join("pkg.7z"), b"0123456789").unwrap();
        std::fs::write(dir.path().join(".lock"), b"").unwrap();

        let space = LocalSpace::new(dir.path());
        let listing = space.browse_local(dir.path()).await.unwrap();
        assert_eq!(listing.directories, vec!["aips"]);
        assert_eq!(listing.entries, vec!["aips", "pkg.7z"]);
        assert_eq!(listing.properties["pkg.7z"]["size"], 10);
    }

    #[tokio::test]
    async fn test_move_local_rename() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("staging/pkg.7z");
        let dest = dir.path().join("space/aips/pkg.7z");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"aip").unwrap();

        let space = LocalSpace::new(dir.path().join("space"));
        space.create_local_directory(&dest).await.unwrap();
        space
            .move_rsync(&src.to_string_lossy(), &dest.to_string_lossy(), true)
            .await
            .unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"aip");
    }
}
