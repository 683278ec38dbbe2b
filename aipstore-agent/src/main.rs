mod backend;
mod config;
mod mail;
mod notifications;
mod package_store;
mod space;

use std::path::PathBuf;
use std::sync::Arc;

use aipstore_common::backend::{BackendAdapter, PackageStore};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AgentConfig;
use mail::SendmailMailer;
use package_store::FilePackageStore;

const DEFAULT_CONFIG_PATH: &str = "agent.toml";

#[derive(Debug, Parser)]
#[command(name = "aipstore-agent", about = "Store and poll AIPs on an Arkivum appliance")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Notify Arkivum that a package is in its watched directory.
    Register { uuid: String },
    /// Poll replication status, marking the package uploaded when green.
    Status { uuid: String },
    /// Check whether a package, or one file in it, is in the Arkivum cache.
    Local {
        uuid: String,
        #[arg(long)]
        path: Option<String>,
        /// Email superusers when the file is not cached.
        #[arg(long)]
        email: bool,
    },
    /// Report the last fixity check of an uncompressed package.
    Fixity { uuid: String },
    /// Delete a path from the appliance.
    Delete { path: String },
    /// Move a package from staging into the space and register it.
    Store { uuid: String, source: PathBuf },
    /// Copy a path out of the space into local staging.
    Fetch { source: String, dest: PathBuf },
    /// List a directory of the space.
    Browse { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli.config)?;
    info!(host = %config.arkivum.host, space = %config.space.path.display(), "aipstore-agent starting");

    let store: Arc<dyn PackageStore> = Arc::new(FilePackageStore::new(&config.store_path));
    let mailer = Arc::new(SendmailMailer::new(&config.mail));
    let backend = backend::from_config(&config, store.clone(), mailer)?;

    run(cli.command, &config, store.as_ref(), backend.as_ref()).await
}

async fn run(
    command: Command,
    config: &AgentConfig,
    store: &dyn PackageStore,
    backend: &dyn BackendAdapter,
) -> anyhow::Result<()> {
    match command {
        Command::Register { uuid } => {
            let mut package = store.load(&uuid).await?;
            let dest = package.full_path(&config.space.path);
            backend
                .post_move_from_storage_service(&dest, &dest, Some(&mut package))
                .await?;
            print_json(&package.misc_attributes)
        }
        Command::Status { uuid } => {
            let mut package = store.load(&uuid).await?;
            print_json(&backend.update_package_status(&mut package).await)
        }
        Command::Local { uuid, path, email } => {
            let mut package = store.load(&uuid).await?;
            let local = backend
                .is_file_local(&mut package, path.as_deref(), email)
                .await;
            print_json(&serde_json::json!({ "local": local }))
        }
        Command::Fixity { uuid } => {
            let mut package = store.load(&uuid).await?;
            let report = backend.check_package_fixity(&mut package).await?;
            print_json(&report)
        }
        Command::Delete { path } => {
            backend.delete_path(&path).await?;
            print_json(&serde_json::json!({ "deleted": path }))
        }
        Command::Store { uuid, source } => {
            let mut package = store.load(&uuid).await?;
            let dest = package.full_path(&config.space.path);
            backend.move_from_storage_service(&source, &dest).await?;
            backend
                .post_move_from_storage_service(&source, &dest, Some(&mut package))
                .await?;
            print_json(&package)
        }
        Command::Fetch { source, dest } => {
            backend.move_to_storage_service(&source, &dest).await?;
            print_json(&serde_json::json!({ "fetched": dest }))
        }
        Command::Browse { path } => print_json(&backend.browse(&path).await?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
