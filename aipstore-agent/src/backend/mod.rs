pub mod arkivum;

use std::sync::Arc;

use aipstore_common::backend::{BackendAdapter, Mailer, PackageStore};

use self::arkivum::ArkivumAdapter;
use crate::config::AgentConfig;
use crate::space::LocalSpace;

/// Construct the space adapter described by the agent configuration.
pub fn from_config(
    config: &AgentConfig,
    store: Arc<dyn PackageStore>,
    mailer: Arc<dyn Mailer>,
) -> anyhow::Result<Box<dyn BackendAdapter>> {
    let space = Arc::new(LocalSpace::new(&config.space.path));
    let adapter = ArkivumAdapter::new(config.arkivum.clone(), space, store, mailer)?;
    Ok(Box::new(adapter))
}
