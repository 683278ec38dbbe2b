//! Administrator notifications.
//!
//! Provides `notify_not_local()`, which emails every active superuser when a
//! requested package or file is not in the Arkivum cache. Delivery is
//! best effort: failures are logged and never reach the caller.

use aipstore_common::backend::{Mail, Mailer};
use aipstore_common::documents::Package;
use tracing::{debug, warn};

pub const NOT_LOCAL_SUBJECT: &str = "Arkivum file not locally available";

/// Body of the not-in-cache email for `package`, or for the file at `path`
/// inside it.
pub fn not_local_message(package: &Package, path: Option<&str>, arkivum_id: Option<&str>) -> String {
    let item = match path {
        Some(path) => format!("File {} in package {}", path, package),
        None => format!("Package {}", package),
    };
    format!(
        "{} with Arkivum ID of {} has been requested but is not available in the Arkivum cache.",
        item,
        arkivum_id.unwrap_or("unknown")
    )
}

pub async fn notify_not_local(
    mailer: &dyn Mailer,
    package: &Package,
    path: Option<&str>,
    arkivum_id: Option<&str>,
) {
    let recipients = mailer.active_superusers().await;
    if recipients.is_empty() {
        debug!(package = %package.uuid, "No active superusers to notify");
        return;
    }

    let mail = Mail {
        subject: NOT_LOCAL_SUBJECT.to_string(),
        message: not_local_message(package, path, arkivum_id),
        recipients,
    };
    if let Err(e) = mailer.send_mail(&mail).await {
        warn!(package = %package.uuid, error = %e, "Failed to send not-local notification");
    }
}
