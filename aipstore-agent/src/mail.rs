//! Outgoing mail through the local sendmail binary.

use std::path::PathBuf;
use std::process::Stdio;

use aipstore_common::backend::{Mail, Mailer};
use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::config::{MailConfig, UserConfig};

pub struct SendmailMailer {
    sendmail_path: PathBuf,
    from_email: String,
    users: Vec<UserConfig>,
}

impl SendmailMailer {
    pub fn new(config: &MailConfig) -> Self {
        Self {
            sendmail_path: config.sendmail_path.clone(),
            from_email: config.from_email.clone(),
            users: config.users.clone(),
        }
    }
}

/// RFC 5322 message with the headers sendmail needs in `-t` mode.
pub fn render_message(from: &str, mail: &Mail) -> String {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        from,
        mail.recipients.join(", "),
        mail.subject,
        mail.message
    )
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn active_superusers(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for user in self.users.iter().filter(|u| u.is_superuser && u.is_active) {
            if !emails.contains(&user.email) {
                emails.push(user.email.clone());
            }
        }
        emails
    }

    async fn send_mail(&self, mail: &Mail) -> anyhow::Result<()> {
        let mut child = Command::new(&self.sendmail_path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.sendmail_path.display()))?;

        let message = render_message(&self.from_email, mail);
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "sendmail exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(recipients = ?mail.recipients, subject = %mail.subject, "Mail sent");
        Ok(())
    }
}
