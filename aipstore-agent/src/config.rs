use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Directory holding one JSON record per package.
    pub store_path: PathBuf,
    pub space: SpaceConfig,
    pub arkivum: ArkivumConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceConfig {
    /// Root of the appliance's watched filesystem as mounted on this machine.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArkivumConfig {
    /// Hostname of the Arkivum web instance, e.g. `arkivum.example.com:8443`.
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Username on the remote machine reachable via passwordless ssh.
    #[serde(default)]
    pub remote_user: Option<String>,
    /// Name or IP of the remote machine.
    #[serde(default)]
    pub remote_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_scheme() -> String {
    "https".to_string()
}

impl ArkivumConfig {
    /// `(user, host)` when rsync over ssh is configured.
    pub fn remote(&self) -> Option<(&str, &str)> {
        match (self.remote_user.as_deref(), self.remote_name.as_deref()) {
            (Some(user), Some(name)) if !user.is_empty() && !name.is_empty() => Some((user, name)),
            _ => None,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_sendmail_path")]
    pub sendmail_path: PathBuf,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            sendmail_path: default_sendmail_path(),
            users: Vec::new(),
        }
    }
}

fn default_from_email() -> String {
    "webmaster@localhost".to_string()
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub email: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.arkivum.host.is_empty() {
            anyhow::bail!("arkivum.host must not be empty");
        }
        if !matches!(self.arkivum.scheme.as_str(), "https" | "http") {
            anyhow::bail!("arkivum.scheme must be https or http: {}", self.arkivum.scheme);
        }
        if self.arkivum.remote_user.is_some() != self.arkivum.remote_name.is_some() {
            anyhow::bail!("arkivum.remote_user and arkivum.remote_name must be set together");
        }
        if !self.space.path.is_absolute() {
            anyhow::bail!("space.path must be absolute: {}", self.space.path.display());
        }
        if self.store_path.as_os_str().is_empty() {
            anyhow::bail!("store_path must not be empty");
        }
        for user in &self.mail.users {
            if !user.email.contains('@') {
                anyhow::bail!("mail.users entry has an invalid email: {}", user.email);
            }
        }
        Ok(())
    }
}
