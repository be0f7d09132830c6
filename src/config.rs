use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_CRON: &str = "0 */5 * * * *";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INITIAL_LOOKBACK_MINUTES: i64 = 60;
/// Five years.
const MAX_INITIAL_LOOKBACK_MINUTES: i64 = 5 * 366 * 24 * 60;

/// Process configuration, loaded once at startup and never reloaded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub remote: RemoteConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Full URL of the incident table endpoint,
    /// e.g. `https://acme.service-now.com/api/now/table/incident`.
    pub incidents_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Literal `Authorization` header value. Takes precedence over
    /// username/password.
    pub authorization: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            incidents_url: String::new(),
            username: None,
            password: None,
            authorization: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RemoteConfig")
            .field("incidents_url", &self.incidents_url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("authorization", &redact(&self.authorization))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Static credential sent with every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Header(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Header(_) => f.write_str("Credential::Header(<redacted>)"),
            Credential::Basic { username, .. } => {
                write!(f, "Credential::Basic {{ username: {username:?}, password: <redacted> }}")
            }
        }
    }
}

impl RemoteConfig {
    pub fn credential(&self) -> Result<Credential> {
        if let Some(header) = self.authorization.as_deref().filter(|h| !h.trim().is_empty()) {
            return Ok(Credential::Header(header.to_string()));
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Ok(Credential::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(Error::Config(
                "remote credentials missing: set remote.authorization or remote.username and remote.password".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Cron expression with a leading seconds field.
    pub cron: String,
    /// Window used on the very first cycle, before any watermark exists.
    pub initial_lookback_minutes: i64,
    /// Skip and log incidents that fail to map instead of aborting the batch.
    pub skip_malformed: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_CRON.to_string(),
            initial_lookback_minutes: DEFAULT_INITIAL_LOOKBACK_MINUTES,
            skip_malformed: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Database path (default: `~/.snowsync/snowsync.db`).
    pub path: Option<PathBuf>,
}

impl Config {
    /// Directory holding the default config file and database.
    pub fn home_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".snowsync"))
    }

    /// Load from `path`, or from `~/.snowsync/config.toml` when no path is
    /// given, then apply `SNOWSYNC_*` environment overrides and validate.
    ///
    /// A missing default file is not an error: everything can come from the
    /// environment. A missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Self::home_dir()?.join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    log::debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SNOWSYNC_INCIDENTS_URL") {
            self.remote.incidents_url = v;
        }
        if let Some(v) = lookup("SNOWSYNC_USERNAME") {
            self.remote.username = Some(v);
        }
        if let Some(v) = lookup("SNOWSYNC_PASSWORD") {
            self.remote.password = Some(v);
        }
        if let Some(v) = lookup("SNOWSYNC_AUTHORIZATION") {
            self.remote.authorization = Some(v);
        }
        if let Some(v) = lookup("SNOWSYNC_TIMEOUT_SECS") {
            self.remote.timeout_secs = v.trim().parse().map_err(|e| {
                Error::Config(format!("invalid SNOWSYNC_TIMEOUT_SECS {v:?}: {e}"))
            })?;
        }
        if let Some(v) = lookup("SNOWSYNC_CRON") {
            self.schedule.cron = v;
        }
        if let Some(v) = lookup("SNOWSYNC_DB") {
            self.storage.path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.remote.incidents_url).map_err(|e| {
            Error::Config(format!(
                "invalid remote.incidents_url {:?}: {e}",
                self.remote.incidents_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "remote.incidents_url must be http(s), got {}",
                url.scheme()
            )));
        }
        self.remote.credential()?;
        if self.remote.timeout_secs == 0 {
            return Err(Error::Config("remote.timeout_secs must be positive".into()));
        }
        if self.schedule.cron.trim().is_empty() {
            return Err(Error::Config("schedule.cron must not be empty".into()));
        }
        if !(0..=MAX_INITIAL_LOOKBACK_MINUTES).contains(&self.schedule.initial_lookback_minutes) {
            return Err(Error::Config(format!(
                "schedule.initial_lookback_minutes must be between 0 and {MAX_INITIAL_LOOKBACK_MINUTES}"
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(p) => Ok(p.clone()),
            None => Ok(Self::home_dir()?.join("snowsync.db")),
        }
    }
}
