//! Connection settings collected at setup time and persisted per config entry.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::DEFAULT_RETURN_KEYWORD;
use crate::{Error, Result};

pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Where the controller lives and how to authenticate write requests.
///
/// Never mutated after setup. `Debug` redacts the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "api_url")]
    pub base_url: String,
    #[serde(rename = "haus_id")]
    pub house_id: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("house_id", &self.house_id)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_return_keyword")]
    pub return_keyword: String,
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

fn default_return_keyword() -> String {
    DEFAULT_RETURN_KEYWORD.to_string()
}

impl ConfigEntry {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            return_keyword: default_return_keyword(),
        }
    }

    /// Read `CONTROME_URL`, `CONTROME_HOUSE_ID`, `CONTROME_USER`,
    /// `CONTROME_PASSWORD` and the optional `CONTROME_UPDATE_INTERVAL_SECS` /
    /// `CONTROME_RETURN_KEYWORD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| match lookup(key) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(Error::Config(format!("missing {key}"))),
        };

        let base_url = normalize_base_url(&required("CONTROME_URL")?)?;
        let credentials = Credentials {
            base_url,
            house_id: required("CONTROME_HOUSE_ID")?,
            user: required("CONTROME_USER")?,
            password: required("CONTROME_PASSWORD")?,
        };

        let update_interval_secs = match lookup("CONTROME_UPDATE_INTERVAL_SECS") {
            Some(s) => match s.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(Error::Config(
                        "CONTROME_UPDATE_INTERVAL_SECS must be a positive integer".to_string(),
                    ));
                }
            },
            None => DEFAULT_UPDATE_INTERVAL_SECS,
        };

        let return_keyword = lookup("CONTROME_RETURN_KEYWORD")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_return_keyword);

        Ok(Self {
            credentials,
            update_interval_secs,
            return_keyword,
        })
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    /// Key used to refuse a second entry for the same controller and house.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.credentials.base_url, self.credentials.house_id)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut entry: ConfigEntry = serde_json::from_str(&raw)?;
        entry.credentials.base_url = normalize_base_url(&entry.credentials.base_url)?;
        Ok(entry)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), raw)?;
        debug!(path = %path.as_ref().display(), "saved config entry");
        Ok(())
    }
}

/// Trim, default the scheme to `http://`, drop trailing slashes and check the
/// result is an http(s) URL with a host.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl(raw.to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.contains("://") {
        return Err(Error::InvalidUrl(raw.to_string()));
    } else {
        format!("http://{trimmed}")
    };
    let normalized = with_scheme.trim_end_matches('/').to_string();

    match url::Url::parse(&normalized) {
        Ok(parsed) if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(normalized),
        _ => Err(Error::InvalidUrl(raw.to_string())),
    }
}
