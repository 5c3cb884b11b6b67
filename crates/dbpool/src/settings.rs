//! Pool settings: the inbound configuration of one keyed pool.
//!
//! Settings are plain serde structs so they can be embedded in a larger
//! application config or loaded on their own from a TOML pool file:
//!
//! ```toml
//! [[pool]]
//! hosts = ["db1.internal", "db2.internal"]
//! port = 3306
//! database = "orders"
//! user = "app"
//! password = "secret"
//! pool_max_size = 20
//! connect_timeout = "2s"
//!
//! [pool.options]
//! charset = "utf8mb4"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};
use crate::hosts::ReactivationPolicy;

/// Default pool capacity when `pool_max_size` is not given.
pub const DEFAULT_MAX_SIZE: usize = 10;

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_autocommit() -> bool {
    true
}

fn default_connect_timeout() -> String {
    "5s".to_string()
}

fn default_release_timeout() -> String {
    "2s".to_string()
}

/// Connection settings for one pool.
///
/// Only the host list, port, database, user, password and `pool_max_size`
/// identify a pool (see [`PoolKey`](crate::PoolKey)); everything else is
/// carried along for the dialer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Single host. Ignored when `hosts` is non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Candidate hosts, tried in rotation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Pool capacity (default: 10).
    #[serde(default = "default_max_size")]
    pub pool_max_size: usize,
    #[serde(default = "default_autocommit")]
    pub autocommit: bool,
    /// Dial timeout per host, e.g. `"5s"` or `"500ms"` (default: 5s).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    /// How long `release()` waits on a full idle queue before closing the
    /// connection instead (default: 2s).
    #[serde(default = "default_release_timeout")]
    pub release_timeout: String,
    /// Cooldown after which a deactivated host may be tried again.
    /// Absent means hosts stay down for the lifetime of the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reactivate_after: Option<String>,
    /// Protocol options passed through to the dialer untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl PoolSettings {
    /// Settings for a single host with defaults everywhere else.
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            hosts: Vec::new(),
            port,
            database: None,
            user: user.to_string(),
            password: password.to_string(),
            pool_max_size: DEFAULT_MAX_SIZE,
            autocommit: true,
            connect_timeout: default_connect_timeout(),
            release_timeout: default_release_timeout(),
            reactivate_after: None,
            options: BTreeMap::new(),
        }
    }

    /// Builder method: replace the host list.
    pub fn with_hosts<S: AsRef<str>>(self, hosts: &[S]) -> Self {
        Self {
            host: None,
            hosts: hosts.iter().map(|h| h.as_ref().to_string()).collect(),
            ..self
        }
    }

    /// Builder method: set the database.
    pub fn with_database(self, database: &str) -> Self {
        Self {
            database: Some(database.to_string()),
            ..self
        }
    }

    /// Builder method: set the pool capacity.
    pub fn with_max_size(self, pool_max_size: usize) -> Self {
        Self {
            pool_max_size,
            ..self
        }
    }

    /// Builder method: add a pass-through option.
    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    /// The effective, ordered host list.
    pub fn host_list(&self) -> Vec<String> {
        if !self.hosts.is_empty() {
            self.hosts.clone()
        } else {
            self.host.iter().cloned().collect()
        }
    }

    pub fn connect_timeout(&self) -> PoolResult<Duration> {
        parse_setting("connect_timeout", &self.connect_timeout)
    }

    pub fn release_timeout(&self) -> PoolResult<Duration> {
        parse_setting("release_timeout", &self.release_timeout)
    }

    /// Host reactivation policy derived from `reactivate_after`.
    pub fn reactivation(&self) -> PoolResult<ReactivationPolicy> {
        match &self.reactivate_after {
            None => Ok(ReactivationPolicy::Never),
            Some(s) => parse_setting("reactivate_after", s).map(ReactivationPolicy::After),
        }
    }

    /// Reject settings no pool could be built from.
    pub fn validate(&self) -> PoolResult<()> {
        let hosts = self.host_list();
        if hosts.is_empty() {
            return Err(PoolError::InvalidSettings(
                "at least one host is required".to_string(),
            ));
        }
        if hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(PoolError::InvalidSettings("empty host name".to_string()));
        }
        if self.pool_max_size == 0 {
            return Err(PoolError::InvalidSettings(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        self.connect_timeout()?;
        self.release_timeout()?;
        self.reactivation()?;
        Ok(())
    }
}

/// A TOML pool file: one `[[pool]]` table per pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolFile {
    #[serde(default)]
    pub pool: Vec<PoolSettings>,
}

impl PoolFile {
    /// Parse and validate a pool file.
    pub fn from_toml_str(content: &str) -> PoolResult<Self> {
        let file: PoolFile =
            toml::from_str(content).map_err(|e| PoolError::InvalidSettings(e.to_string()))?;
        for settings in &file.pool {
            settings.validate()?;
        }
        Ok(file)
    }
}

fn parse_setting(name: &str, value: &str) -> PoolResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| PoolError::InvalidSettings(format!("{name}: bad duration '{value}'")))
}

/// Parse a duration string like "5s", "500ms", "1m".
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
