//! PoolKey: canonical identity of a pool configuration.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::settings::PoolSettings;

/// SHA-256 (hex) over the identifying fields of a [`PoolSettings`].
///
/// Identifying fields are the ordered host list, port, database, user,
/// password and `pool_max_size`. Host names are compared case-insensitively
/// and without surrounding whitespace; a single `host` is the same as a
/// one-element `hosts` list. Timeouts, `autocommit` and pass-through options
/// do not participate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PoolKey(String);

impl PoolKey {
    pub fn from_settings(settings: &PoolSettings) -> Self {
        let mut hasher = Sha256::new();

        let hosts = settings.host_list();
        hasher.update((hosts.len() as u64).to_be_bytes());
        for host in &hosts {
            update_field(&mut hasher, host.trim().to_ascii_lowercase().as_bytes());
        }
        hasher.update(settings.port.to_be_bytes());
        match &settings.database {
            Some(db) => {
                hasher.update([1u8]);
                update_field(&mut hasher, db.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        update_field(&mut hasher, settings.user.as_bytes());
        update_field(&mut hasher, settings.password.as_bytes());
        hasher.update((settings.pool_max_size as u64).to_be_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated digest for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Length-prefixed so ("ab", "c") and ("a", "bc") never collide.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
