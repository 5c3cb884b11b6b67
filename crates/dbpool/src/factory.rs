//! Connection factories.
//!
//! A [`ResourcePool`](crate::ResourcePool) is built around exactly one
//! [`ConnectionFactory`]: the create/ping/close capability it calls into.
//! The multi-host factory, [`FailoverFactory`], is assembled from a
//! per-host [`Dialer`] and a [`HostSet`]:
//!
//! ```text
//! FailoverFactory::create_connection()
//!   → HostSet::select_host()            (next active host, round-robin)
//!     → Dialer::dial(host)
//!       → Ok(conn)                     → HostBound { host, conn }
//!       → Err(Connectivity)            → deactivate host, try the next one
//!       → Err(Application)             → propagate, host stays active
//!   → no host left                     → PoolError::AllHostsDown
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DialError, PoolError, PoolResult};
use crate::hosts::{Host, HostSet};
use crate::settings::PoolSettings;

/// The create/ping/close contract a pool is constructed with.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Opaque connection handle.
    type Connection: Send + 'static;

    /// Establish a new connection. Errors are surfaced to the acquirer.
    async fn create_connection(&self) -> PoolResult<Self::Connection>;

    /// Liveness probe. Must not fail; `false` means "replace me".
    async fn ping_connection(&self, conn: &mut Self::Connection) -> bool;

    /// Release the connection's resources. Must not fail.
    async fn close_connection(&self, conn: Self::Connection);
}

/// Per-host transport capability used by [`FailoverFactory`].
///
/// Implementations classify their own failures: [`DialError::Connectivity`]
/// when the host could not be reached, [`DialError::Application`] when it
/// answered and refused.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a session on `host` using the pool settings.
    async fn dial(
        &self,
        host: &Host,
        settings: &PoolSettings,
    ) -> Result<Self::Connection, DialError>;

    /// Liveness probe against the host the connection was dialed on.
    async fn ping(&self, host: &Host, conn: &mut Self::Connection) -> bool;

    /// Tear the session down.
    async fn close(&self, host: &Host, conn: Self::Connection);
}

/// A connection tagged with the host it was dialed on.
#[derive(Debug)]
pub struct HostBound<C> {
    host: Host,
    conn: C,
}

impl<C> HostBound<C> {
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> Deref for HostBound<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for HostBound<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Multi-host factory: dials through a [`Dialer`], failing over across
/// the pool's [`HostSet`].
pub struct FailoverFactory<D: Dialer> {
    dialer: Arc<D>,
    hosts: HostSet,
    settings: PoolSettings,
}

impl<D: Dialer> FailoverFactory<D> {
    /// Build a factory with a fresh host set derived from `settings`.
    pub fn new(dialer: Arc<D>, settings: PoolSettings) -> PoolResult<Self> {
        settings.validate()?;
        let hosts = HostSet::new(&settings.host_list(), settings.reactivation()?);
        Ok(Self {
            dialer,
            hosts,
            settings,
        })
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}

#[async_trait]
impl<D: Dialer> ConnectionFactory for FailoverFactory<D> {
    type Connection = HostBound<D::Connection>;

    async fn create_connection(&self) -> PoolResult<Self::Connection> {
        let mut tried = Vec::with_capacity(self.hosts.len());
        loop {
            let host = self.hosts.select_excluding(&tried)?;
            match self.dialer.dial(&host, &self.settings).await {
                Ok(conn) => {
                    debug!(host = %host, port = self.settings.port, "dialed new connection");
                    return Ok(HostBound { host, conn });
                }
                Err(DialError::Connectivity(reason)) => {
                    debug!(host = %host, port = self.settings.port, %reason, "dial failed, trying next host");
                    self.hosts.deactivate(&host);
                    tried.push(host.index());
                }
                Err(DialError::Application(reason)) => {
                    return Err(PoolError::Application {
                        host: host.name().to_string(),
                        reason,
                    });
                }
            }
        }
    }

    async fn ping_connection(&self, conn: &mut Self::Connection) -> bool {
        self.dialer.ping(&conn.host, &mut conn.conn).await
    }

    async fn close_connection(&self, conn: Self::Connection) {
        self.dialer.close(&conn.host, conn.conn).await;
    }
}

impl<D: Dialer> std::fmt::Debug for FailoverFactory<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverFactory")
            .field("hosts", &self.hosts)
            .field("port", &self.settings.port)
            .finish_non_exhaustive()
    }
}
