//! dbpool: bounded connection pools with multi-host failover.
//!
//! Building blocks:
//! - **pool**: [`ResourcePool`], a bounded pool of reusable connections with
//!   FIFO waiting, ping-on-reuse and bounded-wait release
//! - **factory**: the [`ConnectionFactory`] contract and [`FailoverFactory`],
//!   which dials through a per-host [`Dialer`] across a [`HostSet`]
//! - **hosts**: round-robin host selection with deactivation on connectivity
//!   failure
//! - **key**: [`PoolKey`], the canonical digest of a pool configuration
//! - **registry**: [`KeyedPoolRegistry`], one shared pool per key
//! - **settings**: [`PoolSettings`] and the TOML [`PoolFile`]
//! - **tcp**: [`TcpDialer`], plain TCP sessions

pub mod error;
pub mod factory;
pub mod hosts;
pub mod key;
pub mod pool;
pub mod registry;
pub mod settings;
pub mod tcp;

pub use error::{DialError, PoolError, PoolResult};
pub use factory::{ConnectionFactory, Dialer, FailoverFactory, HostBound};
pub use hosts::{Host, HostSet, HostSetStats, HostStatus, ReactivationPolicy};
pub use key::PoolKey;
pub use pool::{PoolStats, ResourcePool};
pub use registry::{FailoverPool, KeyedPoolRegistry, RegistryEntryStats};
pub use settings::{PoolFile, PoolSettings};
pub use tcp::{TcpDialer, TcpSession};
