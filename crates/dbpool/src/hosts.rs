//! HostSet: candidate hosts for one pool with per-host active status.
//!
//! Selection walks the host list in round-robin order from a shared cursor,
//! skipping deactivated hosts. A host is deactivated only after a
//! connectivity failure and, under the default [`ReactivationPolicy::Never`],
//! stays down until [`HostSet::reset`] is called. Once every host is down,
//! each selection fails with [`PoolError::AllHostsDown`].
//!
//! Host names are trimmed and lowercased on entry, the same normalization
//! [`crate::PoolKey`] applies.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{PoolError, PoolResult};

/// What happens to a host after it has been deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReactivationPolicy {
    /// The host stays down for the lifetime of the set.
    #[default]
    Never,
    /// The host becomes selectable again once the cooldown has elapsed.
    /// The next dial against it acts as the re-probe.
    After(Duration),
}

/// One selected host. Identity is the position in the host list, so
/// duplicated names are tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    index: usize,
    name: String,
}

impl Host {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug)]
struct HostEntry {
    name: String,
    /// `Some` while the host is deactivated.
    deactivated_at: Option<Instant>,
    deactivations: u64,
}

impl HostEntry {
    fn is_selectable(&self, policy: ReactivationPolicy, now: Instant) -> bool {
        match (self.deactivated_at, policy) {
            (None, _) => true,
            (Some(_), ReactivationPolicy::Never) => false,
            (Some(at), ReactivationPolicy::After(cooldown)) => now.duration_since(at) >= cooldown,
        }
    }
}

#[derive(Debug)]
struct HostState {
    entries: Vec<HostEntry>,
    /// Index the next selection starts from.
    cursor: usize,
}

/// Status of one host in a [`HostSetStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostStatus {
    pub name: String,
    pub active: bool,
    pub deactivations: u64,
}

/// Counters for one host set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSetStats {
    pub hosts: Vec<HostStatus>,
    /// Total deactivations across all hosts.
    pub deactivations: u64,
    /// Selections that found no active host.
    pub all_down_events: u64,
}

/// Candidate hosts for one pool.
#[derive(Debug)]
pub struct HostSet {
    state: Mutex<HostState>,
    policy: ReactivationPolicy,
    deactivations: AtomicU64,
    all_down_events: AtomicU64,
}

impl HostSet {
    pub fn new<S: AsRef<str>>(hosts: &[S], policy: ReactivationPolicy) -> Self {
        let entries = hosts
            .iter()
            .map(|h| HostEntry {
                name: h.as_ref().trim().to_ascii_lowercase(),
                deactivated_at: None,
                deactivations: 0,
            })
            .collect();
        Self {
            state: Mutex::new(HostState { entries, cursor: 0 }),
            policy,
            deactivations: AtomicU64::new(0),
            all_down_events: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of hosts, active or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> ReactivationPolicy {
        self.policy
    }

    /// Number of hosts currently selectable.
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|e| e.is_selectable(self.policy, now))
            .count()
    }

    /// Whether every host is down.
    pub fn is_exhausted(&self) -> bool {
        self.active_count() == 0
    }

    /// Pick the next active host in rotation.
    pub fn select_host(&self) -> PoolResult<Host> {
        self.select_excluding(&[])
    }

    /// Pick the next active host whose index is not in `tried`.
    ///
    /// Used by one creation attempt so that each host is dialed at most
    /// once even when other attempts move the cursor concurrently.
    pub(crate) fn select_excluding(&self, tried: &[usize]) -> PoolResult<Host> {
        let now = Instant::now();
        let mut state = self.lock();
        let n = state.entries.len();

        for step in 0..n {
            let idx = (state.cursor + step) % n;
            if tried.contains(&idx) {
                continue;
            }
            let entry = &mut state.entries[idx];
            if !entry.is_selectable(self.policy, now) {
                continue;
            }
            if entry.deactivated_at.take().is_some() {
                info!(host = %entry.name, "host cooldown elapsed, reactivating");
            }
            let host = Host {
                index: idx,
                name: entry.name.clone(),
            };
            state.cursor = (idx + 1) % n;
            return Ok(host);
        }

        drop(state);
        self.all_down_events.fetch_add(1, Ordering::Relaxed);
        warn!(hosts = n, tried = tried.len(), "no active host left");
        Err(PoolError::AllHostsDown { hosts: n })
    }

    /// Mark a host inactive after a connectivity failure.
    ///
    /// Returns `false` if the host was already down (a concurrent attempt
    /// got there first); the counters move only on the first call.
    pub fn deactivate(&self, host: &Host) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(host.index) else {
            return false;
        };
        if entry.deactivated_at.is_some() {
            return false;
        }
        entry.deactivated_at = Some(Instant::now());
        entry.deactivations += 1;
        let remaining = state
            .entries
            .iter()
            .filter(|e| e.deactivated_at.is_none())
            .count();
        drop(state);

        self.deactivations.fetch_add(1, Ordering::Relaxed);
        warn!(host = %host, remaining, "host deactivated");
        true
    }

    /// Reactivate every host.
    pub fn reset(&self) {
        let mut state = self.lock();
        for entry in state.entries.iter_mut() {
            entry.deactivated_at = None;
        }
        state.cursor = 0;
        info!(hosts = state.entries.len(), "host set reset");
    }

    pub fn stats(&self) -> HostSetStats {
        let now = Instant::now();
        let state = self.lock();
        let hosts = state
            .entries
            .iter()
            .map(|e| HostStatus {
                name: e.name.clone(),
                active: e.is_selectable(self.policy, now),
                deactivations: e.deactivations,
            })
            .collect();
        HostSetStats {
            hosts,
            deactivations: self.deactivations.load(Ordering::Relaxed),
            all_down_events: self.all_down_events.load(Ordering::Relaxed),
        }
    }
}
