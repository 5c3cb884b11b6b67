//! Pool, failover and registry over real TCP.
//!
//! The test stack: `KeyedPoolRegistry` → `FailoverFactory` → `TcpDialer` →
//! TCP → `MockServer`. Unreachable hosts are other loopback addresses on
//! the same port, where nothing listens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use dbpool::{KeyedPoolRegistry, PoolError, PoolSettings, TcpDialer};

// ── MockServer ──────────────────────────────────────────────────────

/// A TCP server on 127.0.0.1 that counts accepted connections.
struct MockServer {
    port: u16,
    accepted: Arc<AtomicU64>,
}

impl MockServer {
    /// Accept connections and hold each open until the client hangs up.
    async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Accept connections and close them immediately.
    async fn start_closing() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(close_immediately: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind to random port");
        let port = listener.local_addr().expect("local addr").port();
        let accepted = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::Relaxed);
                if close_immediately {
                    drop(stream);
                    continue;
                }
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });

        Self { port, accepted }
    }

    fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

fn settings(hosts: &[&str], port: u16) -> PoolSettings {
    let mut s = PoolSettings::new(hosts[0], port, "root", "root").with_hosts(hosts);
    s.connect_timeout = "500ms".to_string();
    s
}

// ── Failover ────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_hosts_are_skipped() {
    let server = MockServer::start().await;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let s = settings(&["127.0.0.2", "127.0.0.3", "127.0.0.1"], server.port);
    let pool = registry.get_or_create_pool(&s).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.host().name(), "127.0.0.1");
    assert_eq!(conn.peer_addr().port(), server.port);
    pool.release(Some(conn)).await;

    let hosts = pool.factory().hosts().stats();
    assert_eq!(hosts.deactivations, 2);
    assert_eq!(hosts.all_down_events, 0);
    assert_eq!(pool.factory().hosts().active_count(), 1);

    // Later creations go straight to the surviving host.
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_eq!(b.host().name(), "127.0.0.1");
    pool.release(Some(a)).await;
    pool.release(Some(b)).await;
    assert_eq!(pool.factory().hosts().stats().deactivations, 2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn all_hosts_unreachable_fails_without_leaking_slots() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let pool = registry
        .get_or_create_pool(&settings(&["127.0.0.1", "127.0.0.2"], port))
        .await
        .unwrap();

    for _ in 0..3 {
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AllHostsDown { hosts: 2 }));
    }

    let stats = pool.stats();
    assert_eq!(stats.current_size, 0);
    assert_eq!(stats.create_failures, 3);
    assert_eq!(pool.factory().hosts().stats().deactivations, 2);
}

#[tokio::test]
async fn reset_host_set_recovers_after_outage() {
    let server = MockServer::start().await;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let pool = registry
        .get_or_create_pool(&settings(&["127.0.0.2"], server.port))
        .await
        .unwrap();
    assert!(pool.acquire().await.is_err());
    assert!(pool.factory().hosts().is_exhausted());

    pool.factory().hosts().reset();
    assert_eq!(pool.factory().hosts().active_count(), 1);
}

// ── Pooling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn dead_idle_session_is_replaced() {
    let server = MockServer::start_closing().await;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let pool = registry
        .get_or_create_pool(&settings(&["127.0.0.1"], server.port))
        .await
        .unwrap();

    let conn = pool.acquire().await.unwrap();
    pool.release(Some(conn)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = pool.acquire().await.unwrap();
    pool.release(Some(conn)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = pool.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.ping_failures, 1);
    assert_eq!(stats.current_size, 1);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn reused_sessions_are_checked_without_waiting() {
    let server = MockServer::start().await;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let pool = registry
        .get_or_create_pool(&settings(&["127.0.0.1"], server.port))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    for _ in 0..10 {
        let conn = pool.acquire().await.unwrap();
        pool.release(Some(conn)).await;
    }
    assert!(started.elapsed() < Duration::from_millis(300));

    let stats = pool.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.pinged, 9);
    assert_eq!(stats.ping_failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_callers_share_ten_sessions() {
    let server = MockServer::start().await;
    let registry = Arc::new(KeyedPoolRegistry::new(TcpDialer::new()));
    let s = settings(&["127.0.0.1", "127.0.0.1"], server.port).with_max_size(10);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let mut tasks = Vec::new();
    for _ in 0..100 {
        let registry = Arc::clone(&registry);
        let s = s.clone();
        tasks.push(tokio::spawn(async move {
            let mut rounds = 0u64;
            while tokio::time::Instant::now() < deadline {
                let pool = registry.get_or_create_pool(&s).await?;
                let conn = pool.acquire().await?;
                assert!(pool.current_size() <= 10);
                tokio::time::sleep(Duration::from_millis(2)).await;
                pool.release(Some(conn)).await;
                rounds += 1;
            }
            Ok::<u64, PoolError>(rounds)
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap().unwrap();
    }
    assert!(total >= 100);

    let stats = registry.stats().await;
    assert_eq!(stats.len(), 1);
    let entry = &stats[0];
    assert!(entry.pool.created <= 10);
    assert!(entry.pool.pool_maxed > 0);
    assert_eq!(entry.pool.idle, entry.pool.current_size);
    assert_eq!(entry.hosts.all_down_events, 0);
    assert_eq!(entry.hosts.deactivations, 0);
    assert!(server.accepted() <= 10);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json[0]["pool"]["max_size"], 10);
    assert!(json[0]["key"].is_string());
}

#[tokio::test]
async fn reset_all_hangs_up_sessions() {
    let server = MockServer::start().await;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());
    let s = settings(&["127.0.0.1"], server.port);

    let pool = registry.get_or_create_pool(&s).await.unwrap();
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(Some(a)).await;
    pool.release(Some(b)).await;
    assert_eq!(pool.idle_count(), 2);

    registry.reset_all().await;
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.stats().closed, 2);
    assert!(registry.is_empty().await);
}
