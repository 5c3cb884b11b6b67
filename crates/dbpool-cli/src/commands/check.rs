use std::path::Path;

use serde::Serialize;

use dbpool::{Dialer, KeyedPoolRegistry, PoolKey, PoolSettings, RegistryEntryStats, TcpDialer};

/// Outcome for one `[[pool]]` entry.
#[derive(Debug, Serialize)]
pub struct PoolCheck {
    pub index: usize,
    pub key: PoolKey,
    pub hosts: Vec<String>,
    pub port: u16,
    pub rounds_ok: u32,
    pub rounds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub checks: Vec<PoolCheck>,
    /// Counters per distinct pool after all rounds.
    pub pools: Vec<RegistryEntryStats>,
}

impl CheckReport {
    pub fn failed(&self) -> usize {
        self.checks.iter().filter(|c| c.error.is_some()).count()
    }
}

pub async fn check(config: &Path, rounds: u32, format: &str) -> anyhow::Result<()> {
    let file = super::load_pool_file(config)?;
    let registry = KeyedPoolRegistry::new(TcpDialer::new());

    let report = run_check(&registry, &file.pool, rounds).await;
    registry.reset_all().await;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print!("{}", format_report(&report));
        }
    }

    let failed = report.failed();
    if failed > 0 {
        anyhow::bail!("{failed} of {} pools failed", report.checks.len());
    }
    Ok(())
}

/// Run `rounds` acquire/release cycles against every entry, stopping an
/// entry at its first error.
pub async fn run_check<D: Dialer>(
    registry: &KeyedPoolRegistry<D>,
    pools: &[PoolSettings],
    rounds: u32,
) -> CheckReport {
    let mut checks = Vec::with_capacity(pools.len());

    for (index, settings) in pools.iter().enumerate() {
        let mut check = PoolCheck {
            index,
            key: PoolKey::from_settings(settings),
            hosts: settings.host_list(),
            port: settings.port,
            rounds_ok: 0,
            rounds,
            error: None,
        };

        for _ in 0..rounds {
            let outcome = async {
                let pool = registry.get_or_create_pool(settings).await?;
                let conn = pool.acquire().await?;
                pool.release(Some(conn)).await;
                Ok::<(), dbpool::PoolError>(())
            }
            .await;

            match outcome {
                Ok(()) => check.rounds_ok += 1,
                Err(e) => {
                    tracing::warn!(pool = index, key = check.key.short(), error = %e, "pool check failed");
                    check.error = Some(e.to_string());
                    break;
                }
            }
        }
        checks.push(check);
    }

    CheckReport {
        checks,
        pools: registry.stats().await,
    }
}

pub fn format_report(report: &CheckReport) -> String {
    let mut out = String::new();

    for c in &report.checks {
        let target = format!("{}:{}", c.hosts.join(","), c.port);
        match &c.error {
            None => out.push_str(&format!(
                "✓ #{}  {}  {target}  {}/{} rounds\n",
                c.index,
                c.key.short(),
                c.rounds_ok,
                c.rounds
            )),
            Some(e) => out.push_str(&format!(
                "✗ #{}  {}  {target}  failed after {}/{} rounds: {e}\n",
                c.index,
                c.key.short(),
                c.rounds_ok,
                c.rounds
            )),
        }
    }

    if !report.pools.is_empty() {
        out.push('\n');
    }
    for entry in &report.pools {
        let active = entry.hosts.hosts.iter().filter(|h| h.active).count();
        out.push_str(&format!(
            "pool {}  size {}/{}  idle {}  created {}  pinged {}  maxed {}  hosts {}/{} active\n",
            entry.key.short(),
            entry.pool.current_size,
            entry.pool.max_size,
            entry.pool.idle,
            entry.pool.created,
            entry.pool.pinged,
            entry.pool.pool_maxed,
            active,
            entry.hosts.hosts.len(),
        ));
    }
    out
}
