use std::collections::HashMap;
use std::path::Path;

use dbpool::{PoolKey, PoolSettings};

pub fn keys(config: &Path) -> anyhow::Result<()> {
    let file = super::load_pool_file(config)?;
    print!("{}", format_keys(&file.pool));
    Ok(())
}

/// One line per pool: index, abbreviated key, hosts, and the earlier entry
/// it shares a pool with, if any.
pub fn format_keys(pools: &[PoolSettings]) -> String {
    let mut first_seen: HashMap<PoolKey, usize> = HashMap::new();
    let mut out = String::new();

    for (i, settings) in pools.iter().enumerate() {
        let key = PoolKey::from_settings(settings);
        let hosts = settings.host_list().join(",");
        out.push_str(&format!("#{i}  {}  {hosts}:{}", key.short(), settings.port));
        match first_seen.get(&key) {
            Some(first) => out.push_str(&format!("  (same pool as #{first})")),
            None => {
                first_seen.insert(key, i);
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_entries_are_marked() {
        let a = PoolSettings::new("db1", 3306, "app", "pw");
        let b = PoolSettings::new("DB1", 3306, "app", "pw").with_option("charset", "utf8");
        let c = PoolSettings::new("db2", 3306, "app", "pw");

        let out = format_keys(&[a, b, c]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(!lines[0].contains("same pool"));
        assert!(lines[1].ends_with("(same pool as #0)"));
        assert!(!lines[2].contains("same pool"));
        assert!(lines[2].contains("db2:3306"));
    }
}
