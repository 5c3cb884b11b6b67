pub mod check;
pub mod keys;

use std::path::Path;

use anyhow::Context;
use dbpool::PoolFile;

/// Read and validate a pool file.
pub fn load_pool_file(path: &Path) -> anyhow::Result<PoolFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = PoolFile::from_toml_str(&content)
        .with_context(|| format!("Invalid pool file {}", path.display()))?;
    if file.pool.is_empty() {
        anyhow::bail!("{} defines no [[pool]] tables", path.display());
    }
    Ok(file)
}
