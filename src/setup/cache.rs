//! Symbol cache discovery and purge

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to purge {path}: {source}")]
    Purge {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a purge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    Purged(PathBuf),
    NotFound(PathBuf),
}

/// Symbol cache to purge: an explicit override, the local checkout's
/// `volatility3/volatility3/symbols`, or the per-user cache directory.
pub fn symbol_cache_dir(base_dir: &Path, override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    let local = base_dir.join("volatility3").join("volatility3").join("symbols");
    if local.exists() {
        return local;
    }

    dirs::cache_dir()
        .map(|d| d.join("volatility3").join("symbols"))
        .unwrap_or(local)
}

/// Delete the cache directory tree
pub fn purge_symbol_cache(dir: &Path) -> Result<PurgeOutcome, SetupError> {
    if !dir.exists() {
        log::warn!("Symbol cache not found at {}", dir.display());
        return Ok(PurgeOutcome::NotFound(dir.to_path_buf()));
    }

    fs::remove_dir_all(dir).map_err(|source| SetupError::Purge {
        path: dir.to_path_buf(),
        source,
    })?;
    log::info!("Purged symbol cache at {}", dir.display());
    Ok(PurgeOutcome::Purged(dir.to_path_buf()))
}
