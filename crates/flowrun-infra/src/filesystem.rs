//! Data directory layout.
//!
//! The data directory holds `config.toml` and, by convention, a `workflows/`
//! directory that is registered at start when `workflow_dir` is not set.

use std::path::{Path, PathBuf};

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `FLOWRUN_DATA_DIR` environment variable
/// 2. `~/.flowrun`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWRUN_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".flowrun");
    }

    // Last resort: current directory
    PathBuf::from(".flowrun")
}

/// `{data_dir}/config.toml`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Workflow directory to register at start: the configured one, resolved
/// against the data directory when relative, or `{data_dir}/workflows`.
pub fn workflow_dir(data_dir: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => data_dir.join(dir),
        None => data_dir.join("workflows"),
    }
}
