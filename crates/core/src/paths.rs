//! Centralized path functions for all jobfarm storage locations.
//!
//! Everything lives under one home directory so a single forced-command
//! installation can be moved or backed up as a unit.

use std::path::{Path, PathBuf};

/// Default home: `~/.local/share/jobfarm/` (Linux) or the platform equivalent.
pub fn default_home_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("jobfarm"))
}

/// SQLite database file: `<home>/jobfarm.db`.
pub fn db_path(home: &Path) -> PathBuf {
    home.join("jobfarm.db")
}

/// Append-only audit log: `<home>/audit.log`.
pub fn audit_log_path(home: &Path) -> PathBuf {
    home.join("audit.log")
}

/// Job-type bundles: `<home>/bundles/`.
pub fn bundles_dir(home: &Path) -> PathBuf {
    home.join("bundles")
}

/// Submitted reports: `<home>/reports/`.
pub fn reports_dir(home: &Path) -> PathBuf {
    home.join("reports")
}

/// Optional config file: `<home>/jobfarm.toml`.
pub fn config_file_path(home: &Path) -> PathBuf {
    home.join("jobfarm.toml")
}
