//! The configuration surface from `§6`.

use std::time::Duration;

use crate::remote::Credentials;

/// Configuration values for the orchestrator's workflows.
///
/// Mirrors the option table in `§6`; defaults match the ones given there.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-attempt network timeout.
    pub timeout: Duration,
    /// Ordered list of HTTP gateway base URLs for downloads. First success wins.
    pub gateways: Vec<String>,
    /// Inner-batch concurrency for uploads and purges.
    pub batch_size: usize,
    /// Outer parallel batch count for uploads.
    pub max_concurrency: usize,
    /// Authentication material for the remote store.
    pub credentials: Option<Credentials>,
    /// Target container selection, when the delegation references several.
    pub container_id: Option<String>,
    /// Bypass the root-selector path during restore, always reconstruct.
    pub force_fallback: bool,
    /// Name for the recreated database in fallback mode.
    pub fallback_database_name: Option<String>,
    /// Extraction mode switch for backup.
    pub log_entries_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            gateways: vec![
                "https://w3s.link".to_string(),
                "https://ipfs.io".to_string(),
                "https://dweb.link".to_string(),
            ],
            batch_size: 10,
            max_concurrency: 3,
            credentials: None,
            container_id: None,
            force_fallback: false,
            fallback_database_name: None,
            log_entries_only: false,
        }
    }
}

impl Config {
    /// The maximum number of uploads in flight at once under this config.
    pub fn max_uploads_in_flight(&self) -> usize {
        self.batch_size * self.max_concurrency
    }
}
