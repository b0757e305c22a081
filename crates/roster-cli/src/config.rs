use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use roster_audit::SyncMode;
use roster_merge::MergeConfig;
use roster_types::{DependentReference, ReferenceRegistry};
use serde::{Deserialize, Serialize};

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "roster.toml";

/// Settings loaded from `roster.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterConfig {
    /// JSON snapshot holding users and dependent tables.
    pub store_path: PathBuf,
    /// Append-only merge audit log.
    pub audit_log: PathBuf,
    /// Upper bound on waiting for row locks.
    pub lock_timeout_secs: u64,
    pub audit_sync: SyncMode,
    /// Tables that reference users by id.
    pub references: Vec<DependentReference>,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("roster.json"),
            audit_log: PathBuf::from("logs/merge_profile.log"),
            lock_timeout_secs: 30,
            audit_sync: SyncMode::default(),
            references: vec![DependentReference::new("organization_memberships", "user_id")
                .unique_with(["organization_id"])],
        }
    }
}

impl RosterConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `roster.toml` in the working
    /// directory is used if present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    tracing::debug!("no roster.toml found, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.registry()?;
        Ok(config)
    }

    /// The validated dependent-reference registry.
    pub fn registry(&self) -> anyhow::Result<ReferenceRegistry> {
        Ok(ReferenceRegistry::new(self.references.clone())?)
    }

    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig::with_lock_timeout(Duration::from_secs(self.lock_timeout_secs))
    }
}
