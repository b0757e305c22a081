use std::time::Duration;

/// Engine-level settings, passed explicitly to [`crate::MergeEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeConfig {
    /// Upper bound on waiting for row locks in the apply phase.
    pub lock_timeout: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl MergeConfig {
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }
}
