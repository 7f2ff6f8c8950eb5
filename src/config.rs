//! Engine configuration

/// Configuration for the checkpoint engine
///
/// All knobs have conservative defaults; use the `with_*` builders to
/// override them per deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Store a full snapshot at every Nth checkpoint to bound
    /// reconstruction cost (anchor strategy)
    pub anchor_interval: usize,

    /// Compress payloads larger than this many bytes
    pub compression_threshold: usize,

    /// Edits between automatic checkpoints
    pub auto_checkpoint_interval: u32,

    /// Global storage budget across all sessions, in post-compression bytes
    pub storage_budget_bytes: u64,

    /// Sessions untouched for this many days are removed by the expiry sweep
    pub max_session_age_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anchor_interval: 10,
            compression_threshold: 1024,
            auto_checkpoint_interval: 10,
            storage_budget_bytes: 500 * 1024 * 1024, // 500MB
            max_session_age_days: 30,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the anchor interval
    pub fn with_anchor_interval(mut self, interval: usize) -> Self {
        self.anchor_interval = interval.max(1);
        self
    }

    /// Set the compression threshold in bytes
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Set the number of edits between automatic checkpoints
    pub fn with_auto_checkpoint_interval(mut self, interval: u32) -> Self {
        self.auto_checkpoint_interval = interval.max(1);
        self
    }

    /// Set the global storage budget in bytes
    pub fn with_storage_budget(mut self, bytes: u64) -> Self {
        self.storage_budget_bytes = bytes;
        self
    }

    /// Set the session expiry age in days
    pub fn with_max_session_age_days(mut self, days: i64) -> Self {
        self.max_session_age_days = days;
        self
    }
}
