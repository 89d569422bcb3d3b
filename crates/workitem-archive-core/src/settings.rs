//! Tunable load-shedding knobs of the sync engines.

use serde::Deserialize;

use crate::errors::{ArchiveError, Result};

/// Engine heuristics, read from the `[sync]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Export checkpoints the metadata after this many scanned snapshots.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u64,
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
    #[serde(default = "default_restore_interval_secs")]
    pub restore_interval_secs: u64,
    /// Day buckets restored per tick.
    #[serde(default = "default_restore_days_per_tick")]
    pub restore_days_per_tick: u32,
}

fn default_checkpoint_every() -> u64 {
    100
}

fn default_export_interval_secs() -> u64 {
    3600
}

fn default_restore_interval_secs() -> u64 {
    60
}

fn default_restore_days_per_tick() -> u32 {
    1
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            checkpoint_every: default_checkpoint_every(),
            export_interval_secs: default_export_interval_secs(),
            restore_interval_secs: default_restore_interval_secs(),
            restore_days_per_tick: default_restore_days_per_tick(),
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("sync.checkpoint_every", self.checkpoint_every),
            ("sync.export_interval_secs", self.export_interval_secs),
            ("sync.restore_interval_secs", self.restore_interval_secs),
            ("sync.restore_days_per_tick", u64::from(self.restore_days_per_tick)),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ArchiveError::configuration(format!("{} must be >= 1", name)));
            }
        }
        Ok(())
    }
}
