//! Engine tuning knobs.

use serde::{Deserialize, Serialize};

/// Settings shared by the change engine and the index synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Documents per bulk request during a full mirror rebuild.
  pub resync_batch_size:    usize,
  /// Buffered history rows that trigger an early flush during bulk import.
  pub bulk_flush_threshold: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      resync_batch_size:    1_000,
      bulk_flush_threshold: 10_000,
    }
  }
}
