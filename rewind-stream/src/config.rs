//! Recorder configuration.

use rewind_core::{Privacy, PrivacyLevel};
use serde::{Deserialize, Serialize};

/// Recorder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Intake endpoint handed to the transport
    pub endpoint: String,
    /// Privacy applied where the markup says nothing
    pub default_privacy_level: PrivacyLevel,
    /// Maximum wall-clock span of one segment in milliseconds
    pub segment_duration_limit_ms: u64,
    /// Compressed size above which a segment is rotated
    pub segment_bytes_limit: usize,
    /// Pointer samples coalesced into one record
    pub pointer_move_batch_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9090/api/v2/replay".to_string(),
            default_privacy_level: PrivacyLevel::Allow,
            segment_duration_limit_ms: 30_000,
            segment_bytes_limit: 60_000,
            pointer_move_batch_size: 32,
        }
    }
}

impl RecorderConfig {
    pub fn default_privacy(&self) -> Privacy {
        Privacy::new(self.default_privacy_level)
    }
}
