//! Centralized configuration for the message transport
//!
//! Plain structs with sensible defaults; no ambient global state. A
//! `SenderConfig` is handed to the `MessageSender` at construction time.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Sender Configuration
// ----------------------------------------------------------------------------

/// Configuration for the send protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Maximum full retry-loop iterations before a send gives up with a hard
    /// error (device-conflict resolution bound)
    pub retry_count: u32,
    /// Maximum serialized envelope size in bytes; 0 disables the check
    pub max_envelope_size: usize,
    /// Concurrency budget for multi-recipient fan-out
    pub fanout_concurrency: usize,
    /// Socket timeout applied by the transport channels
    pub channel_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retry_count: 4,
            max_envelope_size: 256 * 1024,
            fanout_concurrency: 10,
            channel_timeout: Duration::from_secs(30),
        }
    }
}

impl SenderConfig {
    /// Config without an envelope size limit
    pub fn unlimited_envelope_size() -> Self {
        Self {
            max_envelope_size: 0,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Attachment Configuration
// ----------------------------------------------------------------------------

/// Configuration for the attachment pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Maximum plaintext size accepted for upload, in bytes
    pub max_upload_size: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024,
        }
    }
}
