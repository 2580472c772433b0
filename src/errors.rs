//! Error types for the cachet message transport
//!
//! This module contains all error types used throughout the transport: the
//! envelope codec, the cipher-session boundary, the network channels, the
//! attachment pipeline, and the send protocol, plus the `CachetError` type
//! that unifies them all.
//!
//! Propagation policy: cryptographic/session errors are translated at the
//! session boundary into typed outcomes rather than raw errors crossing into
//! the send protocol. Retry loops match on variants explicitly; errors are
//! never used as ambient control flow.

use crate::types::{Aci, DeviceId, ProtocolAddress, ServiceAddress};

// ----------------------------------------------------------------------------
// Envelope Codec Errors
// ----------------------------------------------------------------------------

/// Errors produced by the envelope codec. The three variants are distinct
/// error classes with distinct upstream UX:
/// - `InvalidWireFormat` — structural parse failure, fatal, message dropped.
/// - `UnsupportedProtocolVersion` — message too new, dropped, may prompt an
///   "update the app" notice.
/// - `InvalidMessageStructure` — well-formed wire data missing a semantically
///   required field; logged and dropped, sender not notified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Unsupported protocol version: required {required}, supported {supported}")]
    UnsupportedProtocolVersion { required: u32, supported: u32 },

    #[error("Invalid message structure: {0}")]
    InvalidMessageStructure(String),
}

impl ContentError {
    /// Create a structural parse failure
    pub fn invalid_wire<T: Into<String>>(message: T) -> Self {
        ContentError::InvalidWireFormat(message.into())
    }

    /// Create a semantic validation failure
    pub fn invalid_structure<T: Into<String>>(message: T) -> Self {
        ContentError::InvalidMessageStructure(message.into())
    }
}

// ----------------------------------------------------------------------------
// Device Conflict Payloads
// ----------------------------------------------------------------------------

/// Server report that the targeted device set disagrees with the account's
/// actual device set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MismatchedDevices {
    /// Devices we targeted that no longer exist
    pub extra_devices: Vec<DeviceId>,
    /// Devices the account has that we did not target
    pub missing_devices: Vec<DeviceId>,
}

/// Server report that sessions for some devices have rotated under us
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaleDevices {
    /// Devices whose sessions must be re-established
    pub stale_devices: Vec<DeviceId>,
}

/// Challenge token attached to a proof-required rejection; resolved
/// out-of-band (e.g. CAPTCHA) by the caller, after which retry is
/// caller-driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequired {
    pub token: String,
    pub options: Vec<String>,
}

// ----------------------------------------------------------------------------
// Channel Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by a network channel. `Unavailable` is the distinguished
/// signal that triggers fallback from the persistent channel to the
/// synchronous one; the device-conflict variants drive the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel unavailable")]
    Unavailable,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authorization failed")]
    Unauthorized,

    #[error("Recipient is not registered")]
    Unregistered,

    #[error("Server rejected the send")]
    ServerRejected,

    #[error("Proof of humanity required")]
    ProofRequired(ProofRequired),

    #[error("Mismatched devices: {0:?}")]
    MismatchedDevices(MismatchedDevices),

    #[error("Stale devices: {0:?}")]
    StaleDevices(StaleDevices),

    #[error("Group send reported mismatched devices for {} members", .0.len())]
    GroupMismatchedDevices(Vec<(Aci, MismatchedDevices)>),

    #[error("Group send reported stale devices for {} members", .0.len())]
    GroupStaleDevices(Vec<(Aci, StaleDevices)>),
}

// ----------------------------------------------------------------------------
// Cryptographic Capability Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by the external cryptographic capability. Translated at
/// the cipher-session boundary before they reach the send protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Untrusted identity for {address}")]
    UntrustedIdentity {
        address: ProtocolAddress,
        identity_key: Vec<u8>,
    },

    #[error("No session for {0}")]
    NoSession(ProtocolAddress),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Cipher operation failed: {0}")]
    OperationFailed(String),
}

// ----------------------------------------------------------------------------
// Attachment Errors
// ----------------------------------------------------------------------------

/// Errors from the attachment pipeline. A digest mismatch is a fatal
/// integrity error; no plaintext bytes are ever produced for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Ciphertext digest does not match the pointer")]
    IntegrityFailure,

    #[error("Attachment decryption failed")]
    DecryptionFailed,

    #[error("Attachment encryption failed")]
    EncryptionFailed,

    #[error("Attachment too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Attachment transfer failed: {0}")]
    Transfer(String),
}

// ----------------------------------------------------------------------------
// Send Protocol Errors
// ----------------------------------------------------------------------------

/// Hard failures of a send attempt. Per-recipient soft failures are carried
/// in `SendMessageResult` instead; these variants either abort the batch or
/// are converted into results by the fan-out layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Send cancelled")]
    Cancelled,

    #[error("Content too large: {size} bytes (max {max})")]
    ContentTooLarge { size: usize, max: usize },

    #[error("Untrusted identity for {address}")]
    UntrustedIdentity {
        address: ServiceAddress,
        identity_key: Vec<u8>,
    },

    #[error("Recipient {0} is not registered")]
    Unregistered(ServiceAddress),

    #[error("Proof of humanity required")]
    ProofRequired(ProofRequired),

    #[error("Server rejected the send")]
    ServerRejected,

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Failed to resolve device conflicts after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Cipher failure: {0}")]
    Protocol(String),

    #[error("Authorization failed")]
    Unauthorized,
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Crate-level error union
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CachetError {
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CachetError>;
