//! Session and cipher seams
//!
//! The transport does not implement the ratchet itself; it drives an
//! implementation of [`ProtocolCrypto`] and keeps device-level session state
//! through [`SessionStore`]. Both traits are object-safe so callers can plug
//! in a hardware-backed or in-memory implementation.

use hashbrown::HashSet;

use crate::errors::CryptoError;
use crate::types::{DeviceId, DistributionId, ProtocolAddress};

// ----------------------------------------------------------------------------
// Pre-Key Bundles
// ----------------------------------------------------------------------------

/// Key material for bootstrapping a session with one device. The key blobs
/// are opaque to the transport; only the cipher interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub device_id: DeviceId,
    pub registration_id: u32,
    pub pre_key: Option<Vec<u8>>,
    pub signed_pre_key: Vec<u8>,
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Ciphertext
// ----------------------------------------------------------------------------

/// Kind of an encrypted message, as tagged on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiphertextType {
    /// Message inside an established session
    Whisper,
    /// First message of a session, carrying the pre-key handshake
    PreKey,
    /// Sealed-sender wrapped message
    SealedSender,
}

impl CiphertextType {
    pub const fn wire_type(self) -> u32 {
        match self {
            CiphertextType::Whisper => 1,
            CiphertextType::PreKey => 3,
            CiphertextType::SealedSender => 6,
        }
    }
}

/// One encrypted message addressed to one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextMessage {
    pub message_type: CiphertextType,
    pub body: Vec<u8>,
    /// Registration id of the destination device, echoed to the server so it
    /// can reject sends to re-registered devices
    pub destination_registration_id: u32,
}

// ----------------------------------------------------------------------------
// Cipher Seam
// ----------------------------------------------------------------------------

/// The ratchet implementation the transport drives. Implementations must be
/// safe to call from multiple sends at once.
pub trait ProtocolCrypto: Send + Sync {
    /// Encrypt a serialized content frame for one device. When `sealed` is
    /// true the output is wrapped for anonymous delivery using the sender
    /// certificate supplied alongside.
    fn encrypt(
        &self,
        destination: &ProtocolAddress,
        sender_certificate: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, CryptoError>;

    /// Establish a session from a fetched pre-key bundle. Fails with
    /// [`CryptoError::UntrustedIdentity`] when the bundle's identity key
    /// conflicts with a previously seen one.
    fn process_pre_key_bundle(
        &self,
        destination: &ProtocolAddress,
        bundle: PreKeyBundle,
    ) -> Result<(), CryptoError>;

    /// Create a serialized sender key distribution for a group session
    fn create_distribution(&self, distribution_id: DistributionId)
        -> Result<Vec<u8>, CryptoError>;

    /// Install a received sender key distribution
    fn process_distribution(
        &self,
        sender: &ProtocolAddress,
        distribution: &[u8],
    ) -> Result<(), CryptoError>;

    /// Encrypt one content frame for a whole group session, sealed for
    /// anonymous delivery to every destination at once.
    fn encrypt_for_group(
        &self,
        distribution_id: DistributionId,
        destinations: &[ProtocolAddress],
        sender_certificate: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

// ----------------------------------------------------------------------------
// Session Store Seam
// ----------------------------------------------------------------------------

/// Durable per-device session state, plus the bookkeeping for which devices
/// already hold each sender key.
pub trait SessionStore: Send + Sync {
    /// Whether an active session exists for this device
    fn contains_session(&self, address: &ProtocolAddress) -> bool;

    /// Archive the active session so the next send performs a fresh
    /// handshake. A no-op when no session exists.
    fn archive_session(&self, address: &ProtocolAddress);

    /// Device ids beyond the primary that have sessions under this account
    /// identifier
    fn sub_device_sessions(&self, name: &str) -> Vec<DeviceId>;

    /// Devices that already hold the sender key for this group session
    fn sender_key_shared_with(&self, distribution_id: DistributionId) -> HashSet<ProtocolAddress>;

    /// Record that these devices now hold the sender key
    fn mark_sender_key_shared_with(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    );

    /// Forget sender key possession for these devices across all group
    /// sessions. Called whenever a session is archived, since a fresh
    /// session invalidates the assumption that the device kept its keys.
    fn clear_sender_key_shared_with(&self, addresses: &[ProtocolAddress]);

    /// Whether the local account has linked devices, which forces sync
    /// transcripts after sends
    fn is_multi_device(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
