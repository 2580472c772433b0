//! Core types for the cachet message transport
//!
//! This module defines the fundamental addressing and identifier types used
//! throughout the transport, using newtype patterns for semantic validation
//! and type safety.

use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ContentError;

// ----------------------------------------------------------------------------
// Account Identifier (ACI)
// ----------------------------------------------------------------------------

/// Stable account identifier for a registered account, as opposed to a
/// phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aci(Uuid);

impl Aci {
    /// Create an ACI from a raw UUID
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random ACI (used by tests and provisioning)
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Aci {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ContentError::invalid_structure("Invalid ACI"))
    }
}

// ----------------------------------------------------------------------------
// Service Address
// ----------------------------------------------------------------------------

/// Logical target of a send: an account identified by ACI and/or E164 phone
/// number. At least one of the two must be present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    aci: Option<Aci>,
    e164: Option<String>,
}

impl ServiceAddress {
    /// Create an address from an ACI and an optional phone number
    pub fn new(aci: Aci, e164: Option<String>) -> Self {
        Self {
            aci: Some(aci),
            e164,
        }
    }

    /// Create an address from an ACI alone
    pub fn from_aci(aci: Aci) -> Self {
        Self {
            aci: Some(aci),
            e164: None,
        }
    }

    /// Create an address from optional raw parts, rejecting the empty address
    pub fn from_raw(aci: Option<Aci>, e164: Option<String>) -> Result<Self, ContentError> {
        let e164 = e164.filter(|n| !n.is_empty());
        if aci.is_none() && e164.is_none() {
            return Err(ContentError::invalid_structure(
                "Address must have an ACI or an E164",
            ));
        }
        Ok(Self { aci, e164 })
    }

    /// Whether the raw parts would form a valid address
    pub fn is_valid_raw(aci: Option<&str>, e164: Option<&str>) -> bool {
        aci.map_or(false, |a| Uuid::parse_str(a).is_ok())
            || e164.map_or(false, |n| !n.is_empty())
    }

    /// The account identifier, if known
    pub fn aci(&self) -> Option<Aci> {
        self.aci
    }

    /// The phone number, if known
    pub fn e164(&self) -> Option<&str> {
        self.e164.as_deref()
    }

    /// The canonical identifier string: the ACI when present, otherwise the
    /// phone number. This is the name under which sessions are stored.
    pub fn identifier(&self) -> String {
        match (&self.aci, &self.e164) {
            (Some(aci), _) => aci.to_string(),
            (None, Some(e164)) => e164.clone(),
            (None, None) => unreachable!("address invariant: ACI or E164 present"),
        }
    }

    /// Whether two addresses refer to the same account. Matches on either
    /// field, so a phone-only address matches the same account once it has
    /// been upgraded to carry the ACI.
    pub fn matches(&self, other: &ServiceAddress) -> bool {
        (self.aci.is_some() && self.aci == other.aci)
            || (self.e164.is_some() && self.e164 == other.e164)
    }

    /// High-trust pairing: upgrade a phone-only address to carry the ACI.
    /// Returns true if the address changed.
    pub fn upgrade_with_aci(&mut self, aci: Aci) -> bool {
        if self.aci.is_none() {
            self.aci = Some(aci);
            true
        } else {
            false
        }
    }

    /// The per-device protocol address for this account and device
    pub fn protocol_address(&self, device_id: DeviceId) -> ProtocolAddress {
        ProtocolAddress::new(self.identifier(), device_id)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl From<Aci> for ServiceAddress {
    fn from(aci: Aci) -> Self {
        Self::from_aci(aci)
    }
}

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Identifier of a single device linked to an account (1..N)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    /// The always-present primary device
    pub const PRIMARY: Self = Self(1);

    /// Create a device id from its raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether this is the primary device
    pub const fn is_primary(self) -> bool {
        self.0 == Self::PRIMARY.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Protocol Address
// ----------------------------------------------------------------------------

/// Concrete per-device endpoint: the account identifier string plus a device
/// id. Session state is keyed by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolAddress {
    name: String,
    device_id: DeviceId,
}

impl ProtocolAddress {
    /// Create a protocol address
    pub fn new(name: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    /// The account identifier string
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device id
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

// ----------------------------------------------------------------------------
// Distribution Id
// ----------------------------------------------------------------------------

/// Opaque identifier for a sender-key group session. Relates a set of
/// recipient devices to a shared symmetric sending key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionId(Uuid);

impl DistributionId {
    /// Create from a raw UUID
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh distribution id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DistributionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create from raw milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Raw milliseconds
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since an earlier timestamp
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Unidentified Access
// ----------------------------------------------------------------------------

/// Size of a per-recipient unidentified access key
pub const ACCESS_KEY_SIZE: usize = 16;

/// Credentials for the anonymous delivery mode, in which the server cannot
/// see the sender's identity for a given message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnidentifiedAccess {
    key: [u8; ACCESS_KEY_SIZE],
    sender_certificate: Vec<u8>,
}

impl UnidentifiedAccess {
    /// Create from a per-recipient access key and a sender certificate
    pub fn new(key: [u8; ACCESS_KEY_SIZE], sender_certificate: Vec<u8>) -> Self {
        Self {
            key,
            sender_certificate,
        }
    }

    /// The per-recipient access key
    pub fn key(&self) -> &[u8; ACCESS_KEY_SIZE] {
        &self.key
    }

    /// The serialized sender certificate
    pub fn sender_certificate(&self) -> &[u8] {
        &self.sender_certificate
    }
}

/// Combine per-recipient access keys into the single group-send access key
/// (XOR of all keys, as the group endpoint expects).
pub fn combined_access_key<'a, I>(keys: I) -> [u8; ACCESS_KEY_SIZE]
where
    I: IntoIterator<Item = &'a UnidentifiedAccess>,
{
    let mut combined = [0u8; ACCESS_KEY_SIZE];
    for access in keys {
        for (out, byte) in combined.iter_mut().zip(access.key().iter()) {
            *out ^= byte;
        }
    }
    combined
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Cooperative cancellation signal, checked at coarse-grained points (before
/// each retry loop iteration and before each network call).
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// Create a fresh, un-cancelled signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the in-flight send
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_requires_identifier() {
        assert!(ServiceAddress::from_raw(None, None).is_err());
        assert!(ServiceAddress::from_raw(None, Some(String::new())).is_err());
        assert!(ServiceAddress::from_raw(None, Some("+14155550101".into())).is_ok());
        assert!(ServiceAddress::from_raw(Some(Aci::generate()), None).is_ok());
    }

    #[test]
    fn test_address_matches_on_either_field() {
        let aci = Aci::generate();
        let full = ServiceAddress::new(aci, Some("+14155550101".into()));
        let aci_only = ServiceAddress::from_aci(aci);
        let phone_only = ServiceAddress::from_raw(None, Some("+14155550101".into())).unwrap();

        assert!(full.matches(&aci_only));
        assert!(full.matches(&phone_only));
        assert!(!aci_only.matches(&phone_only));
    }

    #[test]
    fn test_address_upgrade() {
        let mut address = ServiceAddress::from_raw(None, Some("+14155550101".into())).unwrap();
        let aci = Aci::generate();

        assert!(address.upgrade_with_aci(aci));
        assert_eq!(address.aci(), Some(aci));
        assert!(!address.upgrade_with_aci(Aci::generate()));
        assert_eq!(address.aci(), Some(aci));
        assert_eq!(address.identifier(), aci.to_string());
    }

    #[test]
    fn test_combined_access_key_is_xor() {
        let a = UnidentifiedAccess::new([0xF0; 16], vec![]);
        let b = UnidentifiedAccess::new([0x0F; 16], vec![]);
        assert_eq!(combined_access_key([&a, &b]), [0xFF; 16]);
        assert_eq!(combined_access_key([&a, &a]), [0x00; 16]);
    }

    #[test]
    fn test_cancellation_signal() {
        let signal = CancellationSignal::new();
        let clone = signal.clone();

        assert!(!signal.is_cancelled());
        clone.cancel();
        assert!(signal.is_cancelled());
    }
}
