//! Delivery channels
//!
//! Seams for the two ways ciphertext reaches the server (a persistent
//! socket and a stateless fallback) and for the directory that hands out
//! pre-key bundles. [`PreferredChannel`] implements the
//! persistent-first-with-fallback policy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ChannelError;
use crate::session::PreKeyBundle;
use crate::types::{
    Aci, DeviceId, ServiceAddress, Timestamp, UnidentifiedAccess, ACCESS_KEY_SIZE,
};

// ----------------------------------------------------------------------------
// Outgoing Payloads
// ----------------------------------------------------------------------------

/// One encrypted message addressed to a single device of the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub destination_device_id: DeviceId,
    pub destination_registration_id: u32,
    /// Wire tag of the ciphertext kind
    pub message_type: u32,
    pub content: Vec<u8>,
}

/// The full per-recipient submission: one entry per destination device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessageList {
    /// Canonical identifier of the destination account
    pub destination: String,
    pub timestamp: Timestamp,
    pub messages: Vec<OutgoingMessage>,
    /// Online messages are dropped instead of queued when the destination
    /// has no active connection
    pub online: bool,
    pub urgent: bool,
}

/// Server acknowledgement of an individual send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendMessageResponse {
    /// Server-side indication that the account has linked devices and a
    /// sync transcript should follow
    pub needs_sync: bool,
}

/// Server acknowledgement of a group send
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupSendResponse {
    /// Members the server no longer knows; mapped to unregistered results
    pub unregistered: Vec<Aci>,
}

// ----------------------------------------------------------------------------
// Channel Seams
// ----------------------------------------------------------------------------

/// A way to deliver ciphertext to the server. Implementations signal
/// [`ChannelError::Unavailable`] when they cannot currently be used at all,
/// which lets [`PreferredChannel`] fall through without consuming a retry.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Submit the per-device messages for one recipient. `access` selects
    /// the anonymous delivery mode; `None` authenticates as the sender.
    async fn send_messages(
        &self,
        list: OutgoingMessageList,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<SendMessageResponse, ChannelError>;

    /// Submit one sealed group ciphertext for fan-out by the server
    async fn send_group_message(
        &self,
        ciphertext: &[u8],
        access_key: &[u8; ACCESS_KEY_SIZE],
        timestamp: Timestamp,
        online: bool,
        urgent: bool,
    ) -> Result<GroupSendResponse, ChannelError>;
}

/// Pre-key directory lookups
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Fetch bundles for every device of an account
    async fn get_pre_keys(
        &self,
        destination: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<Vec<PreKeyBundle>, ChannelError>;

    /// Fetch the bundle for one specific device
    async fn get_pre_key(
        &self,
        destination: &ServiceAddress,
        device_id: DeviceId,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<PreKeyBundle, ChannelError>;
}

// ----------------------------------------------------------------------------
// Channel Selection
// ----------------------------------------------------------------------------

/// Routes each call to the preferred (persistent) channel and falls back to
/// the secondary when the preferred one reports itself unavailable. Any
/// other error is returned as-is; only unavailability falls through.
#[derive(Clone)]
pub struct PreferredChannel {
    preferred: Arc<dyn MessagingChannel>,
    fallback: Option<Arc<dyn MessagingChannel>>,
}

impl PreferredChannel {
    pub fn new(preferred: Arc<dyn MessagingChannel>) -> Self {
        Self {
            preferred,
            fallback: None,
        }
    }

    pub fn with_fallback(
        preferred: Arc<dyn MessagingChannel>,
        fallback: Arc<dyn MessagingChannel>,
    ) -> Self {
        Self {
            preferred,
            fallback: Some(fallback),
        }
    }

    pub async fn send_messages(
        &self,
        list: OutgoingMessageList,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<SendMessageResponse, ChannelError> {
        match self.preferred.send_messages(list.clone(), access).await {
            Err(ChannelError::Unavailable) => {
                let Some(fallback) = &self.fallback else {
                    return Err(ChannelError::Unavailable);
                };
                debug!(destination = %list.destination, "preferred channel unavailable, using fallback");
                fallback.send_messages(list, access).await
            }
            other => other,
        }
    }

    pub async fn send_group_message(
        &self,
        ciphertext: &[u8],
        access_key: &[u8; ACCESS_KEY_SIZE],
        timestamp: Timestamp,
        online: bool,
        urgent: bool,
    ) -> Result<GroupSendResponse, ChannelError> {
        match self
            .preferred
            .send_group_message(ciphertext, access_key, timestamp, online, urgent)
            .await
        {
            Err(ChannelError::Unavailable) => {
                let Some(fallback) = &self.fallback else {
                    return Err(ChannelError::Unavailable);
                };
                debug!("preferred channel unavailable for group send, using fallback");
                fallback
                    .send_group_message(ciphertext, access_key, timestamp, online, urgent)
                    .await
            }
            other => other,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
