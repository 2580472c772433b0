//! Send orchestration
//!
//! [`MessageSender`] drives the full outgoing pipeline: building the
//! per-device ciphertexts, submitting them, resolving the device-set
//! conflicts the server reports, falling back from anonymous to
//! authenticated delivery, fanning out to many recipients, and the
//! server-side fan-out path that encrypts once per group under a shared
//! sender key.
//!
//! Failures that affect a single recipient become [`SendMessageResult`]
//! entries; only batch-level conditions (cancellation, server rejection)
//! surface as errors.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::attachments::{self, AttachmentGateway, AttachmentUpload};
use crate::config::{AttachmentConfig, SenderConfig};
use crate::content::{
    AttachmentPointer, CallMessage, Content, ContentBody, DataMessage, ReceiptMessage,
    SentTranscript, SyncMessage, TranscriptDeliveryStatus, TypingMessage,
};
use crate::errors::{
    AttachmentError, ChannelError, CryptoError, MismatchedDevices, SendError, StaleDevices,
};
use crate::outcome::{SendMessageResult, SendStatus};
use crate::session::{ProtocolCrypto, SessionStore};
use crate::transport::{DirectoryService, OutgoingMessage, OutgoingMessageList, PreferredChannel};
use crate::types::{
    combined_access_key, Aci, CancellationSignal, DeviceId, DistributionId, ProtocolAddress,
    ServiceAddress, Timestamp, UnidentifiedAccess,
};

// ----------------------------------------------------------------------------
// Message Sender
// ----------------------------------------------------------------------------

/// Invoked whenever a fresh session is established with a recipient, so the
/// application can surface a security-relevant change.
pub type SecurityEventHook = Arc<dyn Fn(&ServiceAddress) + Send + Sync>;

/// The outgoing half of the transport. Cheap to clone; all state lives
/// behind the injected seams.
#[derive(Clone)]
pub struct MessageSender {
    local_address: ServiceAddress,
    local_device_id: DeviceId,
    crypto: Arc<dyn ProtocolCrypto>,
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn DirectoryService>,
    channel: PreferredChannel,
    config: SenderConfig,
    attachment_config: AttachmentConfig,
    security_hook: Option<SecurityEventHook>,
}

impl MessageSender {
    pub fn new(
        local_address: ServiceAddress,
        local_device_id: DeviceId,
        crypto: Arc<dyn ProtocolCrypto>,
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn DirectoryService>,
        channel: PreferredChannel,
        config: SenderConfig,
    ) -> Self {
        Self {
            local_address,
            local_device_id,
            crypto,
            store,
            directory,
            channel,
            config,
            attachment_config: AttachmentConfig::default(),
            security_hook: None,
        }
    }

    pub fn with_attachment_config(mut self, config: AttachmentConfig) -> Self {
        self.attachment_config = config;
        self
    }

    /// Register a callback fired whenever a fresh session is established
    pub fn with_security_event_hook(mut self, hook: SecurityEventHook) -> Self {
        self.security_hook = Some(hook);
        self
    }

    // ------------------------------------------------------------------------
    // Single-Recipient Sends
    // ------------------------------------------------------------------------

    /// Send a data message to one recipient, following up with a sync
    /// transcript to the account's other devices when required. Transcript
    /// delivery failure never fails the send itself.
    pub async fn send_data_message(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        message: DataMessage,
        cancellation: &CancellationSignal,
    ) -> Result<SendMessageResult, SendError> {
        let timestamp = message.timestamp;
        let content = ContentBody::Data(message.clone()).encode(None);
        self.check_size(&content)?;

        let result = self
            .try_send(recipient, access, &content, timestamp, false, true, cancellation)
            .await?;

        if result_needs_sync(&result) {
            let transcript = self.sent_transcript(
                Some(recipient.clone()),
                timestamp,
                Some(message),
                std::slice::from_ref(&result),
                false,
            );
            self.send_sync_transcript(transcript, cancellation).await;
        }
        Ok(result)
    }

    /// Deliver a receipt. Receipts are not urgent and never synced.
    pub async fn send_receipt(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        receipt: ReceiptMessage,
        cancellation: &CancellationSignal,
    ) -> Result<SendMessageResult, SendError> {
        let content = ContentBody::Receipt(receipt).encode(None);
        self.try_send(
            recipient,
            access,
            &content,
            Timestamp::now(),
            false,
            false,
            cancellation,
        )
        .await
    }

    /// Deliver a typing indicator. Sent online-only so it is dropped rather
    /// than queued for offline recipients, and delivery failures are not
    /// reported beyond a log line.
    pub async fn send_typing(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        typing: TypingMessage,
        cancellation: &CancellationSignal,
    ) -> Result<(), SendError> {
        let timestamp = typing.timestamp;
        let content = ContentBody::Typing(typing).encode(None);
        match self
            .try_send(recipient, access, &content, timestamp, true, false, cancellation)
            .await
        {
            Ok(_) => Ok(()),
            Err(SendError::Cancelled) => Err(SendError::Cancelled),
            Err(error) => {
                debug!(recipient = %recipient, %error, "typing indicator not delivered");
                Ok(())
            }
        }
    }

    /// Deliver a typing indicator to several recipients at once
    pub async fn send_typing_to_many(
        &self,
        recipients: &[ServiceAddress],
        accesses: &[Option<UnidentifiedAccess>],
        typing: TypingMessage,
        cancellation: &CancellationSignal,
    ) -> Result<(), SendError> {
        let timestamp = typing.timestamp;
        let content = ContentBody::Typing(typing).encode(None);
        self.fan_out(recipients, accesses, &content, timestamp, true, false, cancellation)
            .await
            .map(|_| ())
    }

    /// Deliver a call signaling frame. Urgent, never synced.
    pub async fn send_call_message(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        call: CallMessage,
        cancellation: &CancellationSignal,
    ) -> Result<SendMessageResult, SendError> {
        let content = ContentBody::Call(call).encode(None);
        self.try_send(
            recipient,
            access,
            &content,
            Timestamp::now(),
            false,
            true,
            cancellation,
        )
        .await
    }

    /// Deliver a sync message to the local account's other devices
    pub async fn send_sync_message(
        &self,
        sync: SyncMessage,
        cancellation: &CancellationSignal,
    ) -> Result<SendMessageResult, SendError> {
        let content = ContentBody::Sync(sync).encode(None);
        self.check_size(&content)?;
        self.try_send(
            &self.local_address,
            None,
            &content,
            Timestamp::now(),
            false,
            true,
            cancellation,
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Multi-Recipient Sends
    // ------------------------------------------------------------------------

    /// Fan a data message out to many recipients with one encryption per
    /// destination device. Every recipient gets a result; the whole batch
    /// fails only on cancellation or server rejection.
    pub async fn send_data_message_to_many(
        &self,
        recipients: &[ServiceAddress],
        accesses: &[Option<UnidentifiedAccess>],
        message: DataMessage,
        is_recipient_update: bool,
        cancellation: &CancellationSignal,
    ) -> Result<Vec<SendMessageResult>, SendError> {
        if recipients.is_empty() {
            warn!("data message fan-out with no recipients");
            return Ok(Vec::new());
        }

        let timestamp = message.timestamp;
        let content = ContentBody::Data(message.clone()).encode(None);
        self.check_size(&content)?;

        let results = self
            .fan_out(recipients, accesses, &content, timestamp, false, true, cancellation)
            .await?;

        if results.iter().any(result_needs_sync) || self.store.is_multi_device() {
            let transcript =
                self.sent_transcript(None, timestamp, Some(message), &results, is_recipient_update);
            self.send_sync_transcript(transcript, cancellation).await;
        }
        Ok(results)
    }

    /// Send a data message to a group with one encryption for all
    /// recipients, distributing the sender key first to any member device
    /// that lacks it. Requires anonymous delivery credentials for every
    /// member.
    pub async fn send_group_data_message(
        &self,
        distribution_id: DistributionId,
        recipients: &[ServiceAddress],
        accesses: &[UnidentifiedAccess],
        message: DataMessage,
        is_recipient_update: bool,
        urgent: bool,
        cancellation: &CancellationSignal,
    ) -> Result<Vec<SendMessageResult>, SendError> {
        if recipients.is_empty() {
            warn!("group send with no recipients");
            return Ok(Vec::new());
        }
        debug_assert_eq!(recipients.len(), accesses.len());

        let timestamp = message.timestamp;
        let plaintext = ContentBody::Data(message.clone()).encode(None);
        self.check_size(&plaintext)?;

        let results = self
            .send_group_common(
                distribution_id,
                recipients,
                accesses,
                &plaintext,
                timestamp,
                false,
                urgent,
                cancellation,
            )
            .await?;

        if results.iter().any(result_needs_sync) || self.store.is_multi_device() {
            let transcript =
                self.sent_transcript(None, timestamp, Some(message), &results, is_recipient_update);
            self.send_sync_transcript(transcript, cancellation).await;
        }
        Ok(results)
    }

    /// Distribute the sender key for a group session to these recipients via
    /// individual sends, recording which devices now hold it.
    pub async fn send_sender_key_distribution(
        &self,
        distribution_id: DistributionId,
        recipients: &[ServiceAddress],
        accesses: &[Option<UnidentifiedAccess>],
        cancellation: &CancellationSignal,
    ) -> Result<Vec<SendMessageResult>, SendError> {
        let distribution = self
            .crypto
            .create_distribution(distribution_id)
            .map_err(map_group_crypto_error)?;
        let content = ContentBody::SenderKeyDistribution(distribution).encode(None);

        let results = self
            .fan_out(
                recipients,
                accesses,
                &content,
                Timestamp::now(),
                false,
                true,
                cancellation,
            )
            .await?;

        for result in &results {
            if let SendStatus::Success { devices, .. } = &result.status {
                let addresses: Vec<ProtocolAddress> = devices
                    .iter()
                    .map(|d| result.address.protocol_address(*d))
                    .collect();
                self.store
                    .mark_sender_key_shared_with(distribution_id, &addresses);
            }
        }
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Incoming Helpers
    // ------------------------------------------------------------------------

    /// Install a sender key distribution carried by a received frame, either
    /// as the body or piggybacked onto another message. A malformed
    /// distribution is logged and ignored so it cannot suppress the primary
    /// message.
    pub fn process_incoming_distribution(&self, content: &Content) {
        let distribution = match (&content.body, &content.sender_key_distribution) {
            (ContentBody::SenderKeyDistribution(bytes), _) => bytes,
            (_, Some(bytes)) => bytes,
            _ => return,
        };
        let sender = content
            .metadata
            .sender
            .protocol_address(content.metadata.sender_device);
        if let Err(error) = self.crypto.process_distribution(&sender, distribution) {
            warn!(%sender, %error, "ignoring malformed sender key distribution");
        }
    }

    /// Archive every session with this account and forget any sender key
    /// possession its devices were credited with.
    pub fn archive_sessions(&self, recipient: &ServiceAddress) {
        let identifier = recipient.identifier();
        let mut addresses = vec![recipient.protocol_address(DeviceId::PRIMARY)];
        for device in self.store.sub_device_sessions(&identifier) {
            if device != DeviceId::PRIMARY {
                addresses.push(recipient.protocol_address(device));
            }
        }
        for address in &addresses {
            self.store.archive_session(address);
        }
        self.store.clear_sender_key_shared_with(&addresses);
        info!(recipient = %recipient, sessions = addresses.len(), "archived sessions");
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    /// Encrypt and upload a blob, returning the pointer to embed in a
    /// message.
    pub async fn upload_attachment(
        &self,
        gateway: &dyn AttachmentGateway,
        upload: AttachmentUpload,
    ) -> Result<AttachmentPointer, AttachmentError> {
        attachments::upload_attachment(gateway, upload, &self.attachment_config).await
    }

    // ------------------------------------------------------------------------
    // Send Core
    // ------------------------------------------------------------------------

    /// Encrypt for every destination device and submit, resolving device-set
    /// conflicts under a bounded retry budget and falling back from
    /// anonymous to authenticated delivery on rejection.
    async fn try_send(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        content: &[u8],
        timestamp: Timestamp,
        online: bool,
        urgent: bool,
        cancellation: &CancellationSignal,
    ) -> Result<SendMessageResult, SendError> {
        let mut access = access;
        let started = Timestamp::now();

        for attempt in 0..self.config.retry_count {
            if cancellation.is_cancelled() {
                return Err(SendError::Cancelled);
            }

            let messages = self.encrypt_for_devices(recipient, access, content).await?;
            let devices: Vec<DeviceId> =
                messages.iter().map(|m| m.destination_device_id).collect();
            let list = OutgoingMessageList {
                destination: recipient.identifier(),
                timestamp,
                messages,
                online,
                urgent,
            };

            if cancellation.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            let response = tokio::time::timeout(
                self.config.channel_timeout,
                self.channel.send_messages(list, access),
            )
            .await
            .unwrap_or_else(|_| Err(ChannelError::Network("request timed out".into())));
            match response {
                Ok(response) => {
                    let needs_sync = response.needs_sync || self.store.is_multi_device();
                    return Ok(SendMessageResult::success(
                        recipient.clone(),
                        devices,
                        access.is_some(),
                        needs_sync,
                        Timestamp::now().since(started),
                    ));
                }
                Err(ChannelError::Unauthorized) if access.is_some() => {
                    warn!(
                        recipient = %recipient,
                        "anonymous delivery rejected, retrying authenticated"
                    );
                    access = None;
                }
                Err(ChannelError::MismatchedDevices(mismatch)) => {
                    debug!(recipient = %recipient, attempt, "mismatched devices");
                    self.handle_mismatched_devices(recipient, access, &mismatch)
                        .await?;
                }
                Err(ChannelError::StaleDevices(stale)) => {
                    debug!(recipient = %recipient, attempt, "stale devices");
                    self.handle_stale_devices(recipient, &stale);
                }
                Err(other) => return Err(map_channel_error(other, recipient)),
            }
        }

        Err(SendError::RetriesExhausted {
            attempts: self.config.retry_count,
        })
    }

    /// One encrypted message per destination device, establishing sessions
    /// from pre-key bundles where none exist.
    async fn encrypt_for_devices(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        plaintext: &[u8],
    ) -> Result<Vec<OutgoingMessage>, SendError> {
        let mut devices = self.target_devices(recipient, access.is_some());

        if devices
            .iter()
            .any(|d| !self.store.contains_session(&recipient.protocol_address(*d)))
        {
            self.bootstrap_sessions(recipient, access).await?;
            // The directory may have revealed devices we did not know about.
            devices = self.target_devices(recipient, access.is_some());
        }

        let mut messages = Vec::with_capacity(devices.len());
        for device_id in devices {
            let address = recipient.protocol_address(device_id);
            if !self.store.contains_session(&address) {
                let bundle = self
                    .directory
                    .get_pre_key(recipient, device_id, access)
                    .await
                    .map_err(|e| map_channel_error(e, recipient))?;
                self.crypto
                    .process_pre_key_bundle(&address, bundle)
                    .map_err(|e| map_crypto_error(e, recipient))?;
                self.notify_session_established(recipient);
            }

            let certificate = access.map(|a| a.sender_certificate());
            let ciphertext = self
                .crypto
                .encrypt(&address, certificate, plaintext)
                .map_err(|e| map_crypto_error(e, recipient))?;
            messages.push(OutgoingMessage {
                destination_device_id: device_id,
                destination_registration_id: ciphertext.destination_registration_id,
                message_type: ciphertext.message_type.wire_type(),
                content: ciphertext.body,
            });
        }
        Ok(messages)
    }

    /// Device ids a send to this recipient targets. Self-sends skip the
    /// device doing the sending, and skip the primary entirely unless the
    /// send is anonymous.
    fn target_devices(&self, recipient: &ServiceAddress, sealed: bool) -> SmallVec<[DeviceId; 4]> {
        let is_self = recipient.matches(&self.local_address);
        let mut devices = SmallVec::new();
        if !is_self || sealed {
            devices.push(DeviceId::PRIMARY);
        }
        for device in self.store.sub_device_sessions(&recipient.identifier()) {
            if device == DeviceId::PRIMARY {
                continue;
            }
            if is_self && device == self.local_device_id {
                continue;
            }
            devices.push(device);
        }
        devices
    }

    /// Fetch pre-key bundles for every device of an account and establish
    /// the missing sessions.
    async fn bootstrap_sessions(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<(), SendError> {
        let bundles = self
            .directory
            .get_pre_keys(recipient, access)
            .await
            .map_err(|e| map_channel_error(e, recipient))?;
        let is_self = recipient.matches(&self.local_address);

        for bundle in bundles {
            if is_self && bundle.device_id == self.local_device_id {
                continue;
            }
            let address = recipient.protocol_address(bundle.device_id);
            if self.store.contains_session(&address) {
                continue;
            }
            self.crypto
                .process_pre_key_bundle(&address, bundle)
                .map_err(|e| map_crypto_error(e, recipient))?;
            self.notify_session_established(recipient);
        }
        Ok(())
    }

    fn notify_session_established(&self, recipient: &ServiceAddress) {
        if let Some(hook) = &self.security_hook {
            hook(recipient);
        }
    }

    async fn handle_mismatched_devices(
        &self,
        recipient: &ServiceAddress,
        access: Option<&UnidentifiedAccess>,
        mismatch: &MismatchedDevices,
    ) -> Result<(), SendError> {
        warn!(
            recipient = %recipient,
            extra = ?mismatch.extra_devices,
            missing = ?mismatch.missing_devices,
            "reconciling device set"
        );

        let extra: Vec<ProtocolAddress> = mismatch
            .extra_devices
            .iter()
            .map(|d| recipient.protocol_address(*d))
            .collect();
        for address in &extra {
            self.store.archive_session(address);
        }
        self.store.clear_sender_key_shared_with(&extra);

        for device in &mismatch.missing_devices {
            let bundle = self
                .directory
                .get_pre_key(recipient, *device, access)
                .await
                .map_err(|e| map_channel_error(e, recipient))?;
            self.crypto
                .process_pre_key_bundle(&recipient.protocol_address(*device), bundle)
                .map_err(|e| map_crypto_error(e, recipient))?;
            self.notify_session_established(recipient);
        }
        Ok(())
    }

    fn handle_stale_devices(&self, recipient: &ServiceAddress, stale: &StaleDevices) {
        warn!(recipient = %recipient, devices = ?stale.stale_devices, "refreshing stale sessions");
        let addresses: Vec<ProtocolAddress> = stale
            .stale_devices
            .iter()
            .map(|d| recipient.protocol_address(*d))
            .collect();
        for address in &addresses {
            self.store.archive_session(address);
        }
        self.store.clear_sender_key_shared_with(&addresses);
    }

    // ------------------------------------------------------------------------
    // Fan-Out
    // ------------------------------------------------------------------------

    /// Run bounded-concurrency individual sends and convert per-recipient
    /// errors into results. Results come back in recipient order.
    async fn fan_out(
        &self,
        recipients: &[ServiceAddress],
        accesses: &[Option<UnidentifiedAccess>],
        content: &[u8],
        timestamp: Timestamp,
        online: bool,
        urgent: bool,
        cancellation: &CancellationSignal,
    ) -> Result<Vec<SendMessageResult>, SendError> {
        debug_assert_eq!(recipients.len(), accesses.len());

        let sends = recipients.iter().zip(accesses.iter()).map(|(recipient, access)| {
            async move {
                let outcome = self
                    .try_send(
                        recipient,
                        access.as_ref(),
                        content,
                        timestamp,
                        online,
                        urgent,
                        cancellation,
                    )
                    .await;
                (recipient, outcome)
            }
        });
        let outcomes: Vec<_> = stream::iter(sends)
            .buffered(self.config.fanout_concurrency.max(1))
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(SendError::Unregistered(address)) => {
                    results.push(SendMessageResult::unregistered(address));
                }
                Err(SendError::UntrustedIdentity { identity_key, .. }) => {
                    results.push(SendMessageResult::identity_failure(
                        recipient.clone(),
                        identity_key,
                    ));
                }
                Err(SendError::ProofRequired(proof)) => {
                    results.push(SendMessageResult::proof_required(recipient.clone(), proof));
                }
                Err(SendError::Cancelled) => return Err(SendError::Cancelled),
                Err(SendError::ServerRejected) => return Err(SendError::ServerRejected),
                Err(error) => {
                    warn!(recipient = %recipient, %error, "send failed");
                    results.push(SendMessageResult::network_failure(recipient.clone()));
                }
            }
        }
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Sender-Key Group Send
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn send_group_common(
        &self,
        distribution_id: DistributionId,
        recipients: &[ServiceAddress],
        accesses: &[UnidentifiedAccess],
        plaintext: &[u8],
        timestamp: Timestamp,
        online: bool,
        urgent: bool,
        cancellation: &CancellationSignal,
    ) -> Result<Vec<SendMessageResult>, SendError> {
        let started = Timestamp::now();
        // Members dropped from the group ciphertext, keyed by recipient
        // index, each with the failure its distribution send produced.
        let mut dropped: HashMap<usize, SendMessageResult> = HashMap::new();

        for attempt in 0..self.config.retry_count {
            if cancellation.is_cancelled() {
                return Err(SendError::Cancelled);
            }

            // Recomputed every iteration: device-set recovery on a previous
            // attempt may have surfaced devices that still lack the key.
            let shared = self.store.sender_key_shared_with(distribution_id);
            let needy: Vec<usize> = self
                .group_targets(recipients)
                .iter()
                .enumerate()
                .filter(|(index, target)| {
                    !dropped.contains_key(index)
                        && target
                            .protocol_addresses()
                            .any(|address| !shared.contains(&address))
                })
                .map(|(index, _)| index)
                .collect();

            if !needy.is_empty() {
                info!(
                    attempt,
                    members = needy.len(),
                    %distribution_id,
                    "distributing sender key before group send"
                );
                let needy_recipients: Vec<ServiceAddress> =
                    needy.iter().map(|&i| recipients[i].clone()).collect();
                let needy_accesses: Vec<Option<UnidentifiedAccess>> =
                    needy.iter().map(|&i| Some(accesses[i].clone())).collect();

                let distribution_results = self
                    .send_sender_key_distribution(
                        distribution_id,
                        &needy_recipients,
                        &needy_accesses,
                        cancellation,
                    )
                    .await?;

                for (&index, result) in needy.iter().zip(distribution_results) {
                    if !result.is_success() {
                        warn!(
                            recipient = %result.address,
                            "sender key distribution failed, excluding member from group send"
                        );
                        dropped.insert(index, result);
                    }
                }
            }

            // Rebuilt after distribution: establishing sessions for the
            // distribution sends can reveal new devices.
            let targets = self.group_targets(recipients);
            let included: Vec<usize> = (0..recipients.len())
                .filter(|index| !dropped.contains_key(index))
                .collect();
            if included.is_empty() {
                warn!("no members left after sender key distribution, group send abandoned");
                return Ok(merge_group_results(recipients, &mut dropped, |_, r| {
                    SendMessageResult::network_failure(r.clone())
                }));
            }

            let access_key = combined_access_key(included.iter().map(|&i| &accesses[i]));
            let certificate = included
                .first()
                .map(|&i| accesses[i].sender_certificate().to_vec())
                .unwrap_or_default();
            let destinations: Vec<ProtocolAddress> = included
                .iter()
                .flat_map(|&i| targets[i].protocol_addresses())
                .collect();
            let ciphertext = self
                .crypto
                .encrypt_for_group(distribution_id, &destinations, &certificate, plaintext)
                .map_err(map_group_crypto_error)?;

            if cancellation.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            let response = tokio::time::timeout(
                self.config.channel_timeout,
                self.channel
                    .send_group_message(&ciphertext, &access_key, timestamp, online, urgent),
            )
            .await
            .unwrap_or_else(|_| Err(ChannelError::Network("request timed out".into())));
            match response {
                Ok(response) => {
                    let needs_sync = self.store.is_multi_device();
                    let duration = Timestamp::now().since(started);
                    let unregistered: HashSet<Aci> =
                        response.unregistered.into_iter().collect();
                    return Ok(merge_group_results(
                        recipients,
                        &mut dropped,
                        |index, recipient| {
                            let gone = recipient
                                .aci()
                                .map_or(false, |aci| unregistered.contains(&aci));
                            if gone {
                                SendMessageResult::unregistered(recipient.clone())
                            } else {
                                SendMessageResult::success(
                                    recipient.clone(),
                                    targets[index].devices.to_vec(),
                                    true,
                                    needs_sync,
                                    duration,
                                )
                            }
                        },
                    ));
                }
                Err(ChannelError::GroupMismatchedDevices(conflicts)) => {
                    debug!(attempt, members = conflicts.len(), "group mismatched devices");
                    for (aci, mismatch) in &conflicts {
                        let member = ServiceAddress::from_aci(*aci);
                        let access = member_access(recipients, accesses, *aci);
                        self.handle_mismatched_devices(&member, access, mismatch)
                            .await?;
                    }
                }
                Err(ChannelError::GroupStaleDevices(conflicts)) => {
                    debug!(attempt, members = conflicts.len(), "group stale devices");
                    for (aci, stale) in &conflicts {
                        self.handle_stale_devices(&ServiceAddress::from_aci(*aci), stale);
                    }
                }
                Err(other) => {
                    return Err(map_channel_error(
                        other,
                        recipients.first().unwrap_or(&self.local_address),
                    ))
                }
            }
        }

        Err(SendError::RetriesExhausted {
            attempts: self.config.retry_count,
        })
    }

    /// Current device targets per group member, recomputed after any
    /// session change so a retry never reuses a stale view.
    fn group_targets(&self, recipients: &[ServiceAddress]) -> Vec<GroupTarget> {
        recipients
            .iter()
            .map(|recipient| {
                let is_self = recipient.matches(&self.local_address);
                let mut devices: SmallVec<[DeviceId; 4]> = SmallVec::new();
                if !(is_self && self.local_device_id == DeviceId::PRIMARY) {
                    devices.push(DeviceId::PRIMARY);
                }
                for device in self.store.sub_device_sessions(&recipient.identifier()) {
                    if device == DeviceId::PRIMARY {
                        continue;
                    }
                    if is_self && device == self.local_device_id {
                        continue;
                    }
                    devices.push(device);
                }
                GroupTarget {
                    address: recipient.clone(),
                    devices,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Sync Transcripts
    // ------------------------------------------------------------------------

    fn sent_transcript(
        &self,
        destination: Option<ServiceAddress>,
        timestamp: Timestamp,
        message: Option<DataMessage>,
        results: &[SendMessageResult],
        is_recipient_update: bool,
    ) -> SyncMessage {
        let expiration_start_timestamp = message
            .as_ref()
            .filter(|m| m.expires_in_seconds > 0)
            .map(|_| timestamp);
        let delivery_status = results
            .iter()
            .filter_map(|result| match &result.status {
                SendStatus::Success { unidentified, .. } => Some(TranscriptDeliveryStatus {
                    destination: result.address.clone(),
                    unidentified: *unidentified,
                }),
                _ => None,
            })
            .collect();

        SyncMessage::Sent(SentTranscript {
            destination,
            timestamp,
            message,
            expiration_start_timestamp,
            delivery_status,
            is_recipient_update,
        })
    }

    /// Transcript delivery is best-effort; a failure is logged, never
    /// propagated.
    async fn send_sync_transcript(&self, transcript: SyncMessage, cancellation: &CancellationSignal) {
        let content = ContentBody::Sync(transcript).encode(None);
        if let Err(error) = self
            .try_send(
                &self.local_address,
                None,
                &content,
                Timestamp::now(),
                false,
                false,
                cancellation,
            )
            .await
        {
            warn!(%error, "sync transcript not delivered");
        }
    }

    fn check_size(&self, content: &[u8]) -> Result<(), SendError> {
        if self.config.max_envelope_size > 0 && content.len() > self.config.max_envelope_size {
            return Err(SendError::ContentTooLarge {
                size: content.len(),
                max: self.config.max_envelope_size,
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

struct GroupTarget {
    address: ServiceAddress,
    devices: SmallVec<[DeviceId; 4]>,
}

impl GroupTarget {
    fn protocol_addresses(&self) -> impl Iterator<Item = ProtocolAddress> + '_ {
        self.devices
            .iter()
            .map(move |device| self.address.protocol_address(*device))
    }
}

/// One result per recipient in input order: the recorded failure for members
/// dropped during distribution, the delivered outcome for everyone else.
fn merge_group_results(
    recipients: &[ServiceAddress],
    dropped: &mut HashMap<usize, SendMessageResult>,
    mut delivered: impl FnMut(usize, &ServiceAddress) -> SendMessageResult,
) -> Vec<SendMessageResult> {
    recipients
        .iter()
        .enumerate()
        .map(|(index, recipient)| {
            dropped
                .remove(&index)
                .unwrap_or_else(|| delivered(index, recipient))
        })
        .collect()
}

fn member_access<'a>(
    recipients: &[ServiceAddress],
    accesses: &'a [UnidentifiedAccess],
    aci: Aci,
) -> Option<&'a UnidentifiedAccess> {
    recipients
        .iter()
        .position(|r| r.aci() == Some(aci))
        .and_then(|index| accesses.get(index))
}

fn result_needs_sync(result: &SendMessageResult) -> bool {
    matches!(
        result.status,
        SendStatus::Success {
            needs_sync: true,
            ..
        }
    )
}

fn map_channel_error(error: ChannelError, recipient: &ServiceAddress) -> SendError {
    match error {
        ChannelError::Unregistered => SendError::Unregistered(recipient.clone()),
        ChannelError::ProofRequired(proof) => SendError::ProofRequired(proof),
        ChannelError::ServerRejected => SendError::ServerRejected,
        ChannelError::Unauthorized => SendError::Unauthorized,
        ChannelError::Unavailable => SendError::Network("no delivery channel available".into()),
        ChannelError::Network(message) => SendError::Network(message),
        ChannelError::MismatchedDevices(_)
        | ChannelError::StaleDevices(_)
        | ChannelError::GroupMismatchedDevices(_)
        | ChannelError::GroupStaleDevices(_) => {
            SendError::Network("device conflict outside retry loop".into())
        }
    }
}

fn map_crypto_error(error: CryptoError, recipient: &ServiceAddress) -> SendError {
    match error {
        CryptoError::UntrustedIdentity { identity_key, .. } => SendError::UntrustedIdentity {
            address: recipient.clone(),
            identity_key,
        },
        other => SendError::Protocol(other.to_string()),
    }
}

fn map_group_crypto_error(error: CryptoError) -> SendError {
    SendError::Protocol(error.to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
