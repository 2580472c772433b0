//! Individual send pipeline tests
//!
//! Exercises the retry loop against scripted server behavior: device-set
//! conflicts, stale sessions, anonymous-delivery fallback, identity
//! failures during fan-out, sync transcripts and cancellation.

mod common;

use cachet::{
    Aci, CancellationSignal, ChannelError, DataMessage, DeviceId, MismatchedDevices, SendError,
    SendMessageResponse, SendStatus, ServiceAddress, StaleDevices, Timestamp,
};
use common::{access, harness};

fn message(millis: u64) -> DataMessage {
    DataMessage {
        body: Some("hello".into()),
        timestamp: Timestamp::from_millis(millis),
        ..Default::default()
    }
}

fn new_recipient() -> ServiceAddress {
    ServiceAddress::from_aci(Aci::generate())
}

// ----------------------------------------------------------------------------
// Device Conflict Resolution
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_mismatched_devices_archives_extra_and_fetches_missing() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::new(1)));
    h.store.add_session(recipient.protocol_address(DeviceId::new(2)));

    h.channel.script(Err(ChannelError::MismatchedDevices(MismatchedDevices {
        extra_devices: vec![DeviceId::new(2)],
        missing_devices: vec![DeviceId::new(3)],
    })));

    let result = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();

    assert!(result.is_success());
    match &result.status {
        SendStatus::Success { devices, .. } => {
            assert_eq!(devices, &vec![DeviceId::new(1), DeviceId::new(3)]);
        }
        other => panic!("unexpected status: {other:?}"),
    }

    let sends = h.channel.sent_to(&recipient);
    assert_eq!(sends.len(), 2);
    let first_devices: Vec<DeviceId> = sends[0]
        .list
        .messages
        .iter()
        .map(|m| m.destination_device_id)
        .collect();
    assert_eq!(first_devices, vec![DeviceId::new(1), DeviceId::new(2)]);

    assert!(h
        .store
        .archived()
        .contains(&recipient.protocol_address(DeviceId::new(2))));
    assert!(h
        .directory
        .calls()
        .contains(&(recipient.identifier(), Some(DeviceId::new(3)))));
}

#[tokio::test]
async fn test_stale_devices_rebuild_sessions_before_retry() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    h.channel.script(Err(ChannelError::StaleDevices(StaleDevices {
        stale_devices: vec![DeviceId::PRIMARY],
    })));

    let result = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(h.channel.sent_to(&recipient).len(), 2);
    assert!(h
        .store
        .archived()
        .contains(&recipient.protocol_address(DeviceId::PRIMARY)));
    // Retry established a fresh session through the directory.
    assert!(h
        .store
        .has_session(&recipient.protocol_address(DeviceId::PRIMARY)));
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    for _ in 0..4 {
        h.channel.script(Err(ChannelError::MismatchedDevices(
            MismatchedDevices::default(),
        )));
    }

    let error = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SendError::RetriesExhausted { attempts: 4 }));
    assert_eq!(h.channel.sent_to(&recipient).len(), 4);
}

// ----------------------------------------------------------------------------
// Anonymous Delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unauthorized_anonymous_send_falls_back_to_authenticated() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    h.channel.script(Err(ChannelError::Unauthorized));

    let credentials = access(1);
    let result = h
        .sender
        .send_data_message(
            &recipient,
            Some(&credentials),
            message(1000),
            &CancellationSignal::new(),
        )
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(!result.was_unidentified());

    let sends = h.channel.sent_to(&recipient);
    assert_eq!(sends.len(), 2);
    assert!(sends[0].unidentified);
    assert!(!sends[1].unidentified);
}

#[tokio::test]
async fn test_unauthorized_authenticated_send_is_fatal() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    h.channel.script(Err(ChannelError::Unauthorized));

    let error = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SendError::Unauthorized));
    assert_eq!(h.channel.sent_to(&recipient).len(), 1);
}

// ----------------------------------------------------------------------------
// Fan-Out
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_identity_failure_affects_only_that_recipient() {
    let h = harness();
    let good = new_recipient();
    let bad = new_recipient();
    h.crypto.mark_untrusted(&bad.identifier());

    let results = h
        .sender
        .send_data_message_to_many(
            &[good.clone(), bad.clone()],
            &[None, None],
            message(1000),
            false,
            &CancellationSignal::new(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    match &results[1].status {
        SendStatus::IdentityFailure { identity_key } => assert_eq!(identity_key, &vec![9; 32]),
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(h.channel.sent_to(&bad).is_empty());
}

#[tokio::test]
async fn test_unregistered_recipient_becomes_result_not_error() {
    let h = harness();
    let gone = new_recipient();
    let alive = new_recipient();
    h.directory.set_unregistered(&gone);

    let results = h
        .sender
        .send_data_message_to_many(
            &[gone.clone(), alive],
            &[None, None],
            message(1000),
            false,
            &CancellationSignal::new(),
        )
        .await
        .unwrap();

    assert!(results[0].is_unregistered());
    assert!(results[1].is_success());
}

#[tokio::test]
async fn test_empty_fan_out_is_a_no_op() {
    let h = harness();

    let results = h
        .sender
        .send_data_message_to_many(&[], &[], message(1000), false, &CancellationSignal::new())
        .await
        .unwrap();

    assert!(results.is_empty());
    assert!(h.channel.sent().is_empty());
}

// ----------------------------------------------------------------------------
// Sync Transcripts
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_multi_device_send_emits_sent_transcript() {
    let h = harness();
    h.store.set_multi_device(true);
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    let result = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();

    assert!(result.is_success());
    let sends = h.channel.sent();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0].list.destination, recipient.identifier());
    assert_eq!(sends[1].list.destination, h.local.identifier());
}

#[tokio::test]
async fn test_transcript_failure_does_not_fail_the_send() {
    let h = harness();
    h.store.set_multi_device(true);
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    h.channel.script(Ok(SendMessageResponse { needs_sync: true }));
    h.channel.script(Err(ChannelError::Network("socket closed".into())));

    let result = h
        .sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();

    assert!(result.is_success());
}

#[tokio::test]
async fn test_single_device_account_skips_transcript() {
    let h = harness();
    let recipient = new_recipient();
    h.store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    h.sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();

    assert_eq!(h.channel.sent().len(), 1);
}

// ----------------------------------------------------------------------------
// Guards
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_cancellation_short_circuits() {
    let h = harness();
    let recipient = new_recipient();
    let cancellation = CancellationSignal::new();
    cancellation.cancel();

    let error = h
        .sender
        .send_data_message(&recipient, None, message(1000), &cancellation)
        .await
        .unwrap_err();

    assert!(matches!(error, SendError::Cancelled));
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_oversized_content_rejected_before_encryption() {
    let h = harness();
    let recipient = new_recipient();

    let huge = DataMessage {
        body: Some("x".repeat(300 * 1024)),
        timestamp: Timestamp::from_millis(1000),
        ..Default::default()
    };

    let error = h
        .sender
        .send_data_message(&recipient, None, huge, &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SendError::ContentTooLarge { .. }));
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_security_hook_fires_on_fresh_sessions_only() {
    let h = harness();
    let recipient = new_recipient();

    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = events.clone();
    let sender = h.sender.clone().with_security_event_hook(std::sync::Arc::new(
        move |address: &ServiceAddress| {
            recorder.lock().unwrap().push(address.clone());
        },
    ));

    // First send bootstraps the session and fires the hook once.
    sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap();
    assert_eq!(*events.lock().unwrap(), vec![recipient.clone()]);

    // Second send reuses the session; no further events.
    sender
        .send_data_message(&recipient, None, message(2000), &CancellationSignal::new())
        .await
        .unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_rejection_aborts_the_whole_fan_out() {
    let h = harness();
    let recipients = vec![new_recipient(), new_recipient()];
    let accesses = vec![None, None];

    h.channel.script(Ok(SendMessageResponse { needs_sync: false }));
    h.channel.script(Err(ChannelError::ServerRejected));

    let error = h
        .sender
        .send_data_message_to_many(
            &recipients,
            &accesses,
            message(1000),
            false,
            &CancellationSignal::new(),
        )
        .await
        .unwrap_err();

    // A spam rejection is not a per-recipient condition; the batch fails.
    assert!(matches!(error, SendError::ServerRejected));
}

use cachet::ProtocolCrypto;

// Cancels the signal while encrypting, simulating a caller backing out
// between the loop check and the network submission.
struct CancellingCrypto {
    inner: std::sync::Arc<common::MockCrypto>,
    signal: CancellationSignal,
}

impl ProtocolCrypto for CancellingCrypto {
    fn encrypt(
        &self,
        destination: &cachet::ProtocolAddress,
        sender_certificate: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<cachet::CiphertextMessage, cachet::CryptoError> {
        self.signal.cancel();
        self.inner.encrypt(destination, sender_certificate, plaintext)
    }

    fn process_pre_key_bundle(
        &self,
        destination: &cachet::ProtocolAddress,
        bundle: cachet::PreKeyBundle,
    ) -> Result<(), cachet::CryptoError> {
        self.inner.process_pre_key_bundle(destination, bundle)
    }

    fn create_distribution(
        &self,
        distribution_id: cachet::DistributionId,
    ) -> Result<Vec<u8>, cachet::CryptoError> {
        self.inner.create_distribution(distribution_id)
    }

    fn process_distribution(
        &self,
        sender: &cachet::ProtocolAddress,
        distribution: &[u8],
    ) -> Result<(), cachet::CryptoError> {
        self.inner.process_distribution(sender, distribution)
    }

    fn encrypt_for_group(
        &self,
        distribution_id: cachet::DistributionId,
        destinations: &[cachet::ProtocolAddress],
        sender_certificate: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, cachet::CryptoError> {
        self.inner
            .encrypt_for_group(distribution_id, destinations, sender_certificate, plaintext)
    }
}

#[tokio::test]
async fn test_cancellation_during_encryption_stops_before_submission() {
    use std::sync::Arc;

    let local = ServiceAddress::from_aci(Aci::generate());
    let store = Arc::new(common::MemorySessionStore::new());
    let directory = Arc::new(common::MockDirectory::new());
    let channel = Arc::new(common::MockChannel::new());
    let cancellation = CancellationSignal::new();
    let crypto = Arc::new(CancellingCrypto {
        inner: Arc::new(common::MockCrypto::new(store.clone())),
        signal: cancellation.clone(),
    });

    let recipient = new_recipient();
    store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    let sender = cachet::MessageSender::new(
        local,
        DeviceId::PRIMARY,
        crypto,
        store,
        directory,
        cachet::PreferredChannel::new(channel.clone()),
        cachet::SenderConfig::default(),
    );

    let error = sender
        .send_data_message(&recipient, None, message(1000), &cancellation)
        .await
        .unwrap_err();

    // The ciphertext was built but must never reach the wire.
    assert!(matches!(error, SendError::Cancelled));
    assert!(channel.sent().is_empty());
}

// Never completes; stands in for a wedged socket.
struct StuckChannel;

#[async_trait::async_trait]
impl cachet::MessagingChannel for StuckChannel {
    async fn send_messages(
        &self,
        _list: cachet::OutgoingMessageList,
        _access: Option<&cachet::UnidentifiedAccess>,
    ) -> Result<SendMessageResponse, ChannelError> {
        futures::future::pending().await
    }

    async fn send_group_message(
        &self,
        _ciphertext: &[u8],
        _access_key: &[u8; cachet::ACCESS_KEY_SIZE],
        _timestamp: Timestamp,
        _online: bool,
        _urgent: bool,
    ) -> Result<cachet::GroupSendResponse, ChannelError> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_channel_times_out() {
    use std::sync::Arc;

    let local = ServiceAddress::from_aci(Aci::generate());
    let store = Arc::new(common::MemorySessionStore::new());
    let crypto = Arc::new(common::MockCrypto::new(store.clone()));
    let directory = Arc::new(common::MockDirectory::new());

    let recipient = new_recipient();
    store.add_session(recipient.protocol_address(DeviceId::PRIMARY));

    let sender = cachet::MessageSender::new(
        local,
        DeviceId::PRIMARY,
        crypto,
        store,
        directory,
        cachet::PreferredChannel::new(Arc::new(StuckChannel)),
        cachet::SenderConfig {
            channel_timeout: core::time::Duration::from_millis(50),
            ..Default::default()
        },
    );

    let error = sender
        .send_data_message(&recipient, None, message(1000), &CancellationSignal::new())
        .await
        .unwrap_err();

    assert!(matches!(error, SendError::Network(_)));
}
