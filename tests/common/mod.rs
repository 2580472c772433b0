//! Shared test doubles for the send pipeline
//!
//! In-memory implementations of the cipher, session store, directory and
//! channel seams, with scripted responses and call recording so tests can
//! assert on the exact sequence of server interactions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};

use cachet::{
    Aci, ChannelError, CiphertextMessage, CiphertextType, CryptoError, DeviceId, DirectoryService,
    DistributionId, GroupSendResponse, MessagingChannel, OutgoingMessageList, PreKeyBundle,
    PreferredChannel, ProtocolAddress, ProtocolCrypto, SendMessageResponse, SenderConfig,
    ServiceAddress, SessionStore, Timestamp, UnidentifiedAccess, ACCESS_KEY_SIZE,
};

// ----------------------------------------------------------------------------
// Session Store
// ----------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    sessions: HashSet<ProtocolAddress>,
    archived: Vec<ProtocolAddress>,
    shared: HashMap<DistributionId, HashSet<ProtocolAddress>>,
    multi_device: bool,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<StoreInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_multi_device(&self, multi_device: bool) {
        self.inner.lock().unwrap().multi_device = multi_device;
    }

    pub fn add_session(&self, address: ProtocolAddress) {
        self.inner.lock().unwrap().sessions.insert(address);
    }

    pub fn has_session(&self, address: &ProtocolAddress) -> bool {
        self.inner.lock().unwrap().sessions.contains(address)
    }

    pub fn archived(&self) -> Vec<ProtocolAddress> {
        self.inner.lock().unwrap().archived.clone()
    }

    pub fn shared_with(&self, distribution_id: DistributionId) -> HashSet<ProtocolAddress> {
        self.inner
            .lock()
            .unwrap()
            .shared
            .get(&distribution_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl SessionStore for MemorySessionStore {
    fn contains_session(&self, address: &ProtocolAddress) -> bool {
        self.inner.lock().unwrap().sessions.contains(address)
    }

    fn archive_session(&self, address: &ProtocolAddress) {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.remove(address) {
            inner.archived.push(address.clone());
        }
    }

    fn sub_device_sessions(&self, name: &str) -> Vec<DeviceId> {
        let inner = self.inner.lock().unwrap();
        let mut devices: Vec<DeviceId> = inner
            .sessions
            .iter()
            .filter(|a| a.name() == name && a.device_id() != DeviceId::PRIMARY)
            .map(|a| a.device_id())
            .collect();
        devices.sort();
        devices
    }

    fn sender_key_shared_with(&self, distribution_id: DistributionId) -> HashSet<ProtocolAddress> {
        self.shared_with(distribution_id)
    }

    fn mark_sender_key_shared_with(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.shared.entry(distribution_id).or_default();
        for address in addresses {
            entry.insert(address.clone());
        }
    }

    fn clear_sender_key_shared_with(&self, addresses: &[ProtocolAddress]) {
        let mut inner = self.inner.lock().unwrap();
        for set in inner.shared.values_mut() {
            for address in addresses {
                set.remove(address);
            }
        }
    }

    fn is_multi_device(&self) -> bool {
        self.inner.lock().unwrap().multi_device
    }
}

// ----------------------------------------------------------------------------
// Cipher
// ----------------------------------------------------------------------------

/// Cipher double: "encryption" passes the plaintext through and session
/// establishment just records the session in the shared store. Identifiers
/// listed as untrusted fail bundle processing the way a real ratchet does
/// on an identity key change.
pub struct MockCrypto {
    store: Arc<MemorySessionStore>,
    untrusted: Mutex<HashSet<String>>,
    distributions_processed: Mutex<Vec<ProtocolAddress>>,
    group_destinations: Mutex<Vec<Vec<ProtocolAddress>>>,
}

impl MockCrypto {
    pub fn new(store: Arc<MemorySessionStore>) -> Self {
        Self {
            store,
            untrusted: Mutex::new(HashSet::new()),
            distributions_processed: Mutex::new(Vec::new()),
            group_destinations: Mutex::new(Vec::new()),
        }
    }

    pub fn mark_untrusted(&self, identifier: &str) {
        self.untrusted.lock().unwrap().insert(identifier.to_string());
    }

    pub fn group_destinations(&self) -> Vec<Vec<ProtocolAddress>> {
        self.group_destinations.lock().unwrap().clone()
    }

    pub fn distributions_processed(&self) -> Vec<ProtocolAddress> {
        self.distributions_processed.lock().unwrap().clone()
    }
}

impl ProtocolCrypto for MockCrypto {
    fn encrypt(
        &self,
        destination: &ProtocolAddress,
        sender_certificate: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<CiphertextMessage, CryptoError> {
        if !self.store.has_session(destination) {
            return Err(CryptoError::NoSession(destination.clone()));
        }
        Ok(CiphertextMessage {
            message_type: if sender_certificate.is_some() {
                CiphertextType::SealedSender
            } else {
                CiphertextType::Whisper
            },
            body: plaintext.to_vec(),
            destination_registration_id: 7,
        })
    }

    fn process_pre_key_bundle(
        &self,
        destination: &ProtocolAddress,
        _bundle: PreKeyBundle,
    ) -> Result<(), CryptoError> {
        if self.untrusted.lock().unwrap().contains(destination.name()) {
            return Err(CryptoError::UntrustedIdentity {
                address: destination.clone(),
                identity_key: vec![9; 32],
            });
        }
        self.store.add_session(destination.clone());
        Ok(())
    }

    fn create_distribution(
        &self,
        _distribution_id: DistributionId,
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(b"distribution".to_vec())
    }

    fn process_distribution(
        &self,
        sender: &ProtocolAddress,
        distribution: &[u8],
    ) -> Result<(), CryptoError> {
        if distribution == b"malformed" {
            return Err(CryptoError::InvalidKey("garbage distribution".into()));
        }
        self.distributions_processed
            .lock()
            .unwrap()
            .push(sender.clone());
        Ok(())
    }

    fn encrypt_for_group(
        &self,
        _distribution_id: DistributionId,
        destinations: &[ProtocolAddress],
        _sender_certificate: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.group_destinations
            .lock()
            .unwrap()
            .push(destinations.to_vec());
        Ok(plaintext.to_vec())
    }
}

// ----------------------------------------------------------------------------
// Directory
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDirectory {
    devices: Mutex<HashMap<String, Vec<DeviceId>>>,
    unregistered: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Option<DeviceId>)>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account's device set (defaults to the primary only)
    pub fn set_devices(&self, address: &ServiceAddress, devices: &[u32]) {
        self.devices.lock().unwrap().insert(
            address.identifier(),
            devices.iter().map(|d| DeviceId::new(*d)).collect(),
        );
    }

    pub fn set_unregistered(&self, address: &ServiceAddress) {
        self.unregistered
            .lock()
            .unwrap()
            .insert(address.identifier());
    }

    pub fn calls(&self) -> Vec<(String, Option<DeviceId>)> {
        self.calls.lock().unwrap().clone()
    }

    fn bundle(device_id: DeviceId) -> PreKeyBundle {
        PreKeyBundle {
            device_id,
            registration_id: 7,
            pre_key: Some(vec![1; 32]),
            signed_pre_key: vec![2; 32],
            signed_pre_key_signature: vec![3; 64],
            identity_key: vec![4; 33],
        }
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn get_pre_keys(
        &self,
        destination: &ServiceAddress,
        _access: Option<&UnidentifiedAccess>,
    ) -> Result<Vec<PreKeyBundle>, ChannelError> {
        let identifier = destination.identifier();
        self.calls.lock().unwrap().push((identifier.clone(), None));
        if self.unregistered.lock().unwrap().contains(&identifier) {
            return Err(ChannelError::Unregistered);
        }
        let devices = self
            .devices
            .lock()
            .unwrap()
            .get(&identifier)
            .cloned()
            .unwrap_or_else(|| vec![DeviceId::PRIMARY]);
        Ok(devices.into_iter().map(Self::bundle).collect())
    }

    async fn get_pre_key(
        &self,
        destination: &ServiceAddress,
        device_id: DeviceId,
        _access: Option<&UnidentifiedAccess>,
    ) -> Result<PreKeyBundle, ChannelError> {
        let identifier = destination.identifier();
        self.calls
            .lock()
            .unwrap()
            .push((identifier.clone(), Some(device_id)));
        if self.unregistered.lock().unwrap().contains(&identifier) {
            return Err(ChannelError::Unregistered);
        }
        Ok(Self::bundle(device_id))
    }
}

// ----------------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------------

/// A submitted individual send, as the channel saw it
#[derive(Clone)]
pub struct RecordedSend {
    pub list: OutgoingMessageList,
    pub unidentified: bool,
}

/// A submitted group send
#[derive(Clone)]
pub struct RecordedGroupSend {
    pub access_key: [u8; ACCESS_KEY_SIZE],
    pub online: bool,
    pub urgent: bool,
}

/// Channel double with scripted error sequences. When the script queue is
/// empty every call succeeds.
#[derive(Default)]
pub struct MockChannel {
    responses: Mutex<VecDeque<Result<SendMessageResponse, ChannelError>>>,
    group_responses: Mutex<VecDeque<Result<GroupSendResponse, ChannelError>>>,
    sent: Mutex<Vec<RecordedSend>>,
    group_sent: Mutex<Vec<RecordedGroupSend>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, response: Result<SendMessageResponse, ChannelError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn script_group(&self, response: Result<GroupSendResponse, ChannelError>) {
        self.group_responses.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<RecordedSend> {
        self.sent.lock().unwrap().clone()
    }

    pub fn group_sent(&self) -> Vec<RecordedGroupSend> {
        self.group_sent.lock().unwrap().clone()
    }

    /// Individual sends to this destination, in submission order
    pub fn sent_to(&self, destination: &ServiceAddress) -> Vec<RecordedSend> {
        let identifier = destination.identifier();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.list.destination == identifier)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessagingChannel for MockChannel {
    async fn send_messages(
        &self,
        list: OutgoingMessageList,
        access: Option<&UnidentifiedAccess>,
    ) -> Result<SendMessageResponse, ChannelError> {
        self.sent.lock().unwrap().push(RecordedSend {
            list,
            unidentified: access.is_some(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SendMessageResponse { needs_sync: false }))
    }

    async fn send_group_message(
        &self,
        _ciphertext: &[u8],
        access_key: &[u8; ACCESS_KEY_SIZE],
        _timestamp: Timestamp,
        online: bool,
        urgent: bool,
    ) -> Result<GroupSendResponse, ChannelError> {
        self.group_sent.lock().unwrap().push(RecordedGroupSend {
            access_key: *access_key,
            online,
            urgent,
        });
        self.group_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(GroupSendResponse::default()))
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

pub struct Harness {
    pub sender: cachet::MessageSender,
    pub local: ServiceAddress,
    pub store: Arc<MemorySessionStore>,
    pub crypto: Arc<MockCrypto>,
    pub directory: Arc<MockDirectory>,
    pub channel: Arc<MockChannel>,
}

pub fn harness() -> Harness {
    let local = ServiceAddress::from_aci(Aci::generate());
    let store = Arc::new(MemorySessionStore::new());
    let crypto = Arc::new(MockCrypto::new(store.clone()));
    let directory = Arc::new(MockDirectory::new());
    let channel = Arc::new(MockChannel::new());

    let sender = cachet::MessageSender::new(
        local.clone(),
        DeviceId::PRIMARY,
        crypto.clone(),
        store.clone(),
        directory.clone(),
        PreferredChannel::new(channel.clone()),
        SenderConfig::default(),
    );

    Harness {
        sender,
        local,
        store,
        crypto,
        directory,
        channel,
    }
}

pub fn access(byte: u8) -> UnidentifiedAccess {
    UnidentifiedAccess::new([byte; ACCESS_KEY_SIZE], vec![byte; 8])
}
