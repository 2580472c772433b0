//! # cachet
//!
//! End-to-end encrypted message transport: the orchestration layer between
//! an application and a ratchet implementation. It turns domain messages
//! into encrypted per-device submissions, resolves the device-set conflicts
//! the server reports, prefers anonymous delivery with authenticated
//! fallback, fans out to groups either per-recipient or with a shared
//! sender key, and decodes incoming envelopes back into validated content.
//!
//! The ratchet itself, the session database and the network are injected
//! through the seams in [`session`] and [`transport`]; this crate contains
//! no I/O of its own.
//!
//! ## Quick example
//!
//! ```ignore
//! use cachet::{CancellationSignal, DataMessage, MessageSender, Timestamp};
//!
//! let sender = MessageSender::new(
//!     local_address,
//!     local_device_id,
//!     crypto,
//!     store,
//!     directory,
//!     channel,
//!     Default::default(),
//! );
//! let message = DataMessage {
//!     body: Some("hello".into()),
//!     timestamp: Timestamp::now(),
//!     ..Default::default()
//! };
//! let result = sender
//!     .send_data_message(&recipient, access.as_ref(), message, &CancellationSignal::new())
//!     .await?;
//! ```

pub mod attachments;
pub mod config;
pub mod content;
pub mod errors;
pub mod outcome;
pub mod proto;
pub mod sender;
pub mod session;
pub mod transport;
pub mod types;

pub use attachments::{
    decrypt_attachment, download_attachment, encrypt_attachment, padded_length, upload_attachment,
    AttachmentGateway, AttachmentUpload, EncryptedAttachment, UploadDestination,
};
pub use config::{AttachmentConfig, SenderConfig};
pub use content::{
    AttachmentPointer, CallFrame, CallMessage, Content, ContentBody, ContentMetadata, DataMessage,
    GroupContext, Mention, Preview, Quote, Reaction, ReceiptMessage, ReceiptTarget, ReceiptType,
    RemoteDelete, RemoteId, SentTranscript, Sticker, SyncMessage, SyncRequestKind,
    TranscriptDeliveryStatus, TypingAction, TypingMessage,
};
pub use errors::{
    AttachmentError, CachetError, ChannelError, ContentError, CryptoError, MismatchedDevices,
    ProofRequired, Result, SendError, StaleDevices,
};
pub use outcome::{resolved_failures, SendMessageResult, SendOutcome, SendStatus};
pub use sender::{MessageSender, SecurityEventHook};
pub use session::{CiphertextMessage, CiphertextType, PreKeyBundle, ProtocolCrypto, SessionStore};
pub use transport::{
    DirectoryService, GroupSendResponse, MessagingChannel, OutgoingMessage, OutgoingMessageList,
    PreferredChannel, SendMessageResponse,
};
pub use types::{
    combined_access_key, Aci, CancellationSignal, DeviceId, DistributionId, ProtocolAddress,
    ServiceAddress, Timestamp, UnidentifiedAccess, ACCESS_KEY_SIZE,
};
