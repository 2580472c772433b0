//! Message content model
//!
//! Domain-level message types and the codec between them and the wire
//! schemas in [`crate::proto`]. Decoding validates structure (required
//! fields, timestamp agreement, protocol-version gating) so the rest of the
//! crate only ever sees well-formed content.

use tracing::warn;

use crate::errors::ContentError;
use crate::proto::messages::{
    self, AddressProto, CallFrameProto, CallMessageProto, ContentProto, DataMessageProto,
    DeleteProto, EnvelopeProto, GroupCallUpdateProto, GroupContextV2Proto, MetadataProto,
    PaymentNotificationProto, PaymentProto, PreviewProto, QuoteProto, ReactionProto,
    ReceiptMessageProto, ReceiptTargetProto, SentTranscriptProto, StickerProto, SyncMessageProto,
    SyncRequestProto, TypingMessageProto, UnidentifiedDeliveryStatusProto,
};
use crate::types::{DeviceId, ServiceAddress, Timestamp};

// ----------------------------------------------------------------------------
// Protocol Versions
// ----------------------------------------------------------------------------

/// Capability ladder for data messages. A message states the minimum version
/// a receiver needs to render it; receivers below that version must surface
/// an upgrade prompt instead of guessing.
pub mod protocol_version {
    pub const INITIAL: u32 = 0;
    pub const MESSAGE_TIMERS: u32 = 1;
    pub const VIEW_ONCE: u32 = 2;
    pub const VIEW_ONCE_VIDEO: u32 = 3;
    pub const REACTIONS: u32 = 4;
    pub const CDN_SELECTOR_ATTACHMENTS: u32 = 5;
    pub const MENTIONS: u32 = 6;
    pub const PAYMENTS: u32 = 7;

    /// Highest version this implementation understands
    pub const CURRENT: u32 = PAYMENTS;
}

/// Maximum accepted size of an embedded group change blob
const MAX_GROUP_CHANGE_BYTES: usize = 2048;

/// Sync messages are padded to frustrate traffic analysis
const SYNC_PADDING_MAX: usize = 512;

// ----------------------------------------------------------------------------
// Attachment Pointer (domain)
// ----------------------------------------------------------------------------

/// Location of an uploaded attachment on a CDN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteId {
    /// Numeric id issued by the V2 upload path
    Numeric(u64),
    /// Opaque string key issued by the V3 upload path
    Key(String),
}

/// Reference to an encrypted blob a recipient can fetch and decrypt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachmentPointer {
    pub cdn_number: u32,
    pub remote_id: Option<RemoteId>,
    pub content_type: Option<String>,
    /// Combined AES key and MAC material for the blob cipher
    pub key: Vec<u8>,
    /// Padded plaintext size
    pub size: Option<u32>,
    /// SHA-256 over the full ciphertext, verified before decryption
    pub digest: Vec<u8>,
    pub file_name: Option<String>,
    pub flags: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub caption: Option<String>,
    pub blur_hash: Option<String>,
    pub upload_timestamp: u64,
    pub preview: Option<Vec<u8>>,
}

impl AttachmentPointer {
    pub fn voice_note(&self) -> bool {
        self.flags & messages::ATTACHMENT_FLAG_VOICE_MESSAGE != 0
    }

    pub fn borderless(&self) -> bool {
        self.flags & messages::ATTACHMENT_FLAG_BORDERLESS != 0
    }

    pub fn gif(&self) -> bool {
        self.flags & messages::ATTACHMENT_FLAG_GIF != 0
    }

    pub(crate) fn to_proto(&self) -> AttachmentPointerProtoOwned {
        let mut proto = AttachmentPointerProtoOwned::default();
        match &self.remote_id {
            Some(RemoteId::Numeric(id)) => proto.cdn_id = Some(*id),
            Some(RemoteId::Key(key)) => proto.cdn_key = Some(key.clone()),
            None => {}
        }
        proto.cdn_number = Some(self.cdn_number);
        proto.content_type = self.content_type.clone();
        proto.key = Some(self.key.clone());
        proto.size = self.size;
        proto.digest = Some(self.digest.clone());
        proto.file_name = self.file_name.clone();
        if self.flags != 0 {
            proto.flags = Some(self.flags);
        }
        proto.width = self.width;
        proto.height = self.height;
        proto.caption = self.caption.clone();
        proto.blur_hash = self.blur_hash.clone();
        proto.upload_timestamp = Some(self.upload_timestamp);
        proto.thumbnail = self.preview.clone();
        proto
    }

    pub(crate) fn from_proto(proto: AttachmentPointerProtoOwned) -> Result<Self, ContentError> {
        let remote_id = match (proto.cdn_id, proto.cdn_key) {
            (_, Some(key)) => Some(RemoteId::Key(key)),
            (Some(id), None) => Some(RemoteId::Numeric(id)),
            (None, None) => None,
        };
        Ok(Self {
            cdn_number: proto.cdn_number.unwrap_or(0),
            remote_id,
            content_type: proto.content_type,
            key: proto.key.unwrap_or_default(),
            size: proto.size,
            digest: proto.digest.unwrap_or_default(),
            file_name: proto.file_name,
            flags: proto.flags.unwrap_or(0),
            width: proto.width,
            height: proto.height,
            caption: proto.caption,
            blur_hash: proto.blur_hash,
            upload_timestamp: proto.upload_timestamp.unwrap_or(0),
            preview: proto.thumbnail,
        })
    }
}

type AttachmentPointerProtoOwned = messages::AttachmentPointerProto;

// ----------------------------------------------------------------------------
// Data Message (domain)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub id: u64,
    pub author: ServiceAddress,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub start: u32,
    pub length: u32,
    pub aci: crate::types::Aci,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sticker {
    pub pack_id: Vec<u8>,
    pub pack_key: Vec<u8>,
    pub sticker_id: u32,
    pub emoji: Option<String>,
    pub attachment: AttachmentPointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<u64>,
    pub image: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub remove: bool,
    pub target_author: ServiceAddress,
    pub target_sent_timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteDelete {
    pub target_sent_timestamp: Timestamp,
}

/// Group context attached to a group data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupContext {
    pub master_key: Vec<u8>,
    pub revision: u32,
    pub signed_group_change: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub receipt: Vec<u8>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCallUpdate {
    pub era_id: Option<String>,
}

/// A user-visible message, or one of the signaling updates (end session,
/// expiration timer, profile key) that travel in the same frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataMessage {
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub timestamp: Timestamp,
    pub expires_in_seconds: u32,
    pub expiration_update: bool,
    pub end_session: bool,
    pub profile_key: Option<Vec<u8>>,
    pub profile_key_update: bool,
    pub quote: Option<Quote>,
    pub mentions: Vec<Mention>,
    pub sticker: Option<Sticker>,
    pub previews: Vec<Preview>,
    pub reaction: Option<Reaction>,
    pub remote_delete: Option<RemoteDelete>,
    pub group_context: Option<GroupContext>,
    pub group_call_update: Option<GroupCallUpdate>,
    pub payment: Option<PaymentNotification>,
    pub view_once: bool,
}

impl DataMessage {
    /// Lowest protocol version a receiver needs to render this message
    pub fn required_protocol_version(&self) -> u32 {
        if self.payment.is_some() {
            protocol_version::PAYMENTS
        } else if !self.mentions.is_empty() {
            protocol_version::MENTIONS
        } else if self.reaction.is_some() {
            protocol_version::REACTIONS
        } else if self.view_once {
            protocol_version::VIEW_ONCE
        } else {
            protocol_version::INITIAL
        }
    }

    pub fn group_id(&self) -> Option<Vec<u8>> {
        // The group identifier is derived from the master key; callers that
        // need the real derived id do so at a higher layer. The raw master
        // key serves as the grouping key inside this crate.
        self.group_context.as_ref().map(|g| g.master_key.clone())
    }

    pub(crate) fn to_proto(&self) -> DataMessageProto {
        let mut proto = DataMessageProto {
            body: self.body.clone(),
            timestamp: Some(self.timestamp.as_millis()),
            required_protocol_version: Some(self.required_protocol_version()),
            ..Default::default()
        };
        for attachment in &self.attachments {
            proto.attachments.push(attachment.to_proto());
        }
        let mut flags = 0u32;
        if self.end_session {
            flags |= messages::FLAG_END_SESSION;
        }
        if self.expiration_update {
            flags |= messages::FLAG_EXPIRATION_TIMER_UPDATE;
        }
        if self.profile_key_update {
            flags |= messages::FLAG_PROFILE_KEY_UPDATE;
        }
        if flags != 0 {
            proto.flags = Some(flags);
        }
        if self.expires_in_seconds != 0 {
            proto.expire_timer = Some(self.expires_in_seconds);
        }
        proto.profile_key = self.profile_key.clone();
        if let Some(quote) = &self.quote {
            proto.quote = Some(QuoteProto {
                id: Some(quote.id),
                author_aci: quote.author.aci().map(|a| a.to_string()),
                text: quote.text.clone(),
            });
        }
        for mention in &self.mentions {
            proto.body_ranges.push(messages::BodyRangeProto {
                start: Some(mention.start),
                length: Some(mention.length),
                mention_aci: Some(mention.aci.to_string()),
            });
        }
        if let Some(sticker) = &self.sticker {
            proto.sticker = Some(StickerProto {
                pack_id: Some(sticker.pack_id.clone()),
                pack_key: Some(sticker.pack_key.clone()),
                sticker_id: Some(sticker.sticker_id),
                data: Some(sticker.attachment.to_proto()),
                emoji: sticker.emoji.clone(),
            });
        }
        for preview in &self.previews {
            proto.previews.push(PreviewProto {
                url: Some(preview.url.clone()),
                title: preview.title.clone(),
                description: preview.description.clone(),
                date: preview.date,
                image: preview.image.as_ref().map(|i| i.to_proto()),
            });
        }
        if let Some(reaction) = &self.reaction {
            proto.reaction = Some(ReactionProto {
                emoji: Some(reaction.emoji.clone()),
                remove: Some(reaction.remove),
                target_author_aci: reaction.target_author.aci().map(|a| a.to_string()),
                target_sent_timestamp: Some(reaction.target_sent_timestamp.as_millis()),
            });
        }
        if let Some(delete) = &self.remote_delete {
            proto.delete = Some(DeleteProto {
                target_sent_timestamp: Some(delete.target_sent_timestamp.as_millis()),
            });
        }
        if let Some(group) = &self.group_context {
            proto.group_v2 = Some(GroupContextV2Proto {
                master_key: Some(group.master_key.clone()),
                revision: Some(group.revision),
                group_change: group.signed_group_change.clone(),
            });
        }
        if let Some(update) = &self.group_call_update {
            proto.group_call_update = Some(GroupCallUpdateProto {
                era_id: update.era_id.clone(),
            });
        }
        if let Some(payment) = &self.payment {
            proto.payment = Some(PaymentProto {
                notification: Some(PaymentNotificationProto {
                    transaction: Some(payment.receipt.clone()),
                    note: payment.note.clone(),
                }),
            });
        }
        if self.view_once {
            proto.is_view_once = Some(true);
        }
        proto
    }

    pub(crate) fn from_proto(proto: DataMessageProto) -> Result<Self, ContentError> {
        let required = proto.required_protocol_version.unwrap_or(0);
        if required > protocol_version::CURRENT {
            return Err(ContentError::UnsupportedProtocolVersion {
                required,
                supported: protocol_version::CURRENT,
            });
        }

        let flags = proto.flags.unwrap_or(0);

        let quote = match proto.quote {
            Some(q) => Some(Quote {
                id: q
                    .id
                    .ok_or_else(|| ContentError::invalid_structure("quote without id"))?,
                author: parse_aci_address(q.author_aci.as_deref(), "quote author")?,
                text: q.text,
            }),
            None => None,
        };

        let mut mentions = Vec::new();
        for range in proto.body_ranges {
            // Ranges that are not mentions are a future concern; skip them.
            let Some(aci) = range.mention_aci.as_deref() else {
                continue;
            };
            mentions.push(Mention {
                start: range.start.unwrap_or(0),
                length: range.length.unwrap_or(0),
                aci: aci
                    .parse()
                    .map_err(|_| ContentError::invalid_structure("mention with invalid aci"))?,
            });
        }

        let sticker = match proto.sticker {
            Some(s) => Some(Sticker {
                pack_id: s
                    .pack_id
                    .ok_or_else(|| ContentError::invalid_structure("sticker without pack id"))?,
                pack_key: s
                    .pack_key
                    .ok_or_else(|| ContentError::invalid_structure("sticker without pack key"))?,
                sticker_id: s
                    .sticker_id
                    .ok_or_else(|| ContentError::invalid_structure("sticker without id"))?,
                emoji: s.emoji,
                attachment: AttachmentPointer::from_proto(s.data.ok_or_else(|| {
                    ContentError::invalid_structure("sticker without attachment")
                })?)?,
            }),
            None => None,
        };

        let mut previews = Vec::new();
        for p in proto.previews {
            previews.push(Preview {
                url: p
                    .url
                    .ok_or_else(|| ContentError::invalid_structure("preview without url"))?,
                title: p.title,
                description: p.description,
                date: p.date,
                image: p.image.map(AttachmentPointer::from_proto).transpose()?,
            });
        }

        let reaction = match proto.reaction {
            Some(r) => Some(Reaction {
                emoji: r
                    .emoji
                    .ok_or_else(|| ContentError::invalid_structure("reaction without emoji"))?,
                remove: r.remove.unwrap_or(false),
                target_author: parse_aci_address(
                    r.target_author_aci.as_deref(),
                    "reaction target author",
                )?,
                target_sent_timestamp: Timestamp::from_millis(r.target_sent_timestamp.ok_or_else(
                    || ContentError::invalid_structure("reaction without target timestamp"),
                )?),
            }),
            None => None,
        };

        let remote_delete = match proto.delete {
            Some(d) => Some(RemoteDelete {
                target_sent_timestamp: Timestamp::from_millis(d.target_sent_timestamp.ok_or_else(
                    || ContentError::invalid_structure("delete without target timestamp"),
                )?),
            }),
            None => None,
        };

        let group_context = match proto.group_v2 {
            Some(g) => {
                if let Some(change) = &g.group_change {
                    if change.len() > MAX_GROUP_CHANGE_BYTES {
                        return Err(ContentError::invalid_structure("oversized group change"));
                    }
                }
                Some(GroupContext {
                    master_key: g
                        .master_key
                        .ok_or_else(|| {
                            ContentError::invalid_structure("group context without master key")
                        })?,
                    revision: g.revision.unwrap_or(0),
                    signed_group_change: g.group_change,
                })
            }
            None => None,
        };

        // Mentions are a group feature; a direct message carrying them is
        // malformed.
        if !mentions.is_empty() && group_context.is_none() {
            return Err(ContentError::invalid_structure(
                "mentions outside a group context",
            ));
        }

        let payment = match proto.payment.and_then(|p| p.notification) {
            Some(n) => Some(PaymentNotification {
                receipt: n.transaction.ok_or_else(|| {
                    ContentError::invalid_structure("payment notification without transaction")
                })?,
                note: n.note,
            }),
            None => None,
        };

        let mut attachments = Vec::new();
        for a in proto.attachments {
            attachments.push(AttachmentPointer::from_proto(a)?);
        }

        Ok(Self {
            body: proto.body,
            attachments,
            timestamp: Timestamp::from_millis(proto.timestamp.unwrap_or(0)),
            expires_in_seconds: proto.expire_timer.unwrap_or(0),
            expiration_update: flags & messages::FLAG_EXPIRATION_TIMER_UPDATE != 0,
            end_session: flags & messages::FLAG_END_SESSION != 0,
            profile_key: proto.profile_key,
            profile_key_update: flags & messages::FLAG_PROFILE_KEY_UPDATE != 0,
            quote,
            mentions,
            sticker,
            previews,
            reaction,
            remote_delete,
            group_context,
            group_call_update: proto
                .group_call_update
                .map(|u| GroupCallUpdate { era_id: u.era_id }),
            payment,
            view_once: proto.is_view_once.unwrap_or(false),
        })
    }
}

fn parse_aci_address(aci: Option<&str>, what: &str) -> Result<ServiceAddress, ContentError> {
    let aci = aci
        .ok_or_else(|| ContentError::invalid_structure(format!("{what} without address")))?
        .parse()
        .map_err(|_| ContentError::invalid_structure(format!("{what} with invalid aci")))?;
    Ok(ServiceAddress::from_aci(aci))
}

fn address_from_proto(proto: &AddressProto, what: &str) -> Result<ServiceAddress, ContentError> {
    let aci = proto
        .aci
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| ContentError::invalid_structure(format!("{what} with invalid aci")))?;
    ServiceAddress::from_raw(aci, proto.e164.clone())
        .map_err(|_| ContentError::invalid_structure(format!("{what} without identifier")))
}

fn address_to_proto(address: &ServiceAddress) -> AddressProto {
    AddressProto {
        aci: address.aci().map(|a| a.to_string()),
        e164: address.e164().map(str::to_string),
    }
}

// ----------------------------------------------------------------------------
// Sync Message (domain)
// ----------------------------------------------------------------------------

/// Delivery status of one recipient inside a sent transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptDeliveryStatus {
    pub destination: ServiceAddress,
    pub unidentified: bool,
}

/// Record of a send, mirrored to the account's other devices
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SentTranscript {
    pub destination: Option<ServiceAddress>,
    pub timestamp: Timestamp,
    pub message: Option<DataMessage>,
    pub expiration_start_timestamp: Option<Timestamp>,
    pub delivery_status: Vec<TranscriptDeliveryStatus>,
    /// True when this transcript only updates recipient state for a send
    /// already mirrored, rather than introducing a new message.
    pub is_recipient_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequestKind {
    Contacts,
    Groups,
    Blocked,
    Configuration,
    Keys,
}

/// Sender address plus the sent timestamp of a referenced message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptTarget {
    pub sender: ServiceAddress,
    pub timestamp: Timestamp,
}

/// Device-to-device state synchronization. Only ever accepted from another
/// device of the local account.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Sent(SentTranscript),
    Request(SyncRequestKind),
    Read(Vec<ReceiptTarget>),
    Viewed(Vec<ReceiptTarget>),
    ViewOnceOpen(ReceiptTarget),
    /// Padding-only or not-yet-understood sync payload
    Empty,
}

impl SyncMessage {
    pub(crate) fn to_proto(&self) -> SyncMessageProto {
        let mut proto = SyncMessageProto::default();
        match self {
            SyncMessage::Sent(sent) => {
                proto.sent = Some(SentTranscriptProto {
                    destination_e164: sent
                        .destination
                        .as_ref()
                        .and_then(|d| d.e164().map(str::to_string)),
                    destination_aci: sent
                        .destination
                        .as_ref()
                        .and_then(|d| d.aci().map(|a| a.to_string())),
                    timestamp: Some(sent.timestamp.as_millis()),
                    message: sent.message.as_ref().map(|m| m.to_proto()),
                    expiration_start_timestamp: sent
                        .expiration_start_timestamp
                        .map(|t| t.as_millis()),
                    unidentified_status: sent
                        .delivery_status
                        .iter()
                        .map(|status| UnidentifiedDeliveryStatusProto {
                            destination_e164: status.destination.e164().map(str::to_string),
                            destination_aci: status.destination.aci().map(|a| a.to_string()),
                            unidentified: Some(status.unidentified),
                        })
                        .collect(),
                    is_recipient_update: Some(sent.is_recipient_update),
                });
            }
            SyncMessage::Request(kind) => {
                proto.request = Some(SyncRequestProto {
                    request_type: Some(match kind {
                        SyncRequestKind::Contacts => messages::SYNC_REQUEST_CONTACTS,
                        SyncRequestKind::Groups => messages::SYNC_REQUEST_GROUPS,
                        SyncRequestKind::Blocked => messages::SYNC_REQUEST_BLOCKED,
                        SyncRequestKind::Configuration => messages::SYNC_REQUEST_CONFIGURATION,
                        SyncRequestKind::Keys => messages::SYNC_REQUEST_KEYS,
                    }),
                });
            }
            SyncMessage::Read(entries) => {
                proto.read = entries.iter().map(receipt_target_to_proto).collect();
            }
            SyncMessage::Viewed(entries) => {
                proto.viewed = entries.iter().map(receipt_target_to_proto).collect();
            }
            SyncMessage::ViewOnceOpen(entry) => {
                proto.view_once_open = Some(receipt_target_to_proto(entry));
            }
            SyncMessage::Empty => {}
        }
        proto.padding = Some(sync_padding());
        proto
    }

    pub(crate) fn from_proto(proto: SyncMessageProto) -> Result<Self, ContentError> {
        if let Some(sent) = proto.sent {
            let destination = match (&sent.destination_aci, &sent.destination_e164) {
                (None, None) => None,
                (aci, e164) => {
                    let aci = aci
                        .as_deref()
                        .map(str::parse)
                        .transpose()
                        .map_err(|_| {
                            ContentError::invalid_structure("sent transcript with invalid aci")
                        })?;
                    Some(ServiceAddress::from_raw(aci, e164.clone()).map_err(|_| {
                        ContentError::invalid_structure("sent transcript without destination")
                    })?)
                }
            };
            let mut delivery_status = Vec::new();
            for status in sent.unidentified_status {
                let aci = status
                    .destination_aci
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .map_err(|_| {
                        ContentError::invalid_structure("delivery status with invalid aci")
                    })?;
                let destination = ServiceAddress::from_raw(aci, status.destination_e164.clone())
                    .map_err(|_| {
                        ContentError::invalid_structure("delivery status without destination")
                    })?;
                delivery_status.push(TranscriptDeliveryStatus {
                    destination,
                    unidentified: status.unidentified.unwrap_or(false),
                });
            }
            return Ok(SyncMessage::Sent(SentTranscript {
                destination,
                timestamp: Timestamp::from_millis(sent.timestamp.unwrap_or(0)),
                message: sent.message.map(DataMessage::from_proto).transpose()?,
                expiration_start_timestamp: sent
                    .expiration_start_timestamp
                    .map(Timestamp::from_millis),
                delivery_status,
                is_recipient_update: sent.is_recipient_update.unwrap_or(false),
            }));
        }
        if let Some(request) = proto.request {
            let kind = match request.request_type {
                Some(messages::SYNC_REQUEST_CONTACTS) => SyncRequestKind::Contacts,
                Some(messages::SYNC_REQUEST_GROUPS) => SyncRequestKind::Groups,
                Some(messages::SYNC_REQUEST_BLOCKED) => SyncRequestKind::Blocked,
                Some(messages::SYNC_REQUEST_CONFIGURATION) => SyncRequestKind::Configuration,
                Some(messages::SYNC_REQUEST_KEYS) => SyncRequestKind::Keys,
                _ => return Ok(SyncMessage::Empty),
            };
            return Ok(SyncMessage::Request(kind));
        }
        if !proto.read.is_empty() {
            return Ok(SyncMessage::Read(receipt_targets_from_proto(proto.read)?));
        }
        if !proto.viewed.is_empty() {
            return Ok(SyncMessage::Viewed(receipt_targets_from_proto(
                proto.viewed,
            )?));
        }
        if let Some(open) = proto.view_once_open {
            return Ok(SyncMessage::ViewOnceOpen(receipt_target_from_proto(open)?));
        }
        Ok(SyncMessage::Empty)
    }
}

fn receipt_target_to_proto(entry: &ReceiptTarget) -> ReceiptTargetProto {
    ReceiptTargetProto {
        sender_e164: entry.sender.e164().map(str::to_string),
        sender_aci: entry.sender.aci().map(|a| a.to_string()),
        timestamp: Some(entry.timestamp.as_millis()),
    }
}

fn receipt_target_from_proto(proto: ReceiptTargetProto) -> Result<ReceiptTarget, ContentError> {
    let aci = proto
        .sender_aci
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| ContentError::invalid_structure("receipt entry with invalid aci"))?;
    let sender = ServiceAddress::from_raw(aci, proto.sender_e164.clone())
        .map_err(|_| ContentError::invalid_structure("receipt entry without sender"))?;
    Ok(ReceiptTarget {
        sender,
        timestamp: Timestamp::from_millis(proto.timestamp.unwrap_or(0)),
    })
}

fn receipt_targets_from_proto(
    protos: Vec<ReceiptTargetProto>,
) -> Result<Vec<ReceiptTarget>, ContentError> {
    protos.into_iter().map(receipt_target_from_proto).collect()
}

fn sync_padding() -> Vec<u8> {
    use rand::Rng;
    let len = rand::thread_rng().gen_range(1..=SYNC_PADDING_MAX);
    vec![0u8; len]
}

// ----------------------------------------------------------------------------
// Call / Receipt / Typing Messages (domain)
// ----------------------------------------------------------------------------

/// One opaque signaling frame of a call exchange
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallFrame {
    pub id: u64,
    pub frame_type: Option<u32>,
    pub opaque: Option<Vec<u8>>,
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallMessage {
    pub offer: Option<CallFrame>,
    pub answer: Option<CallFrame>,
    pub ice_updates: Vec<CallFrame>,
    pub busy: Option<CallFrame>,
    pub hangup: Option<CallFrame>,
}

impl CallMessage {
    pub(crate) fn to_proto(&self) -> CallMessageProto {
        CallMessageProto {
            offer: self.offer.as_ref().map(call_frame_to_proto),
            answer: self.answer.as_ref().map(call_frame_to_proto),
            ice_updates: self.ice_updates.iter().map(call_frame_to_proto).collect(),
            busy: self.busy.as_ref().map(call_frame_to_proto),
            hangup: self.hangup.as_ref().map(call_frame_to_proto),
        }
    }

    pub(crate) fn from_proto(proto: CallMessageProto) -> Self {
        Self {
            offer: proto.offer.map(call_frame_from_proto),
            answer: proto.answer.map(call_frame_from_proto),
            ice_updates: proto.ice_updates.into_iter().map(call_frame_from_proto).collect(),
            busy: proto.busy.map(call_frame_from_proto),
            hangup: proto.hangup.map(call_frame_from_proto),
        }
    }
}

fn call_frame_to_proto(frame: &CallFrame) -> CallFrameProto {
    CallFrameProto {
        id: Some(frame.id),
        frame_type: frame.frame_type,
        opaque: frame.opaque.clone(),
        device_id: frame.device_id.map(|d| d.value()),
    }
}

fn call_frame_from_proto(proto: CallFrameProto) -> CallFrame {
    CallFrame {
        id: proto.id.unwrap_or(0),
        frame_type: proto.frame_type,
        opaque: proto.opaque,
        device_id: proto.device_id.map(DeviceId::new),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptType {
    Delivery,
    Read,
    Viewed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptMessage {
    pub receipt_type: ReceiptType,
    /// Sent timestamps of the messages being acknowledged
    pub timestamps: Vec<u64>,
}

impl ReceiptMessage {
    pub(crate) fn to_proto(&self) -> ReceiptMessageProto {
        ReceiptMessageProto {
            receipt_type: Some(match self.receipt_type {
                ReceiptType::Delivery => messages::RECEIPT_TYPE_DELIVERY,
                ReceiptType::Read => messages::RECEIPT_TYPE_READ,
                ReceiptType::Viewed => messages::RECEIPT_TYPE_VIEWED,
            }),
            timestamps: self.timestamps.clone(),
        }
    }

    pub(crate) fn from_proto(proto: ReceiptMessageProto) -> Result<Self, ContentError> {
        let receipt_type = match proto.receipt_type {
            Some(messages::RECEIPT_TYPE_DELIVERY) | None => ReceiptType::Delivery,
            Some(messages::RECEIPT_TYPE_READ) => ReceiptType::Read,
            Some(messages::RECEIPT_TYPE_VIEWED) => ReceiptType::Viewed,
            Some(other) => {
                return Err(ContentError::invalid_structure(format!(
                    "unknown receipt type {other}"
                )))
            }
        };
        Ok(Self {
            receipt_type,
            timestamps: proto.timestamps,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingMessage {
    pub timestamp: Timestamp,
    pub action: TypingAction,
    pub group_id: Option<Vec<u8>>,
}

impl TypingMessage {
    pub(crate) fn to_proto(&self) -> TypingMessageProto {
        TypingMessageProto {
            timestamp: Some(self.timestamp.as_millis()),
            action: Some(match self.action {
                TypingAction::Started => messages::TYPING_ACTION_STARTED,
                TypingAction::Stopped => messages::TYPING_ACTION_STOPPED,
            }),
            group_id: self.group_id.clone(),
        }
    }

    pub(crate) fn from_proto(proto: TypingMessageProto) -> Result<Self, ContentError> {
        let action = match proto.action {
            Some(messages::TYPING_ACTION_STARTED) | None => TypingAction::Started,
            Some(messages::TYPING_ACTION_STOPPED) => TypingAction::Stopped,
            Some(other) => {
                return Err(ContentError::invalid_structure(format!(
                    "unknown typing action {other}"
                )))
            }
        };
        Ok(Self {
            timestamp: Timestamp::from_millis(proto.timestamp.unwrap_or(0)),
            action,
            group_id: proto.group_id,
        })
    }
}

// ----------------------------------------------------------------------------
// Content
// ----------------------------------------------------------------------------

/// Delivery metadata carried alongside every decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMetadata {
    pub sender: ServiceAddress,
    pub sender_device: DeviceId,
    pub timestamp: Timestamp,
    /// Set when the message arrived over the authenticated channel and a
    /// delivery receipt should be sent
    pub needs_receipt: bool,
    pub server_received_timestamp: Timestamp,
    pub server_delivered_timestamp: Timestamp,
    pub server_guid: Option<String>,
    pub group_id: Option<Vec<u8>>,
}

/// The typed payload of a decoded envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBody {
    Data(DataMessage),
    Sync(SyncMessage),
    Call(CallMessage),
    Receipt(ReceiptMessage),
    Typing(TypingMessage),
    /// Request from a peer that hit a decryption failure, opaque to this
    /// layer; the session manager consumes it
    DecryptionError(Vec<u8>),
    /// A bare sender key distribution with no accompanying message
    SenderKeyDistribution(Vec<u8>),
}

impl ContentBody {
    pub(crate) fn to_proto(&self) -> ContentProto {
        let mut proto = ContentProto::default();
        match self {
            ContentBody::Data(m) => proto.data_message = Some(m.to_proto()),
            ContentBody::Sync(m) => proto.sync_message = Some(m.to_proto()),
            ContentBody::Call(m) => proto.call_message = Some(m.to_proto()),
            ContentBody::Receipt(m) => proto.receipt_message = Some(m.to_proto()),
            ContentBody::Typing(m) => proto.typing_message = Some(m.to_proto()),
            ContentBody::DecryptionError(m) => proto.decryption_error_message = Some(m.clone()),
            ContentBody::SenderKeyDistribution(m) => {
                proto.sender_key_distribution_message = Some(m.clone())
            }
        }
        proto
    }

    /// Serialize for encryption, optionally piggybacking a sender key
    /// distribution onto the frame.
    pub fn encode(&self, distribution: Option<&[u8]>) -> Vec<u8> {
        let mut proto = self.to_proto();
        if let Some(skdm) = distribution {
            proto.sender_key_distribution_message = Some(skdm.to_vec());
        }
        proto.encode()
    }
}

/// A fully decoded and validated incoming message
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub metadata: ContentMetadata,
    pub body: ContentBody,
    /// Distribution piggybacked onto the frame, to be processed before the
    /// body is acted on
    pub sender_key_distribution: Option<Vec<u8>>,
}

impl Content {
    /// Decode a decrypted envelope. `local_address` is the account that owns
    /// this device; sync messages from anyone else are rejected.
    pub fn decode(bytes: &[u8], local_address: &ServiceAddress) -> Result<Self, ContentError> {
        let envelope = EnvelopeProto::decode(bytes)?;
        let metadata = metadata_from_proto(
            envelope
                .metadata
                .ok_or_else(|| ContentError::invalid_structure("envelope without metadata"))?,
        )?;

        if let Some(content) = envelope.content {
            let sender_key_distribution = content.sender_key_distribution_message;

            let body = if let Some(data) = content.data_message {
                let message = DataMessage::from_proto(data)?;
                if message.timestamp != metadata.timestamp {
                    return Err(ContentError::invalid_structure(format!(
                        "message timestamp {} does not match envelope timestamp {}",
                        message.timestamp.as_millis(),
                        metadata.timestamp.as_millis()
                    )));
                }
                ContentBody::Data(message)
            } else if let Some(sync) = content.sync_message {
                if !metadata.sender.matches(local_address) {
                    return Err(ContentError::invalid_structure(
                        "sync message from non-local sender",
                    ));
                }
                ContentBody::Sync(SyncMessage::from_proto(sync)?)
            } else if let Some(call) = content.call_message {
                ContentBody::Call(CallMessage::from_proto(call))
            } else if let Some(receipt) = content.receipt_message {
                ContentBody::Receipt(ReceiptMessage::from_proto(receipt)?)
            } else if let Some(typing) = content.typing_message {
                ContentBody::Typing(TypingMessage::from_proto(typing)?)
            } else if let Some(error) = content.decryption_error_message {
                ContentBody::DecryptionError(error)
            } else if let Some(skdm) = sender_key_distribution.clone() {
                ContentBody::SenderKeyDistribution(skdm)
            } else {
                warn!(sender = %metadata.sender, "content frame with no recognized payload");
                return Err(ContentError::invalid_structure(
                    "content frame with no payload",
                ));
            };

            // A bare distribution is already the body; do not report it as a
            // piggyback too.
            let piggyback = match &body {
                ContentBody::SenderKeyDistribution(_) => None,
                _ => sender_key_distribution,
            };

            return Ok(Self {
                metadata,
                body,
                sender_key_distribution: piggyback,
            });
        }

        if let Some(legacy) = envelope.legacy_data_message {
            let message = DataMessage::from_proto(legacy)?;
            if message.timestamp != metadata.timestamp {
                return Err(ContentError::invalid_structure(format!(
                    "message timestamp {} does not match envelope timestamp {}",
                    message.timestamp.as_millis(),
                    metadata.timestamp.as_millis()
                )));
            }
            return Ok(Self {
                metadata,
                body: ContentBody::Data(message),
                sender_key_distribution: None,
            });
        }

        Err(ContentError::invalid_structure(
            "envelope carries neither content nor legacy message",
        ))
    }

    /// Serialize a received-side envelope. Used by device transfer and by
    /// tests; the send path encrypts [`ContentBody::encode`] output instead.
    pub fn encode(&self) -> Vec<u8> {
        let mut content = self.body.to_proto();
        if content.sender_key_distribution_message.is_none() {
            content.sender_key_distribution_message = self.sender_key_distribution.clone();
        }
        EnvelopeProto {
            metadata: Some(metadata_to_proto(&self.metadata)),
            local_address: None,
            legacy_data_message: None,
            content: Some(content),
        }
        .encode()
    }
}

fn metadata_from_proto(proto: MetadataProto) -> Result<ContentMetadata, ContentError> {
    let sender = address_from_proto(
        &proto
            .sender
            .ok_or_else(|| ContentError::invalid_structure("metadata without sender"))?,
        "metadata sender",
    )?;
    let sender_device = proto
        .sender_device
        .ok_or_else(|| ContentError::invalid_structure("metadata without sender device"))?;
    let timestamp = proto
        .timestamp
        .ok_or_else(|| ContentError::invalid_structure("metadata without timestamp"))?;
    Ok(ContentMetadata {
        sender,
        sender_device: DeviceId::new(sender_device),
        timestamp: Timestamp::from_millis(timestamp),
        needs_receipt: proto.needs_receipt.unwrap_or(false),
        server_received_timestamp: Timestamp::from_millis(
            proto.server_received_timestamp.unwrap_or(0),
        ),
        server_delivered_timestamp: Timestamp::from_millis(
            proto.server_delivered_timestamp.unwrap_or(0),
        ),
        server_guid: proto.server_guid,
        group_id: proto.group_id,
    })
}

fn metadata_to_proto(metadata: &ContentMetadata) -> MetadataProto {
    MetadataProto {
        sender: Some(address_to_proto(&metadata.sender)),
        sender_device: Some(metadata.sender_device.value()),
        timestamp: Some(metadata.timestamp.as_millis()),
        needs_receipt: Some(metadata.needs_receipt),
        server_received_timestamp: Some(metadata.server_received_timestamp.as_millis()),
        server_delivered_timestamp: Some(metadata.server_delivered_timestamp.as_millis()),
        server_guid: metadata.server_guid.clone(),
        group_id: metadata.group_id.clone(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
