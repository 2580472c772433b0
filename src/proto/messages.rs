//! Wire message schemas
//!
//! Structural definitions of the forward-compatible wire messages. Field
//! numbers are part of the protocol and must never be reused. Decoding here
//! is purely structural; semantic validation (required fields, timestamp
//! agreement, protocol-version gating) lives in the `content` module.

use crate::errors::ContentError;
use crate::proto::wire::{Reader, Writer};

// ----------------------------------------------------------------------------
// Data Message Flags
// ----------------------------------------------------------------------------

/// End the session with this recipient
pub const FLAG_END_SESSION: u32 = 0x01;
/// The expiration timer changed; no body expected
pub const FLAG_EXPIRATION_TIMER_UPDATE: u32 = 0x02;
/// The profile key changed; no body expected
pub const FLAG_PROFILE_KEY_UPDATE: u32 = 0x04;

// ----------------------------------------------------------------------------
// Address / Metadata
// ----------------------------------------------------------------------------

/// Account address as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressProto {
    pub aci: Option<String>,
    pub e164: Option<String>,
}

impl AddressProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(aci) = &self.aci {
            w.string(1, aci);
        }
        if let Some(e164) = &self.e164 {
            w.string(2, e164);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.aci = Some(r.read_string()?),
                2 => out.e164 = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// Envelope metadata attached to every decrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataProto {
    pub sender: Option<AddressProto>,
    pub sender_device: Option<u32>,
    pub timestamp: Option<u64>,
    pub needs_receipt: Option<bool>,
    pub server_received_timestamp: Option<u64>,
    pub server_delivered_timestamp: Option<u64>,
    pub server_guid: Option<String>,
    pub group_id: Option<Vec<u8>>,
}

impl MetadataProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(sender) = &self.sender {
            w.message(1, &sender.encode());
        }
        if let Some(device) = self.sender_device {
            w.uint32(2, device);
        }
        if let Some(ts) = self.timestamp {
            w.uint64(3, ts);
        }
        if let Some(needs_receipt) = self.needs_receipt {
            w.bool(4, needs_receipt);
        }
        if let Some(ts) = self.server_received_timestamp {
            w.uint64(5, ts);
        }
        if let Some(ts) = self.server_delivered_timestamp {
            w.uint64(6, ts);
        }
        if let Some(guid) = &self.server_guid {
            w.string(7, guid);
        }
        if let Some(group_id) = &self.group_id {
            w.bytes(8, group_id);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.sender = Some(AddressProto::decode(r.read_bytes()?)?),
                2 => out.sender_device = Some(r.read_uint32()?),
                3 => out.timestamp = Some(r.read_varint()?),
                4 => out.needs_receipt = Some(r.read_bool()?),
                5 => out.server_received_timestamp = Some(r.read_varint()?),
                6 => out.server_delivered_timestamp = Some(r.read_varint()?),
                7 => out.server_guid = Some(r.read_string()?),
                8 => out.group_id = Some(r.read_bytes()?.to_vec()),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// The outer wrapper around a decrypted payload: metadata plus either a
/// legacy single-type payload or the multiplexed content union.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvelopeProto {
    pub metadata: Option<MetadataProto>,
    pub local_address: Option<AddressProto>,
    pub legacy_data_message: Option<DataMessageProto>,
    pub content: Option<ContentProto>,
}

impl EnvelopeProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(metadata) = &self.metadata {
            w.message(1, &metadata.encode());
        }
        if let Some(local) = &self.local_address {
            w.message(2, &local.encode());
        }
        if let Some(legacy) = &self.legacy_data_message {
            w.message(3, &legacy.encode());
        }
        if let Some(content) = &self.content {
            w.message(4, &content.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.metadata = Some(MetadataProto::decode(r.read_bytes()?)?),
                2 => out.local_address = Some(AddressProto::decode(r.read_bytes()?)?),
                3 => out.legacy_data_message = Some(DataMessageProto::decode(r.read_bytes()?)?),
                4 => out.content = Some(ContentProto::decode(r.read_bytes()?)?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Content Union
// ----------------------------------------------------------------------------

/// The multiplexed payload union. Presence of a field, not a tag byte,
/// determines the variant; the decoder applies a fixed priority order when
/// several are present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentProto {
    pub data_message: Option<DataMessageProto>,
    pub sync_message: Option<SyncMessageProto>,
    pub call_message: Option<CallMessageProto>,
    pub receipt_message: Option<ReceiptMessageProto>,
    pub typing_message: Option<TypingMessageProto>,
    pub sender_key_distribution_message: Option<Vec<u8>>,
    pub decryption_error_message: Option<Vec<u8>>,
}

impl ContentProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(m) = &self.data_message {
            w.message(1, &m.encode());
        }
        if let Some(m) = &self.sync_message {
            w.message(2, &m.encode());
        }
        if let Some(m) = &self.call_message {
            w.message(3, &m.encode());
        }
        if let Some(m) = &self.receipt_message {
            w.message(5, &m.encode());
        }
        if let Some(m) = &self.typing_message {
            w.message(6, &m.encode());
        }
        if let Some(m) = &self.sender_key_distribution_message {
            w.bytes(7, m);
        }
        if let Some(m) = &self.decryption_error_message {
            w.bytes(8, m);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.data_message = Some(DataMessageProto::decode(r.read_bytes()?)?),
                2 => out.sync_message = Some(SyncMessageProto::decode(r.read_bytes()?)?),
                3 => out.call_message = Some(CallMessageProto::decode(r.read_bytes()?)?),
                5 => out.receipt_message = Some(ReceiptMessageProto::decode(r.read_bytes()?)?),
                6 => out.typing_message = Some(TypingMessageProto::decode(r.read_bytes()?)?),
                7 => out.sender_key_distribution_message = Some(r.read_bytes()?.to_vec()),
                8 => out.decryption_error_message = Some(r.read_bytes()?.to_vec()),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Data Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataMessageProto {
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointerProto>,
    pub flags: Option<u32>,
    pub expire_timer: Option<u32>,
    pub profile_key: Option<Vec<u8>>,
    pub timestamp: Option<u64>,
    pub quote: Option<QuoteProto>,
    pub previews: Vec<PreviewProto>,
    pub sticker: Option<StickerProto>,
    pub required_protocol_version: Option<u32>,
    pub is_view_once: Option<bool>,
    pub group_v2: Option<GroupContextV2Proto>,
    pub reaction: Option<ReactionProto>,
    pub delete: Option<DeleteProto>,
    pub body_ranges: Vec<BodyRangeProto>,
    pub group_call_update: Option<GroupCallUpdateProto>,
    pub payment: Option<PaymentProto>,
}

impl DataMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(body) = &self.body {
            w.string(1, body);
        }
        for attachment in &self.attachments {
            w.message(2, &attachment.encode());
        }
        if let Some(flags) = self.flags {
            w.uint32(4, flags);
        }
        if let Some(expire_timer) = self.expire_timer {
            w.uint32(5, expire_timer);
        }
        if let Some(profile_key) = &self.profile_key {
            w.bytes(6, profile_key);
        }
        if let Some(ts) = self.timestamp {
            w.uint64(7, ts);
        }
        if let Some(quote) = &self.quote {
            w.message(8, &quote.encode());
        }
        for preview in &self.previews {
            w.message(10, &preview.encode());
        }
        if let Some(sticker) = &self.sticker {
            w.message(11, &sticker.encode());
        }
        if let Some(version) = self.required_protocol_version {
            w.uint32(12, version);
        }
        if let Some(view_once) = self.is_view_once {
            w.bool(14, view_once);
        }
        if let Some(group) = &self.group_v2 {
            w.message(15, &group.encode());
        }
        if let Some(reaction) = &self.reaction {
            w.message(16, &reaction.encode());
        }
        if let Some(delete) = &self.delete {
            w.message(17, &delete.encode());
        }
        for range in &self.body_ranges {
            w.message(18, &range.encode());
        }
        if let Some(update) = &self.group_call_update {
            w.message(19, &update.encode());
        }
        if let Some(payment) = &self.payment {
            w.message(20, &payment.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.body = Some(r.read_string()?),
                2 => out
                    .attachments
                    .push(AttachmentPointerProto::decode(r.read_bytes()?)?),
                4 => out.flags = Some(r.read_uint32()?),
                5 => out.expire_timer = Some(r.read_uint32()?),
                6 => out.profile_key = Some(r.read_bytes()?.to_vec()),
                7 => out.timestamp = Some(r.read_varint()?),
                8 => out.quote = Some(QuoteProto::decode(r.read_bytes()?)?),
                10 => out.previews.push(PreviewProto::decode(r.read_bytes()?)?),
                11 => out.sticker = Some(StickerProto::decode(r.read_bytes()?)?),
                12 => out.required_protocol_version = Some(r.read_uint32()?),
                14 => out.is_view_once = Some(r.read_bool()?),
                15 => out.group_v2 = Some(GroupContextV2Proto::decode(r.read_bytes()?)?),
                16 => out.reaction = Some(ReactionProto::decode(r.read_bytes()?)?),
                17 => out.delete = Some(DeleteProto::decode(r.read_bytes()?)?),
                18 => out.body_ranges.push(BodyRangeProto::decode(r.read_bytes()?)?),
                19 => out.group_call_update = Some(GroupCallUpdateProto::decode(r.read_bytes()?)?),
                20 => out.payment = Some(PaymentProto::decode(r.read_bytes()?)?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuoteProto {
    pub id: Option<u64>,
    pub author_aci: Option<String>,
    pub text: Option<String>,
}

impl QuoteProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(id) = self.id {
            w.uint64(1, id);
        }
        if let Some(author) = &self.author_aci {
            w.string(2, author);
        }
        if let Some(text) = &self.text {
            w.string(3, text);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.id = Some(r.read_varint()?),
                2 => out.author_aci = Some(r.read_string()?),
                3 => out.text = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// A range of the body pointing at a mentioned account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BodyRangeProto {
    pub start: Option<u32>,
    pub length: Option<u32>,
    pub mention_aci: Option<String>,
}

impl BodyRangeProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(start) = self.start {
            w.uint32(1, start);
        }
        if let Some(length) = self.length {
            w.uint32(2, length);
        }
        if let Some(aci) = &self.mention_aci {
            w.string(3, aci);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.start = Some(r.read_uint32()?),
                2 => out.length = Some(r.read_uint32()?),
                3 => out.mention_aci = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StickerProto {
    pub pack_id: Option<Vec<u8>>,
    pub pack_key: Option<Vec<u8>>,
    pub sticker_id: Option<u32>,
    pub data: Option<AttachmentPointerProto>,
    pub emoji: Option<String>,
}

impl StickerProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(pack_id) = &self.pack_id {
            w.bytes(1, pack_id);
        }
        if let Some(pack_key) = &self.pack_key {
            w.bytes(2, pack_key);
        }
        if let Some(id) = self.sticker_id {
            w.uint32(3, id);
        }
        if let Some(data) = &self.data {
            w.message(4, &data.encode());
        }
        if let Some(emoji) = &self.emoji {
            w.string(5, emoji);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.pack_id = Some(r.read_bytes()?.to_vec()),
                2 => out.pack_key = Some(r.read_bytes()?.to_vec()),
                3 => out.sticker_id = Some(r.read_uint32()?),
                4 => out.data = Some(AttachmentPointerProto::decode(r.read_bytes()?)?),
                5 => out.emoji = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreviewProto {
    pub url: Option<String>,
    pub title: Option<String>,
    pub image: Option<AttachmentPointerProto>,
    pub description: Option<String>,
    pub date: Option<u64>,
}

impl PreviewProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(url) = &self.url {
            w.string(1, url);
        }
        if let Some(title) = &self.title {
            w.string(2, title);
        }
        if let Some(image) = &self.image {
            w.message(3, &image.encode());
        }
        if let Some(description) = &self.description {
            w.string(4, description);
        }
        if let Some(date) = self.date {
            w.uint64(5, date);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.url = Some(r.read_string()?),
                2 => out.title = Some(r.read_string()?),
                3 => out.image = Some(AttachmentPointerProto::decode(r.read_bytes()?)?),
                4 => out.description = Some(r.read_string()?),
                5 => out.date = Some(r.read_varint()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReactionProto {
    pub emoji: Option<String>,
    pub remove: Option<bool>,
    pub target_author_aci: Option<String>,
    pub target_sent_timestamp: Option<u64>,
}

impl ReactionProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(emoji) = &self.emoji {
            w.string(1, emoji);
        }
        if let Some(remove) = self.remove {
            w.bool(2, remove);
        }
        if let Some(author) = &self.target_author_aci {
            w.string(3, author);
        }
        if let Some(ts) = self.target_sent_timestamp {
            w.uint64(4, ts);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.emoji = Some(r.read_string()?),
                2 => out.remove = Some(r.read_bool()?),
                3 => out.target_author_aci = Some(r.read_string()?),
                4 => out.target_sent_timestamp = Some(r.read_varint()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteProto {
    pub target_sent_timestamp: Option<u64>,
}

impl DeleteProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(ts) = self.target_sent_timestamp {
            w.uint64(1, ts);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.target_sent_timestamp = Some(r.read_varint()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupContextV2Proto {
    pub master_key: Option<Vec<u8>>,
    pub revision: Option<u32>,
    pub group_change: Option<Vec<u8>>,
}

impl GroupContextV2Proto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(master_key) = &self.master_key {
            w.bytes(1, master_key);
        }
        if let Some(revision) = self.revision {
            w.uint32(2, revision);
        }
        if let Some(change) = &self.group_change {
            w.bytes(3, change);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.master_key = Some(r.read_bytes()?.to_vec()),
                2 => out.revision = Some(r.read_uint32()?),
                3 => out.group_change = Some(r.read_bytes()?.to_vec()),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupCallUpdateProto {
    pub era_id: Option<String>,
}

impl GroupCallUpdateProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(era_id) = &self.era_id {
            w.string(1, era_id);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.era_id = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaymentProto {
    pub notification: Option<PaymentNotificationProto>,
}

impl PaymentProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(notification) = &self.notification {
            w.message(1, &notification.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.notification = Some(PaymentNotificationProto::decode(r.read_bytes()?)?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaymentNotificationProto {
    /// Serialized mobilecoin receipt; required for a valid notification
    pub transaction: Option<Vec<u8>>,
    pub note: Option<String>,
}

impl PaymentNotificationProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(transaction) = &self.transaction {
            w.bytes(1, transaction);
        }
        if let Some(note) = &self.note {
            w.string(2, note);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.transaction = Some(r.read_bytes()?.to_vec()),
                2 => out.note = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Attachment Pointer
// ----------------------------------------------------------------------------

/// Voice note flag bit
pub const ATTACHMENT_FLAG_VOICE_MESSAGE: u32 = 0x01;
/// Borderless image flag bit
pub const ATTACHMENT_FLAG_BORDERLESS: u32 = 0x02;
/// GIF flag bit
pub const ATTACHMENT_FLAG_GIF: u32 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachmentPointerProto {
    pub cdn_id: Option<u64>,
    pub content_type: Option<String>,
    pub key: Option<Vec<u8>>,
    pub size: Option<u32>,
    pub thumbnail: Option<Vec<u8>>,
    pub digest: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub flags: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub caption: Option<String>,
    pub blur_hash: Option<String>,
    pub upload_timestamp: Option<u64>,
    pub cdn_number: Option<u32>,
    pub cdn_key: Option<String>,
}

impl AttachmentPointerProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(cdn_id) = self.cdn_id {
            w.uint64(1, cdn_id);
        }
        if let Some(content_type) = &self.content_type {
            w.string(2, content_type);
        }
        if let Some(key) = &self.key {
            w.bytes(3, key);
        }
        if let Some(size) = self.size {
            w.uint32(4, size);
        }
        if let Some(thumbnail) = &self.thumbnail {
            w.bytes(5, thumbnail);
        }
        if let Some(digest) = &self.digest {
            w.bytes(6, digest);
        }
        if let Some(file_name) = &self.file_name {
            w.string(7, file_name);
        }
        if let Some(flags) = self.flags {
            w.uint32(8, flags);
        }
        if let Some(width) = self.width {
            w.uint32(9, width);
        }
        if let Some(height) = self.height {
            w.uint32(10, height);
        }
        if let Some(caption) = &self.caption {
            w.string(11, caption);
        }
        if let Some(blur_hash) = &self.blur_hash {
            w.string(12, blur_hash);
        }
        if let Some(ts) = self.upload_timestamp {
            w.uint64(13, ts);
        }
        if let Some(cdn_number) = self.cdn_number {
            w.uint32(14, cdn_number);
        }
        if let Some(cdn_key) = &self.cdn_key {
            w.string(15, cdn_key);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.cdn_id = Some(r.read_varint()?),
                2 => out.content_type = Some(r.read_string()?),
                3 => out.key = Some(r.read_bytes()?.to_vec()),
                4 => out.size = Some(r.read_uint32()?),
                5 => out.thumbnail = Some(r.read_bytes()?.to_vec()),
                6 => out.digest = Some(r.read_bytes()?.to_vec()),
                7 => out.file_name = Some(r.read_string()?),
                8 => out.flags = Some(r.read_uint32()?),
                9 => out.width = Some(r.read_uint32()?),
                10 => out.height = Some(r.read_uint32()?),
                11 => out.caption = Some(r.read_string()?),
                12 => out.blur_hash = Some(r.read_string()?),
                13 => out.upload_timestamp = Some(r.read_varint()?),
                14 => out.cdn_number = Some(r.read_uint32()?),
                15 => out.cdn_key = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Sync Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncMessageProto {
    pub sent: Option<SentTranscriptProto>,
    pub request: Option<SyncRequestProto>,
    pub read: Vec<ReceiptTargetProto>,
    pub padding: Option<Vec<u8>>,
    pub view_once_open: Option<ReceiptTargetProto>,
    pub viewed: Vec<ReceiptTargetProto>,
}

impl SyncMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(sent) = &self.sent {
            w.message(1, &sent.encode());
        }
        if let Some(request) = &self.request {
            w.message(4, &request.encode());
        }
        for read in &self.read {
            w.message(5, &read.encode());
        }
        if let Some(padding) = &self.padding {
            w.bytes(8, padding);
        }
        if let Some(open) = &self.view_once_open {
            w.message(11, &open.encode());
        }
        for viewed in &self.viewed {
            w.message(16, &viewed.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.sent = Some(SentTranscriptProto::decode(r.read_bytes()?)?),
                4 => out.request = Some(SyncRequestProto::decode(r.read_bytes()?)?),
                5 => out.read.push(ReceiptTargetProto::decode(r.read_bytes()?)?),
                8 => out.padding = Some(r.read_bytes()?.to_vec()),
                11 => out.view_once_open = Some(ReceiptTargetProto::decode(r.read_bytes()?)?),
                16 => out.viewed.push(ReceiptTargetProto::decode(r.read_bytes()?)?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// Transcript of a message the account sent from this device, delivered to
/// the account's other devices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SentTranscriptProto {
    pub destination_e164: Option<String>,
    pub timestamp: Option<u64>,
    pub message: Option<DataMessageProto>,
    pub expiration_start_timestamp: Option<u64>,
    pub unidentified_status: Vec<UnidentifiedDeliveryStatusProto>,
    pub is_recipient_update: Option<bool>,
    pub destination_aci: Option<String>,
}

impl SentTranscriptProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(e164) = &self.destination_e164 {
            w.string(1, e164);
        }
        if let Some(ts) = self.timestamp {
            w.uint64(2, ts);
        }
        if let Some(message) = &self.message {
            w.message(3, &message.encode());
        }
        if let Some(ts) = self.expiration_start_timestamp {
            w.uint64(4, ts);
        }
        for status in &self.unidentified_status {
            w.message(5, &status.encode());
        }
        if let Some(update) = self.is_recipient_update {
            w.bool(6, update);
        }
        if let Some(aci) = &self.destination_aci {
            w.string(7, aci);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.destination_e164 = Some(r.read_string()?),
                2 => out.timestamp = Some(r.read_varint()?),
                3 => out.message = Some(DataMessageProto::decode(r.read_bytes()?)?),
                4 => out.expiration_start_timestamp = Some(r.read_varint()?),
                5 => out
                    .unidentified_status
                    .push(UnidentifiedDeliveryStatusProto::decode(r.read_bytes()?)?),
                6 => out.is_recipient_update = Some(r.read_bool()?),
                7 => out.destination_aci = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnidentifiedDeliveryStatusProto {
    pub destination_e164: Option<String>,
    pub unidentified: Option<bool>,
    pub destination_aci: Option<String>,
}

impl UnidentifiedDeliveryStatusProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(e164) = &self.destination_e164 {
            w.string(1, e164);
        }
        if let Some(unidentified) = self.unidentified {
            w.bool(2, unidentified);
        }
        if let Some(aci) = &self.destination_aci {
            w.string(3, aci);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.destination_e164 = Some(r.read_string()?),
                2 => out.unidentified = Some(r.read_bool()?),
                3 => out.destination_aci = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// Sync request kinds
pub const SYNC_REQUEST_CONTACTS: u32 = 1;
pub const SYNC_REQUEST_GROUPS: u32 = 2;
pub const SYNC_REQUEST_BLOCKED: u32 = 3;
pub const SYNC_REQUEST_CONFIGURATION: u32 = 4;
pub const SYNC_REQUEST_KEYS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRequestProto {
    pub request_type: Option<u32>,
}

impl SyncRequestProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(request_type) = self.request_type {
            w.uint32(1, request_type);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.request_type = Some(r.read_uint32()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// Shared shape of read / viewed / view-once-open sync entries: a sender
/// address plus the sent timestamp of the referenced message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiptTargetProto {
    pub sender_e164: Option<String>,
    pub timestamp: Option<u64>,
    pub sender_aci: Option<String>,
}

impl ReceiptTargetProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(e164) = &self.sender_e164 {
            w.string(1, e164);
        }
        if let Some(ts) = self.timestamp {
            w.uint64(2, ts);
        }
        if let Some(aci) = &self.sender_aci {
            w.string(3, aci);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.sender_e164 = Some(r.read_string()?),
                2 => out.timestamp = Some(r.read_varint()?),
                3 => out.sender_aci = Some(r.read_string()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Call Message
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallMessageProto {
    pub offer: Option<CallFrameProto>,
    pub answer: Option<CallFrameProto>,
    pub ice_updates: Vec<CallFrameProto>,
    pub busy: Option<CallFrameProto>,
    pub hangup: Option<CallFrameProto>,
}

impl CallMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(offer) = &self.offer {
            w.message(1, &offer.encode());
        }
        if let Some(answer) = &self.answer {
            w.message(2, &answer.encode());
        }
        for ice in &self.ice_updates {
            w.message(3, &ice.encode());
        }
        if let Some(busy) = &self.busy {
            w.message(4, &busy.encode());
        }
        if let Some(hangup) = &self.hangup {
            w.message(7, &hangup.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.offer = Some(CallFrameProto::decode(r.read_bytes()?)?),
                2 => out.answer = Some(CallFrameProto::decode(r.read_bytes()?)?),
                3 => out.ice_updates.push(CallFrameProto::decode(r.read_bytes()?)?),
                4 => out.busy = Some(CallFrameProto::decode(r.read_bytes()?)?),
                7 => out.hangup = Some(CallFrameProto::decode(r.read_bytes()?)?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// One signaling frame of a call setup exchange. The calling stack itself is
/// out of scope; the codec carries the opaque payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallFrameProto {
    pub id: Option<u64>,
    pub frame_type: Option<u32>,
    pub opaque: Option<Vec<u8>>,
    pub device_id: Option<u32>,
}

impl CallFrameProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(id) = self.id {
            w.uint64(1, id);
        }
        if let Some(frame_type) = self.frame_type {
            w.uint32(2, frame_type);
        }
        if let Some(opaque) = &self.opaque {
            w.bytes(3, opaque);
        }
        if let Some(device_id) = self.device_id {
            w.uint32(4, device_id);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.id = Some(r.read_varint()?),
                2 => out.frame_type = Some(r.read_uint32()?),
                3 => out.opaque = Some(r.read_bytes()?.to_vec()),
                4 => out.device_id = Some(r.read_uint32()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Receipt / Typing Messages
// ----------------------------------------------------------------------------

/// Receipt kinds
pub const RECEIPT_TYPE_DELIVERY: u32 = 0;
pub const RECEIPT_TYPE_READ: u32 = 1;
pub const RECEIPT_TYPE_VIEWED: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiptMessageProto {
    pub receipt_type: Option<u32>,
    pub timestamps: Vec<u64>,
}

impl ReceiptMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(receipt_type) = self.receipt_type {
            w.uint32(1, receipt_type);
        }
        for ts in &self.timestamps {
            w.uint64(2, *ts);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.receipt_type = Some(r.read_uint32()?),
                2 => out.timestamps.push(r.read_varint()?),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

/// Typing indicator actions
pub const TYPING_ACTION_STARTED: u32 = 0;
pub const TYPING_ACTION_STOPPED: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingMessageProto {
    pub timestamp: Option<u64>,
    pub action: Option<u32>,
    pub group_id: Option<Vec<u8>>,
}

impl TypingMessageProto {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        if let Some(ts) = self.timestamp {
            w.uint64(1, ts);
        }
        if let Some(action) = self.action {
            w.uint32(2, action);
        }
        if let Some(group_id) = &self.group_id {
            w.bytes(3, group_id);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContentError> {
        let mut r = Reader::new(bytes);
        let mut out = Self::default();
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => out.timestamp = Some(r.read_varint()?),
                2 => out.action = Some(r.read_uint32()?),
                3 => out.group_id = Some(r.read_bytes()?.to_vec()),
                _ => r.skip(wire_type)?,
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
