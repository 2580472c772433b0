//! Envelope codec property tests
//!
//! Round-trip properties over the domain model and forward-compatibility
//! of the wire layer against fields this implementation does not know.

use cachet::proto::wire::{Reader, Writer};
use cachet::{
    Aci, Content, ContentBody, ContentMetadata, DataMessage, DeviceId, ReceiptMessage,
    ReceiptType, ServiceAddress, Timestamp,
};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn metadata(sender: &ServiceAddress, millis: u64) -> ContentMetadata {
    ContentMetadata {
        sender: sender.clone(),
        sender_device: DeviceId::new(2),
        timestamp: Timestamp::from_millis(millis),
        needs_receipt: true,
        server_received_timestamp: Timestamp::from_millis(millis + 3),
        server_delivered_timestamp: Timestamp::from_millis(millis + 8),
        server_guid: Some("b1c2".into()),
        group_id: None,
    }
}

// ----------------------------------------------------------------------------
// Forward Compatibility
// ----------------------------------------------------------------------------

#[test]
fn test_unknown_envelope_fields_are_skipped() {
    let sender = ServiceAddress::from_aci(Aci::generate());
    let local = ServiceAddress::from_aci(Aci::generate());
    let content = Content {
        metadata: metadata(&sender, 5000),
        body: ContentBody::Data(DataMessage {
            body: Some("compat".into()),
            timestamp: Timestamp::from_millis(5000),
            ..Default::default()
        }),
        sender_key_distribution: None,
    };

    // A newer peer appends fields this implementation has never heard of.
    let mut bytes = content.encode();
    let mut extra = Writer::new();
    extra.uint64(57, 123456);
    extra.bytes(58, b"opaque future blob");
    bytes.extend_from_slice(&extra.into_bytes());

    let decoded = Content::decode(&bytes, &local).unwrap();
    assert_eq!(decoded, content);
}

#[test]
fn test_truncated_envelope_rejected() {
    let sender = ServiceAddress::from_aci(Aci::generate());
    let local = ServiceAddress::from_aci(Aci::generate());
    let content = Content {
        metadata: metadata(&sender, 5000),
        body: ContentBody::Receipt(ReceiptMessage {
            receipt_type: ReceiptType::Read,
            timestamps: vec![1, 2, 3],
        }),
        sender_key_distribution: None,
    };

    let bytes = content.encode();
    assert!(Content::decode(&bytes[..bytes.len() - 2], &local).is_err());
}

#[test]
fn test_arbitrary_bytes_never_panic_the_decoder() {
    let local = ServiceAddress::from_aci(Aci::generate());
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    for _ in 0..512 {
        let len = rng.gen_range(0..256);
        let mut bytes = vec![0u8; len];
        rng.fill(&mut bytes[..]);
        // Garbage may or may not decode, but it must fail cleanly.
        let _ = Content::decode(&bytes, &local);
    }
}

// ----------------------------------------------------------------------------
// Round-Trip Properties
// ----------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_varint_round_trip(value in any::<u64>()) {
        let mut writer = Writer::new();
        writer.uint64(1, value);
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        let (field, _) = reader.next_field().unwrap().unwrap();
        prop_assert_eq!(field, 1);
        prop_assert_eq!(reader.read_varint().unwrap(), value);
    }

    #[test]
    fn prop_data_message_round_trip(
        body in ".{0,80}",
        millis in 1u64..=4_102_444_800_000,
        expire in 0u32..=31_536_000,
        view_once in any::<bool>(),
    ) {
        let sender = ServiceAddress::from_aci(Aci::generate());
        let local = ServiceAddress::from_aci(Aci::generate());
        let content = Content {
            metadata: metadata(&sender, millis),
            body: ContentBody::Data(DataMessage {
                body: Some(body),
                timestamp: Timestamp::from_millis(millis),
                expires_in_seconds: expire,
                view_once,
                ..Default::default()
            }),
            sender_key_distribution: None,
        };

        let decoded = Content::decode(&content.encode(), &local).unwrap();
        prop_assert_eq!(decoded, content);
    }

    #[test]
    fn prop_receipt_round_trip(timestamps in proptest::collection::vec(any::<u64>(), 0..20)) {
        let sender = ServiceAddress::from_aci(Aci::generate());
        let local = ServiceAddress::from_aci(Aci::generate());
        let content = Content {
            metadata: metadata(&sender, 9000),
            body: ContentBody::Receipt(ReceiptMessage {
                receipt_type: ReceiptType::Delivery,
                timestamps,
            }),
            sender_key_distribution: None,
        };

        let decoded = Content::decode(&content.encode(), &local).unwrap();
        prop_assert_eq!(decoded, content);
    }
}
