use chrono::{TimeZone, Utc};
use prost::Message;

use super::*;
use crate::bus::{BasicProperties, Delivery, Envelope};
use crate::utils::error::RelayError;

fn delivery(body: &[u8]) -> Delivery {
    Delivery {
        consumer_tag: "ctag".to_string(),
        envelope: Envelope {
            delivery_tag: 7,
            exchange: "".to_string(),
            routing_key: "orders".to_string(),
            redelivered: true,
        },
        properties: BasicProperties::default()
            .with_reply_to("replies")
            .with_header("trace", "abc"),
        body: body.to_vec(),
    }
}

#[test]
fn test_from_delivery_without_full_ack() {
    let message = EncodedMessage::from_delivery(&delivery(b"hi"), false, 3);
    assert_eq!(message.delivery_tag(), 7);
    assert_eq!(message.routing_key(), "orders");
    assert!(message.envelope.is_redeliver);
    assert!(!message.do_ack);
    assert_eq!(message.channel_id, 0);
    assert_eq!(message.payload.as_deref(), Some(&b"hi"[..]));
    assert_eq!(message.reply_to(), Some("replies"));
}

#[test]
fn test_from_delivery_with_full_ack_stamps_channel() {
    let message = EncodedMessage::from_delivery(&delivery(b"hi"), true, 3);
    assert!(message.do_ack);
    assert_eq!(message.channel_id, 3);
}

#[test]
fn test_signal_record_has_no_properties() {
    let message = EncodedMessage::signal("__relay_ack_", 9, 2);
    assert_eq!(message.exchange(), "__relay_ack_");
    assert_eq!(message.routing_key(), "__relay_ack_");
    assert_eq!(message.delivery_tag(), 9);
    assert!(message.properties.is_none());
    assert!(message.reply_to().is_none());
}

#[test]
fn test_properties_transcode_both_ways() {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let props = BasicProperties {
        app_id: Some("app".to_string()),
        delivery_mode: Some(2),
        priority: Some(5),
        timestamp: Some(ts),
        kind: Some("order.created".to_string()),
        ..Default::default()
    }
    .with_header("zeta", "1")
    .with_header("alpha", "2");

    let encoded = encode_properties(&props);
    assert_eq!(encoded.timestamp, Some(ts.timestamp_millis()));
    let names: Vec<&str> = encoded.headers.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, ["alpha", "zeta"]);

    assert_eq!(decode_properties(&encoded), props);
}

#[test]
fn test_decode_properties_drops_out_of_range_priority() {
    let encoded = EncodedProperties {
        priority: Some(300),
        ..Default::default()
    };
    let props = decode_properties(&encoded);
    assert_eq!(props.priority, None);
    assert_eq!(props.headers, None);
}

#[test]
fn test_control_message_enum_getters() {
    let control = RelayControlMessage {
        command: Command::Unpublish as i32,
        endpoint_name: Some("events".to_string()),
        endpoint_type: Some(EndpointType::Topic as i32),
        bindings: vec!["a.*".to_string()],
        full_ack: true,
    };
    let decoded = RelayControlMessage::decode(control.encode_to_vec().as_slice()).unwrap();
    assert_eq!(decoded.command(), Command::Unpublish);
    assert_eq!(decoded.endpoint_type(), EndpointType::Topic);
    assert_eq!(
        EndpointType::Topic.exchange_kind(),
        Some(crate::bus::ExchangeKind::Topic)
    );
    assert_eq!(EndpointType::Queue.exchange_kind(), None);
}

#[test]
fn test_frame_decoder_handles_split_chunks() {
    let first = EncodedMessage::from_delivery(&delivery(b"one"), false, 1);
    let second = EncodedMessage::from_delivery(&delivery(&[0u8; 300]), true, 1);
    let mut wire = Vec::new();
    wire.extend_from_slice(&encode_frame(&first));
    wire.extend_from_slice(&encode_frame(&second));

    let mut decoder = FrameDecoder::new();
    let mut out = Vec::new();
    // Feed one byte at a time, crossing every prefix and body boundary
    for byte in &wire {
        decoder.extend(std::slice::from_ref(byte));
        while let Some(message) = decoder.next_frame().unwrap() {
            out.push(message);
        }
    }
    decoder.finish().unwrap();
    assert_eq!(out, vec![first, second]);
}

#[test]
fn test_frame_decoder_reports_truncated_tail() {
    let message = EncodedMessage::from_delivery(&delivery(b"payload"), false, 1);
    let wire = encode_frame(&message);
    let truncated = &wire[..wire.len() - 2];

    let err = FrameDecoder::decode_all(truncated).unwrap_err();
    assert!(matches!(err, RelayError::Frame(_)));
}

#[test]
fn test_frame_decoder_rejects_overlong_prefix() {
    let mut decoder = FrameDecoder::new();
    decoder.extend(&[0xff; 11]);
    assert!(matches!(decoder.next_frame(), Err(RelayError::Frame(_))));
}

#[test]
fn test_frame_decoder_rejects_garbage_record() {
    // Length 2 followed by a field key with an invalid wire type
    let err = FrameDecoder::decode_all(&[0x02, 0x0f, 0x00]).unwrap_err();
    assert!(matches!(err, RelayError::Decode(_)));
}

#[test]
fn test_empty_body_decodes_to_nothing() {
    assert!(FrameDecoder::decode_all(&[]).unwrap().is_empty());
}
