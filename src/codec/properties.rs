//! Transcoding between bus properties and their wire form.

use chrono::DateTime;
use tracing::warn;

use super::message::{EncodedProperties, Header};
use crate::bus::{BasicProperties, Headers};

/// Bus properties to wire form. Headers are emitted sorted by name.
pub fn encode_properties(props: &BasicProperties) -> EncodedProperties {
    EncodedProperties {
        app_id: props.app_id.clone(),
        content_type: props.content_type.clone(),
        content_encoding: props.content_encoding.clone(),
        correlation_id: props.correlation_id.clone(),
        delivery_mode: props.delivery_mode.map(u32::from),
        expiration: props.expiration.clone(),
        message_id: props.message_id.clone(),
        priority: props.priority.map(u32::from),
        reply_to: props.reply_to.clone(),
        timestamp: props.timestamp.map(|ts| ts.timestamp_millis()),
        message_type: props.kind.clone(),
        user_id: props.user_id.clone(),
        headers: props
            .headers
            .iter()
            .flatten()
            .map(|(name, value)| Header {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}

/// Wire form back to bus properties. Out-of-range numeric fields are dropped.
pub fn decode_properties(props: &EncodedProperties) -> BasicProperties {
    let headers = if props.headers.is_empty() {
        None
    } else {
        Some(
            props
                .headers
                .iter()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect::<Headers>(),
        )
    };
    BasicProperties {
        app_id: props.app_id.clone(),
        content_type: props.content_type.clone(),
        content_encoding: props.content_encoding.clone(),
        correlation_id: props.correlation_id.clone(),
        delivery_mode: props.delivery_mode.and_then(narrow),
        expiration: props.expiration.clone(),
        message_id: props.message_id.clone(),
        priority: props.priority.and_then(narrow),
        reply_to: props.reply_to.clone(),
        timestamp: props.timestamp.and_then(|ms| {
            let ts = DateTime::from_timestamp_millis(ms);
            if ts.is_none() {
                warn!("Dropping out-of-range message timestamp {}", ms);
            }
            ts
        }),
        kind: props.message_type.clone(),
        user_id: props.user_id.clone(),
        headers,
    }
}

fn narrow(value: u32) -> Option<u8> {
    u8::try_from(value).ok()
}
