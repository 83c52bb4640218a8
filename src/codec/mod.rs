//! The `codec` module turns bus deliveries into relay records and back.
//!
//! A relay record is an `EncodedMessage` protobuf. On the wire, records are
//! written back to back, each prefixed by its varint-encoded length, and the
//! sequence ends with the HTTP body.

pub mod frame;
pub mod message;
pub mod properties;

pub use frame::{FrameDecoder, encode_frame};
pub use message::{
    Command, EncodedEnvelope, EncodedMessage, EncodedProperties, EndpointType, Header,
    RelayControlMessage,
};
pub use properties::{decode_properties, encode_properties};

#[cfg(test)]
mod tests;
