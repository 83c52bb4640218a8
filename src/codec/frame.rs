use bytes::{Buf, Bytes, BytesMut};
use prost::Message;

use super::message::EncodedMessage;
use crate::utils::error::RelayError;

/// Largest record accepted by the decoder.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A varint never needs more than ten bytes.
const MAX_VARINT_LEN: usize = 10;

/// Encodes one record with its length prefix.
pub fn encode_frame(message: &EncodedMessage) -> Bytes {
    Bytes::from(message.encode_length_delimited_to_vec())
}

/// Incremental decoder for a stream of length-delimited records.
///
/// Bytes are fed in arbitrary chunks with [`FrameDecoder::extend`];
/// [`FrameDecoder::next_frame`] yields a record once it is complete and
/// `Ok(None)` while more bytes are needed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet consumed as a complete record.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<EncodedMessage>, RelayError> {
        let Some(prefix_len) = self.prefix_len()? else {
            return Ok(None);
        };
        let len = prost::decode_length_delimiter(&self.buf[..prefix_len])?;
        if len > MAX_FRAME_LEN {
            return Err(RelayError::Frame(format!(
                "record of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }
        if self.buf.len() < prefix_len + len {
            return Ok(None);
        }
        self.buf.advance(prefix_len);
        let record = self.buf.split_to(len).freeze();
        Ok(Some(EncodedMessage::decode(record)?))
    }

    /// Called at end of stream; fails when a partial record is left over.
    pub fn finish(&self) -> Result<(), RelayError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Frame(format!(
                "stream ended inside a record ({} trailing bytes)",
                self.buf.len()
            )))
        }
    }

    /// Decodes a complete body in one go.
    pub fn decode_all(body: &[u8]) -> Result<Vec<EncodedMessage>, RelayError> {
        let mut decoder = Self::new();
        decoder.extend(body);
        let mut out = Vec::new();
        while let Some(message) = decoder.next_frame()? {
            out.push(message);
        }
        decoder.finish()?;
        Ok(out)
    }

    fn prefix_len(&self) -> Result<Option<usize>, RelayError> {
        match self
            .buf
            .iter()
            .take(MAX_VARINT_LEN)
            .position(|b| b & 0x80 == 0)
        {
            Some(pos) => Ok(Some(pos + 1)),
            None if self.buf.len() >= MAX_VARINT_LEN => {
                Err(RelayError::Frame("invalid length prefix".to_string()))
            }
            None => Ok(None),
        }
    }
}
