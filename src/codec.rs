//! Binary codec
//!
//! Serialization bridge between typed application keys/values and the raw
//! byte spans the engine consumes.
//!
//! ## Buffer Layout
//!
//! Encoding appends to a caller-supplied scratch buffer and reports the
//! number of bytes written. For an upsert the key and value are encoded
//! back to back into one buffer:
//!
//! ```text
//! ┌─────────────────────┬──────────────────────────┐
//! │     key bytes       │       value bytes        │
//! └─────────────────────┴──────────────────────────┘
//!                       ▲
//!               key-length boundary
//!                (tracked by caller)
//! ```
//!
//! The caller records the key-length boundary and hands the engine two
//! sub-slices of the same allocation, so no copy is made between encoding
//! and the engine call.
//!
//! Decoding is only performed on an `Ok` engine status; malformed bytes
//! surface as [`KvError::Codec`](crate::KvError::Codec), never as a
//! silently defaulted value.

use bincode::Options as _;
use bytes::buf::BufMut;
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CodecOptions;
use crate::error::Result;

/// Stateless encoder/decoder, shareable across threads
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    options: CodecOptions,
}

impl BinaryCodec {
    /// Create a codec with the given options.
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    /// Serialize `value`, appending to `buf`. Returns the number of bytes
    /// written.
    ///
    /// Encoding is deterministic: the same value always produces the same
    /// bytes, which is what makes encoded keys usable as engine keys.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T, buf: &mut BytesMut) -> Result<usize> {
        let before = buf.len();
        let writer = (&mut *buf).writer();

        // Each bincode option changes the config's concrete type, so the
        // four shapes are dispatched here rather than stored in a field.
        let base = bincode::options();
        match (self.options.varint_integers, self.options.byte_limit) {
            (true, None) => base.serialize_into(writer, value),
            (true, Some(limit)) => base.with_limit(limit).serialize_into(writer, value),
            (false, None) => base.with_fixint_encoding().serialize_into(writer, value),
            (false, Some(limit)) => base
                .with_fixint_encoding()
                .with_limit(limit)
                .serialize_into(writer, value),
        }?;

        Ok(buf.len() - before)
    }

    /// Deserialize a value from the exact byte span produced by
    /// [`encode`](Self::encode). Trailing bytes are rejected.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let base = bincode::options();
        let value = match (self.options.varint_integers, self.options.byte_limit) {
            (true, None) => base.deserialize(bytes),
            (true, Some(limit)) => base.with_limit(limit).deserialize(bytes),
            (false, None) => base.with_fixint_encoding().deserialize(bytes),
            (false, Some(limit)) => base
                .with_fixint_encoding()
                .with_limit(limit)
                .deserialize(bytes),
        }?;
        Ok(value)
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new(CodecOptions::default())
    }
}
