//! Byte form of values handed to the network and kept in the pending list.
//!
//! Everything uses bincode's standard configuration. Decoding is strict: the
//! whole buffer must be consumed, so a pending-list entry with junk appended
//! is an error rather than a silently truncated transaction.

pub use bincode::{Decode, Encode};

use bincode::config::{Configuration, standard};

use crate::error::EncodingError;

const fn wire_config() -> Configuration {
    standard()
}

fn decode_exact<T: Decode<()>>(buf: &[u8]) -> Result<T, EncodingError> {
    let (decoded, consumed) = bincode::decode_from_slice(buf, wire_config())?;
    if consumed != buf.len() {
        return Err(EncodingError::TrailingBytes {
            consumed,
            total: buf.len(),
        });
    }
    Ok(decoded)
}

/// Serialized transaction bytes, raw for submission and hex inside JSON.
pub trait WireEncodable: Sized + Encode + Decode<()> {
    fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(bincode::encode_to_vec(self, wire_config())?)
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, EncodingError> {
        decode_exact(buf)
    }

    fn to_hex(&self) -> Result<String, EncodingError> {
        self.to_bytes().map(hex::encode)
    }

    fn from_hex(encoded: &str) -> Result<Self, EncodingError> {
        decode_exact(&hex::decode(encoded)?)
    }
}
