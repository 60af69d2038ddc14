//! Record envelope for values written to the store.
//!
//! Layout:
//!
//! ```text
//! magic (4) | version (1) | encoding (1) | payload len (u32 LE) | payload | crc32 (u32 LE)
//! ```

use crate::error::{RegistryError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes for stored records.
const RECORD_MAGIC: &[u8; 4] = b"PSR\0";

/// Current record format version.
const RECORD_VERSION: u8 = 1;

/// magic + version + encoding + length.
const HEADER_LEN: usize = 4 + 1 + 1 + 4;

const CHECKSUM_LEN: usize = 4;

/// Payload encoding format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordEncoding {
    Json,
    MessagePack,
}

impl Default for RecordEncoding {
    fn default() -> Self {
        RecordEncoding::MessagePack
    }
}

impl RecordEncoding {
    fn tag(self) -> u8 {
        match self {
            RecordEncoding::Json => 0,
            RecordEncoding::MessagePack => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(RecordEncoding::Json),
            1 => Ok(RecordEncoding::MessagePack),
            other => Err(RegistryError::InvalidFormat(format!(
                "Unknown record encoding: {}",
                other
            ))),
        }
    }
}

/// Serialize `value` into an envelope.
pub fn encode<T: Serialize>(value: &T, encoding: RecordEncoding) -> Result<Vec<u8>> {
    let payload = match encoding {
        RecordEncoding::Json => serde_json::to_vec(value)?,
        RecordEncoding::MessagePack => rmp_serde::to_vec_named(value)?,
    };

    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        RegistryError::Serialization(format!("Record too large: {} bytes", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    buf.extend_from_slice(RECORD_MAGIC);
    buf.push(RECORD_VERSION);
    buf.push(encoding.tag());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

    Ok(buf)
}

/// Verify and deserialize an envelope. The encoding is read from the header.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(RegistryError::InvalidFormat(format!(
            "Record too short: {} bytes",
            bytes.len()
        )));
    }

    if &bytes[0..4] != RECORD_MAGIC {
        return Err(RegistryError::InvalidFormat("Invalid record magic".into()));
    }

    if bytes[4] != RECORD_VERSION {
        return Err(RegistryError::InvalidFormat(format!(
            "Unsupported record version: {}",
            bytes[4]
        )));
    }

    let encoding = RecordEncoding::from_tag(bytes[5])?;

    let payload_len = read_u32(bytes, 6)? as usize;
    if bytes.len() != HEADER_LEN + payload_len + CHECKSUM_LEN {
        return Err(RegistryError::InvalidFormat(format!(
            "Record length mismatch: header says {} payload bytes, record has {} bytes",
            payload_len,
            bytes.len()
        )));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];

    // Verify checksum
    let expected = read_u32(bytes, HEADER_LEN + payload_len)?;
    let got = crc32fast::hash(payload);
    if expected != got {
        return Err(RegistryError::ChecksumMismatch { expected, got });
    }

    match encoding {
        RecordEncoding::Json => serde_json::from_slice(payload)
            .map_err(|e| RegistryError::Deserialization(e.to_string())),
        RecordEncoding::MessagePack => Ok(rmp_serde::from_slice(payload)?),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| RegistryError::InvalidFormat("Truncated record".into()))?;
    Ok(u32::from_le_bytes(raw))
}
