//! Payload envelope for tiers without native TTL
//!
//! Tiers that cannot expire entries on their own (file, snippet, shm, mmap)
//! store the value together with an absolute expiry instant and evaluate it
//! on read. Two physical forms exist:
//!
//! - a compact binary form (shm/mmap segments, tolerates zero padding)
//! - a JSON form (the snippet tier's generated source units)
//!
//! An unparseable payload is treated as a miss by every caller, never as an
//! error.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Magic prefix for the binary envelope form
const MAGIC: u32 = 0x53_43_45_31; // "SCE1"

/// Binary header: magic + expires + value length
const HEADER_LEN: usize = 4 + 8 + 4;

/// Current wall-clock time as epoch seconds
#[inline]
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Convert an optional TTL into an absolute expiry (0 = never expires)
#[inline]
pub fn expiry_from_ttl(ttl: Option<Duration>) -> u64 {
    match ttl {
        Some(ttl) => epoch_now().saturating_add(ttl.as_secs()),
        None => 0,
    }
}

/// A cached value paired with its absolute expiry instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Expiry as epoch seconds; 0 means the entry never expires
    pub expires: u64,
    /// The raw cached bytes
    #[serde(with = "serde_bytes_vec")]
    pub value: Vec<u8>,
}

impl Envelope {
    /// Wrap a value with an optional TTL
    pub fn new(value: impl Into<Vec<u8>>, ttl: Option<Duration>) -> Self {
        Self {
            expires: expiry_from_ttl(ttl),
            value: value.into(),
        }
    }

    /// Check whether the entry is past its expiry
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires != 0 && epoch_now() > self.expires
    }

    /// Remaining lifetime, if the entry carries an expiry
    pub fn remaining_ttl(&self) -> Option<Duration> {
        if self.expires == 0 {
            return None;
        }
        Some(Duration::from_secs(self.expires.saturating_sub(epoch_now())))
    }

    /// Take the value out as `Bytes`
    pub fn into_value(self) -> Bytes {
        Bytes::from(self.value)
    }

    /// Encode into the binary segment form
    pub fn encode_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.value.len());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.expires.to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Decode from the binary segment form
    ///
    /// Trailing bytes beyond the declared length are ignored, so a payload
    /// padded out to a fixed segment size decodes cleanly. Returns `None`
    /// for anything that does not parse.
    pub fn decode_binary(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        if magic != MAGIC {
            return None;
        }
        let expires = u64::from_le_bytes(buf[4..12].try_into().ok()?);
        let len = u32::from_le_bytes(buf[12..16].try_into().ok()?) as usize;
        if buf.len() < HEADER_LEN + len {
            return None;
        }
        Some(Self {
            expires,
            value: buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
        })
    }

    /// Size of the binary form before any padding
    pub fn binary_len(&self) -> usize {
        HEADER_LEN + self.value.len()
    }
}

/// Serialize the value bytes as a JSON array of numbers
///
/// Keeps the snippet tier's generated units self-describing without pulling
/// in a text encoding for arbitrary bytes.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

// =============================================================================
// Tests
// =============================================================================
