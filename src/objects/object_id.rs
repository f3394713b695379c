//! Object identifier (SHA-1 hash)
//!
//! A 160-bit content address with two textual forms: 40-hex lowercase
//! and 20-byte raw. Equality and ordering are byte-wise on the raw form.
//!
//! ## Storage
//!
//! Loose objects are stored at `objects/<first-2-hex>/<remaining-38>`.

use crate::errors::ObjectFormatError;
use crate::objects::ObjectType;
use sha1::{Digest, Sha1};
use std::path::PathBuf;

/// Length of the raw (binary) form in bytes.
pub const RAW_LENGTH: usize = 20;

/// Length of the hexadecimal form in characters.
pub const HEX_LENGTH: usize = 40;

/// Standard abbreviation length.
const SHORT_LENGTH: usize = 7;

/// Object identifier: the SHA-1 of an object's canonical serialization.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId([u8; RAW_LENGTH]);

impl ObjectId {
    /// The all-zero id, used by wire protocols to mean "no object".
    pub fn zero() -> Self {
        Self([0; RAW_LENGTH])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; RAW_LENGTH]
    }

    pub fn from_raw(bytes: [u8; RAW_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse the 20-byte raw form from a slice.
    pub fn from_raw_slice(bytes: &[u8]) -> Result<Self, ObjectFormatError> {
        let raw: [u8; RAW_LENGTH] = bytes
            .try_into()
            .map_err(|_| ObjectFormatError::BadId(format!("{} raw bytes", bytes.len())))?;
        Ok(Self(raw))
    }

    /// Parse the 40-hex lowercase form.
    pub fn from_hex(hex: &str) -> Result<Self, ObjectFormatError> {
        Self::from_hex_bytes(hex.as_bytes())
    }

    pub fn from_hex_bytes(hex: &[u8]) -> Result<Self, ObjectFormatError> {
        if hex.len() != HEX_LENGTH {
            return Err(ObjectFormatError::BadId(format!(
                "expected {HEX_LENGTH} hex characters, got {}",
                hex.len()
            )));
        }

        let mut raw = [0u8; RAW_LENGTH];
        for (i, pair) in hex.chunks_exact(2).enumerate() {
            let high = hex_value(pair[0])?;
            let low = hex_value(pair[1])?;
            raw[i] = (high << 4) | low;
        }
        Ok(Self(raw))
    }

    /// Compute the id of an object from its kind and payload:
    /// `SHA-1("<wire-name> <decimal-size>\0" || payload)`.
    pub fn for_object(kind: ObjectType, payload: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(payload.len().to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(payload);
        Self(hasher.finalize().into())
    }

    /// Hash an already-framed byte stream (header and payload).
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; RAW_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(HEX_LENGTH);
        for byte in self.0 {
            hex.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            hex.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }
        hex
    }

    /// First seven hex characters, the standard abbreviation.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_LENGTH);
        hex
    }

    /// Relative path of the loose object file: `xx/yyyy…`.
    pub fn loose_path(&self) -> PathBuf {
        let hex = self.to_hex();
        let (dir, file) = hex.split_at(2);
        PathBuf::from(dir).join(file)
    }

    /// First byte of the raw form, the pack-index fanout key.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn hex_value(byte: u8) -> Result<u8, ObjectFormatError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        _ => Err(ObjectFormatError::BadId(format!(
            "invalid hex character {:?}",
            byte as char
        ))),
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl std::str::FromStr for ObjectId {
    type Err = ObjectFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
