//! Native `.ccfr` storage format.
//!
//! A serialized forest is a 32-byte header followed by a Postcard-encoded
//! payload. Trees are recursive tagged enums, so the payload carries each
//! tree as a preorder stream of leaf/branch nodes.
//!
//! # Format Structure
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     Magic ("CCFR")
//! 4       1     Version major
//! 5       1     Version minor
//! 6       1     Model kind (0 = classification, 1 = regression)
//! 7       1     Reserved
//! 8       4     Payload size (bytes)
//! 12      4     CRC32 checksum of payload
//! 16      4     Number of expanded feature columns
//! 20      4     Number of target columns
//! 24      8     Reserved
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ccforest::io::{serialize_forest, deserialize_forest};
//!
//! let bytes = serialize_forest(&forest)?;
//! let loaded = deserialize_forest(&bytes)?;
//! ```

use std::io::{Read, Write};

use thiserror::Error;

use crate::forest::{CcForest, ModelKind};

// ============================================================================
// Constants
// ============================================================================

/// Magic bytes identifying a ccforest model file.
pub const MAGIC: &[u8; 4] = b"CCFR";

/// Current format version (major).
pub const CURRENT_VERSION_MAJOR: u8 = 1;

/// Current format version (minor).
pub const CURRENT_VERSION_MINOR: u8 = 0;

/// Size of the format header in bytes.
pub const HEADER_SIZE: usize = 32;

// ============================================================================
// Error types
// ============================================================================

/// Errors that can occur during serialization.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Postcard encoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),
}

/// Errors that can occur during deserialization.
#[derive(Debug, Error)]
pub enum DeserializeError {
    /// File is not a ccforest model (wrong magic).
    #[error("not a ccforest model file")]
    NotAModel,

    /// Model requires a newer version of ccforest.
    #[error("model requires ccforest {major}.{minor} or later")]
    UnsupportedVersion { major: u8, minor: u8 },

    /// Payload checksum doesn't match.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// File was truncated or incomplete.
    #[error("unexpected end of data")]
    Truncated,

    /// I/O error during reading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Postcard decoding error.
    #[error("decoding error: {0}")]
    Decoding(#[from] postcard::Error),
}

// ============================================================================
// Format header
// ============================================================================

/// 32-byte header for the native storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub model_kind: ModelKind,
    /// Size of the payload in bytes.
    pub payload_size: u32,
    /// CRC32 checksum of the payload.
    pub checksum: u32,
    /// Number of expanded feature columns.
    pub num_features: u32,
    /// Number of target columns.
    pub num_outputs: u32,
}

impl FormatHeader {
    /// Serialize the header to its 32-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        buf[6] = match self.model_kind {
            ModelKind::Classification => 0,
            ModelKind::Regression => 1,
        };
        buf[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_features.to_le_bytes());
        buf[20..24].copy_from_slice(&self.num_outputs.to_le_bytes());
        buf
    }

    /// Parse a header from 32 bytes.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, DeserializeError> {
        if &buf[0..4] != MAGIC {
            return Err(DeserializeError::NotAModel);
        }
        let version_major = buf[4];
        let version_minor = buf[5];
        if version_major > CURRENT_VERSION_MAJOR {
            return Err(DeserializeError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }
        let model_kind = match buf[6] {
            0 => ModelKind::Classification,
            1 => ModelKind::Regression,
            _ => return Err(DeserializeError::NotAModel),
        };
        Ok(Self {
            version_major,
            version_minor,
            model_kind,
            payload_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            checksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            num_features: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            num_outputs: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
        })
    }
}

// ============================================================================
// Serialize / deserialize
// ============================================================================

/// Serialize a forest to bytes (header + postcard payload).
pub fn serialize_forest(forest: &CcForest) -> Result<Vec<u8>, SerializeError> {
    let payload = postcard::to_allocvec(forest)?;
    let header = FormatHeader {
        version_major: CURRENT_VERSION_MAJOR,
        version_minor: CURRENT_VERSION_MINOR,
        model_kind: forest.kind(),
        payload_size: payload.len() as u32,
        checksum: crc32fast::hash(&payload),
        num_features: forest.n_features() as u32,
        num_outputs: forest.n_outputs() as u32,
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Deserialize a forest from bytes produced by [`serialize_forest`].
pub fn deserialize_forest(bytes: &[u8]) -> Result<CcForest, DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::Truncated);
    }
    let mut header_buf = [0u8; HEADER_SIZE];
    header_buf.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = FormatHeader::from_bytes(&header_buf)?;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() < header.payload_size as usize {
        return Err(DeserializeError::Truncated);
    }
    let payload = &payload[..header.payload_size as usize];

    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(DeserializeError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(postcard::from_bytes(payload)?)
}

/// Write a forest to any writer.
pub fn write_forest<W: Write>(forest: &CcForest, mut writer: W) -> Result<(), SerializeError> {
    let bytes = serialize_forest(forest)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Read a forest from any reader.
pub fn read_forest<R: Read>(mut reader: R) -> Result<CcForest, DeserializeError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    deserialize_forest(&bytes)
}

// ============================================================================
// Tests
// ============================================================================
