//! Self-describing wrapper around every object handed to a backend.
//!
//! ```text
//! magic (8) | resource type (u8) | version (u32 LE) | payload | MAC (32)
//! ```
//!
//! The MAC covers header and payload. Ranged reads into a packfile payload
//! must skip [`HEADER_SIZE`] bytes.

use crate::mac::MacHasher;
use crate::resources::ResourceType;
use crate::{Error, Mac, Result};

pub const MAGIC: &[u8; 8] = b"SNAPVLT\0";
pub const HEADER_SIZE: usize = 8 + 1 + 4;
pub const FOOTER_SIZE: usize = 32;

pub fn serialize(hasher: &MacHasher, resource: ResourceType, version: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + FOOTER_SIZE);
    out.extend_from_slice(MAGIC);
    out.push(resource as u8);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(payload);

    let mac = hasher.compute(&out);
    out.extend_from_slice(mac.as_bytes());
    out
}

/// Validates the envelope and returns `(version, payload)`.
pub fn deserialize<'a>(
    hasher: &MacHasher,
    expected: ResourceType,
    data: &'a [u8],
) -> Result<(u32, &'a [u8])> {
    let (resource, version, payload) = parse(data)?;
    if resource != expected {
        return Err(Error::Format(format!(
            "expected {} envelope, found {}",
            expected, resource
        )));
    }
    if !resource.is_supported_version(version) {
        return Err(Error::InvalidFormatVersion {
            resource: resource.to_string(),
            version,
        });
    }

    let body_end = data.len() - FOOTER_SIZE;
    let expected_mac = Mac::from_slice(&data[body_end..])?;
    if hasher.compute(&data[..body_end]) != expected_mac {
        return Err(Error::Format(format!("{} envelope MAC mismatch", resource)));
    }

    Ok((version, payload))
}

/// Reads the header without verifying the MAC.
pub fn parse(data: &[u8]) -> Result<(ResourceType, u32, &[u8])> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(Error::Format(format!("envelope too short: {} bytes", data.len())));
    }
    if &data[..8] != MAGIC {
        return Err(Error::Format("bad envelope magic".to_string()));
    }
    let resource = ResourceType::from_u8(data[8])?;
    let mut version = [0u8; 4];
    version.copy_from_slice(&data[9..13]);
    let version = u32::from_le_bytes(version);
    Ok((resource, version, &data[HEADER_SIZE..data.len() - FOOTER_SIZE]))
}
