//! File content records: an [`Object`] lists the chunks that make up one file.

use crate::{Error, Mac, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub mac: Mac,
    pub length: u32,
    pub entropy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub mac: Mac,
    pub chunks: Vec<Chunk>,
    pub content_type: String,
    pub entropy: f64,
    pub flags: u32,
    pub custom_metadata: BTreeMap<String, Vec<u8>>,
}

impl Object {
    pub fn new(mac: Mac, content_type: impl Into<String>) -> Self {
        Self {
            mac,
            chunks: Vec::new(),
            content_type: content_type.into(),
            entropy: 0.0,
            flags: 0,
            custom_metadata: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.chunks.iter().map(|c| c.length as u64).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Format(format!("malformed object: {}", e)))
    }
}

/// Shannon entropy of `data` in bits per byte, 0.0 for empty input.
pub fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for byte in data {
        counts[*byte as usize] += 1;
    }
    let total = data.len() as f64;
    counts
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Guesses a MIME type from the leading bytes of a file.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF8", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"\x7fELF", "application/x-executable"),
    ];

    if data.is_empty() {
        return "application/x-empty";
    }
    for (magic, content_type) in SIGNATURES {
        if data.starts_with(magic) {
            return content_type;
        }
    }
    let head = &data[..data.len().min(512)];
    // A multi-byte character cut at the window edge still counts as text.
    let utf8 = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    if utf8 && !head.contains(&0) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_encoding() {
        let mut object = Object::new(Mac::new([1; 32]), "text/plain");
        object.chunks.push(Chunk {
            mac: Mac::new([2; 32]),
            length: 100,
            entropy: 4.5,
        });
        object.chunks.push(Chunk {
            mac: Mac::new([3; 32]),
            length: 50,
            entropy: 1.0,
        });
        object
            .custom_metadata
            .insert("origin".to_string(), b"test".to_vec());

        let back = Object::from_bytes(&object.to_bytes().unwrap()).unwrap();
        assert_eq!(back, object);
        assert_eq!(back.size(), 150);
        assert!(Object::from_bytes(b"\x01").is_err());
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(entropy(b""), 0.0);
        assert_eq!(entropy(&[7u8; 1000]), 0.0);
        let uniform: Vec<u8> = (0..=255u8).collect();
        assert!((entropy(&uniform) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_detect_content_type() {
        assert_eq!(detect_content_type(b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(detect_content_type(b"hello world\n"), "text/plain");
        assert_eq!(detect_content_type(&[0u8, 1, 2, 0]), "application/octet-stream");
        assert_eq!(detect_content_type(b""), "application/x-empty");
    }
}
