use crate::packfile::MAX_PACKFILE_SIZE;
use crate::resources::{ResourceType, FORMAT_VERSION};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_HASHING_ALGORITHM: &str = "BLAKE3";
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "CHACHA20POLY1305";
pub const DEFAULT_COMPRESSION_ALGORITHM: &str = "ZLIB";
pub const DEFAULT_PACKFILE_MAX_SIZE: u64 = 20 * 1024 * 1024;

/// Repository-wide configuration, persisted once at creation under `CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    pub version: u32,
    pub repository_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub hashing: HashingConfig,
    pub compression: Option<CompressionConfig>,
    pub encryption: Option<EncryptionConfig>,
    pub chunking: ChunkingConfig,
    pub packfile: PackfileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashingConfig {
    pub algorithm: String,
    pub bits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionConfig {
    pub algorithm: String,
    pub level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionConfig {
    pub algorithm: String,
    pub kdf_params: KdfParams,
    /// Data encrypted under the derived key at creation; a key is correct
    /// iff it decrypts the canary.
    pub canary: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
    pub memory: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    pub algorithm: String,
    pub min_size: u32,
    pub normal_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackfileConfig {
    pub max_size: u64,
}

impl Configuration {
    /// Unencrypted configuration with default compression and chunking.
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            repository_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            hashing: HashingConfig::default(),
            compression: Some(CompressionConfig::default()),
            encryption: None,
            chunking: ChunkingConfig::default(),
            packfile: PackfileConfig::default(),
        }
    }

    pub fn with_compression(mut self, compression: Option<CompressionConfig>) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_encryption(mut self, encryption: Option<EncryptionConfig>) -> Self {
        self.encryption = encryption;
        self
    }

    /// Sets the pack size threshold, capped at [`MAX_PACKFILE_SIZE`].
    pub fn with_packfile_max_size(mut self, max_size: u64) -> Self {
        self.packfile.max_size = max_size.min(MAX_PACKFILE_SIZE);
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(version: u32, data: &[u8]) -> Result<Self> {
        if !ResourceType::Config.is_supported_version(version) {
            return Err(Error::InvalidFormatVersion {
                resource: ResourceType::Config.to_string(),
                version,
            });
        }
        let config: Configuration = serde_json::from_slice(data)?;
        if !ResourceType::Config.is_supported_version(config.version) {
            return Err(Error::InvalidFormatVersion {
                resource: ResourceType::Config.to_string(),
                version: config.version,
            });
        }
        Ok(config)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_HASHING_ALGORITHM.to_string(),
            bits: 256,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_COMPRESSION_ALGORITHM.to_string(),
            level: 6,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            algorithm: "FASTCDC".to_string(),
            min_size: 64 * 1024,
            normal_size: 1024 * 1024,
            max_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for PackfileConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_PACKFILE_MAX_SIZE,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        use rand::RngCore;
        let mut salt = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);

        Self {
            algorithm: "argon2id".to_string(),
            iterations: 1,
            memory: 65536,
            parallelism: 4,
            salt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_roundtrip() {
        let config = Configuration::new().with_packfile_max_size(1024);
        let bytes = config.to_bytes().unwrap();
        let back = Configuration::from_bytes(FORMAT_VERSION, &bytes).unwrap();
        assert_eq!(back, config);
        assert!(!back.is_encrypted());
        assert_eq!(back.packfile.max_size, 1024);
    }

    #[test]
    fn test_packfile_max_size_is_capped() {
        let config = Configuration::new().with_packfile_max_size(8 << 30);
        assert_eq!(config.packfile.max_size, MAX_PACKFILE_SIZE);
        assert!(config.packfile.max_size <= u32::MAX as u64);
    }

    #[test]
    fn test_rejects_future_major_version() {
        let config = Configuration::new();
        let bytes = config.to_bytes().unwrap();
        assert!(matches!(
            Configuration::from_bytes(200, &bytes),
            Err(Error::InvalidFormatVersion { .. })
        ));
    }

    #[test]
    fn test_kdf_salt_is_random() {
        let a = KdfParams::default();
        let b = KdfParams::default();
        assert_eq!(a.salt.len(), 32);
        assert_ne!(a.salt, b.salt);
    }
}
