//! Compression-then-encryption pipeline applied to every persisted payload.

use crate::config::{CompressionConfig, Configuration, DEFAULT_COMPRESSION_ALGORITHM};
use crate::crypto::Encryptor;
use crate::{Error, Result};
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::Read;

pub struct Transform {
    compression: Option<CompressionConfig>,
    encryptor: Option<Encryptor>,
}

impl Transform {
    /// Builds the pipeline described by `config`. An encrypted configuration
    /// requires the session secret.
    pub fn new(config: &Configuration, secret: Option<&[u8]>) -> Result<Self> {
        if let Some(compression) = &config.compression {
            if !compression
                .algorithm
                .eq_ignore_ascii_case(DEFAULT_COMPRESSION_ALGORITHM)
            {
                return Err(Error::Compression(format!(
                    "unsupported compression algorithm {}",
                    compression.algorithm
                )));
            }
        }

        let encryptor = match (&config.encryption, secret) {
            (Some(_), Some(secret)) => Some(Encryptor::new(secret)?),
            (Some(_), None) => {
                return Err(Error::Encryption(
                    "repository is encrypted but no secret was provided".to_string(),
                ))
            }
            (None, _) => None,
        };

        Ok(Self {
            compression: config.compression.clone(),
            encryptor,
        })
    }

    pub fn is_encrypting(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Compresses then encrypts, each step only if configured.
    pub fn encode<R: Read>(&self, input: R) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        match &self.compression {
            Some(compression) => {
                let level = flate2::Compression::new(compression.level.min(9));
                ZlibEncoder::new(input, level)
                    .read_to_end(&mut buffer)
                    .map_err(|e| Error::Compression(e.to_string()))?;
            }
            None => {
                let mut input = input;
                input.read_to_end(&mut buffer)?;
            }
        }

        match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&buffer),
            None => Ok(buffer),
        }
    }

    /// Inverse of [`Transform::encode`]: decrypts then inflates.
    pub fn decode<R: Read>(&self, mut input: R) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer)?;

        if let Some(encryptor) = &self.encryptor {
            buffer = encryptor.decrypt(&buffer)?;
        }

        match &self.compression {
            Some(_) => {
                let mut output = Vec::new();
                ZlibDecoder::new(buffer.as_slice())
                    .read_to_end(&mut output)
                    .map_err(|e| Error::Compression(e.to_string()))?;
                Ok(output)
            }
            None => Ok(buffer),
        }
    }

    pub fn encode_buffer(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.encode(data)
    }

    pub fn decode_buffer(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterKey;

    fn encrypted_config() -> Configuration {
        let (encryption, _) =
            crate::crypto::new_encryption_config("pass", crate::crypto::test_kdf_params()).unwrap();
        Configuration::new().with_encryption(Some(encryption))
    }

    #[test]
    fn test_plain_compressed_roundtrip() {
        let transform = Transform::new(&Configuration::new(), None).unwrap();
        let data = vec![7u8; 10_000];
        let encoded = transform.encode_buffer(&data).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(transform.decode_buffer(&encoded).unwrap(), data);
    }

    #[test]
    fn test_identity_when_nothing_configured() {
        let config = Configuration::new().with_compression(None);
        let transform = Transform::new(&config, None).unwrap();
        let encoded = transform.encode_buffer(b"as is").unwrap();
        assert_eq!(encoded, b"as is");
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let key = MasterKey::generate();
        let transform = Transform::new(&encrypted_config(), Some(key.as_bytes())).unwrap();
        assert!(transform.is_encrypting());

        let encoded = transform.encode_buffer(b"secret payload").unwrap();
        assert_ne!(encoded, b"secret payload");
        assert_eq!(transform.decode_buffer(&encoded).unwrap(), b"secret payload");

        let other = Transform::new(&encrypted_config(), Some(MasterKey::generate().as_bytes())).unwrap();
        assert!(other.decode_buffer(&encoded).is_err());
    }

    #[test]
    fn test_encrypted_requires_secret() {
        assert!(matches!(
            Transform::new(&encrypted_config(), None),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let transform = Transform::new(&Configuration::new(), None).unwrap();
        assert!(matches!(
            transform.decode_buffer(b"definitely not zlib"),
            Err(Error::Compression(_))
        ));
    }
}
