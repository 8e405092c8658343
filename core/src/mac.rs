use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const MAC_SIZE: usize = 32;

/// Keyed content identifier. Two blobs are the same blob iff their MACs
/// (within one resource type) are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Mac([u8; MAC_SIZE]);

impl Mac {
    pub const fn new(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; MAC_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; MAC_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidParameter("Invalid parameter".to_string()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn short_string(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl From<[u8; MAC_SIZE]> for Mac {
    fn from(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<blake3::Hash> for Mac {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl FromStr for Mac {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != MAC_SIZE * 2 {
            return Err(Error::InvalidParameter("Invalid parameter".to_string()));
        }
        let bytes =
            hex::decode(s).map_err(|_| Error::InvalidParameter("Invalid parameter".to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Mac {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Mac {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Mac::from_str(&s).map_err(serde::de::Error::custom)
        } else {
            Ok(Self(<[u8; MAC_SIZE]>::deserialize(deserializer)?))
        }
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", self.to_hex())
    }
}

/// Computes MACs under a repository secret.
///
/// Encrypted repositories key the hasher with the passphrase-derived key.
/// Unencrypted ones key it with the BLAKE3 hash of the repository id so the
/// same code path applies to both.
#[derive(Clone)]
pub struct MacHasher {
    key: [u8; 32],
}

impl MacHasher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_secret(secret: &[u8]) -> Self {
        match <[u8; 32]>::try_from(secret) {
            Ok(key) => Self { key },
            Err(_) => Self {
                key: *blake3::hash(secret).as_bytes(),
            },
        }
    }

    /// Unkeyed integrity checksum, for data read before any secret is known.
    pub fn checksum() -> Self {
        Self::new([0u8; 32])
    }

    pub fn for_repository_id(repository_id: &uuid::Uuid) -> Self {
        Self::new(*blake3::hash(repository_id.as_bytes()).as_bytes())
    }

    pub fn compute(&self, data: &[u8]) -> Mac {
        Mac::from(blake3::keyed_hash(&self.key, data))
    }
}

impl fmt::Debug for MacHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacHasher(..)")
    }
}
