use crate::config::{EncryptionConfig, KdfParams, DEFAULT_ENCRYPTION_ALGORITHM};
use crate::{Error, Result};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

const NONCE_SIZE: usize = 12;

pub struct MasterKey {
    key: Vec<u8>,
}

impl MasterKey {
    pub fn derive_from_password(password: &str, params: &KdfParams) -> Result<Self> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(params.memory, params.iterations, params.parallelism, None)
                .map_err(|e| Error::Encryption(e.to_string()))?,
        );

        let salt_str =
            SaltString::encode_b64(&params.salt).map_err(|e| Error::Encryption(e.to_string()))?;

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt_str)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let hash = password_hash
            .hash
            .ok_or_else(|| Error::Encryption("key derivation produced no output".to_string()))?;
        Ok(Self {
            key: hash.as_bytes().to_vec(),
        })
    }

    pub fn generate() -> Self {
        let mut key = vec![0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.key
    }
}

pub struct Encryptor {
    cipher: ChaCha20Poly1305,
}

impl Encryptor {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::Encryption("Key must be 32 bytes".to_string()));
        }

        let key = Key::from_slice(key);
        let cipher = ChaCha20Poly1305::new(key);
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(Error::Encryption("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| Error::Encryption(e.to_string()))
    }
}

/// Derives the repository secret for a passphrase.
pub fn derive_key(params: &KdfParams, passphrase: &str) -> Result<Vec<u8>> {
    Ok(MasterKey::derive_from_password(passphrase, params)?.into_bytes())
}

/// Builds a fresh encryption configuration for `passphrase` and returns it
/// together with the derived secret.
pub fn new_encryption_config(passphrase: &str, params: KdfParams) -> Result<(EncryptionConfig, Vec<u8>)> {
    let key = derive_key(&params, passphrase)?;
    let mut canary = vec![0u8; 32];
    OsRng.fill_bytes(&mut canary);
    let canary = Encryptor::new(&key)?.encrypt(&canary)?;

    Ok((
        EncryptionConfig {
            algorithm: DEFAULT_ENCRYPTION_ALGORITHM.to_string(),
            kdf_params: params,
            canary,
        },
        key,
    ))
}

pub fn verify_canary(config: &EncryptionConfig, key: &[u8]) -> bool {
    Encryptor::new(key)
        .and_then(|encryptor| encryptor.decrypt(&config.canary))
        .is_ok()
}

/// Derives a key from `passphrase` and checks it against the canary.
pub fn unlock(config: &EncryptionConfig, passphrase: &str) -> Result<Vec<u8>> {
    let key = derive_key(&config.kdf_params, passphrase)?;
    if !verify_canary(config, &key) {
        return Err(Error::InvalidPassword);
    }
    Ok(key)
}

#[cfg(test)]
pub(crate) fn test_kdf_params() -> KdfParams {
    KdfParams {
        memory: 64,
        iterations: 1,
        parallelism: 1,
        ..KdfParams::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let encryptor = Encryptor::new(MasterKey::generate().as_bytes()).unwrap();
        let first = encryptor.encrypt(b"state fragment").unwrap();
        let second = encryptor.encrypt(b"state fragment").unwrap();

        assert_ne!(first[..NONCE_SIZE], second[..NONCE_SIZE]);
        assert_eq!(encryptor.decrypt(&first).unwrap(), b"state fragment");
        assert_eq!(encryptor.decrypt(&second).unwrap(), b"state fragment");

        let other = Encryptor::new(MasterKey::generate().as_bytes()).unwrap();
        assert!(matches!(other.decrypt(&first), Err(Error::Encryption(_))));
    }

    #[test]
    fn test_decrypt_rejects_short_input() {
        let encryptor = Encryptor::new(MasterKey::generate().as_bytes()).unwrap();
        assert!(encryptor.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_canary_verification() {
        let (config, key) = new_encryption_config("correct horse", test_kdf_params()).unwrap();
        assert!(verify_canary(&config, &key));
        assert_eq!(unlock(&config, "correct horse").unwrap(), key);
        assert!(matches!(
            unlock(&config, "wrong horse"),
            Err(Error::InvalidPassword)
        ));
    }
}
