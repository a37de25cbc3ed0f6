//! At-rest sealing of private key material (§4.1 `secure_storage_seal`/`_open`).
//!
//! Format: `salt(16) || nonce(12) || tag(16) || ciphertext`. The key-encryption
//! key is derived from the caller's passphrase via PBKDF2-HMAC-SHA256 with
//! 600 000 rounds (OWASP's current minimum recommendation for PBKDF2-SHA256),
//! and the payload is sealed with AES-256-GCM.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KDF_ROUNDS: u32 = 600_000;
const KEY_LEN: usize = 32;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KDF_ROUNDS, &mut key);
    key
}

/// Seal `plaintext` under `passphrase`, producing `salt || nonce || tag || ciphertext`.
pub fn secure_storage_seal(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let key_bytes = derive_key(passphrase, &salt);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);

    // aes-gcm appends the 16-byte tag to the ciphertext.
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::StorageCorrupt)?;
    let split_at = sealed.len() - TAG_LEN;
    let (ciphertext, tag) = sealed.split_at(split_at);

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + TAG_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(tag);
    out.extend_from_slice(ciphertext);
    Ok(out)
}

/// Inverse of [`secure_storage_seal`]. Fails with `StorageCorrupt` on an
/// authentication failure (wrong passphrase or tampered bytes).
pub fn secure_storage_open(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if sealed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(Error::StorageCorrupt);
    }
    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce_bytes, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key_bytes = derive_key(passphrase, salt);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|_| Error::StorageCorrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let plaintext = b"super secret P-256 scalar";
        let sealed = secure_storage_seal(plaintext, "correct horse battery staple").unwrap();
        let opened = secure_storage_open(&sealed, "correct horse battery staple").unwrap();
        assert_eq!(plaintext.to_vec(), opened);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let plaintext = b"super secret";
        let sealed = secure_storage_seal(plaintext, "pp1").unwrap();
        assert!(secure_storage_open(&sealed, "pp2").is_err());
    }

    #[test]
    fn corrupted_bytes_fail() {
        let plaintext = b"super secret";
        let mut sealed = secure_storage_seal(plaintext, "pp").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(secure_storage_open(&sealed, "pp").is_err());
    }
}
