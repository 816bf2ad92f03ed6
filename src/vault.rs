//! Crypto Vault: authenticated symmetric encryption of credential blobs.
//!
//! Grounded in the secret-wiping pattern of `chronx-crypto`'s `KeyPair` (a
//! `Zeroize`-on-drop secret with a versioned wire format), adapted from a
//! signing key to an AEAD key since this crate needs encrypt/decrypt, not
//! sign/verify.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Current sealed-blob wire format version. Bump when the AEAD scheme changes
/// so `rotate` can tell old ciphertext from new without guessing.
const CURRENT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault key missing from configuration")]
    KeyMissing,
    #[error("vault key must be at least 32 bytes, got {0}")]
    KeyTooShort(usize),
    #[error("ciphertext authentication failed (tampered or wrong key)")]
    Tampered,
    #[error("ciphertext too short to contain version + nonce")]
    Malformed,
    #[error("unsupported ciphertext version {0}")]
    UnsupportedVersion(u8),
}

/// A process-wide symmetric key, held zeroized on drop. Loaded once at
/// startup; fails fast if absent.
pub struct Vault {
    key: Zeroizing<[u8; 32]>,
}

impl Vault {
    /// Build a Vault from a 32-byte key. Fails with `KeyMissing` if the
    /// provided bytes are empty, mirroring "fails fast if absent" at startup.
    pub fn new(key_bytes: &[u8]) -> Result<Self, VaultError> {
        if key_bytes.is_empty() {
            return Err(VaultError::KeyMissing);
        }
        if key_bytes.len() < 32 {
            return Err(VaultError::KeyTooShort(key_bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes[..32]);
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// Seal `plaintext` into a versioned, authenticated ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Tampered)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(CURRENT_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.append(&mut ciphertext);
        Ok(out)
    }

    /// Open a sealed blob back into plaintext. Fails with `Tampered` on MAC
    /// failure (wrong key or corrupted bytes).
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if sealed.len() < 1 + NONCE_LEN {
            return Err(VaultError::Malformed);
        }
        let version = sealed[0];
        if version != CURRENT_VERSION {
            return Err(VaultError::UnsupportedVersion(version));
        }
        let nonce = Nonce::from_slice(&sealed[1..1 + NONCE_LEN]);
        let ciphertext = &sealed[1 + NONCE_LEN..];

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&*self.key));
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Tampered)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Re-encrypt `sealed` under `new_key`, allowing key rotation without
    /// downtime: callers open with the old Vault and seal with a new one
    /// built from `new_key`.
    pub fn rotate(&self, sealed: &[u8], new_key: &[u8]) -> Result<Vec<u8>, VaultError> {
        let plaintext = self.open(sealed)?;
        let new_vault = Vault::new(new_key)?;
        new_vault.seal(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let vault = Vault::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let sealed = vault.seal(b"super secret password").unwrap();
        let opened = vault.open(&sealed).unwrap();
        assert_eq!(&*opened, b"super secret password");
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let vault = Vault::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let mut sealed = vault.seal(b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(matches!(vault.open(&sealed), Err(VaultError::Tampered)));
    }

    #[test]
    fn wrong_key_fails_mac() {
        let vault_a = Vault::new(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let vault_b = Vault::new(b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let sealed = vault_a.seal(b"hello").unwrap();
        assert!(matches!(vault_b.open(&sealed), Err(VaultError::Tampered)));
    }

    #[test]
    fn empty_key_missing() {
        assert!(matches!(Vault::new(b""), Err(VaultError::KeyMissing)));
    }

    #[test]
    fn rotate_preserves_plaintext_under_new_key() {
        let old = Vault::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let sealed = old.seal(b"rotate me").unwrap();
        let new_key = b"fedcba9876543210fedcba9876543210";
        let rotated = old.rotate(&sealed, new_key).unwrap();
        let new_vault = Vault::new(new_key).unwrap();
        assert_eq!(&*new_vault.open(&rotated).unwrap(), b"rotate me");
    }

    #[test]
    fn malformed_ciphertext_rejected() {
        let vault = Vault::new(b"0123456789abcdef0123456789abcdef").unwrap();
        assert!(matches!(vault.open(&[1, 2, 3]), Err(VaultError::Malformed)));
    }
}
