//! Symmetric encryption and one-way digests for protecting stored secrets
//!
//! These utilities are independent of token verification. Ciphertexts are
//! AES-256-GCM, laid out as a version byte, a 12-byte random nonce, then the
//! sealed payload with its 16-byte tag. The version byte is bound to the
//! ciphertext as associated data.
//!
//! ```
//! use gatehouse::cipher;
//!
//! let key = cipher::generate_key().unwrap();
//! let sealed = cipher::encrypt(b"client secret", &key).unwrap();
//! assert_eq!(cipher::decrypt(&sealed, &key).unwrap(), b"client secret");
//! ```

use std::fmt;

use aliri_base64::{Base64Url, Base64UrlRef};
use ring::{
    aead,
    digest,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};

use crate::error::CipherError;

const VERSION: u8 = 0x01;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// A 256-bit key for [`encrypt`] and [`decrypt`]
///
/// Displays and serializes as unpadded base64url. `Debug` output is
/// redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Base64Url", into = "Base64Url")]
#[must_use]
pub struct SymmetricKey(Base64Url);

impl SymmetricKey {
    /// Wraps existing key material
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }
        Ok(Self(Base64Url::from_raw(bytes.to_vec())))
    }

    /// Decodes a key from its base64url text form
    ///
    /// # Errors
    ///
    /// Returns an error if `encoded` is not base64url or is not a 256-bit key.
    pub fn from_encoded(encoded: &str) -> Result<Self, CipherError> {
        let raw = Base64Url::from_encoded(encoded.trim_end_matches('='))
            .map_err(|_| CipherError::InvalidKey)?;
        Self::try_from(raw)
    }

    /// The raw key material
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn aead_key(&self) -> Result<aead::LessSafeKey, CipherError> {
        let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, self.0.as_slice())
            .map_err(|_| CipherError::InvalidKey)?;
        Ok(aead::LessSafeKey::new(unbound))
    }
}

impl TryFrom<Base64Url> for SymmetricKey {
    type Error = CipherError;

    fn try_from(raw: Base64Url) -> Result<Self, Self::Error> {
        if raw.as_slice().len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }
        Ok(Self(raw))
    }
}

impl From<SymmetricKey> for Base64Url {
    fn from(key: SymmetricKey) -> Self {
        key.0
    }
}

impl AsRef<Base64UrlRef> for SymmetricKey {
    fn as_ref(&self) -> &Base64UrlRef {
        &self.0
    }
}

impl fmt::Display for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(***)")
    }
}

/// Generates a fresh random key
///
/// # Errors
///
/// Returns an error if the system random number generator fails.
pub fn generate_key() -> Result<SymmetricKey, CipherError> {
    let mut bytes = [0_u8; KEY_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| CipherError::Randomness)?;
    SymmetricKey::from_bytes(&bytes)
}

/// Encrypts and authenticates `plaintext` under `key`
///
/// Every call uses a fresh random nonce, so encrypting the same plaintext
/// twice yields different ciphertexts.
///
/// # Errors
///
/// Returns an error if no nonce can be generated or sealing fails.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CipherError> {
    let mut nonce = [0_u8; aead::NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| CipherError::Randomness)?;

    let mut sealed = plaintext.to_vec();
    key.aead_key()?
        .seal_in_place_append_tag(
            aead::Nonce::assume_unique_for_key(nonce),
            aead::Aad::from([VERSION]),
            &mut sealed,
        )
        .map_err(|_| CipherError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(1 + nonce.len() + sealed.len());
    out.push(VERSION);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypts a ciphertext produced by [`encrypt`]
///
/// # Errors
///
/// Returns [`CipherError::DecryptionFailed`] if the ciphertext was sealed
/// with a different key, has been modified or truncated, or carries an
/// unknown version.
pub fn decrypt(ciphertext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CipherError> {
    let (&version, rest) = ciphertext
        .split_first()
        .ok_or(CipherError::DecryptionFailed)?;
    if version != VERSION || rest.len() < aead::NONCE_LEN + TAG_LEN {
        return Err(CipherError::DecryptionFailed);
    }

    let (nonce, sealed) = rest.split_at(aead::NONCE_LEN);
    let nonce = aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| CipherError::DecryptionFailed)?;

    let mut in_out = sealed.to_vec();
    let len = key
        .aead_key()?
        .open_in_place(nonce, aead::Aad::from([version]), &mut in_out)
        .map_err(|_| CipherError::DecryptionFailed)?
        .len();
    in_out.truncate(len);
    Ok(in_out)
}

/// SHA-256 of `text`, as 64 lowercase hex characters
#[must_use]
pub fn digest(text: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn round_trips() -> Result<()> {
        let key = generate_key()?;
        for plaintext in [&b""[..], b"x", b"a longer secret with \x00 bytes \xff"] {
            let sealed = encrypt(plaintext, &key)?;
            assert_eq!(sealed.len(), 1 + 12 + plaintext.len() + 16);
            assert_eq!(decrypt(&sealed, &key)?, plaintext);
        }
        Ok(())
    }

    #[test]
    fn generated_keys_differ() -> Result<()> {
        assert_ne!(generate_key()?, generate_key()?);
        Ok(())
    }

    #[test]
    fn same_plaintext_encrypts_differently() -> Result<()> {
        let key = generate_key()?;
        assert_ne!(encrypt(b"same", &key)?, encrypt(b"same", &key)?);
        Ok(())
    }

    #[test]
    fn wrong_key_fails() -> Result<()> {
        let sealed = encrypt(b"secret", &generate_key()?)?;
        assert_eq!(
            decrypt(&sealed, &generate_key()?),
            Err(CipherError::DecryptionFailed)
        );
        Ok(())
    }

    #[test]
    fn tampering_fails() -> Result<()> {
        let key = generate_key()?;
        let sealed = encrypt(b"secret", &key)?;

        for idx in [1, 13, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            assert_eq!(decrypt(&tampered, &key), Err(CipherError::DecryptionFailed));
        }
        Ok(())
    }

    #[test]
    fn truncation_and_version_fail() -> Result<()> {
        let key = generate_key()?;
        let sealed = encrypt(b"secret", &key)?;

        assert_eq!(decrypt(&[], &key), Err(CipherError::DecryptionFailed));
        assert_eq!(decrypt(&sealed[..20], &key), Err(CipherError::DecryptionFailed));

        let mut other_version = sealed;
        other_version[0] = 0x80;
        assert_eq!(decrypt(&other_version, &key), Err(CipherError::DecryptionFailed));
        Ok(())
    }

    #[test]
    fn key_text_form_round_trips() -> Result<()> {
        let key = generate_key()?;
        let text = key.to_string();
        assert_eq!(text.len(), 43);
        assert_eq!(SymmetricKey::from_encoded(&text)?, key);

        let json = serde_json::to_string(&key)?;
        assert_eq!(serde_json::from_str::<SymmetricKey>(&json)?, key);
        Ok(())
    }

    #[test]
    fn short_key_is_rejected() {
        assert_eq!(
            SymmetricKey::from_bytes(&[0; 16]),
            Err(CipherError::InvalidKey)
        );
        assert_eq!(
            SymmetricKey::from_encoded("AQAB"),
            Err(CipherError::InvalidKey)
        );
        assert!(serde_json::from_str::<SymmetricKey>(r#""AQAB""#).is_err());
    }

    #[test]
    fn debug_is_redacted() -> Result<()> {
        let key = generate_key()?;
        assert_eq!(format!("{key:?}"), "SymmetricKey(***)");
        Ok(())
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest("abc"), digest("abc"));
    }
}
