//! An issuer's published set of signing keys

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    error::KeySetError,
    jwk::{JwkDto, KeyId, KeyIdRef, SigningKey},
};

/// An issuer's set of signing keys, unique by key id
///
/// A key set is built wholesale from a JWKS document and never patched.
/// Construction rejects a document that names the same key id twice, so a
/// lookup by key id is never ambiguous.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct KeySet {
    keys: Vec<SigningKey>,
    index: HashMap<KeyId, usize>,
}

impl KeySet {
    /// An empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key set from individual keys, preserving their order
    ///
    /// # Errors
    ///
    /// Returns an error if two keys share a key id.
    pub fn from_keys(keys: impl IntoIterator<Item = SigningKey>) -> Result<Self, KeySetError> {
        let mut set = Self::new();
        for key in keys {
            set.insert(key)?;
        }
        Ok(set)
    }

    /// Parses a JWKS document
    ///
    /// Entries that are not usable RSA signing keys are skipped with a
    /// warning; other key types are legitimately published alongside them.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a JSON object with a `keys`
    /// array, or if two usable keys share a key id.
    pub fn from_json(json: &[u8]) -> Result<Self, KeySetError> {
        let document: JwksDocument = serde_json::from_slice(json)?;
        Self::from_document(document)
    }

    fn from_document(document: JwksDocument) -> Result<Self, KeySetError> {
        let mut set = Self::new();
        for (idx, dto) in document.keys.into_iter().enumerate() {
            let kid = dto.kid.clone();
            let kty = dto.kty.clone();
            match SigningKey::try_from(dto) {
                Ok(key) => set.insert(key)?,
                Err(error) => {
                    let error: &dyn std::error::Error = &error;
                    tracing::warn!(
                        jwks.idx = idx,
                        jwk.kid = ?kid,
                        jwk.kty = ?kty,
                        error,
                        "ignoring unusable JWK"
                    );
                }
            }
        }
        Ok(set)
    }

    fn insert(&mut self, key: SigningKey) -> Result<(), KeySetError> {
        if self.index.contains_key(key.key_id()) {
            return Err(KeySetError::DuplicateKeyId(key.key_id().as_str().to_owned()));
        }

        self.index.insert(key.key_id().to_owned(), self.keys.len());
        self.keys.push(key);
        Ok(())
    }

    /// The key with the given key id, if present
    #[must_use]
    pub fn get(&self, kid: &KeyIdRef) -> Option<&SigningKey> {
        self.index.get(kid).map(|&idx| &self.keys[idx])
    }

    /// The keys in document order
    #[must_use]
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// The number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no usable keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<JwkDto>,
}
