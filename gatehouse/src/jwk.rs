//! Public signing keys as published in an issuer's JWKS

use aliri_base64::{Base64Url, Base64UrlRef};
use aliri_braid::braid;
use serde::Deserialize;
use thiserror::Error;

use crate::jwa::SigningAlgorithm;

/// Identifier of a signing key (`kid`)
#[braid(serde, ref_doc = "A borrowed reference to a signing key identifier ([`KeyId`])")]
pub struct KeyId;

/// Smallest RSA modulus accepted, in bytes
const MIN_MODULUS_LEN: usize = 2048 / 8;
/// Largest RSA modulus accepted, in bytes
const MAX_MODULUS_LEN: usize = 8192 / 8;

/// The key was not usable as an RSA signature verification key
#[derive(Debug, Error)]
pub enum KeyRejected {
    /// The key type is not `RSA`
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    /// The key is published for something other than signatures
    #[error("key usage '{0}' is not 'sig'")]
    NotForSigning(String),

    /// The key declares an algorithm that is not an RSA signature algorithm
    #[error("unsupported key algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The key has no `kid`
    #[error("key has no id")]
    MissingKeyId,

    /// A required component is absent
    #[error("missing '{0}' component")]
    MissingComponent(&'static str),

    /// A component is not valid base64url
    #[error("'{0}' component is not valid base64url")]
    InvalidEncoding(&'static str),

    /// The modulus is outside the accepted size range
    #[error("modulus of {0} bits is outside the accepted range")]
    ModulusSize(usize),
}

/// The signature was not produced by this key over the given message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("signature mismatch")]
pub struct SignatureMismatch;

/// An RSA public key used to verify token signatures
///
/// Keys are immutable values. A [`KeySet`][crate::KeySet] owns them, and a
/// verification borrows one for as long as it takes to check a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct SigningKey {
    key_id: KeyId,
    usage: Option<String>,
    algorithm: Option<SigningAlgorithm>,
    modulus: Base64Url,
    exponent: Base64Url,
}

impl SigningKey {
    /// The key type; always `RSA`
    pub const KEY_TYPE: &'static str = "RSA";

    /// Builds a key from its raw big-endian modulus and exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is shorter than 2048 bits or longer
    /// than 8192 bits, or if the exponent is empty.
    pub fn from_components(
        key_id: KeyId,
        modulus: impl Into<Base64Url>,
        exponent: impl Into<Base64Url>,
    ) -> Result<Self, KeyRejected> {
        let modulus = modulus.into();
        let exponent = exponent.into();

        let significant = modulus
            .as_slice()
            .iter()
            .skip_while(|&&b| b == 0)
            .count();
        if !(MIN_MODULUS_LEN..=MAX_MODULUS_LEN).contains(&significant) {
            return Err(KeyRejected::ModulusSize(significant * 8));
        }

        if exponent.as_slice().iter().all(|&b| b == 0) {
            return Err(KeyRejected::MissingComponent("e"));
        }

        Ok(Self {
            key_id,
            usage: None,
            algorithm: None,
            modulus,
            exponent,
        })
    }

    /// Restricts the key to a single algorithm
    pub fn with_algorithm(self, alg: SigningAlgorithm) -> Self {
        Self {
            algorithm: Some(alg),
            ..self
        }
    }

    /// The key id
    #[must_use]
    pub fn key_id(&self) -> &KeyIdRef {
        &self.key_id
    }

    /// The key type (`kty`)
    #[must_use]
    pub fn key_type(&self) -> &'static str {
        Self::KEY_TYPE
    }

    /// The published key usage (`use`), if any
    #[must_use]
    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    /// The algorithm this key is restricted to, if any
    #[must_use]
    pub fn algorithm(&self) -> Option<SigningAlgorithm> {
        self.algorithm
    }

    /// The public modulus (`n`)
    #[must_use]
    pub fn modulus(&self) -> &Base64UrlRef {
        &self.modulus
    }

    /// The public exponent (`e`)
    #[must_use]
    pub fn exponent(&self) -> &Base64UrlRef {
        &self.exponent
    }

    /// Whether this key may be used with `alg`
    #[must_use]
    pub fn allows(&self, alg: SigningAlgorithm) -> bool {
        self.algorithm.map_or(true, |a| a == alg)
    }

    /// Checks `signature` over `message` using `alg`
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify.
    pub fn verify(
        &self,
        alg: SigningAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SignatureMismatch> {
        let pk = ring::signature::RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        pk.verify(alg.verification_params(), message, signature)
            .map_err(|_| SignatureMismatch)
    }
}

/// A single entry of a JWKS document, before it is known to be usable
#[derive(Debug, Deserialize)]
pub(crate) struct JwkDto {
    #[serde(default)]
    pub(crate) kty: Option<String>,
    #[serde(default)]
    pub(crate) kid: Option<KeyId>,
    #[serde(rename = "use", default)]
    pub(crate) usage: Option<String>,
    #[serde(default)]
    pub(crate) alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

impl TryFrom<JwkDto> for SigningKey {
    type Error = KeyRejected;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        match dto.kty.as_deref() {
            Some(Self::KEY_TYPE) => {}
            other => {
                return Err(KeyRejected::UnsupportedKeyType(
                    other.unwrap_or_default().to_owned(),
                ))
            }
        }

        if let Some(usage) = dto.usage.as_deref() {
            if usage != "sig" {
                return Err(KeyRejected::NotForSigning(usage.to_owned()));
            }
        }

        let algorithm = dto
            .alg
            .map(|alg| {
                alg.parse::<SigningAlgorithm>()
                    .map_err(|_| KeyRejected::UnsupportedAlgorithm(alg))
            })
            .transpose()?;

        let key_id = dto.kid.ok_or(KeyRejected::MissingKeyId)?;
        let modulus = decode_component("n", dto.n)?;
        let exponent = decode_component("e", dto.e)?;

        let mut key = Self::from_components(key_id, modulus, exponent)?;
        key.usage = dto.usage;
        key.algorithm = algorithm;
        Ok(key)
    }
}

fn decode_component(name: &'static str, value: Option<String>) -> Result<Base64Url, KeyRejected> {
    let value = value.ok_or(KeyRejected::MissingComponent(name))?;
    Base64Url::from_encoded(value.trim_end_matches('=')).map_err(|_| KeyRejected::InvalidEncoding(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::rsa;

    fn dto(json: &str) -> JwkDto {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn accepts_published_rsa_key() {
        let key = SigningKey::try_from(dto(&rsa::jwk_json())).unwrap();
        assert_eq!(key.key_id().as_str(), rsa::TEST_KEY_ID);
        assert_eq!(key.usage(), Some("sig"));
        assert_eq!(key.algorithm(), Some(SigningAlgorithm::RS256));
        assert_eq!(key.modulus().as_slice().len(), 256);
    }

    #[test]
    fn rejects_elliptic_curve_key() {
        let err = SigningKey::try_from(dto(r#"{"kty":"EC","kid":"ec","crv":"P-256"}"#)).unwrap_err();
        assert!(matches!(err, KeyRejected::UnsupportedKeyType(kty) if kty == "EC"));
    }

    #[test]
    fn rejects_encryption_key() {
        let err = SigningKey::try_from(dto(r#"{"kty":"RSA","kid":"x","use":"enc","n":"AQAB","e":"AQAB"}"#))
            .unwrap_err();
        assert!(matches!(err, KeyRejected::NotForSigning(_)));
    }

    #[test]
    fn rejects_short_modulus() {
        let err = SigningKey::try_from(dto(r#"{"kty":"RSA","kid":"x","n":"AQAB","e":"AQAB"}"#))
            .unwrap_err();
        assert!(matches!(err, KeyRejected::ModulusSize(24)));
    }

    #[test]
    fn rejects_missing_kid() {
        let err = SigningKey::try_from(dto(r#"{"kty":"RSA","n":"AQAB","e":"AQAB"}"#)).unwrap_err();
        assert!(matches!(err, KeyRejected::MissingKeyId));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = SigningKey::try_from(dto(r#"{"kty":"RSA","kid":"x","n":"!!!","e":"AQAB"}"#))
            .unwrap_err();
        assert!(matches!(err, KeyRejected::InvalidEncoding("n")));
    }

    #[test]
    fn algorithm_restriction_is_honored() {
        let key = SigningKey::try_from(dto(&rsa::jwk_json())).unwrap();
        assert!(key.allows(SigningAlgorithm::RS256));
        assert!(!key.allows(SigningAlgorithm::PS256));
    }
}
