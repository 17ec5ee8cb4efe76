//! Compact JSON Web Tokens
//!
//! A [`BearerTokenRef`] is first [decomposed][BearerTokenRef::decompose]
//! into its untrusted header, payload, and signature. The header is only
//! good for choosing a candidate key. Once a key has been chosen, the
//! [`Decomposed`] token is verified, which checks the signature and then
//! the registered claims, yielding [`VerifiedClaims`].

use std::time::Duration;

use aliri_base64::{Base64Url, Base64UrlRef};
use aliri_braid::braid;
use aliri_clock::{Clock, UnixTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bearer::BearerTokenRef,
    config::{Audience, AudienceRef, Issuer, IssuerRef},
    jwa::SigningAlgorithm,
    jwk::{KeyId, KeyIdRef, SignatureMismatch, SigningKey},
    permission::Permissions,
};

/// The principal a token was issued to (`sub`)
#[braid(serde, ref_doc = "A borrowed reference to a [`Subject`]")]
pub struct Subject;

/// The token could not be split into its parts or a part could not be decoded
#[derive(Debug, Error)]
pub enum MalformedJwt {
    /// The token is not three `.`-separated segments
    #[error("token is not three dot-separated segments")]
    Segments,

    /// The header is not a base64url-encoded JSON object
    #[error("malformed JWT header")]
    Header(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The payload is not base64url-encoded JSON claims
    #[error("malformed JWT payload")]
    Payload(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The signature is not base64url-encoded
    #[error("malformed JWT signature")]
    Signature(#[source] aliri_base64::InvalidBase64Data),
}

/// The claims in a correctly signed token were not acceptable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum ClaimsRejected {
    /// A claim that must be present was not
    #[error("required claim '{0}' is missing")]
    MissingRequiredClaim(&'static str),

    /// The token's expiration time has passed
    #[error("token has expired")]
    TokenExpired,

    /// The token is not yet valid
    #[error("token is not yet valid")]
    TokenNotYetValid,

    /// The token is not intended for the expected audience
    #[error("audience does not match")]
    InvalidAudience,

    /// The token was not issued by the expected issuer
    #[error("issuer does not match")]
    InvalidIssuer,
}

/// Why a decomposed token failed verification
#[derive(Debug, Error)]
pub enum JwtVerifyError {
    /// The token is structurally defective
    #[error(transparent)]
    Malformed(#[from] MalformedJwt),

    /// The signature was not made by the selected key
    #[error("token signature rejected")]
    Signature(#[from] SignatureMismatch),

    /// The signature is good but the claims are not acceptable
    #[error("token rejected by claims validator")]
    Claims(#[from] ClaimsRejected),
}

/// The JOSE header of a token, decoded without any verification
///
/// **WARNING:** *An adversary can place arbitrary data into a token header.*
/// These values only select which key to try; they authenticate nothing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[must_use]
pub struct UnverifiedHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<KeyId>,
}

impl UnverifiedHeader {
    /// The algorithm the token claims to be signed with
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// The key the token claims to be signed with
    #[must_use]
    pub fn kid(&self) -> Option<&KeyIdRef> {
        self.kid.as_deref()
    }
}

/// A token split into its parts, ready to be checked against a key
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Decomposed<'a> {
    header: UnverifiedHeader,
    message: &'a str,
    payload: &'a str,
    signature: Base64Url,
}

impl BearerTokenRef {
    /// Splits the token into its header, payload, and signature
    ///
    /// Only the header is decoded. The payload is left alone until the
    /// signature has been verified.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not three segments or the header or
    /// signature cannot be decoded.
    pub fn decompose(&self) -> Result<Decomposed<'_>, MalformedJwt> {
        let token = self.as_str();
        let mut segments = token.split('.');
        let (Some(h_str), Some(payload), Some(s_str), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(MalformedJwt::Segments);
        };

        let message = &token[..h_str.len() + 1 + payload.len()];

        let h_raw =
            Base64Url::from_encoded(h_str).map_err(|err| MalformedJwt::Header(Box::new(err)))?;
        let header: UnverifiedHeader = serde_json::from_slice(h_raw.as_slice())
            .map_err(|err| MalformedJwt::Header(Box::new(err)))?;
        let signature = Base64Url::from_encoded(s_str).map_err(MalformedJwt::Signature)?;

        Ok(Decomposed {
            header,
            message,
            payload,
            signature,
        })
    }
}

impl<'a> Decomposed<'a> {
    /// The untrusted header
    pub fn untrusted_header(&self) -> &UnverifiedHeader {
        &self.header
    }

    /// The untrusted encoded payload
    #[must_use]
    pub fn untrusted_payload(&self) -> &'a str {
        self.payload
    }

    /// The signed message: the encoded header and payload joined by `.`
    #[must_use]
    pub fn untrusted_message(&self) -> &'a str {
        self.message
    }

    /// The raw signature
    #[must_use]
    pub fn signature(&self) -> &Base64UrlRef {
        &self.signature
    }

    /// Verifies the signature with `key` under `alg` and validates the claims
    ///
    /// `alg` must come from trusted configuration. The algorithm named in
    /// the token header is not consulted here.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify, the payload cannot
    /// be decoded, or the claims are rejected by `validator`.
    pub fn verify<C: Clock>(
        self,
        key: &SigningKey,
        alg: SigningAlgorithm,
        validator: &ClaimsValidator,
        clock: &C,
    ) -> Result<VerifiedClaims, JwtVerifyError> {
        key.verify(alg, self.message.as_bytes(), self.signature.as_slice())?;

        let p_raw = Base64Url::from_encoded(self.payload)
            .map_err(|err| MalformedJwt::Payload(Box::new(err)))?;
        let claims: RawClaims = serde_json::from_slice(p_raw.as_slice())
            .map_err(|err| MalformedJwt::Payload(Box::new(err)))?;

        Ok(validator.validate(claims, clock)?)
    }
}

/// A set of zero or more [`Audience`]s
///
/// The `aud` claim may be a single string or an array of strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<Audience>", into = "OneOrMany<Audience>")]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// Whether `aud` is one of the audiences
    #[must_use]
    pub fn contains(&self, aud: &AudienceRef) -> bool {
        self.0.iter().any(|a| a.as_str() == aud.as_str())
    }

    /// Iterates through the audiences
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(|aud| &**aud)
    }

    /// Whether there are no audiences
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<OneOrMany<Audience>> for Audiences {
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl From<Audiences> for OneOrMany<Audience> {
    fn from(mut vals: Audiences) -> Self {
        match vals.0.len() {
            1 => vals.0.pop().map_or_else(|| Self::Many(Vec::new()), Self::One),
            _ => Self::Many(vals.0),
        }
    }
}

/// One item or an array of items
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<Subject>,
    #[serde(default)]
    iss: Option<Issuer>,
    #[serde(default)]
    aud: Option<Audiences>,
    #[serde(default)]
    exp: Option<UnixTime>,
    #[serde(default)]
    nbf: Option<UnixTime>,
    #[serde(default)]
    iat: Option<UnixTime>,
    #[serde(default)]
    permissions: Option<Permissions>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// The claims of a token whose signature and registered claims have been
/// verified
///
/// This is the only trusted account of who is calling and what they may
/// do. It can only be obtained by verifying a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[must_use]
pub struct VerifiedClaims {
    #[serde(rename = "sub", skip_serializing_if = "Option::is_none")]
    subject: Option<Subject>,
    #[serde(rename = "iss")]
    issuer: Issuer,
    #[serde(rename = "aud")]
    audience: Audiences,
    #[serde(rename = "exp")]
    expiry: UnixTime,
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none")]
    not_before: Option<UnixTime>,
    #[serde(rename = "iat", skip_serializing_if = "Option::is_none")]
    issued_at: Option<UnixTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<Permissions>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl VerifiedClaims {
    /// The subject (`sub`), if the issuer provided one
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.subject.as_deref()
    }

    /// The issuer (`iss`)
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The audiences (`aud`)
    pub fn audience(&self) -> &Audiences {
        &self.audience
    }

    /// The expiration time (`exp`)
    #[must_use]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The time before which the token is not valid (`nbf`)
    #[must_use]
    pub fn not_before(&self) -> Option<UnixTime> {
        self.not_before
    }

    /// The time the token was issued (`iat`)
    #[must_use]
    pub fn issued_at(&self) -> Option<UnixTime> {
        self.issued_at
    }

    /// The granted permissions, or `None` if the claim is absent
    #[must_use]
    pub fn permissions(&self) -> Option<&Permissions> {
        self.permissions.as_ref()
    }

    /// Any other claim, by name
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

/// Checks the registered claims of a correctly signed token
///
/// Claims are checked in a fixed order: expiration, audience, issuer, then
/// not-before. The first failure is reported.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct ClaimsValidator {
    audience: Audience,
    issuer: Issuer,
    leeway: Duration,
}

impl ClaimsValidator {
    /// A validator requiring `audience` and `issuer`, with no leeway
    pub fn new(audience: Audience, issuer: Issuer) -> Self {
        Self {
            audience,
            issuer,
            leeway: Duration::ZERO,
        }
    }

    /// Allows `exp` and `nbf` to be off by up to `leeway`
    ///
    /// Only whole seconds are significant.
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
    }

    /// The configured clock-skew allowance
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    fn validate<C: Clock>(
        &self,
        claims: RawClaims,
        clock: &C,
    ) -> Result<VerifiedClaims, ClaimsRejected> {
        let now = clock.now();
        let leeway = self.leeway.as_secs();

        let expiry = claims
            .exp
            .ok_or(ClaimsRejected::MissingRequiredClaim("exp"))?;
        if now.0 >= expiry.0.saturating_add(leeway) {
            return Err(ClaimsRejected::TokenExpired);
        }

        let audience = claims
            .aud
            .filter(|aud| !aud.is_empty())
            .ok_or(ClaimsRejected::MissingRequiredClaim("aud"))?;
        if !audience.contains(&self.audience) {
            return Err(ClaimsRejected::InvalidAudience);
        }

        let issuer = claims
            .iss
            .ok_or(ClaimsRejected::MissingRequiredClaim("iss"))?;
        if issuer != self.issuer {
            return Err(ClaimsRejected::InvalidIssuer);
        }

        if let Some(nbf) = claims.nbf {
            if nbf.0 > now.0.saturating_add(leeway) {
                return Err(ClaimsRejected::TokenNotYetValid);
            }
        }

        Ok(VerifiedClaims {
            subject: claims.sub,
            issuer,
            audience,
            expiry,
            not_before: claims.nbf,
            issued_at: claims.iat,
            permissions: claims.permissions,
            extra: claims.extra,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_claims(permissions: Option<Permissions>) -> VerifiedClaims {
    VerifiedClaims {
        subject: Some(Subject::from_static("auth0|tester")),
        issuer: Issuer::from_static("https://tenant.example.com/"),
        audience: Audiences(vec![Audience::from_static("image")]),
        expiry: UnixTime(2_000_000_000),
        not_before: None,
        issued_at: None,
        permissions,
        extra: serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;

    use super::*;
    use aliri_clock::TestClock;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn validator() -> ClaimsValidator {
        ClaimsValidator::new(
            Audience::from_static("image"),
            Issuer::from_static("https://tenant.example.com/"),
        )
    }

    fn raw(value: serde_json::Value) -> RawClaims {
        serde_json::from_value(value).unwrap()
    }

    fn check(value: serde_json::Value) -> Result<VerifiedClaims, ClaimsRejected> {
        validator().validate(raw(value), &TestClock::new(NOW))
    }

    fn good() -> serde_json::Value {
        json!({
            "sub": "auth0|abc",
            "iss": "https://tenant.example.com/",
            "aud": "image",
            "exp": NOW.0 + 60,
            "permissions": ["get:images"],
        })
    }

    #[test]
    fn accepts_valid_claims() -> Result<()> {
        let claims = check(good())?;
        assert_eq!(claims.subject().map(SubjectRef::as_str), Some("auth0|abc"));
        assert_eq!(claims.expiry(), UnixTime(NOW.0 + 60));
        assert_eq!(claims.permissions().map(Permissions::len), Some(1));
        Ok(())
    }

    #[test]
    fn audience_may_be_an_array() -> Result<()> {
        let mut claims = good();
        claims["aud"] = json!(["other", "image"]);
        let verified = check(claims)?;
        assert_eq!(verified.audience().iter().count(), 2);
        Ok(())
    }

    #[test]
    fn expiry_is_exclusive() {
        let mut claims = good();
        claims["exp"] = json!(NOW.0);
        assert_eq!(check(claims).unwrap_err(), ClaimsRejected::TokenExpired);
    }

    #[test]
    fn leeway_extends_expiry() {
        let mut claims = good();
        claims["exp"] = json!(NOW.0 - 5);
        let lenient = validator().with_leeway(Duration::from_secs(10));
        assert!(lenient.validate(raw(claims), &TestClock::new(NOW)).is_ok());
    }

    #[test]
    fn missing_expiry_is_rejected() {
        let mut claims = good();
        claims.as_object_mut().unwrap().remove("exp");
        assert_eq!(
            check(claims).unwrap_err(),
            ClaimsRejected::MissingRequiredClaim("exp")
        );
    }

    #[test]
    fn expiry_is_checked_before_audience() {
        let mut claims = good();
        claims["exp"] = json!(NOW.0 - 1);
        claims["aud"] = json!("someone-else");
        assert_eq!(check(claims).unwrap_err(), ClaimsRejected::TokenExpired);
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let mut claims = good();
        claims["aud"] = json!(["someone-else"]);
        assert_eq!(check(claims).unwrap_err(), ClaimsRejected::InvalidAudience);
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let mut claims = good();
        claims["iss"] = json!("https://tenant.example.com");
        assert_eq!(check(claims).unwrap_err(), ClaimsRejected::InvalidIssuer);
    }

    #[test]
    fn future_not_before_is_rejected() {
        let mut claims = good();
        claims["nbf"] = json!(NOW.0 + 30);
        assert_eq!(check(claims).unwrap_err(), ClaimsRejected::TokenNotYetValid);
    }

    #[test]
    fn absent_permissions_are_not_empty_permissions() -> Result<()> {
        let mut claims = good();
        claims.as_object_mut().unwrap().remove("permissions");
        assert!(check(claims)?.permissions().is_none());

        let mut claims = good();
        claims["permissions"] = json!([]);
        assert!(check(claims)?.permissions().is_some_and(Permissions::is_empty));
        Ok(())
    }

    #[test]
    fn extra_claims_are_kept() -> Result<()> {
        let mut claims = good();
        claims["azp"] = json!("client-id");
        assert_eq!(check(claims)?.claim("azp"), Some(&json!("client-id")));
        Ok(())
    }

    #[test]
    fn decompose_requires_three_segments() {
        for token in ["", "abc", "a.b", "a.b.c.d"] {
            let err = BearerTokenRef::from_str(token).decompose().unwrap_err();
            assert!(matches!(err, MalformedJwt::Segments), "{token}");
        }
    }

    #[test]
    fn decompose_reads_header_without_trusting_it() -> Result<()> {
        let header = Base64Url::from_raw(br#"{"alg":"RS256","kid":"k1","typ":"JWT"}"#.to_vec());
        let token = format!("{header}.e30.c2ln");
        let token = BearerTokenRef::from_str(&token);

        let decomposed = token.decompose()?;
        assert_eq!(decomposed.untrusted_header().alg(), Some("RS256"));
        assert_eq!(
            decomposed.untrusted_header().kid().map(KeyIdRef::as_str),
            Some("k1")
        );
        assert_eq!(decomposed.untrusted_payload(), "e30");
        assert_eq!(decomposed.signature().as_slice(), b"sig");
        assert!(decomposed.untrusted_message().ends_with(".e30"));
        Ok(())
    }

    #[test]
    fn header_without_kid_still_decomposes() -> Result<()> {
        let header = Base64Url::from_raw(br#"{"alg":"RS256"}"#.to_vec());
        let token = format!("{header}.e30.c2ln");
        let decomposed = BearerTokenRef::from_str(&token).decompose()?;
        assert!(decomposed.untrusted_header().kid().is_none());
        Ok(())
    }

    #[test]
    fn garbage_header_is_malformed() {
        let err = BearerTokenRef::from_str("!!.e30.c2ln").decompose().unwrap_err();
        assert!(matches!(err, MalformedJwt::Header(_)));

        let not_json = Base64Url::from_raw(b"not json".to_vec());
        let token = format!("{not_json}.e30.c2ln");
        let err = BearerTokenRef::from_str(&token).decompose().unwrap_err();
        assert!(matches!(err, MalformedJwt::Header(_)));
    }
}
