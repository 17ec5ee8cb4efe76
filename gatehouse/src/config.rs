//! Issuer settings supplied by the hosting process

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::jwa::SigningAlgorithm;

/// Path, relative to the issuer's domain, at which it publishes its JWKS
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// An audience a token may be intended for
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// An issuer of tokens, as named by the `iss` claim
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// Settings describing the trusted token issuer
///
/// Built once when the process starts and shared by reference with every
/// authorization check. Nothing in this crate mutates or re-reads it.
///
/// The legacy settings keys (`AUTH0_DOMAIN`, `API_AUDIENCE`, and
/// `ALGORITHMS`) are accepted when deserializing.
///
/// ```
/// use gatehouse::{IssuerConfig, jwa::SigningAlgorithm};
///
/// let config: IssuerConfig = serde_json::from_str(r#"{
///     "AUTH0_DOMAIN": "example.us.auth0.com",
///     "API_AUDIENCE": "image",
///     "ALGORITHMS": ["RS256"]
/// }"#).unwrap();
///
/// assert_eq!(config.jwks_url(), "https://example.us.auth0.com/.well-known/jwks.json");
/// assert_eq!(config.expected_issuer().as_str(), "https://example.us.auth0.com/");
/// assert_eq!(config.algorithms(), &[SigningAlgorithm::RS256]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct IssuerConfig {
    #[serde(alias = "AUTH0_DOMAIN")]
    domain: String,
    #[serde(alias = "API_AUDIENCE")]
    audience: Audience,
    #[serde(alias = "ALGORITHMS")]
    algorithms: Vec<SigningAlgorithm>,
}

impl IssuerConfig {
    /// Settings for an issuer at `domain` whose tokens target `audience`
    ///
    /// Only `RS256` is accepted until more algorithms are allowed with
    /// [`with_algorithms`][Self::with_algorithms].
    pub fn new(domain: impl Into<String>, audience: Audience) -> Self {
        Self {
            domain: domain.into(),
            audience,
            algorithms: vec![SigningAlgorithm::RS256],
        }
    }

    /// Replaces the set of accepted signing algorithms
    pub fn with_algorithms(self, algorithms: impl IntoIterator<Item = SigningAlgorithm>) -> Self {
        Self {
            algorithms: algorithms.into_iter().collect(),
            ..self
        }
    }

    /// The issuer's domain, without scheme or trailing slash
    #[must_use]
    pub fn domain(&self) -> &str {
        self.domain.trim_end_matches('/')
    }

    /// The audience tokens must be intended for
    #[must_use]
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    /// Signing algorithms a token may use
    #[must_use]
    pub fn algorithms(&self) -> &[SigningAlgorithm] {
        &self.algorithms
    }

    /// The value the `iss` claim must hold
    #[must_use]
    pub fn expected_issuer(&self) -> Issuer {
        Issuer::new(format!("https://{}/", self.domain()))
    }

    /// Where the issuer publishes its JSON Web Key Set
    #[must_use]
    pub fn jwks_url(&self) -> String {
        format!("https://{}{}", self.domain(), JWKS_PATH)
    }
}
