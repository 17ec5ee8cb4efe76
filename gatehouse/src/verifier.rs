//! Verification of bearer tokens against the issuer's published keys

use std::time::Duration;

use aliri_clock::{Clock, System};
use thiserror::Error;

use crate::{
    bearer::BearerTokenRef,
    config::IssuerConfig,
    error::{AuthorizationError, ErrorKind},
    jwa::SigningAlgorithm,
    jwt::{ClaimsRejected, ClaimsValidator, JwtVerifyError, VerifiedClaims},
    resolver::KeySetResolver,
};

/// The token names an algorithm that may not be used with the selected key
#[derive(Debug, Error)]
pub enum AlgorithmRejected {
    /// The token header does not name an algorithm
    #[error("token header has no algorithm")]
    Missing,

    /// The algorithm is not among those the issuer is configured to use
    #[error("algorithm '{0}' is not accepted")]
    NotAccepted(String),

    /// The key is published for use with a different algorithm
    #[error("key is restricted to '{key_alg}', token uses '{alg}'")]
    KeyRestricted {
        /// The algorithm named by the token
        alg: SigningAlgorithm,
        /// The algorithm the key is restricted to
        key_alg: SigningAlgorithm,
    },
}

/// Verifies bearer tokens issued by a single trusted issuer
///
/// Verification is a fixed sequence. The header is decoded to find the key
/// id, the issuer's key set is resolved, the algorithm is checked against
/// configuration, the signature is verified, and finally the registered
/// claims are validated. Each step reports its own [`ErrorKind`].
#[derive(Debug, Clone)]
#[must_use]
pub struct TokenVerifier<C = System> {
    resolver: KeySetResolver,
    algorithms: Vec<SigningAlgorithm>,
    validator: ClaimsValidator,
    clock: C,
}

impl TokenVerifier {
    /// A verifier for tokens described by `config`, using keys from `resolver`
    pub fn new(config: &IssuerConfig, resolver: KeySetResolver) -> Self {
        Self {
            resolver,
            algorithms: config.algorithms().to_vec(),
            validator: ClaimsValidator::new(
                config.audience().to_owned(),
                config.expected_issuer(),
            ),
            clock: System,
        }
    }
}

impl<C> TokenVerifier<C> {
    /// Allows `exp` and `nbf` to be off by up to `leeway`
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self {
            validator: self.validator.with_leeway(leeway),
            ..self
        }
    }

    /// Uses `clock` as the source of the current time
    pub fn with_clock<D: Clock>(self, clock: D) -> TokenVerifier<D> {
        TokenVerifier {
            resolver: self.resolver,
            algorithms: self.algorithms,
            validator: self.validator,
            clock,
        }
    }

    /// The resolver supplying signing keys
    pub fn resolver(&self) -> &KeySetResolver {
        &self.resolver
    }

    fn accepted_algorithm(
        &self,
        alg: Option<&str>,
    ) -> Result<SigningAlgorithm, AlgorithmRejected> {
        let alg = alg.ok_or(AlgorithmRejected::Missing)?;
        self.algorithms
            .iter()
            .copied()
            .find(|a| a.name() == alg)
            .ok_or_else(|| AlgorithmRejected::NotAccepted(alg.to_owned()))
    }
}

impl<C: Clock> TokenVerifier<C> {
    /// Verifies `token` and returns its claims
    ///
    /// # Errors
    ///
    /// * [`ErrorKind::TokenUnparseable`] if the token cannot be decoded,
    ///   uses an algorithm that is not accepted, or has a bad signature
    /// * [`ErrorKind::MalformedToken`] if the header has no key id
    /// * [`ErrorKind::KeySetUnavailable`] if the key set cannot be resolved
    /// * [`ErrorKind::UnknownSigningKey`] if no key matches the key id
    /// * [`ErrorKind::TokenExpired`] if the token has expired
    /// * [`ErrorKind::ClaimsInvalid`] if any other claim is rejected
    pub async fn verify(
        &self,
        token: &BearerTokenRef,
    ) -> Result<VerifiedClaims, AuthorizationError> {
        let decomposed = token
            .decompose()
            .map_err(|err| AuthorizationError::with_source(ErrorKind::TokenUnparseable, err))?;

        let kid = decomposed
            .untrusted_header()
            .kid()
            .ok_or(ErrorKind::MalformedToken)?;

        let keys = self
            .resolver
            .key_set_for(kid)
            .await
            .map_err(|err| AuthorizationError::with_source(ErrorKind::KeySetUnavailable, err))?;

        let key = keys.get(kid).ok_or_else(|| {
            tracing::debug!(%kid, "unable to find matching key");
            ErrorKind::UnknownSigningKey
        })?;

        let alg = self
            .accepted_algorithm(decomposed.untrusted_header().alg())
            .map_err(|err| AuthorizationError::with_source(ErrorKind::TokenUnparseable, err))?;

        if let Some(key_alg) = key.algorithm().filter(|&a| a != alg) {
            return Err(AuthorizationError::with_source(
                ErrorKind::TokenUnparseable,
                AlgorithmRejected::KeyRestricted { alg, key_alg },
            ));
        }

        decomposed
            .verify(key, alg, &self.validator, &self.clock)
            .map_err(|err| {
                let kind = match &err {
                    JwtVerifyError::Claims(ClaimsRejected::TokenExpired) => ErrorKind::TokenExpired,
                    JwtVerifyError::Claims(_) => ErrorKind::ClaimsInvalid,
                    JwtVerifyError::Malformed(_) | JwtVerifyError::Signature(_) => {
                        ErrorKind::TokenUnparseable
                    }
                };
                AuthorizationError::with_source(kind, err)
            })
    }
}
