//! The authorization guard placed in front of protected operations
//!
//! An [`Authorizer`] composes the pieces of this crate into a single check:
//! it extracts the bearer token, verifies it, and evaluates the required
//! permission. The first failure ends the check and is returned as-is.

use std::future::Future;

use aliri_clock::{Clock, System};
use aliri_traits::Policy;
use http::HeaderMap;

use crate::{
    bearer::{self, BearerToken},
    config::IssuerConfig,
    error::{AuthorizationError, FetchError},
    jwt::VerifiedClaims,
    permission::{PermissionRef, RequiredPermission},
    resolver::KeySetResolver,
    verifier::TokenVerifier,
};

/// Guards operations behind a bearer token and a required permission
///
/// ```no_run
/// use gatehouse::{Audience, Authorizer, IssuerConfig, RequiredPermission};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IssuerConfig::new("tenant.example.com", Audience::from_static("image"));
/// let authorizer = Authorizer::new(&config)?;
///
/// let images = authorizer
///     .guard(
///         Some("Bearer eyJhbGciOi..."),
///         &RequiredPermission::new("get:images"),
///         |claims| async move { format!("images for {:?}", claims.subject()) },
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct Authorizer<C = System> {
    verifier: TokenVerifier<C>,
}

impl Authorizer {
    /// An authorizer for tokens from the issuer described by `config`
    ///
    /// Keys are fetched from the issuer's well-known JWKS location on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &IssuerConfig) -> Result<Self, FetchError> {
        let resolver = KeySetResolver::new(config)?;
        Ok(Self::from_verifier(TokenVerifier::new(config, resolver)))
    }
}

impl<C> Authorizer<C> {
    /// An authorizer using an already configured verifier
    pub fn from_verifier(verifier: TokenVerifier<C>) -> Self {
        Self { verifier }
    }

    /// The underlying token verifier
    pub fn verifier(&self) -> &TokenVerifier<C> {
        &self.verifier
    }
}

impl<C: Clock> Authorizer<C> {
    /// Checks the `Authorization` header value against `required`
    ///
    /// On success, returns the verified claims of the caller.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered, with its kind intact.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(permission = required.permission().map(PermissionRef::as_str)),
    )]
    pub async fn authorize(
        &self,
        header: Option<&str>,
        required: &RequiredPermission,
    ) -> Result<VerifiedClaims, AuthorizationError> {
        let token = bearer::extract(header).map_err(|err| rejected("extract", err))?;
        self.authorize_token(token, required).await
    }

    /// Checks the `Authorization` header in `headers` against `required`
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered, with its kind intact.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(permission = required.permission().map(PermissionRef::as_str)),
    )]
    pub async fn authorize_headers(
        &self,
        headers: &HeaderMap,
        required: &RequiredPermission,
    ) -> Result<VerifiedClaims, AuthorizationError> {
        let token = bearer::from_headers(headers).map_err(|err| rejected("extract", err))?;
        self.authorize_token(token, required).await
    }

    /// Runs `operation` with the caller's claims if the check passes
    ///
    /// `operation` is invoked exactly once on success and never on failure.
    ///
    /// # Errors
    ///
    /// Returns the authorization failure without invoking `operation`.
    pub async fn guard<F, Fut, T>(
        &self,
        header: Option<&str>,
        required: &RequiredPermission,
        operation: F,
    ) -> Result<T, AuthorizationError>
    where
        F: FnOnce(VerifiedClaims) -> Fut,
        Fut: Future<Output = T>,
    {
        let claims = self.authorize(header, required).await?;
        Ok(operation(claims).await)
    }

    async fn authorize_token(
        &self,
        token: BearerToken,
        required: &RequiredPermission,
    ) -> Result<VerifiedClaims, AuthorizationError> {
        tracing::trace!("bearer token extracted");

        let claims = self
            .verifier
            .verify(&token)
            .await
            .map_err(|err| rejected("verify", err))?;
        tracing::trace!(sub = ?claims.subject(), "token verified");

        required
            .evaluate(&claims)
            .map_err(|denial| rejected("authorize", denial.into()))?;
        tracing::debug!(sub = ?claims.subject(), "request authorized");

        Ok(claims)
    }
}

fn rejected(stage: &'static str, err: AuthorizationError) -> AuthorizationError {
    let error: &dyn std::error::Error = &err;
    tracing::debug!(stage, error.kind = ?err.kind(), error, "authorization failed");
    err
}
