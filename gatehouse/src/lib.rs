//! Bearer token authorization for APIs fronted by an OAuth2 identity provider
//!
//! An [`Authorizer`] checks an incoming `Authorization` header in three
//! steps. It extracts the bearer token, verifies the token's RS256
//! signature and registered claims against the issuer's published key set,
//! then confirms the token grants the permission an operation requires.
//! Each failure is reported as an [`AuthorizationError`] whose
//! [`ErrorKind`] says precisely what went wrong.
//!
//! Signing keys are fetched from the issuer's JWKS endpoint by a
//! [`KeySetResolver`], which caches them, refreshes them when they go stale
//! or when a token names an unknown key, and ensures only one fetch is in
//! flight at a time.
//!
//! The [`cipher`] module provides unrelated utilities for protecting stored
//! secrets with AES-256-GCM and for computing SHA-256 digests.
//!
//! # Feature flags
//!
//! `rustls-tls` (the default) and `default-tls` select the TLS backend used
//! by `reqwest` when fetching key sets over HTTPS.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod bearer;
pub mod cipher;
pub mod config;
pub mod error;
pub mod guard;
pub mod jwa;
pub mod jwk;
pub mod jwks;
pub mod jwt;
pub mod permission;
pub mod resolver;
pub mod response;
pub mod verifier;

#[cfg(test)]
mod test;

pub use aliri_clock::{Clock, System, TestClock, UnixTime};
pub use bearer::{BearerToken, BearerTokenRef};
pub use cipher::SymmetricKey;
pub use config::{Audience, AudienceRef, Issuer, IssuerConfig, IssuerRef};
pub use error::{AuthorizationError, CipherError, ErrorKind, FetchError};
pub use guard::Authorizer;
pub use jwa::SigningAlgorithm;
pub use jwk::{KeyId, KeyIdRef, SigningKey};
pub use jwks::KeySet;
pub use jwt::{ClaimsValidator, VerifiedClaims};
pub use permission::{Permission, PermissionRef, Permissions, RequiredPermission};
pub use resolver::KeySetResolver;
pub use response::Disclosure;
pub use verifier::TokenVerifier;
