//! Authorization failures and their classification

use std::{error::Error as StdError, fmt};

use http::StatusCode;
use thiserror::Error;

/// The reason an authorization check failed
///
/// The kind is a contract with the boundary layer: callers may offer
/// different remediation depending on it, so every failure is reported
/// with the most specific kind that applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No `Authorization` header was supplied
    MissingHeader,
    /// The `Authorization` header does not use the `Bearer` scheme
    MalformedScheme,
    /// The `Bearer` scheme was given without a credential
    MissingToken,
    /// The `Authorization` header has more than a scheme and a credential
    MalformedHeader,
    /// The token header does not name a signing key
    MalformedToken,
    /// The token names a signing key the issuer does not publish
    UnknownSigningKey,
    /// The issuer's key set could not be retrieved
    KeySetUnavailable,
    /// The token has expired
    TokenExpired,
    /// The token's audience or issuer is not the one expected
    ClaimsInvalid,
    /// The token could not be decoded or its signature was rejected
    TokenUnparseable,
    /// The verified token carries no `permissions` claim
    PermissionsClaimMissing,
    /// The token does not grant the required permission
    PermissionDenied,
}

impl ErrorKind {
    /// Machine-readable error code reported to clients
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingHeader => "authorization_header_missing",
            Self::MalformedScheme
            | Self::MissingToken
            | Self::MalformedHeader
            | Self::MalformedToken
            | Self::UnknownSigningKey => "invalid_header",
            Self::KeySetUnavailable => "key_set_unavailable",
            Self::TokenExpired => "token_expired",
            Self::ClaimsInvalid | Self::PermissionsClaimMissing => "invalid_claims",
            Self::TokenUnparseable => "invalid_token",
            Self::PermissionDenied => "unauthorized",
        }
    }

    /// Human-readable description of the failure
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MissingHeader => "Authorization header is expected.",
            Self::MalformedScheme => "Authorization header must start with \"Bearer\".",
            Self::MissingToken => "Token not found.",
            Self::MalformedHeader => "Authorization header must be bearer token.",
            Self::MalformedToken => "Authorization malformed.",
            Self::UnknownSigningKey => "Unable to find the appropriate key.",
            Self::KeySetUnavailable => "Unable to retrieve the issuer's signing keys.",
            Self::TokenExpired => "Token expired.",
            Self::ClaimsInvalid => "Incorrect claims. Please, check the audience and issuer.",
            Self::TokenUnparseable => "Unable to parse authentication token.",
            Self::PermissionsClaimMissing => "Permissions not included in JWT.",
            Self::PermissionDenied => "Permission not found.",
        }
    }

    /// The HTTP status the boundary layer should respond with
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::MissingHeader
            | Self::MalformedScheme
            | Self::MissingToken
            | Self::MalformedHeader
            | Self::TokenExpired
            | Self::ClaimsInvalid
            | Self::TokenUnparseable => StatusCode::UNAUTHORIZED,
            Self::MalformedToken
            | Self::UnknownSigningKey
            | Self::KeySetUnavailable
            | Self::PermissionsClaimMissing => StatusCode::BAD_REQUEST,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A failed authorization check
///
/// Returned to the boundary layer as-is. The underlying cause, when there
/// is one, is available through [`std::error::Error::source`] for logging
/// but is never part of the client-facing description.
#[derive(Debug, Error)]
#[error("{kind}")]
#[must_use]
pub struct AuthorizationError {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl AuthorizationError {
    /// An error of the given kind with no underlying cause
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// An error of the given kind caused by `source`
    pub fn with_source(
        kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            source: Some(source.into()),
        }
    }

    /// The kind of failure
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Machine-readable error code
    #[inline]
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Human-readable description
    #[inline]
    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.kind.description()
    }

    /// Suggested HTTP status
    #[inline]
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<ErrorKind> for AuthorizationError {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl PartialEq<ErrorKind> for AuthorizationError {
    #[inline]
    fn eq(&self, other: &ErrorKind) -> bool {
        self.kind == *other
    }
}

/// The key set document could not be turned into a usable key set
#[derive(Debug, Error)]
pub enum KeySetError {
    /// The document names the same key id more than once
    #[error("key id '{0}' appears more than once in the key set")]
    DuplicateKeyId(String),

    /// The document is not a JSON key set
    #[error("malformed key set document")]
    Malformed(#[from] serde_json::Error),
}

/// The key set could not be retrieved from the issuer
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request failed or the response could not be read
    #[error("key set request failed")]
    Transport(#[from] reqwest::Error),

    /// The request did not complete in time
    #[error("key set request timed out")]
    TimedOut,

    /// The issuer answered with a status that cannot be acted upon
    #[error("unexpected key set response status {0}")]
    UnexpectedStatus(StatusCode),

    /// There is no remote source and no key set has been provided
    #[error("no key set is available")]
    NotConfigured,

    /// No key set has been fetched and the last attempt failed too recently
    /// to try again
    #[error("key set fetch failed recently")]
    RecentlyFailed,

    /// The response body was not a usable key set
    #[error(transparent)]
    KeySet(#[from] KeySetError),

    /// The refresh task was lost before it completed
    #[error("key set refresh task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// A failure while encrypting or decrypting with a symmetric key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum CipherError {
    /// The system random number generator failed
    #[error("unable to obtain secure random bytes")]
    Randomness,

    /// The payload could not be sealed
    #[error("encryption failed")]
    EncryptionFailed,

    /// The ciphertext was tampered with, truncated, or sealed with another key
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key material was not a 256-bit key
    #[error("symmetric key must be 32 bytes")]
    InvalidKey,
}
