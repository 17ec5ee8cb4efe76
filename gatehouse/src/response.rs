//! Utilities for turning authorization failures into HTTP responses

use http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::error::{AuthorizationError, ErrorKind};

/// How much of a failure is revealed to the client
///
/// Failures are always logged and returned in full to the caller of the
/// guard. This only decides what ends up in the response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Disclosure {
    /// Report the specific description of every failure
    #[default]
    Verbose,
    /// Report authentication failures without saying what was wrong
    ///
    /// Kinds answered with `401 Unauthorized` share a single generic
    /// description. Other kinds are reported as with [`Disclosure::Verbose`].
    Terse,
}

const GENERIC_DESCRIPTION: &str = "Authentication required.";
const GENERIC_CODE: &str = "unauthorized";

impl Disclosure {
    /// The description to report for `kind`
    #[must_use]
    pub fn description(self, kind: ErrorKind) -> &'static str {
        match self {
            Self::Terse if is_unauthenticated(kind) => GENERIC_DESCRIPTION,
            _ => kind.description(),
        }
    }

    /// The error code to report for `kind`
    #[must_use]
    pub fn code(self, kind: ErrorKind) -> &'static str {
        match self {
            Self::Terse if is_unauthenticated(kind) => GENERIC_CODE,
            _ => kind.code(),
        }
    }
}

fn is_unauthenticated(kind: ErrorKind) -> bool {
    kind.status() == StatusCode::UNAUTHORIZED
}

/// The `{"code", "description"}` document describing a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: &'static str,
    /// Human-readable description
    pub description: &'static str,
}

impl AuthorizationError {
    /// The document describing this failure to a client
    #[must_use]
    pub fn body(&self, disclosure: Disclosure) -> ErrorBody {
        ErrorBody {
            code: disclosure.code(self.kind()),
            description: disclosure.description(self.kind()),
        }
    }

    /// Builds a response with the mapped status and a `www-authenticate`
    /// header, revealing the specific failure
    ///
    /// ```http
    /// HTTP/1.1 401 Unauthorized
    /// www-authenticate: Bearer error="invalid_token" error_description="Token expired."
    /// ```
    #[must_use]
    pub fn to_response<B: Default>(&self) -> Response<B> {
        self.to_response_with(Disclosure::Verbose)
    }

    /// Builds a response with the mapped status and a `www-authenticate`
    /// header, revealing only what `disclosure` allows
    ///
    /// A request with no credentials at all gets a bare `Bearer` challenge
    /// with no error code.
    #[must_use]
    pub fn to_response_with<B: Default>(&self, disclosure: Disclosure) -> Response<B> {
        let status = self.status();
        let mut resp = Response::new(B::default());
        *resp.status_mut() = status;
        let value = if self.kind() == ErrorKind::MissingHeader {
            HeaderValue::from_static("Bearer")
        } else {
            challenge(bearer_error(status), disclosure.description(self.kind()))
        };
        resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        resp
    }
}

fn bearer_error(status: StatusCode) -> &'static str {
    match status.as_u16() {
        403 => "insufficient_scope",
        400 => "invalid_request",
        _ => "invalid_token",
    }
}

fn challenge(error: &'static str, description: &str) -> HeaderValue {
    HeaderValue::try_from(format!(
        r#"Bearer error="{error}" error_description="{}""#,
        description.escape_default()
    ))
    .unwrap_or_else(|_| HeaderValue::from_static(r#"Bearer error="invalid_token""#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;

    fn www_authenticate<B>(resp: &Response<B>) -> &str {
        resp.headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
    }

    #[test]
    fn expired_token_is_an_invalid_token_challenge() {
        let resp = AuthorizationError::new(ErrorKind::TokenExpired).to_response::<()>();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            www_authenticate(&resp),
            r#"Bearer error="invalid_token" error_description="Token expired.""#
        );
    }

    #[test]
    fn denial_is_an_insufficient_scope_challenge() {
        let resp = AuthorizationError::new(ErrorKind::PermissionDenied).to_response::<()>();

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            www_authenticate(&resp),
            r#"Bearer error="insufficient_scope" error_description="Permission not found.""#
        );
    }

    #[test]
    fn bad_request_is_an_invalid_request_challenge() {
        let err = AuthorizationError::with_source(ErrorKind::KeySetUnavailable, FetchError::TimedOut);
        let resp = err.to_response::<()>();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(www_authenticate(&resp).starts_with(r#"Bearer error="invalid_request""#));
        assert!(!www_authenticate(&resp).contains("timed out"));
    }

    #[test]
    fn quotes_in_descriptions_are_escaped() {
        let resp = AuthorizationError::new(ErrorKind::MalformedScheme).to_response::<()>();

        assert_eq!(
            www_authenticate(&resp),
            r#"Bearer error="invalid_token" error_description="Authorization header must start with \"Bearer\".""#
        );
    }

    #[test]
    fn terse_hides_authentication_details() {
        for kind in [
            ErrorKind::TokenExpired,
            ErrorKind::ClaimsInvalid,
            ErrorKind::TokenUnparseable,
        ] {
            let err = AuthorizationError::new(kind);
            let resp = err.to_response_with::<()>(Disclosure::Terse);

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{kind:?}");
            assert_eq!(
                www_authenticate(&resp),
                r#"Bearer error="invalid_token" error_description="Authentication required.""#
            );
            assert_eq!(
                err.body(Disclosure::Terse),
                ErrorBody {
                    code: "unauthorized",
                    description: "Authentication required."
                }
            );
        }
    }

    #[test]
    fn missing_header_is_a_bare_challenge() {
        for disclosure in [Disclosure::Verbose, Disclosure::Terse] {
            let err = AuthorizationError::new(ErrorKind::MissingHeader);
            let resp = err.to_response_with::<()>(disclosure);

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(www_authenticate(&resp), "Bearer");
        }

        let err = AuthorizationError::new(ErrorKind::MissingHeader);
        assert_eq!(err.body(Disclosure::Terse).code, "unauthorized");
        assert_eq!(err.body(Disclosure::Verbose).code, "authorization_header_missing");
    }

    #[test]
    fn terse_keeps_other_kinds() {
        let err = AuthorizationError::new(ErrorKind::PermissionDenied);
        assert_eq!(err.body(Disclosure::Terse), err.body(Disclosure::Verbose));

        let err = AuthorizationError::new(ErrorKind::UnknownSigningKey);
        assert_eq!(err.body(Disclosure::Terse).code, "invalid_header");
    }

    #[test]
    fn body_serializes_code_and_description() {
        let body = AuthorizationError::new(ErrorKind::MissingToken).body(Disclosure::Verbose);

        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({ "code": "invalid_header", "description": "Token not found." })
        );
    }
}
