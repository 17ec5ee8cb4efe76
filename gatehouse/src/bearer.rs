//! Bearer credentials presented in the `Authorization` header

use std::fmt;

use aliri_braid::braid;
use http::{header, HeaderMap};

use crate::error::{AuthorizationError, ErrorKind};

/// A bearer credential as presented by the caller
///
/// Nothing about the structure of the credential has been checked. This
/// type redacts its value in [`Display`][BearerTokenRef#impl-Display] and
/// [`Debug`][BearerTokenRef#impl-Debug] output unless the alternate form
/// (`{:#}`) is requested.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "A borrowed reference to a [`BearerToken`]"
)]
#[must_use]
pub struct BearerToken;

impl fmt::Debug for BearerTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:?}", self.as_str())
        } else {
            f.write_str("***BEARER***")
        }
    }
}

impl fmt::Display for BearerTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str(self.as_str())
        } else {
            f.write_str("***BEARER***")
        }
    }
}

/// Extracts the bearer credential from an `Authorization` header value
///
/// The scheme is matched case-insensitively. The credential itself is
/// returned verbatim.
///
/// # Errors
///
/// * [`ErrorKind::MissingHeader`] if the header is absent or blank
/// * [`ErrorKind::MalformedScheme`] if the scheme is not `Bearer`
/// * [`ErrorKind::MissingToken`] if no credential follows the scheme
/// * [`ErrorKind::MalformedHeader`] if anything follows the credential
///
/// ```
/// use gatehouse::{bearer, ErrorKind};
///
/// let token = bearer::extract(Some("bearer abc.def.ghi")).unwrap();
/// assert_eq!(token.as_str(), "abc.def.ghi");
///
/// let err = bearer::extract(Some("Basic dXNlcjpwYXNz")).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::MalformedScheme);
/// ```
pub fn extract(header: Option<&str>) -> Result<BearerToken, AuthorizationError> {
    let mut parts = header.unwrap_or_default().split_whitespace();

    let scheme = parts.next().ok_or(ErrorKind::MissingHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ErrorKind::MalformedScheme.into());
    }

    let token = parts.next().ok_or(ErrorKind::MissingToken)?;

    if parts.next().is_some() {
        return Err(ErrorKind::MalformedHeader.into());
    }

    Ok(BearerToken::new(token.to_owned()))
}

/// Extracts the bearer credential from a request's headers
///
/// Only the first `Authorization` header is considered. A header value
/// that is not visible ASCII is reported as [`ErrorKind::MalformedHeader`].
///
/// # Errors
///
/// See [`extract`].
pub fn from_headers(headers: &HeaderMap) -> Result<BearerToken, AuthorizationError> {
    match headers.get(header::AUTHORIZATION) {
        None => Err(ErrorKind::MissingHeader.into()),
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|err| AuthorizationError::with_source(ErrorKind::MalformedHeader, err))?;
            extract(Some(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn kind_of(header: Option<&str>) -> ErrorKind {
        extract(header).unwrap_err().kind()
    }

    #[test]
    fn missing_header() {
        assert_eq!(kind_of(None), ErrorKind::MissingHeader);
    }

    #[test]
    fn empty_header_is_missing() {
        assert_eq!(kind_of(Some("")), ErrorKind::MissingHeader);
        assert_eq!(kind_of(Some("   ")), ErrorKind::MissingHeader);
    }

    #[test]
    fn scheme_must_be_bearer() {
        assert_eq!(kind_of(Some("Basic abc")), ErrorKind::MalformedScheme);
        assert_eq!(kind_of(Some("Token")), ErrorKind::MalformedScheme);
        assert_eq!(kind_of(Some("Bearerabc.def.ghi")), ErrorKind::MalformedScheme);
    }

    #[test]
    fn scheme_without_token() {
        assert_eq!(kind_of(Some("Bearer")), ErrorKind::MissingToken);
        assert_eq!(kind_of(Some("Bearer   ")), ErrorKind::MissingToken);
    }

    #[test]
    fn extra_parts_are_malformed() {
        assert_eq!(kind_of(Some("Bearer abc def")), ErrorKind::MalformedHeader);
    }

    #[test]
    fn scheme_is_case_insensitive() {
        for header in ["Bearer abc.def.ghi", "bearer abc.def.ghi", "BEARER abc.def.ghi"] {
            let token = extract(Some(header)).unwrap();
            assert_eq!(token.as_str(), "abc.def.ghi");
        }
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let token = extract(Some("  Bearer \t abc.def.ghi  ")).unwrap();
        assert_eq!(token.as_str(), "abc.def.ghi");
    }

    #[test]
    fn reads_authorization_from_header_map() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            from_headers(&headers).unwrap_err().kind(),
            ErrorKind::MissingHeader
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(from_headers(&headers).unwrap().as_str(), "xyz");
    }

    #[test]
    fn opaque_header_bytes_are_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
        );
        assert_eq!(
            from_headers(&headers).unwrap_err().kind(),
            ErrorKind::MalformedHeader
        );
    }

    #[test]
    fn token_is_redacted_unless_alternate() {
        let token = BearerToken::from_static("secret.token.value");
        assert_eq!(format!("{token}"), "***BEARER***");
        assert_eq!(format!("{token:?}"), "***BEARER***");
        assert_eq!(format!("{token:#}"), "secret.token.value");
    }
}
