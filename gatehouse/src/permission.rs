//! Permissions granted by a token and the permission an operation requires

use std::collections::{btree_set, BTreeSet};

use aliri_braid::braid;
use aliri_traits::Policy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::{AuthorizationError, ErrorKind},
    jwt::VerifiedClaims,
};

/// A single permission, such as `get:images`
#[braid(serde, ref_doc = "A borrowed reference to a [`Permission`]")]
pub struct Permission;

#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionsDto {
    String(String),
    Array(Vec<Permission>),
}

impl From<PermissionsDto> for Permissions {
    fn from(dto: PermissionsDto) -> Self {
        match dto {
            PermissionsDto::String(s) => s
                .split_whitespace()
                .map(|p| Permission::new(p.to_owned()))
                .collect(),
            PermissionsDto::Array(arr) => arr.into_iter().collect(),
        }
    }
}

/// The set of permissions granted by a token's `permissions` claim
///
/// The claim is normally an array of strings. A single space-delimited
/// string is accepted as well.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PermissionsDto", into = "Vec<Permission>")]
#[must_use]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    /// An empty permission set
    #[inline]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a permission to the set
    #[inline]
    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    /// Whether the set grants `permission`
    #[inline]
    #[must_use]
    pub fn contains(&self, permission: &PermissionRef) -> bool {
        self.0.contains(permission)
    }

    /// The number of distinct permissions granted
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no permissions are granted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The granted permissions, in lexical order
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        self.into_iter()
    }
}

impl From<Permissions> for Vec<Permission> {
    fn from(p: Permissions) -> Self {
        p.0.into_iter().collect()
    }
}

impl FromIterator<Permission> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Permission> for Permissions {
    #[inline]
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for Permissions {
    type Item = Permission;
    type IntoIter = btree_set::IntoIter<Permission>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An iterator over a set of borrowed permissions
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Permission>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a PermissionRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|p| &**p)
    }
}

impl<'a> IntoIterator for &'a Permissions {
    type Item = &'a PermissionRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Iter {
            iter: self.0.iter(),
        }
    }
}

/// The verified token did not satisfy a [`RequiredPermission`]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PermissionDenial {
    /// The token carries no `permissions` claim at all
    #[error("token has no permissions claim")]
    ClaimMissing,

    /// The token does not grant the required permission
    #[error("permission '{0}' not granted")]
    NotGranted(Permission),
}

impl From<PermissionDenial> for AuthorizationError {
    fn from(denial: PermissionDenial) -> Self {
        let kind = match &denial {
            PermissionDenial::ClaimMissing => ErrorKind::PermissionsClaimMissing,
            PermissionDenial::NotGranted(_) => ErrorKind::PermissionDenied,
        };
        Self::with_source(kind, denial)
    }
}

/// The permission an operation requires of its caller
///
/// An empty requirement admits any verified caller whose token carries a
/// `permissions` claim, even an empty one. A token without the claim is
/// never admitted.
///
/// ```
/// use gatehouse::RequiredPermission;
///
/// let required = RequiredPermission::new("get:images");
/// assert_eq!(required.permission().map(|p| p.as_str()), Some("get:images"));
///
/// assert!(RequiredPermission::new("").permission().is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct RequiredPermission(Option<Permission>);

impl RequiredPermission {
    /// Requires only that the token carries a `permissions` claim
    #[inline]
    pub const fn any() -> Self {
        Self(None)
    }

    /// Requires `permission`; an empty string is the same as [`any()`][Self::any]
    pub fn new(permission: impl Into<String>) -> Self {
        let permission = permission.into();
        if permission.is_empty() {
            Self::any()
        } else {
            Self(Some(Permission::new(permission)))
        }
    }

    /// The required permission, if there is one
    #[inline]
    #[must_use]
    pub fn permission(&self) -> Option<&PermissionRef> {
        self.0.as_deref()
    }
}

impl From<Permission> for RequiredPermission {
    #[inline]
    fn from(permission: Permission) -> Self {
        if permission.as_str().is_empty() {
            Self::any()
        } else {
            Self(Some(permission))
        }
    }
}

impl Policy for RequiredPermission {
    type Request = VerifiedClaims;
    type Denial = PermissionDenial;

    fn evaluate(&self, claims: &Self::Request) -> Result<(), Self::Denial> {
        let granted = claims
            .permissions()
            .ok_or(PermissionDenial::ClaimMissing)?;

        match &self.0 {
            Some(required) if !granted.contains(required) => {
                Err(PermissionDenial::NotGranted(required.clone()))
            }
            _ => Ok(()),
        }
    }
}
