//! Roles: disjunctions of principals.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LabelError, Principal};

/// A disjunction of principals ("any one of these").
///
/// Principals are kept sorted and duplicate-free, so equality and subset
/// checks are a single merge walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Principal>", into = "Vec<Principal>")]
pub struct Role {
    principals: Vec<Principal>,
}

impl Role {
    /// The empty role. It is only a building block: labels reject it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Singleton role for one principal.
    pub fn from_principal(principal: Principal) -> Self {
        Self {
            principals: vec![principal],
        }
    }

    /// Singleton role for a principal string (see [`Principal::parse`]).
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::InvalidPrincipal`] if the string cannot be resolved.
    pub fn parse(principal: &str) -> Result<Self, LabelError> {
        Principal::parse(principal).map(Self::from_principal)
    }

    /// Role over several principal strings.
    ///
    /// # Errors
    ///
    /// Fails on the first string that cannot be resolved.
    pub fn from_uris<I, S>(uris: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        uris.into_iter()
            .try_fold(Self::new(), |role, uri| Ok(role.or(Principal::parse(uri.as_ref())?)))
    }

    /// Add a principal to the disjunction. Adding a member is a no-op.
    #[must_use]
    pub fn or(mut self, principal: Principal) -> Self {
        self.insert(principal);
        self
    }

    /// Disjoin every principal of `other` into this role.
    #[must_use]
    pub fn or_role(mut self, other: &Role) -> Self {
        for principal in &other.principals {
            self.insert(principal.clone());
        }
        self
    }

    fn insert(&mut self, principal: Principal) {
        if let Err(pos) = self.principals.binary_search(&principal) {
            self.principals.insert(pos, principal);
        }
    }

    /// Whether `other`'s principals are all members of this role.
    ///
    /// A role with more members is the wider disjunction, so it subsumes
    /// every role whose members it contains.
    pub fn subsumes(&self, other: &Role) -> bool {
        if other.principals.len() > self.principals.len() {
            return false;
        }
        let mut mine = self.principals.iter();
        'outer: for theirs in &other.principals {
            for candidate in mine.by_ref() {
                match candidate.cmp(theirs) {
                    Ordering::Less => continue,
                    Ordering::Equal => continue 'outer,
                    Ordering::Greater => return false,
                }
            }
            return false;
        }
        true
    }

    /// Whether the principal is one of the disjuncts.
    pub fn contains(&self, principal: &Principal) -> bool {
        self.principals.binary_search(principal).is_ok()
    }

    /// Sorted principals of this role.
    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }

    /// Number of principals.
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Whether the role has no principals.
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    /// Principals present in both roles.
    pub(crate) fn intersection(&self, other: &Role) -> Role {
        let principals = self
            .principals
            .iter()
            .filter(|p| other.contains(p))
            .cloned()
            .collect();
        Role { principals }
    }

    pub(crate) fn try_clone(&self) -> Result<Role, LabelError> {
        let mut principals = Vec::new();
        principals
            .try_reserve_exact(self.principals.len())
            .map_err(|_| LabelError::OutOfMemory)?;
        principals.extend(self.principals.iter().cloned());
        Ok(Role { principals })
    }
}

impl From<Principal> for Role {
    fn from(principal: Principal) -> Self {
        Self::from_principal(principal)
    }
}

impl TryFrom<Vec<Principal>> for Role {
    type Error = LabelError;

    fn try_from(value: Vec<Principal>) -> Result<Self, Self::Error> {
        Ok(value.into_iter().fold(Role::new(), Role::or))
    }
}

impl From<Role> for Vec<Principal> {
    fn from(value: Role) -> Self {
        value.principals
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Role(")?;
        for (i, principal) in self.principals.iter().enumerate() {
            if i > 0 {
                f.write_str(").or(")?;
            }
            write!(f, "{principal}")?;
        }
        f.write_str(")")
    }
}
