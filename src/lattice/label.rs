//! Labels: conjunctions of roles.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LabelError, Principal, Privilege, Role};

/// A conjunction of roles.
///
/// The empty label is the public label: it restricts nothing and every label
/// subsumes it. Roles are kept sorted, duplicate-free and irredundant, so
/// equal conjunctions compare equal. A label never holds an empty role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Role>", into = "Vec<Role>")]
pub struct Label {
    roles: Vec<Role>,
}

impl Label {
    /// The public label.
    pub fn new() -> Self {
        Self::default()
    }

    /// Label holding a single role.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::EmptyRole`] if the role has no principals.
    pub fn from_role(role: Role) -> Result<Self, LabelError> {
        Self::from_roles([role])
    }

    /// Conjunction of the given roles.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::EmptyRole`] if any role has no principals.
    pub fn from_roles<I>(roles: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = Role>,
    {
        let roles: Vec<Role> = roles.into_iter().collect();
        if roles.iter().any(Role::is_empty) {
            return Err(LabelError::EmptyRole);
        }
        Ok(Self {
            roles: normalize(roles),
        })
    }

    /// Label for a single principal.
    pub fn from_principal(principal: Principal) -> Self {
        Self {
            roles: vec![Role::from_principal(principal)],
        }
    }

    /// Parse the JSON label format `[["p1","p2"],["q1"]]`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::MalformedJson`] when the text is not an array of
    /// non-empty arrays of valid principal strings.
    pub fn from_json(text: &str) -> Result<Self, LabelError> {
        serde_json::from_str(text).map_err(|e| LabelError::MalformedJson(e.to_string()))
    }

    /// Render the label in the JSON label format.
    pub fn to_json(&self) -> String {
        let clauses: Vec<Vec<&str>> = self
            .roles
            .iter()
            .map(|role| role.principals().iter().map(Principal::origin).collect())
            .collect();
        serde_json::Value::from(clauses).to_string()
    }

    /// Conjoin one more role.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::EmptyRole`] if the role has no principals.
    pub fn and_role(&self, role: Role) -> Result<Self, LabelError> {
        if role.is_empty() {
            return Err(LabelError::EmptyRole);
        }
        let mut roles = self.roles.clone();
        roles.push(role);
        Ok(Self {
            roles: normalize(roles),
        })
    }

    /// Conjunction of both labels.
    ///
    /// Keeps every role of both operands and drops the ones another role
    /// already subsumes. The result subsumes both operands.
    #[must_use]
    pub fn and(&self, other: &Label) -> Self {
        let mut roles = Vec::with_capacity(self.roles.len().saturating_add(other.roles.len()));
        roles.extend(self.roles.iter().cloned());
        roles.extend(other.roles.iter().cloned());
        Self {
            roles: normalize(roles),
        }
    }

    /// Weakest label subsumed by both operands.
    ///
    /// Each pair of roles contributes the principals they share; pairs with
    /// nothing in common contribute nothing. Used to lower a trust label
    /// after reading less trusted data.
    #[must_use]
    pub fn or(&self, other: &Label) -> Self {
        let roles = self
            .roles
            .iter()
            .flat_map(|mine| other.roles.iter().map(move |theirs| mine.intersection(theirs)))
            .filter(|role| !role.is_empty())
            .collect();
        Self {
            roles: normalize(roles),
        }
    }

    /// Pure lattice order: every role of `other` is covered by a role here.
    pub fn subsumes(&self, other: &Label) -> bool {
        self.subsumes_with(&Privilege::empty(), other)
    }

    /// Lattice order with declassification.
    ///
    /// Each role of `other` must be covered either by a role of this label
    /// or by a role the privilege holds.
    pub fn subsumes_with(&self, privileges: &Privilege, other: &Label) -> bool {
        let granted = privileges.as_label();
        other.roles.iter().all(|theirs| {
            self.roles.iter().any(|mine| mine.subsumes(theirs))
                || granted.roles.iter().any(|held| held.subsumes(theirs))
        })
    }

    /// Drop every role the privilege can discharge on its own.
    pub fn reduce(&mut self, privileges: &Privilege) {
        let granted = privileges.as_label();
        self.roles
            .retain(|role| !granted.roles.iter().any(|held| held.subsumes(role)));
    }

    /// Whether this is the public label.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Roles of the conjunction, in canonical order.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Principals of the only role, if the label has exactly one role.
    pub fn principals_if_singleton(&self) -> Option<&[Principal]> {
        match self.roles.as_slice() {
            [role] => Some(role.principals()),
            _ => None,
        }
    }

    /// Deep copy that reports allocation failure instead of aborting.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OutOfMemory`] if the copy cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, LabelError> {
        let mut roles = Vec::new();
        roles
            .try_reserve_exact(self.roles.len())
            .map_err(|_| LabelError::OutOfMemory)?;
        for role in &self.roles {
            roles.push(role.try_clone()?);
        }
        Ok(Self { roles })
    }
}

/// Sort, deduplicate and drop roles subsumed by another role.
fn normalize(mut roles: Vec<Role>) -> Vec<Role> {
    roles.sort();
    roles.dedup();
    let keep: Vec<bool> = roles
        .iter()
        .enumerate()
        .map(|(i, role)| {
            !roles
                .iter()
                .enumerate()
                .any(|(j, other)| i != j && other.subsumes(role))
        })
        .collect();
    roles
        .into_iter()
        .zip(keep)
        .filter_map(|(role, keep)| keep.then_some(role))
        .collect()
}

impl TryFrom<Vec<Role>> for Label {
    type Error = LabelError;

    fn try_from(value: Vec<Role>) -> Result<Self, Self::Error> {
        Self::from_roles(value)
    }
}

impl From<Label> for Vec<Role> {
    fn from(value: Label) -> Self {
        value.roles
    }
}

impl std::str::FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.roles.is_empty() {
            return f.write_str("Label()");
        }
        for (i, role) in self.roles.iter().enumerate() {
            if i == 0 {
                write!(f, "Label({role})")?;
            } else {
                write!(f, ".and({role})")?;
            }
        }
        Ok(())
    }
}
