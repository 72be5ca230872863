//! Privileges: authority to discharge label conjuncts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Label, LabelError, Principal};

/// The set of disjunctions a compartment can speak for.
///
/// Privileges only grow: [`Privilege::combine`] conjoins new authority and
/// nothing ever removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Privilege {
    label: Label,
}

impl Privilege {
    /// No authority at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Privilege over the conjuncts of `label`.
    pub fn new(label: Label) -> Self {
        Self { label }
    }

    /// Authority of a single principal.
    pub fn from_principal(principal: Principal) -> Self {
        Self::new(Label::from_principal(principal))
    }

    /// Read-only view used by subsumption checks.
    pub fn as_label(&self) -> &Label {
        &self.label
    }

    /// Whether this privilege discharges nothing.
    pub fn is_empty(&self) -> bool {
        self.label.is_empty()
    }

    /// Accumulate more authority.
    pub fn combine(&mut self, other: &Privilege) {
        self.label = self.label.and(&other.label);
    }

    /// Accumulate the authority of one principal.
    pub fn grant(&mut self, principal: Principal) {
        self.label = self.label.and(&Label::from_principal(principal));
    }

    /// Deep copy for storing into another owner.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OutOfMemory`] if the copy cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, LabelError> {
        Ok(Self {
            label: self.label.try_clone()?,
        })
    }

    /// Whether this privilege covers everything `other` covers.
    pub fn subsumes(&self, other: &Privilege) -> bool {
        self.label.subsumes(&other.label)
    }
}

impl From<Label> for Privilege {
    fn from(label: Label) -> Self {
        Self::new(label)
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Privilege({})", self.label)
    }
}
