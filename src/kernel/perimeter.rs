//! Perimeter enforcement adapter.
//!
//! Turns a compartment's privacy label into the network and storage policy
//! that keeps labelled data from leaving, and hands that policy to the
//! embedding's enforcement layer.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::lattice::{Label, LabelError, Principal, Privilege};

use super::compartment::{CompartmentId, CompartmentState};

/// Which remote origins a compartment may talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "origins")]
pub enum NetworkPolicy {
    /// Ambient network access.
    Unrestricted,
    /// Only these origins.
    Origins(Vec<String>),
    /// No network at all.
    Blocked,
}

/// Which storage identity a compartment writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageAccess {
    /// The compartment's own principal's storage.
    Ambient,
    /// A fresh opaque identity that shares nothing.
    Isolated,
    /// No storage.
    Denied,
}

/// Minimal external policy implied by a privacy label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerimeterPolicy {
    /// Network restriction.
    pub network: NetworkPolicy,
    /// Storage restriction.
    pub storage: StorageAccess,
}

impl PerimeterPolicy {
    /// Policy with no restriction.
    pub fn unrestricted() -> Self {
        Self {
            network: NetworkPolicy::Unrestricted,
            storage: StorageAccess::Ambient,
        }
    }

    /// Policy that shuts every channel.
    pub fn lockdown() -> Self {
        Self {
            network: NetworkPolicy::Blocked,
            storage: StorageAccess::Denied,
        }
    }

    /// Compute the policy for `label`, after discharging the roles the
    /// compartment can speak for.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OutOfMemory`] if the label cannot be copied.
    pub fn for_label(label: &Label, privileges: &Privilege) -> Result<Self, LabelError> {
        let mut reduced = label.try_clone()?;
        reduced.reduce(privileges);

        if reduced.is_empty() {
            return Ok(Self::unrestricted());
        }
        match reduced.principals_if_singleton() {
            Some(principals) => Ok(Self {
                network: NetworkPolicy::Origins(
                    principals.iter().map(|p| p.origin().to_owned()).collect(),
                ),
                storage: StorageAccess::Isolated,
            }),
            None => Ok(Self::lockdown()),
        }
    }

    /// Content-Security-Policy header equivalent of the network policy.
    pub fn content_security_policy(&self) -> String {
        match &self.network {
            NetworkPolicy::Unrestricted => "default-src *".to_owned(),
            NetworkPolicy::Origins(origins) => {
                format!("default-src 'none'; connect-src {}", origins.join(" "))
            }
            NetworkPolicy::Blocked => "default-src 'none'".to_owned(),
        }
    }

    /// Whether a request to `origin` passes the network policy.
    pub fn allows_origin(&self, origin: &str) -> bool {
        match &self.network {
            NetworkPolicy::Unrestricted => true,
            NetworkPolicy::Origins(origins) => {
                let wanted = Principal::parse(origin)
                    .map(|p| p.origin().to_owned())
                    .unwrap_or_else(|_| origin.to_owned());
                origins.iter().any(|o| *o == wanted)
            }
            NetworkPolicy::Blocked => false,
        }
    }

    /// Whether storage goes through the ambient principal.
    pub fn allows_ambient_storage(&self) -> bool {
        self.storage == StorageAccess::Ambient
    }
}

impl fmt::Display for PerimeterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match self.storage {
            StorageAccess::Ambient => "ambient",
            StorageAccess::Isolated => "isolated",
            StorageAccess::Denied => "denied",
        };
        write!(f, "csp=\"{}\" storage={storage}", self.content_security_policy())
    }
}

/// Policy for a compartment's current state.
///
/// A true sandbox is enforced at its sandbox label, everything else at its
/// working privacy label.
///
/// # Errors
///
/// Returns [`LabelError::OutOfMemory`] if the label cannot be copied.
pub fn policy_for(state: &CompartmentState) -> Result<PerimeterPolicy, LabelError> {
    PerimeterPolicy::for_label(state.enforcement_label(), state.privileges())
}

/// Error returned by an enforcement layer that could not install a policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnforcementError {
    /// The layer refused the policy.
    #[error("perimeter for {compartment} rejected: {reason}")]
    Rejected {
        /// Target compartment.
        compartment: CompartmentId,
        /// Why the layer refused.
        reason: String,
    },
}

/// Network and storage layer that installs perimeter policies.
///
/// Applying the same policy twice must be harmless: the monitor re-applies
/// on every float and label change.
pub trait PerimeterEnforcer {
    /// Install `policy` for `compartment`.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcementError`] if the policy could not be installed.
    fn apply(
        &mut self,
        compartment: CompartmentId,
        policy: &PerimeterPolicy,
    ) -> Result<(), EnforcementError>;
}

/// Enforcer that only traces the policies it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEnforcer;

impl PerimeterEnforcer for TracingEnforcer {
    fn apply(
        &mut self,
        compartment: CompartmentId,
        policy: &PerimeterPolicy,
    ) -> Result<(), EnforcementError> {
        debug!(%compartment, %policy, "perimeter applied");
        Ok(())
    }
}

/// Enforcer that remembers every policy, shareable with the caller.
#[derive(Debug, Default, Clone)]
pub struct RecordingEnforcer {
    applied: Arc<Mutex<Vec<(CompartmentId, PerimeterPolicy)>>>,
}

impl RecordingEnforcer {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every policy applied so far, oldest first.
    pub fn applied(&self) -> Vec<(CompartmentId, PerimeterPolicy)> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent policy applied to `compartment`.
    pub fn last_for(&self, compartment: CompartmentId) -> Option<PerimeterPolicy> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(id, _)| *id == compartment)
            .map(|(_, policy)| policy.clone())
    }
}

impl PerimeterEnforcer for RecordingEnforcer {
    fn apply(
        &mut self,
        compartment: CompartmentId,
        policy: &PerimeterPolicy,
    ) -> Result<(), EnforcementError> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((compartment, policy.clone()));
        Ok(())
    }
}
