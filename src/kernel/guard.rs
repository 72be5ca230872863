//! The cross-boundary guard: decide whether information may flow into a
//! compartment and float its labels when it may.
//!
//! A float is committed to the destination's state before the decision is
//! returned, so a reentrant read during the same operation already sees the
//! raised label. Denials never touch the destination.

use std::fmt;

use tracing::{debug, info, warn};

use crate::lattice::{Label, LabelError, Privilege};

use super::compartment::{CompartmentId, CompartmentRegistry, CompartmentState};
use super::perimeter::{self, PerimeterEnforcer, PerimeterPolicy};
use super::MonitorError;

/// Which side asserts the declassification in a compartment-to-compartment
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    /// The destination consumes data; its own privileges apply.
    Read,
    /// The source imposes data on the destination; the source's privileges
    /// apply.
    Write,
}

/// Why a flow was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// Floating would raise privacy above the destination's clearance.
    ExceedsPrivacyClearance,
    /// Floating would drop trust below the destination's trust floor.
    BelowTrustClearance,
    /// The label floated but the perimeter could not be installed.
    EnforcementFailed(String),
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExceedsPrivacyClearance => f.write_str("privacy label would exceed clearance"),
            Self::BelowTrustClearance => f.write_str("trust label would fall below clearance"),
            Self::EnforcementFailed(reason) => write!(f, "perimeter enforcement failed: {reason}"),
        }
    }
}

/// Outcome of one guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The destination's labels already cover the object.
    Direct,
    /// The destination floated to these labels and the perimeter was
    /// re-applied.
    Floated {
        /// New privacy label.
        privacy: Label,
        /// New trust label.
        trust: Label,
        /// Perimeter installed for the new privacy label.
        policy: PerimeterPolicy,
    },
    /// The flow must not happen.
    Denied(DenialReason),
}

impl GuardDecision {
    /// Whether information may flow.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied(_))
    }

    /// Whether the destination's labels changed.
    pub fn floated(&self) -> bool {
        matches!(self, Self::Floated { .. })
    }

    /// Turn a denial into the error the access layer raises.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] for a denied flow.
    pub fn into_result(self) -> Result<Self, MonitorError> {
        match self {
            Self::Denied(reason) => Err(MonitorError::SubsumptionDenied(reason.to_string())),
            other => Ok(other),
        }
    }
}

/// Guard a read of an object labelled `(privacy, trust)` by `dest`,
/// asserting `privileges`.
///
/// # Errors
///
/// Returns [`LabelError::OutOfMemory`] if a label cannot be copied.
pub fn guard_read_labels(
    dest: &mut CompartmentState,
    object_privacy: &Label,
    object_trust: &Label,
    privileges: &Privilege,
    enforcer: &mut dyn PerimeterEnforcer,
) -> Result<GuardDecision, LabelError> {
    if dest.enable_sandbox_mode() {
        debug!(compartment = %dest.id(), "sandbox mode enabled by guard");
    }

    if dest.privacy_label().subsumes_with(privileges, object_privacy)
        && object_trust.subsumes_with(privileges, dest.trust_label())
    {
        debug!(compartment = %dest.id(), "direct flow");
        return Ok(GuardDecision::Direct);
    }

    let candidate_privacy = dest.privacy_label().and(object_privacy);
    let candidate_trust = dest.trust_label().or(object_trust);

    if let Some(ceiling) = dest.privacy_clearance() {
        if !ceiling.subsumes_with(privileges, &candidate_privacy) {
            warn!(
                compartment = %dest.id(),
                object = %object_privacy,
                clearance = %ceiling,
                "flow denied: privacy clearance"
            );
            return Ok(GuardDecision::Denied(DenialReason::ExceedsPrivacyClearance));
        }
    }
    if let Some(floor) = dest.trust_clearance() {
        if !candidate_trust.subsumes_with(privileges, floor) {
            warn!(
                compartment = %dest.id(),
                object = %object_trust,
                clearance = %floor,
                "flow denied: trust clearance"
            );
            return Ok(GuardDecision::Denied(DenialReason::BelowTrustClearance));
        }
    }

    dest.tighten_privacy(object_privacy);
    dest.weaken_trust(object_trust);
    info!(
        compartment = %dest.id(),
        privacy = %dest.privacy_label(),
        trust = %dest.trust_label(),
        "label floated"
    );

    let policy = perimeter::policy_for(dest)?;
    if let Err(e) = enforcer.apply(dest.id(), &policy) {
        // float stays committed; the caller aborts the operation
        warn!(compartment = %dest.id(), error = %e, "perimeter enforcement failed");
        return Ok(GuardDecision::Denied(DenialReason::EnforcementFailed(
            e.to_string(),
        )));
    }

    Ok(GuardDecision::Floated {
        privacy: dest.privacy_label().try_clone()?,
        trust: dest.trust_label().try_clone()?,
        policy,
    })
}

/// Guard a flow from compartment `source` into compartment `dest`.
///
/// The object's labels are the source's clearance if it is a true sandbox,
/// its working labels otherwise. An untracked source is moved to sandbox
/// mode first, so it reads as public.
///
/// # Errors
///
/// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
/// [`MonitorError::Label`] if a label cannot be copied.
pub fn guard_read(
    registry: &mut CompartmentRegistry,
    dest: CompartmentId,
    source: CompartmentId,
    direction: FlowDirection,
    enforcer: &mut dyn PerimeterEnforcer,
) -> Result<GuardDecision, MonitorError> {
    if !registry.contains(dest) {
        return Err(MonitorError::UnknownCompartment(dest));
    }

    let source_state = registry
        .get_mut(source)
        .ok_or(MonitorError::UnknownCompartment(source))?;
    source_state.enable_sandbox_mode();
    let (privacy, trust) = source_state.effective_labels();
    let object_privacy = privacy.try_clone()?;
    let object_trust = trust.try_clone()?;
    let source_privileges = source_state.privileges().try_clone()?;

    let dest_state = registry
        .get_mut(dest)
        .ok_or(MonitorError::UnknownCompartment(dest))?;
    dest_state.enable_sandbox_mode();
    let privileges = match direction {
        FlowDirection::Read => dest_state.privileges().try_clone()?,
        FlowDirection::Write => source_privileges,
    };

    guard_read_labels(
        dest_state,
        &object_privacy,
        &object_trust,
        &privileges,
        enforcer,
    )
    .map_err(MonitorError::from)
}
