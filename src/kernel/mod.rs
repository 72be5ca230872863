//! Reference monitor: the trusted computing base.
//!
//! Every cross-compartment read, write, call and message goes through the
//! guard here: compartment state, label floating, perimeter enforcement,
//! sandbox scheduling and the audit trail.

use thiserror::Error;

use crate::lattice::LabelError;

pub mod access;
pub mod audit;
pub mod compartment;
pub mod guard;
pub mod monitor;
pub mod perimeter;
pub mod sandbox;

pub use access::AccessAction;
pub use audit::AuditLogger;
pub use compartment::{CompartmentId, CompartmentRegistry, CompartmentState, Mode};
pub use guard::{DenialReason, FlowDirection, GuardDecision};
pub use monitor::Monitor;
pub use perimeter::{
    EnforcementError, NetworkPolicy, PerimeterEnforcer, PerimeterPolicy, RecordingEnforcer,
    StorageAccess, TracingEnforcer,
};
pub use sandbox::{
    EvalScope, FetchError, Handler, Outcome, SandboxHandle, ScriptEngine, ScriptError,
    SourceFetcher,
};

/// Errors surfaced by the reference monitor to its embedding.
///
/// A refused flow is an ordinary outcome for the guard; it only becomes an
/// error here, at the boundary where the embedding must abort the operation.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No compartment is registered under this id.
    #[error("unknown compartment {0}")]
    UnknownCompartment(CompartmentId),
    /// No sandbox is registered under this handle.
    #[error("unknown sandbox {0}")]
    UnknownSandbox(SandboxHandle),
    /// The guard or a label-change check refused the operation.
    #[error("security error: {0}")]
    SubsumptionDenied(String),
    /// Two content compartments of different origins touched each other.
    #[error("same-origin check failed: {accessor} cannot access {owner}")]
    SameOriginViolation {
        /// Origin of the accessing compartment.
        accessor: String,
        /// Origin of the compartment that owns the object.
        owner: String,
    },
    /// The operation is not valid for the compartment's current mode.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Code evaluated in the caller's own compartment threw.
    #[error("script failed: {0}")]
    ScriptFailed(String),
    /// Building or copying a label failed.
    #[error(transparent)]
    Label(#[from] LabelError),
    /// The perimeter collaborator refused a policy.
    #[error(transparent)]
    Enforcement(#[from] perimeter::EnforcementError),
    /// Fetching script source failed.
    #[error(transparent)]
    Fetch(#[from] sandbox::FetchError),
}

impl MonitorError {
    /// Whether the error is a security refusal rather than a usage or
    /// infrastructure failure.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::SubsumptionDenied(_) | Self::SameOriginViolation { .. }
        )
    }
}
