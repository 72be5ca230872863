//! Access-check mediation for cross-compartment property access.
//!
//! The interception layer calls [`Monitor::check_access`] whenever code in
//! one compartment touches an object owned by another.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::compartment::{CompartmentId, Mode};
use super::guard::FlowDirection;
use super::monitor::Monitor;
use super::MonitorError;

/// Kind of cross-compartment access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    /// Property read.
    Get,
    /// Property write.
    Set,
    /// Function call.
    Call,
    /// Message delivery; information flows from the accessor to the owner.
    PostMessage,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Call => "call",
            Self::PostMessage => "post_message",
        };
        f.write_str(name)
    }
}

impl Monitor {
    /// Decide whether `accessor` may perform `action` on an object owned by
    /// `owner`.
    ///
    /// Information flows from the owner to the accessor, and the other way
    /// round for `PostMessage`. Untracked pairs only get the same-origin
    /// check, which `PostMessage` always passes. Otherwise reads, writes and calls must pass the guard in both
    /// directions under the accessor's privileges, since a call or write
    /// also carries data back.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SameOriginViolation`] or
    /// [`MonitorError::SubsumptionDenied`] when the access must be aborted.
    pub fn check_access(
        &mut self,
        accessor: CompartmentId,
        owner: CompartmentId,
        action: AccessAction,
    ) -> Result<(), MonitorError> {
        let accessor_mode = self.state(accessor)?.mode();
        let owner_mode = self.state(owner)?.mode();

        // postMessage is a cross-origin entry point; only labels gate it
        let cross_origin_ok = action == AccessAction::PostMessage;
        match (accessor_mode, owner_mode) {
            (Mode::NotSandboxed, Mode::NotSandboxed) if cross_origin_ok => return Ok(()),
            (Mode::NotSandboxed, Mode::NotSandboxed) => {
                return self.same_origin(accessor, owner);
            }
            (Mode::SandboxMode, Mode::SandboxMode)
                if !cross_origin_ok && self.enforcement().same_origin_for_content =>
            {
                self.same_origin(accessor, owner)?;
            }
            _ => {}
        }

        if action == AccessAction::PostMessage {
            return self
                .guard_read_from(owner, accessor, FlowDirection::Read)?
                .into_result()
                .map(|_| ());
        }

        self.guard_read_from(accessor, owner, FlowDirection::Read)?
            .into_result()?;
        self.guard_read_from(owner, accessor, FlowDirection::Write)?
            .into_result()
            .map(|_| ())
    }

    fn same_origin(&self, accessor: CompartmentId, owner: CompartmentId) -> Result<(), MonitorError> {
        let accessor_principal = self.principal(accessor)?;
        let owner_principal = self.principal(owner)?;
        if accessor_principal == owner_principal {
            return Ok(());
        }
        warn!(
            accessor = %accessor_principal,
            owner = %owner_principal,
            "same-origin check failed"
        );
        Err(MonitorError::SameOriginViolation {
            accessor: accessor_principal.origin().to_owned(),
            owner: owner_principal.origin().to_owned(),
        })
    }
}
