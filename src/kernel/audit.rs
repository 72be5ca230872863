//! Audit log for label-changing and flow-control decisions.
//!
//! Writes structured JSON entries, one per line, to an append-only sink.
//! Only labels, principals and identifiers are logged, never the values
//! that crossed a boundary.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use crate::lattice::{Label, Principal};

use super::compartment::{CompartmentId, Mode};
use super::guard::DenialReason;
use super::perimeter::PerimeterPolicy;
use super::sandbox::SandboxHandle;

/// Audit event type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A compartment started tracking labels.
    CompartmentEnabled,
    /// A guarded flow needed no label change.
    FlowAllowed,
    /// A guarded flow floated the destination's labels.
    LabelFloated,
    /// A guarded flow was refused.
    FlowDenied,
    /// A label or clearance was set explicitly.
    LabelChanged,
    /// A compartment gained privileges.
    PrivilegeGranted,
    /// A perimeter policy was installed.
    PerimeterApplied,
    /// Code was scheduled into a sandbox.
    SandboxScheduled,
    /// Scheduling into a sandbox was refused.
    SandboxDenied,
}

/// A single structured audit log entry.
#[derive(Debug, Serialize)]
struct AuditEntry {
    timestamp: String,
    compartment: String,
    event_type: AuditEventType,
    details: serde_json::Value,
}

/// Audit logger writing structured JSON to an append-only sink.
pub struct AuditLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl AuditLogger {
    /// Create an audit logger that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened for appending.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create an audit logger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Log a compartment entering a tracked mode.
    pub fn log_compartment_enabled(
        &self,
        compartment: CompartmentId,
        principal: &Principal,
        mode: Mode,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::CompartmentEnabled,
            compartment,
            serde_json::json!({
                "principal": principal.origin(),
                "mode": mode,
            }),
        )
    }

    /// Log a flow that passed without changing labels.
    pub fn log_flow_allowed(
        &self,
        compartment: CompartmentId,
        object_privacy: &Label,
        object_trust: &Label,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::FlowAllowed,
            compartment,
            serde_json::json!({
                "object_privacy": object_privacy.to_json(),
                "object_trust": object_trust.to_json(),
            }),
        )
    }

    /// Log a float.
    pub fn log_label_floated(
        &self,
        compartment: CompartmentId,
        privacy: &Label,
        trust: &Label,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::LabelFloated,
            compartment,
            serde_json::json!({
                "privacy": privacy.to_json(),
                "trust": trust.to_json(),
            }),
        )
    }

    /// Log a refused flow.
    pub fn log_flow_denied(
        &self,
        compartment: CompartmentId,
        object_privacy: &Label,
        object_trust: &Label,
        reason: &DenialReason,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::FlowDenied,
            compartment,
            serde_json::json!({
                "object_privacy": object_privacy.to_json(),
                "object_trust": object_trust.to_json(),
                "reason": reason.to_string(),
            }),
        )
    }

    /// Log an explicit label or clearance change.
    pub fn log_label_changed(
        &self,
        compartment: CompartmentId,
        field: &str,
        label: &Label,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::LabelChanged,
            compartment,
            serde_json::json!({
                "field": field,
                "label": label.to_json(),
            }),
        )
    }

    /// Log a privilege grant.
    pub fn log_privilege_granted(
        &self,
        compartment: CompartmentId,
        privileges: &Label,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::PrivilegeGranted,
            compartment,
            serde_json::json!({
                "privileges": privileges.to_json(),
            }),
        )
    }

    /// Log an installed perimeter.
    pub fn log_perimeter_applied(
        &self,
        compartment: CompartmentId,
        policy: &PerimeterPolicy,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::PerimeterApplied,
            compartment,
            serde_json::json!({
                "network": policy.network,
                "storage": policy.storage,
                "csp": policy.content_security_policy(),
            }),
        )
    }

    /// Log code scheduled into a sandbox.
    pub fn log_sandbox_scheduled(
        &self,
        caller: CompartmentId,
        sandbox: SandboxHandle,
        source_len: usize,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::SandboxScheduled,
            caller,
            serde_json::json!({
                "sandbox": sandbox.to_string(),
                "source_len": source_len,
            }),
        )
    }

    /// Log a refused schedule or fetch.
    pub fn log_sandbox_denied(
        &self,
        caller: CompartmentId,
        sandbox: Option<SandboxHandle>,
        reason: &str,
    ) -> anyhow::Result<()> {
        self.write_entry(
            AuditEventType::SandboxDenied,
            caller,
            serde_json::json!({
                "sandbox": sandbox.map(|s| s.to_string()),
                "reason": reason,
            }),
        )
    }

    /// Write a single JSON line to the audit log.
    fn write_entry(
        &self,
        event_type: AuditEventType,
        compartment: CompartmentId,
        details: serde_json::Value,
    ) -> anyhow::Result<()> {
        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            compartment: compartment.to_string(),
            event_type,
            details,
        };
        let line = serde_json::to_string(&entry)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
