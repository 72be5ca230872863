//! Per-compartment label state and the registry that owns it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lattice::{Label, LabelError, Principal, Privilege};

use super::sandbox::SandboxHandle;

/// Opaque identifier for an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompartmentId(Uuid);

impl CompartmentId {
    /// Allocate a new identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompartmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a compartment takes part in label tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// No labels tracked; only the same-origin policy applies.
    NotSandboxed,
    /// Ambient context whose working label floats freely.
    SandboxMode,
    /// Isolated unit with fixed boundary labels held as its clearance.
    Sandbox,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSandboxed => "not-sandboxed",
            Self::SandboxMode => "sandbox-mode",
            Self::Sandbox => "sandbox",
        };
        f.write_str(name)
    }
}

/// Label state of one compartment.
///
/// For a true sandbox the clearance holds the fixed sandbox labels and the
/// privacy/trust labels are the working labels of the current evaluation.
#[derive(Debug, Clone)]
pub struct CompartmentState {
    id: CompartmentId,
    principal: Principal,
    mode: Mode,
    privacy: Label,
    trust: Label,
    privacy_clearance: Option<Label>,
    trust_clearance: Option<Label>,
    privileges: Privilege,
    clean: bool,
    sandbox: Option<SandboxHandle>,
}

impl CompartmentState {
    /// Fresh untracked compartment running as `principal`.
    pub fn new(principal: Principal) -> Self {
        Self {
            id: CompartmentId::new(),
            principal,
            mode: Mode::NotSandboxed,
            privacy: Label::new(),
            trust: Label::new(),
            privacy_clearance: None,
            trust_clearance: None,
            privileges: Privilege::empty(),
            clean: true,
            sandbox: None,
        }
    }

    /// Compartment already in sandbox mode, holding its own principal's
    /// privilege and public labels.
    pub fn sandbox_mode(principal: Principal) -> Self {
        let mut state = Self::new(principal);
        state.enable_sandbox_mode();
        state
    }

    /// Compartment backing a true sandbox with fixed boundary labels.
    ///
    /// It starts with no privileges and public working labels; the working
    /// labels are seeded when the first evaluation is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OutOfMemory`] if the labels cannot be copied.
    pub fn for_sandbox(
        principal: Principal,
        handle: SandboxHandle,
        privacy: &Label,
        trust: &Label,
    ) -> Result<Self, LabelError> {
        let mut state = Self::new(principal);
        state.mode = Mode::Sandbox;
        state.privacy_clearance = Some(privacy.try_clone()?);
        state.trust_clearance = Some(trust.try_clone()?);
        state.sandbox = Some(handle);
        Ok(state)
    }

    // ── Trusted construction ──

    /// Seed the privacy label. Only for embedding-side construction.
    #[must_use]
    pub fn with_privacy(mut self, label: Label) -> Self {
        self.privacy = label;
        self
    }

    /// Seed the trust label. Only for embedding-side construction.
    #[must_use]
    pub fn with_trust(mut self, label: Label) -> Self {
        self.trust = label;
        self
    }

    /// Seed a clearance, promoting a sandbox-mode context to a bounded one.
    #[must_use]
    pub fn with_clearance(mut self, privacy: Option<Label>, trust: Option<Label>) -> Self {
        self.privacy_clearance = privacy;
        self.trust_clearance = trust;
        self
    }

    /// Add privileges on top of the ones already held.
    #[must_use]
    pub fn with_privileges(mut self, privileges: &Privilege) -> Self {
        self.privileges.combine(privileges);
        self
    }

    // ── Accessors ──

    /// Identifier of this compartment.
    pub fn id(&self) -> CompartmentId {
        self.id
    }

    /// Principal the compartment runs as.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Working privacy label.
    pub fn privacy_label(&self) -> &Label {
        &self.privacy
    }

    /// Working trust label.
    pub fn trust_label(&self) -> &Label {
        &self.trust
    }

    /// Privacy ceiling, if any.
    pub fn privacy_clearance(&self) -> Option<&Label> {
        self.privacy_clearance.as_ref()
    }

    /// Trust floor, if any.
    pub fn trust_clearance(&self) -> Option<&Label> {
        self.trust_clearance.as_ref()
    }

    /// Accumulated privileges.
    pub fn privileges(&self) -> &Privilege {
        &self.privileges
    }

    /// Whether the working label has never been seeded, floated or raised.
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Whether labels are tracked at all.
    pub fn is_sandboxed(&self) -> bool {
        self.mode != Mode::NotSandboxed
    }

    /// Whether this compartment backs a true sandbox.
    pub fn is_sandbox(&self) -> bool {
        self.mode == Mode::Sandbox
    }

    /// Whether this is an ambient sandbox-mode context.
    pub fn is_sandbox_mode(&self) -> bool {
        self.mode == Mode::SandboxMode
    }

    /// Handle of the sandbox this compartment backs.
    pub fn sandbox(&self) -> Option<SandboxHandle> {
        self.sandbox
    }

    /// Labels an observer must assume for data coming out of this
    /// compartment: the clearance of a true sandbox, the working labels
    /// otherwise.
    pub fn effective_labels(&self) -> (&Label, &Label) {
        match self.mode {
            Mode::Sandbox => (
                self.privacy_clearance.as_ref().unwrap_or(&self.privacy),
                self.trust_clearance.as_ref().unwrap_or(&self.trust),
            ),
            Mode::NotSandboxed | Mode::SandboxMode => (&self.privacy, &self.trust),
        }
    }

    /// Label the perimeter must be computed from.
    pub fn enforcement_label(&self) -> &Label {
        match self.mode {
            Mode::Sandbox => self.privacy_clearance.as_ref().unwrap_or(&self.privacy),
            Mode::NotSandboxed | Mode::SandboxMode => &self.privacy,
        }
    }

    // ── Mutation (monitor only) ──

    /// Move `NotSandboxed` to `SandboxMode`. Returns whether it changed.
    pub(crate) fn enable_sandbox_mode(&mut self) -> bool {
        if self.mode != Mode::NotSandboxed {
            return false;
        }
        self.mode = Mode::SandboxMode;
        self.privacy = Label::new();
        self.trust = Label::new();
        self.privileges = Privilege::from_principal(self.principal.clone());
        true
    }

    /// Join an object's privacy label into the working label.
    pub(crate) fn tighten_privacy(&mut self, object: &Label) {
        self.privacy = self.privacy.and(object);
        self.clean = false;
    }

    /// Lower the working trust label to what the object can vouch for.
    pub(crate) fn weaken_trust(&mut self, object: &Label) {
        self.trust = self.trust.or(object);
        self.clean = false;
    }

    pub(crate) fn set_privacy_label(&mut self, label: Label) {
        self.privacy = label;
    }

    pub(crate) fn set_trust_label(&mut self, label: Label) {
        self.trust = label;
    }

    pub(crate) fn set_privacy_clearance(&mut self, label: Label) {
        self.privacy_clearance = Some(label);
    }

    pub(crate) fn set_trust_clearance(&mut self, label: Label) {
        self.trust_clearance = Some(label);
    }

    pub(crate) fn add_privileges(&mut self, privileges: &Privilege) {
        self.privileges.combine(privileges);
    }

    /// Seed the working labels for a new evaluation, unless something has
    /// already floated them. Returns whether they were seeded.
    pub(crate) fn begin_evaluation(&mut self, privacy: Label, trust: Label) -> bool {
        if !self.clean {
            return false;
        }
        self.privacy = privacy;
        self.trust = trust;
        self.clean = false;
        true
    }

    /// Raise the working labels to the sandbox labels.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::OutOfMemory`] if the labels cannot be copied.
    pub(crate) fn raise_to_clearance(&mut self) -> Result<(), LabelError> {
        if let Some(privacy) = &self.privacy_clearance {
            self.privacy = privacy.try_clone()?;
        }
        if let Some(trust) = &self.trust_clearance {
            self.trust = trust.try_clone()?;
        }
        self.clean = false;
        Ok(())
    }
}

/// Map from compartment id to its label state, owned by the embedding.
#[derive(Debug, Default)]
pub struct CompartmentRegistry {
    compartments: HashMap<CompartmentId, CompartmentState>,
}

impl CompartmentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untracked compartment for `principal`.
    pub fn register(&mut self, principal: Principal) -> CompartmentId {
        self.insert(CompartmentState::new(principal))
    }

    /// Register prepared state.
    pub fn insert(&mut self, state: CompartmentState) -> CompartmentId {
        let id = state.id();
        self.compartments.insert(id, state);
        id
    }

    /// Look up a compartment.
    pub fn get(&self, id: CompartmentId) -> Option<&CompartmentState> {
        self.compartments.get(&id)
    }

    /// Look up a compartment for mutation.
    pub fn get_mut(&mut self, id: CompartmentId) -> Option<&mut CompartmentState> {
        self.compartments.get_mut(&id)
    }

    /// Drop a compartment together with its context.
    pub fn remove(&mut self, id: CompartmentId) -> Option<CompartmentState> {
        self.compartments.remove(&id)
    }

    /// Whether the id is registered.
    pub fn contains(&self, id: CompartmentId) -> bool {
        self.compartments.contains_key(&id)
    }

    /// Number of registered compartments.
    pub fn len(&self) -> usize {
        self.compartments.len()
    }

    /// Whether no compartment is registered.
    pub fn is_empty(&self) -> bool {
        self.compartments.is_empty()
    }
}
