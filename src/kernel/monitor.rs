//! The reference monitor: the single entry point the embedding talks to.
//!
//! Owns the compartment registry, the sandboxes and the perimeter
//! collaborator. Every label change goes through here so it is checked,
//! enforced and audited in one place.

use std::collections::HashMap;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{EnforcementConfig, MonitorConfig};
use crate::lattice::{Label, Principal, Privilege};

use super::audit::AuditLogger;
use super::compartment::{CompartmentId, CompartmentRegistry, CompartmentState, Mode};
use super::guard::{self, FlowDirection, GuardDecision};
use super::perimeter::{self, PerimeterEnforcer, PerimeterPolicy, TracingEnforcer};
use super::sandbox::{
    EvalScope, FetchError, Handler, Outcome, Sandbox, SandboxHandle, ScriptEngine, ScriptError,
    SourceFetcher,
};
use super::MonitorError;

/// Reference monitor over a set of compartments.
pub struct Monitor {
    registry: CompartmentRegistry,
    sandboxes: HashMap<SandboxHandle, Sandbox>,
    perimeters: HashMap<CompartmentId, PerimeterPolicy>,
    enforcer: Box<dyn PerimeterEnforcer>,
    audit: Option<AuditLogger>,
    enforcement: EnforcementConfig,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Monitor with a tracing-only perimeter and no audit log.
    pub fn new() -> Self {
        Self {
            registry: CompartmentRegistry::new(),
            sandboxes: HashMap::new(),
            perimeters: HashMap::new(),
            enforcer: Box::new(TracingEnforcer),
            audit: None,
            enforcement: EnforcementConfig::default(),
        }
    }

    /// Build a monitor from loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails if the configured audit log cannot be opened.
    pub fn from_config(config: &MonitorConfig) -> anyhow::Result<Self> {
        let mut monitor = Self::new().with_enforcement(config.enforcement.clone());
        if let Some(path) = &config.audit.path {
            let audit = AuditLogger::new(path).context("failed to create audit logger")?;
            monitor = monitor.with_audit(audit);
        }
        Ok(monitor)
    }

    /// Replace the perimeter collaborator.
    #[must_use]
    pub fn with_enforcer(mut self, enforcer: Box<dyn PerimeterEnforcer>) -> Self {
        self.enforcer = enforcer;
        self
    }

    /// Attach an audit log.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replace the enforcement switches.
    #[must_use]
    pub fn with_enforcement(mut self, enforcement: EnforcementConfig) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub(crate) fn enforcement(&self) -> &EnforcementConfig {
        &self.enforcement
    }

    // ── Compartments ──

    /// Register an untracked compartment for `principal`.
    pub fn register(&mut self, principal: Principal) -> CompartmentId {
        self.registry.register(principal)
    }

    /// Register prepared compartment state.
    pub fn insert(&mut self, state: CompartmentState) -> CompartmentId {
        self.registry.insert(state)
    }

    /// Destroy a compartment together with any sandbox it backs.
    pub fn remove(&mut self, id: CompartmentId) -> Option<CompartmentState> {
        let state = self.registry.remove(id)?;
        if let Some(handle) = state.sandbox() {
            self.sandboxes.remove(&handle);
        }
        self.perimeters.remove(&id);
        Some(state)
    }

    /// Read-only view of a compartment.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn state(&self, id: CompartmentId) -> Result<&CompartmentState, MonitorError> {
        self.registry
            .get(id)
            .ok_or(MonitorError::UnknownCompartment(id))
    }

    fn state_mut(&mut self, id: CompartmentId) -> Result<&mut CompartmentState, MonitorError> {
        self.registry
            .get_mut(id)
            .ok_or(MonitorError::UnknownCompartment(id))
    }

    /// Principal a compartment runs as.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn principal(&self, id: CompartmentId) -> Result<&Principal, MonitorError> {
        Ok(self.state(id)?.principal())
    }

    /// Whether labels are tracked for the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn is_sandboxed(&self, id: CompartmentId) -> Result<bool, MonitorError> {
        Ok(self.state(id)?.is_sandboxed())
    }

    /// Whether the compartment backs a true sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn is_sandbox(&self, id: CompartmentId) -> Result<bool, MonitorError> {
        Ok(self.state(id)?.is_sandbox())
    }

    /// Whether the compartment is an ambient sandbox-mode context.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn is_sandbox_mode(&self, id: CompartmentId) -> Result<bool, MonitorError> {
        Ok(self.state(id)?.is_sandbox_mode())
    }

    /// Start tracking labels for the compartment. Idempotent.
    ///
    /// Returns whether the mode changed.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn enable_sandbox(&mut self, id: CompartmentId) -> Result<bool, MonitorError> {
        let state = self.state_mut(id)?;
        let enabled = state.enable_sandbox_mode();
        if enabled {
            let principal = state.principal().clone();
            info!(compartment = %id, principal = %principal, "sandbox mode enabled");
            self.audit(|a| a.log_compartment_enabled(id, &principal, Mode::SandboxMode));
        }
        Ok(enabled)
    }

    /// Perimeter most recently installed for the compartment.
    pub fn perimeter(&self, id: CompartmentId) -> Option<&PerimeterPolicy> {
        self.perimeters.get(&id)
    }

    // ── Guard ──

    /// Guard a read of an object labelled `(privacy, trust)` by `dest`,
    /// asserting `dest`'s own privileges.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
    /// [`MonitorError::Label`] if a label cannot be copied. A refused flow is
    /// a [`GuardDecision::Denied`], not an error.
    pub fn guard_read(
        &mut self,
        dest: CompartmentId,
        privacy: &Label,
        trust: &Label,
    ) -> Result<GuardDecision, MonitorError> {
        let enabled = self.enable_sandbox(dest)?;
        let state = self
            .registry
            .get_mut(dest)
            .ok_or(MonitorError::UnknownCompartment(dest))?;
        let privileges = state.privileges().try_clone()?;
        let decision =
            guard::guard_read_labels(state, privacy, trust, &privileges, self.enforcer.as_mut())?;
        debug!(compartment = %dest, enabled, allowed = decision.is_allowed(), "guard read");
        self.record(dest, privacy, trust, &decision);
        Ok(decision)
    }

    /// Guard a flow from compartment `source` into compartment `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
    /// [`MonitorError::Label`] if a label cannot be copied.
    pub fn guard_read_from(
        &mut self,
        dest: CompartmentId,
        source: CompartmentId,
        direction: FlowDirection,
    ) -> Result<GuardDecision, MonitorError> {
        self.enable_sandbox(source)?;
        self.enable_sandbox(dest)?;
        let (privacy, trust) = self.state(source)?.effective_labels();
        let object_privacy = privacy.try_clone()?;
        let object_trust = trust.try_clone()?;

        let decision = guard::guard_read(
            &mut self.registry,
            dest,
            source,
            direction,
            self.enforcer.as_mut(),
        )?;
        self.record(dest, &object_privacy, &object_trust, &decision);
        Ok(decision)
    }

    fn record(
        &mut self,
        dest: CompartmentId,
        object_privacy: &Label,
        object_trust: &Label,
        decision: &GuardDecision,
    ) {
        match decision {
            GuardDecision::Direct => {
                self.audit(|a| a.log_flow_allowed(dest, object_privacy, object_trust));
            }
            GuardDecision::Floated {
                privacy,
                trust,
                policy,
            } => {
                self.audit(|a| a.log_label_floated(dest, privacy, trust));
                self.audit(|a| a.log_perimeter_applied(dest, policy));
                self.perimeters.insert(dest, policy.clone());
            }
            GuardDecision::Denied(reason) => {
                self.audit(|a| a.log_flow_denied(dest, object_privacy, object_trust, reason));
            }
        }
    }

    // ── Labels ──

    /// Copy of the working privacy label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn privacy_label(&self, id: CompartmentId) -> Result<Label, MonitorError> {
        Ok(self.state(id)?.privacy_label().try_clone()?)
    }

    /// Copy of the working trust label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn trust_label(&self, id: CompartmentId) -> Result<Label, MonitorError> {
        Ok(self.state(id)?.trust_label().try_clone()?)
    }

    /// Copy of the privacy clearance, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn privacy_clearance(&self, id: CompartmentId) -> Result<Option<Label>, MonitorError> {
        Ok(self
            .state(id)?
            .privacy_clearance()
            .map(Label::try_clone)
            .transpose()?)
    }

    /// Copy of the trust clearance, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn trust_clearance(&self, id: CompartmentId) -> Result<Option<Label>, MonitorError> {
        Ok(self
            .state(id)?
            .trust_clearance()
            .map(Label::try_clone)
            .transpose()?)
    }

    /// Raise the privacy label.
    ///
    /// The new label must subsume the current one (modulo privileges) and
    /// stay under the clearance. Returns `false` without changing anything
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
    /// [`MonitorError::Enforcement`] if the new perimeter is refused.
    pub fn set_privacy_label(
        &mut self,
        id: CompartmentId,
        label: &Label,
    ) -> Result<bool, MonitorError> {
        self.enable_sandbox(id)?;
        let state = self.state_mut(id)?;
        if !label.subsumes_with(state.privileges(), state.privacy_label()) {
            warn!(compartment = %id, label = %label, "privacy label would lower current label");
            return Ok(false);
        }
        if let Some(clearance) = state.privacy_clearance() {
            if !clearance.subsumes(label) {
                warn!(compartment = %id, label = %label, "privacy label above clearance");
                return Ok(false);
            }
        }
        state.set_privacy_label(label.try_clone()?);
        info!(compartment = %id, label = %label, "privacy label set");
        self.audit(|a| a.log_label_changed(id, "privacy", label));
        self.enforce(id)?;
        Ok(true)
    }

    /// Lower the trust label.
    ///
    /// The current label must subsume the new one (modulo privileges) and
    /// the new one must stay above the trust clearance.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn set_trust_label(
        &mut self,
        id: CompartmentId,
        label: &Label,
    ) -> Result<bool, MonitorError> {
        self.enable_sandbox(id)?;
        let state = self.state_mut(id)?;
        if !state.trust_label().subsumes_with(state.privileges(), label) {
            warn!(compartment = %id, label = %label, "trust label would raise current label");
            return Ok(false);
        }
        if let Some(clearance) = state.trust_clearance() {
            if !label.subsumes(clearance) {
                warn!(compartment = %id, label = %label, "trust label below clearance");
                return Ok(false);
            }
        }
        state.set_trust_label(label.try_clone()?);
        info!(compartment = %id, label = %label, "trust label set");
        self.audit(|a| a.log_label_changed(id, "trust", label));
        Ok(true)
    }

    /// Set or lower the privacy clearance of a sandbox-mode compartment.
    ///
    /// An existing clearance may only be lowered (modulo privileges); the
    /// clearance must always cover the current privacy label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidState`] unless the compartment is in
    /// sandbox mode.
    pub fn set_privacy_clearance(
        &mut self,
        id: CompartmentId,
        label: &Label,
    ) -> Result<bool, MonitorError> {
        let state = self.clearance_target(id)?;
        if let Some(existing) = state.privacy_clearance() {
            if !existing.subsumes_with(state.privileges(), label) {
                warn!(compartment = %id, label = %label, "privacy clearance would be raised");
                return Ok(false);
            }
        }
        if !label.subsumes(state.privacy_label()) {
            warn!(compartment = %id, label = %label, "privacy clearance below current label");
            return Ok(false);
        }
        state.set_privacy_clearance(label.try_clone()?);
        info!(compartment = %id, label = %label, "privacy clearance set");
        self.audit(|a| a.log_label_changed(id, "privacy_clearance", label));
        Ok(true)
    }

    /// Set or raise the trust clearance of a sandbox-mode compartment.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidState`] unless the compartment is in
    /// sandbox mode.
    pub fn set_trust_clearance(
        &mut self,
        id: CompartmentId,
        label: &Label,
    ) -> Result<bool, MonitorError> {
        let state = self.clearance_target(id)?;
        if let Some(existing) = state.trust_clearance() {
            if !label.subsumes_with(state.privileges(), existing) {
                warn!(compartment = %id, label = %label, "trust clearance would be lowered");
                return Ok(false);
            }
        }
        if !state.trust_label().subsumes(label) {
            warn!(compartment = %id, label = %label, "trust clearance above current label");
            return Ok(false);
        }
        state.set_trust_clearance(label.try_clone()?);
        info!(compartment = %id, label = %label, "trust clearance set");
        self.audit(|a| a.log_label_changed(id, "trust_clearance", label));
        Ok(true)
    }

    fn clearance_target(&mut self, id: CompartmentId) -> Result<&mut CompartmentState, MonitorError> {
        let state = self.state_mut(id)?;
        match state.mode() {
            Mode::SandboxMode => Ok(state),
            mode => Err(MonitorError::InvalidState(format!(
                "clearance can only be set in sandbox mode, compartment {id} is {mode}"
            ))),
        }
    }

    /// One-shot initializer: conjoin a JSON label into the privacy label.
    ///
    /// Returns `false` if the JSON is malformed or the label change is
    /// refused.
    pub fn initialize_from_json(&mut self, id: CompartmentId, json: &str) -> bool {
        let label = match Label::from_json(json) {
            Ok(label) => label,
            Err(e) => {
                warn!(compartment = %id, error = %e, "rejecting label JSON");
                return false;
            }
        };
        if self.enable_sandbox(id).is_err() {
            return false;
        }
        let joined = match self.privacy_label(id) {
            Ok(current) => current.and(&label),
            Err(_) => return false,
        };
        matches!(self.set_privacy_label(id, &joined), Ok(true))
    }

    // ── Privileges ──

    /// Copy of the compartment's privileges.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn privileges(&self, id: CompartmentId) -> Result<Privilege, MonitorError> {
        Ok(self.state(id)?.privileges().try_clone()?)
    }

    /// Give the compartment the authority of `principal`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
    /// [`MonitorError::Enforcement`] if the relaxed perimeter is refused.
    pub fn grant_privilege(
        &mut self,
        id: CompartmentId,
        principal: Principal,
    ) -> Result<(), MonitorError> {
        self.own(id, &Privilege::from_principal(principal))
    }

    /// Conjoin a privilege the caller holds into the compartment's.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids and
    /// [`MonitorError::Enforcement`] if the relaxed perimeter is refused.
    pub fn own(&mut self, id: CompartmentId, privilege: &Privilege) -> Result<(), MonitorError> {
        self.enable_sandbox(id)?;
        let state = self.state_mut(id)?;
        state.add_privileges(privilege);
        let all = state.privileges().as_label().try_clone()?;
        info!(compartment = %id, privileges = %all, "privileges granted");
        self.audit(|a| a.log_privilege_granted(id, &all));
        self.enforce(id)?;
        Ok(())
    }

    /// Mint a fresh principal and grant it to the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for unregistered ids.
    pub fn fresh_principal(&mut self, id: CompartmentId) -> Result<Principal, MonitorError> {
        let principal = Principal::fresh();
        self.grant_privilege(id, principal.clone())?;
        Ok(principal)
    }

    /// Recompute and install the compartment's perimeter.
    fn enforce(&mut self, id: CompartmentId) -> Result<PerimeterPolicy, MonitorError> {
        let policy = perimeter::policy_for(self.state(id)?)?;
        self.enforcer.apply(id, &policy)?;
        self.audit(|a| a.log_perimeter_applied(id, &policy));
        self.perimeters.insert(id, policy.clone());
        Ok(policy)
    }

    // ── Sandboxes ──

    /// Create a true sandbox with fixed labels.
    ///
    /// Missing labels default to the caller's current labels.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownCompartment`] for an unregistered
    /// caller and [`MonitorError::Enforcement`] if the sandbox perimeter is
    /// refused.
    pub fn create_sandbox(
        &mut self,
        caller: CompartmentId,
        privacy: Option<&Label>,
        trust: Option<&Label>,
    ) -> Result<SandboxHandle, MonitorError> {
        let caller_state = self.state(caller)?;
        let privacy = privacy.unwrap_or(caller_state.privacy_label()).try_clone()?;
        let trust = trust.unwrap_or(caller_state.trust_label()).try_clone()?;

        let handle = SandboxHandle::new();
        let principal = Principal::fresh();
        let state = CompartmentState::for_sandbox(principal.clone(), handle, &privacy, &trust)?;
        let id = self.registry.insert(state);
        self.sandboxes.insert(handle, Sandbox::new(id));

        info!(sandbox = %handle, compartment = %id, privacy = %privacy, trust = %trust, "sandbox created");
        self.audit(|a| a.log_compartment_enabled(id, &principal, Mode::Sandbox));
        self.enforce(id)?;
        Ok(handle)
    }

    /// Compartment backing a sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownSandbox`] for unknown handles.
    pub fn sandbox_compartment(&self, handle: SandboxHandle) -> Result<CompartmentId, MonitorError> {
        self.sandboxes
            .get(&handle)
            .map(Sandbox::compartment)
            .ok_or(MonitorError::UnknownSandbox(handle))
    }

    /// Result posted by the last evaluation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownSandbox`] for unknown handles.
    pub fn sandbox_result(&self, handle: SandboxHandle) -> Result<Option<Outcome>, MonitorError> {
        Ok(self.sandbox(handle)?.result().cloned())
    }

    /// Whether the sandbox's working label has not floated yet.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::UnknownSandbox`] for unknown handles.
    pub fn is_clean(&self, handle: SandboxHandle) -> Result<bool, MonitorError> {
        let id = self.sandbox_compartment(handle)?;
        Ok(self.state(id)?.is_clean())
    }

    fn sandbox(&self, handle: SandboxHandle) -> Result<&Sandbox, MonitorError> {
        self.sandboxes
            .get(&handle)
            .ok_or(MonitorError::UnknownSandbox(handle))
    }

    fn sandbox_mut(&mut self, handle: SandboxHandle) -> Result<&mut Sandbox, MonitorError> {
        self.sandboxes
            .get_mut(&handle)
            .ok_or(MonitorError::UnknownSandbox(handle))
    }

    /// Whether the caller's current labels flow into the sandbox's labels.
    fn flows_into_sandbox(
        &mut self,
        caller: CompartmentId,
        handle: SandboxHandle,
    ) -> Result<bool, MonitorError> {
        let sandbox_id = self.sandbox_compartment(handle)?;
        self.enable_sandbox(caller)?;
        let caller_state = self.state(caller)?;
        let sandbox_state = self.state(sandbox_id)?;
        let privileges = caller_state.privileges();
        let (privacy, trust) = sandbox_state.effective_labels();
        Ok(privacy.subsumes_with(privileges, caller_state.privacy_label())
            && caller_state.trust_label().subsumes_with(privileges, trust))
    }

    /// Evaluate `source` in the sandbox.
    ///
    /// The caller's current labels must flow into the sandbox's labels; a
    /// caller may not run code in a less sensitive sandbox. On the first
    /// evaluation the sandbox's working labels start at the caller's.
    /// Script errors become an error result, not an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] when the caller's labels
    /// do not flow into the sandbox.
    pub fn schedule(
        &mut self,
        caller: CompartmentId,
        handle: SandboxHandle,
        source: &str,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), MonitorError> {
        if !self.flows_into_sandbox(caller, handle)? {
            warn!(caller = %caller, sandbox = %handle, "schedule denied");
            self.audit(|a| a.log_sandbox_denied(caller, Some(handle), "less sensitive sandbox"));
            return Err(MonitorError::SubsumptionDenied(
                "cannot execute code in a less sensitive sandbox".to_owned(),
            ));
        }

        let sandbox_id = self.sandbox_compartment(handle)?;
        let privacy = self.privacy_label(caller)?;
        let trust = self.trust_label(caller)?;
        if self.state_mut(sandbox_id)?.begin_evaluation(privacy, trust) {
            debug!(sandbox = %handle, "working labels seeded from caller");
        }

        self.audit(|a| a.log_sandbox_scheduled(caller, handle, source.len()));
        self.evaluate_in_sandbox(handle, sandbox_id, source, engine)
    }

    fn evaluate_in_sandbox(
        &mut self,
        handle: SandboxHandle,
        sandbox_id: CompartmentId,
        source: &str,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), MonitorError> {
        self.sandbox_mut(handle)?.clear_result();

        let evaluated = {
            let mut scope = EvalScope::new(self, sandbox_id, Some(handle));
            engine.evaluate(source, &mut scope)
        };

        self.state_mut(sandbox_id)?.raise_to_clearance()?;

        // a successful evaluation already dispatched through `done`
        if let Err(e) = evaluated {
            info!(sandbox = %handle, error = %e, "sandboxed evaluation failed");
            let sandbox = self.sandbox_mut(handle)?;
            sandbox.set_result(Outcome::Error(e.to_string()));
            sandbox.dispatch_result();
        }
        Ok(())
    }

    /// Fetch script source over the network, then schedule it.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Fetch`] for disallowed schemes or transport
    /// failures and [`MonitorError::SubsumptionDenied`] when requesting the
    /// URL would leak the caller's label.
    pub fn schedule_uri(
        &mut self,
        caller: CompartmentId,
        handle: SandboxHandle,
        url: &str,
        fetcher: &mut dyn SourceFetcher,
        engine: &mut dyn ScriptEngine,
    ) -> Result<(), MonitorError> {
        self.sandbox_compartment(handle)?;
        let source = self.fetch_source(caller, Some(handle), url, fetcher)?;
        self.schedule(caller, handle, &source, engine)
    }

    /// Fetch script source and evaluate it in the caller's own compartment.
    ///
    /// # Errors
    ///
    /// Same as [`Monitor::schedule_uri`], plus [`MonitorError::ScriptFailed`]
    /// when the script throws.
    pub fn import(
        &mut self,
        caller: CompartmentId,
        url: &str,
        fetcher: &mut dyn SourceFetcher,
        engine: &mut dyn ScriptEngine,
    ) -> Result<Value, MonitorError> {
        self.enable_sandbox(caller)?;
        let source = self.fetch_source(caller, None, url, fetcher)?;
        let mut scope = EvalScope::new(self, caller, None);
        engine
            .evaluate(&source, &mut scope)
            .map_err(|e| match e {
                ScriptError::Monitor(inner) => inner,
                ScriptError::Thrown(message) => MonitorError::ScriptFailed(message),
            })
    }

    fn fetch_source(
        &mut self,
        caller: CompartmentId,
        handle: Option<SandboxHandle>,
        url: &str,
        fetcher: &mut dyn SourceFetcher,
    ) -> Result<String, MonitorError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let schemes = &self.enforcement.allow_fetch_schemes;
        if !schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(FetchError::UnsupportedScheme {
                scheme: parsed.scheme().to_owned(),
                allowed: schemes.join(","),
            }
            .into());
        }

        self.enable_sandbox(caller)?;
        let state = self.state(caller)?;
        let destination = Label::from_principal(Principal::from_url(&parsed));
        if !destination.subsumes_with(state.privileges(), state.privacy_label()) {
            warn!(caller = %caller, url = %parsed, "fetch would leak");
            self.audit(|a| a.log_sandbox_denied(caller, handle, "fetching script would leak"));
            return Err(MonitorError::SubsumptionDenied(
                "fetching script would leak information".to_owned(),
            ));
        }

        debug!(caller = %caller, url = %parsed, "fetching script");
        Ok(fetcher.fetch(&parsed)?)
    }

    /// Post a message into the sandbox.
    ///
    /// The caller's labels must flow into the sandbox's labels. The message
    /// is delivered at once if the sandbox registered a handler.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] when the caller is more
    /// sensitive than the sandbox.
    pub fn post_message(
        &mut self,
        caller: CompartmentId,
        handle: SandboxHandle,
        message: Value,
    ) -> Result<(), MonitorError> {
        if !self.flows_into_sandbox(caller, handle)? {
            warn!(caller = %caller, sandbox = %handle, "message denied");
            self.audit(|a| a.log_sandbox_denied(caller, Some(handle), "message would leak"));
            return Err(MonitorError::SubsumptionDenied(
                "cannot send a message to a less sensitive sandbox".to_owned(),
            ));
        }
        let sandbox = self.sandbox_mut(handle)?;
        sandbox.set_message(message);
        sandbox.dispatch_message();
        Ok(())
    }

    /// Register result handlers on the caller's side.
    ///
    /// Registering reads from the sandbox, so the caller floats to the
    /// sandbox labels first. A result that is already posted is delivered
    /// at once.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] when the caller may not
    /// read from the sandbox; the handlers are not registered then.
    pub fn on_done(
        &mut self,
        caller: CompartmentId,
        handle: SandboxHandle,
        on_success: Handler,
        on_error: Option<Handler>,
    ) -> Result<(), MonitorError> {
        let sandbox_id = self.sandbox_compartment(handle)?;
        self.guard_read_from(caller, sandbox_id, FlowDirection::Read)?
            .into_result()?;
        let sandbox = self.sandbox_mut(handle)?;
        sandbox.set_result_handlers(on_success, on_error);
        sandbox.dispatch_result();
        Ok(())
    }

    // ── Inside a sandbox ──

    pub(crate) fn sandbox_done(
        &mut self,
        handle: SandboxHandle,
        value: Value,
    ) -> Result<(), MonitorError> {
        let sandbox = self.sandbox_mut(handle)?;
        sandbox.set_result(Outcome::Value(value));
        sandbox.dispatch_result();
        Ok(())
    }

    pub(crate) fn sandbox_message(
        &mut self,
        handle: SandboxHandle,
    ) -> Result<Option<Value>, MonitorError> {
        self.raise_label(handle)?;
        Ok(self.sandbox(handle)?.message().cloned())
    }

    pub(crate) fn sandbox_on_message(
        &mut self,
        handle: SandboxHandle,
        handler: Handler,
    ) -> Result<(), MonitorError> {
        self.raise_label(handle)?;
        let sandbox = self.sandbox_mut(handle)?;
        sandbox.set_on_message(handler);
        sandbox.dispatch_message();
        Ok(())
    }

    fn raise_label(&mut self, handle: SandboxHandle) -> Result<(), MonitorError> {
        let id = self.sandbox_compartment(handle)?;
        self.state_mut(id)?.raise_to_clearance()?;
        debug!(sandbox = %handle, "working label raised to sandbox label");
        Ok(())
    }

    fn audit(&self, write: impl FnOnce(&AuditLogger) -> anyhow::Result<()>) {
        if let Some(audit) = &self.audit {
            if let Err(e) = write(audit) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    }
}
