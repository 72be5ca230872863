//! Declarative scenario files.
//!
//! A scenario declares compartments and sandboxes, then a list of steps run
//! against one [`Monitor`]. Each step may carry an `expect` that the runner
//! checks. Labels are written in the JSON label shape as TOML arrays:
//!
//! ```toml
//! [[compartment]]
//! name = "page"
//! principal = "https://app.example"
//! mode = "sandbox-mode"
//!
//! [[step]]
//! action = "guard_read"
//! dest = "page"
//! privacy = [["https://a.com"]]
//! expect = "floated"
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::kernel::{
    AccessAction, CompartmentId, CompartmentState, EvalScope, FlowDirection, GuardDecision,
    Mode, Monitor, MonitorError, SandboxHandle, ScriptEngine, ScriptError,
};
use crate::lattice::{Label, Principal, Privilege};

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Compartments to register, in order.
    #[serde(default, rename = "compartment")]
    pub compartments: Vec<CompartmentSpec>,
    /// Sandboxes to create after the compartments.
    #[serde(default, rename = "sandbox")]
    pub sandboxes: Vec<SandboxSpec>,
    /// Steps to run.
    #[serde(default, rename = "step")]
    pub steps: Vec<StepSpec>,
}

/// A compartment declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompartmentSpec {
    /// Name steps refer to.
    pub name: String,
    /// Principal the compartment runs as; a fresh one when omitted.
    pub principal: Option<String>,
    /// Starting mode; a true sandbox can only be declared as `[[sandbox]]`.
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Initial privacy label.
    #[serde(default)]
    pub privacy: Label,
    /// Initial trust label.
    #[serde(default)]
    pub trust: Label,
    /// Privileges on top of the compartment's own principal.
    #[serde(default)]
    pub privileges: Label,
    /// Privacy ceiling.
    pub privacy_clearance: Option<Label>,
    /// Trust floor.
    pub trust_clearance: Option<Label>,
}

fn default_mode() -> Mode {
    Mode::NotSandboxed
}

/// A sandbox declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSpec {
    /// Name steps refer to.
    pub name: String,
    /// Compartment creating the sandbox; its labels are the defaults.
    pub caller: String,
    /// Sandbox privacy label.
    pub privacy: Option<Label>,
    /// Sandbox trust label.
    pub trust: Option<Label>,
}

/// One step together with its expectation.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    /// What to do.
    #[serde(flatten)]
    pub action: Action,
    /// Expected outcome, if checked.
    pub expect: Option<Expectation>,
    /// Expected delivered result for `on_done`.
    pub expect_value: Option<Value>,
}

/// Operation a step performs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Guard a read of a labelled object.
    GuardRead {
        /// Reading compartment.
        dest: String,
        /// Object privacy label.
        #[serde(default)]
        privacy: Label,
        /// Object trust label.
        #[serde(default)]
        trust: Label,
    },
    /// Guard a flow between compartments.
    GuardReadFrom {
        /// Receiving compartment.
        dest: String,
        /// Sending compartment.
        source: String,
        /// `read` (receiver's privileges) or `write` (sender's).
        #[serde(default = "default_direction")]
        direction: Direction,
    },
    /// Mediate a property access.
    CheckAccess {
        /// Accessing compartment.
        accessor: String,
        /// Owning compartment.
        owner: String,
        /// Kind of access.
        access: AccessAction,
    },
    /// Set the privacy label.
    SetPrivacyLabel {
        /// Target compartment.
        target: String,
        /// New label.
        label: Label,
    },
    /// Set the trust label.
    SetTrustLabel {
        /// Target compartment.
        target: String,
        /// New label.
        label: Label,
    },
    /// Set the privacy clearance.
    SetPrivacyClearance {
        /// Target compartment.
        target: String,
        /// New clearance.
        label: Label,
    },
    /// Set the trust clearance.
    SetTrustClearance {
        /// Target compartment.
        target: String,
        /// New clearance.
        label: Label,
    },
    /// Grant a principal's authority.
    GrantPrivilege {
        /// Target compartment.
        target: String,
        /// Principal to grant.
        principal: String,
    },
    /// Conjoin a JSON label into the privacy label.
    InitializeFromJson {
        /// Target compartment.
        target: String,
        /// Label in JSON form.
        json: String,
    },
    /// Evaluate literal source in a sandbox.
    Schedule {
        /// Scheduling compartment.
        caller: String,
        /// Target sandbox.
        sandbox: String,
        /// Source for the literal engine.
        source: String,
    },
    /// Post a message into a sandbox.
    PostMessage {
        /// Sending compartment.
        caller: String,
        /// Target sandbox.
        sandbox: String,
        /// Message value.
        message: Value,
    },
    /// Register result handlers.
    OnDone {
        /// Receiving compartment.
        caller: String,
        /// Source sandbox.
        sandbox: String,
    },
}

fn default_direction() -> Direction {
    Direction::Read
}

/// Flow direction as written in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Receiver's privileges.
    Read,
    /// Sender's privileges.
    Write,
}

impl From<Direction> for FlowDirection {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Read => FlowDirection::Read,
            Direction::Write => FlowDirection::Write,
        }
    }
}

/// Checkable outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Guard allowed without a label change.
    Direct,
    /// Guard allowed after floating.
    Floated,
    /// Guard or check refused the flow.
    Denied,
    /// Operation succeeded.
    Ok,
    /// Label change refused without error.
    Refused,
    /// Operation failed for a non-security reason.
    Error,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Floated => "floated",
            Self::Denied => "denied",
            Self::Ok => "ok",
            Self::Refused => "refused",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// What happened in one step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// 1-based step number.
    pub index: usize,
    /// Action name.
    pub action: String,
    /// Observed outcome.
    pub outcome: Expectation,
    /// Extra detail for humans.
    pub detail: String,
    /// Whether the expectation, if any, matched.
    pub passed: bool,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAIL" };
        write!(
            f,
            "[{mark}] step {} {}: {} {}",
            self.index, self.action, self.outcome, self.detail
        )
    }
}

/// Result of running a whole scenario.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Per-step results, in order.
    pub steps: Vec<StepReport>,
}

impl Report {
    /// Whether every expectation matched.
    pub fn all_passed(&self) -> bool {
        self.steps.iter().all(|s| s.passed)
    }
}

impl Scenario {
    /// Read and parse a scenario file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml(&contents)
    }

    /// Parse a scenario from TOML.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or unknown actions.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse scenario TOML")
    }

    /// Run the scenario against `monitor`.
    ///
    /// # Errors
    ///
    /// Fails on setup errors: duplicate or unknown names and invalid
    /// principals. Step failures are reported, not returned.
    pub fn run(&self, monitor: &mut Monitor) -> Result<Report> {
        let mut runner = Runner::new(monitor);
        for spec in &self.compartments {
            runner.add_compartment(spec)?;
        }
        for spec in &self.sandboxes {
            runner.add_sandbox(spec)?;
        }
        let mut report = Report::default();
        for (i, step) in self.steps.iter().enumerate() {
            let (outcome, detail) = runner.run_step(step)?;
            let passed = step.expect.map_or(true, |e| e == outcome)
                && step
                    .expect_value
                    .as_ref()
                    .map_or(true, |v| runner.delivered.borrow().as_ref() == Some(v));
            report.steps.push(StepReport {
                index: i.saturating_add(1),
                action: step.action.name().to_owned(),
                outcome,
                detail,
                passed,
            });
        }
        Ok(report)
    }
}

impl Action {
    /// Action name as written in the file.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GuardRead { .. } => "guard_read",
            Self::GuardReadFrom { .. } => "guard_read_from",
            Self::CheckAccess { .. } => "check_access",
            Self::SetPrivacyLabel { .. } => "set_privacy_label",
            Self::SetTrustLabel { .. } => "set_trust_label",
            Self::SetPrivacyClearance { .. } => "set_privacy_clearance",
            Self::SetTrustClearance { .. } => "set_trust_clearance",
            Self::GrantPrivilege { .. } => "grant_privilege",
            Self::InitializeFromJson { .. } => "initialize_from_json",
            Self::Schedule { .. } => "schedule",
            Self::PostMessage { .. } => "post_message",
            Self::OnDone { .. } => "on_done",
        }
    }
}

struct Runner<'m> {
    monitor: &'m mut Monitor,
    compartments: HashMap<String, CompartmentId>,
    sandboxes: HashMap<String, SandboxHandle>,
    delivered: Rc<RefCell<Option<Value>>>,
}

impl<'m> Runner<'m> {
    fn new(monitor: &'m mut Monitor) -> Self {
        Self {
            monitor,
            compartments: HashMap::new(),
            sandboxes: HashMap::new(),
            delivered: Rc::new(RefCell::new(None)),
        }
    }

    fn add_compartment(&mut self, spec: &CompartmentSpec) -> Result<()> {
        if self.compartments.contains_key(&spec.name) {
            bail!("duplicate compartment {}", spec.name);
        }
        let principal = match &spec.principal {
            Some(p) => Principal::parse(p)
                .with_context(|| format!("compartment {}: bad principal", spec.name))?,
            None => Principal::fresh(),
        };
        let state = match spec.mode {
            Mode::NotSandboxed => CompartmentState::new(principal),
            Mode::SandboxMode => CompartmentState::sandbox_mode(principal)
                .with_privacy(spec.privacy.clone())
                .with_trust(spec.trust.clone())
                .with_privileges(&Privilege::new(spec.privileges.clone()))
                .with_clearance(spec.privacy_clearance.clone(), spec.trust_clearance.clone()),
            Mode::Sandbox => bail!(
                "compartment {}: declare true sandboxes with [[sandbox]]",
                spec.name
            ),
        };
        let id = self.monitor.insert(state);
        self.compartments.insert(spec.name.clone(), id);
        Ok(())
    }

    fn add_sandbox(&mut self, spec: &SandboxSpec) -> Result<()> {
        if self.sandboxes.contains_key(&spec.name) {
            bail!("duplicate sandbox {}", spec.name);
        }
        let caller = self.compartment(&spec.caller)?;
        let handle = self
            .monitor
            .create_sandbox(caller, spec.privacy.as_ref(), spec.trust.as_ref())
            .with_context(|| format!("sandbox {}", spec.name))?;
        self.sandboxes.insert(spec.name.clone(), handle);
        Ok(())
    }

    fn compartment(&self, name: &str) -> Result<CompartmentId> {
        self.compartments
            .get(name)
            .copied()
            .with_context(|| format!("unknown compartment {name}"))
    }

    fn sandbox(&self, name: &str) -> Result<SandboxHandle> {
        self.sandboxes
            .get(name)
            .copied()
            .with_context(|| format!("unknown sandbox {name}"))
    }

    fn run_step(&mut self, step: &StepSpec) -> Result<(Expectation, String)> {
        let outcome = match &step.action {
            Action::GuardRead {
                dest,
                privacy,
                trust,
            } => {
                let dest = self.compartment(dest)?;
                decision(self.monitor.guard_read(dest, privacy, trust))
            }
            Action::GuardReadFrom {
                dest,
                source,
                direction,
            } => {
                let dest = self.compartment(dest)?;
                let source = self.compartment(source)?;
                decision(
                    self.monitor
                        .guard_read_from(dest, source, FlowDirection::from(*direction)),
                )
            }
            Action::CheckAccess {
                accessor,
                owner,
                access,
            } => {
                let accessor = self.compartment(accessor)?;
                let owner = self.compartment(owner)?;
                unit(self.monitor.check_access(accessor, owner, *access))
            }
            Action::SetPrivacyLabel { target, label } => {
                let id = self.compartment(target)?;
                changed(self.monitor.set_privacy_label(id, label))
            }
            Action::SetTrustLabel { target, label } => {
                let id = self.compartment(target)?;
                changed(self.monitor.set_trust_label(id, label))
            }
            Action::SetPrivacyClearance { target, label } => {
                let id = self.compartment(target)?;
                changed(self.monitor.set_privacy_clearance(id, label))
            }
            Action::SetTrustClearance { target, label } => {
                let id = self.compartment(target)?;
                changed(self.monitor.set_trust_clearance(id, label))
            }
            Action::GrantPrivilege { target, principal } => {
                let id = self.compartment(target)?;
                let principal = Principal::parse(principal).context("bad principal")?;
                unit(self.monitor.grant_privilege(id, principal))
            }
            Action::InitializeFromJson { target, json } => {
                let id = self.compartment(target)?;
                changed(Ok(self.monitor.initialize_from_json(id, json)))
            }
            Action::Schedule {
                caller,
                sandbox,
                source,
            } => {
                let caller = self.compartment(caller)?;
                let handle = self.sandbox(sandbox)?;
                let result = self
                    .monitor
                    .schedule(caller, handle, source, &mut LiteralEngine);
                let (outcome, detail) = unit(result);
                match self.monitor.sandbox_result(handle) {
                    Ok(Some(result)) => (outcome, format!("result={}", serde_json::json!(result))),
                    _ => (outcome, detail),
                }
            }
            Action::PostMessage {
                caller,
                sandbox,
                message,
            } => {
                let caller = self.compartment(caller)?;
                let handle = self.sandbox(sandbox)?;
                unit(self.monitor.post_message(caller, handle, message.clone()))
            }
            Action::OnDone { caller, sandbox } => {
                let caller = self.compartment(caller)?;
                let handle = self.sandbox(sandbox)?;
                let on_success = Rc::clone(&self.delivered);
                let on_error = Rc::clone(&self.delivered);
                let result = self.monitor.on_done(
                    caller,
                    handle,
                    Box::new(move |v: &Value| *on_success.borrow_mut() = Some(v.clone())),
                    Some(Box::new(move |v: &Value| {
                        *on_error.borrow_mut() = Some(serde_json::json!({ "error": v }));
                    })),
                );
                let (outcome, _) = unit(result);
                let delivered = self
                    .delivered
                    .borrow()
                    .as_ref()
                    .map_or_else(|| "nothing delivered".to_owned(), |v| format!("delivered={v}"));
                (outcome, delivered)
            }
        };
        Ok(outcome)
    }
}

fn decision(result: Result<GuardDecision, MonitorError>) -> (Expectation, String) {
    match result {
        Ok(GuardDecision::Direct) => (Expectation::Direct, String::new()),
        Ok(GuardDecision::Floated {
            privacy,
            trust,
            policy,
        }) => (
            Expectation::Floated,
            format!("privacy={privacy} trust={trust} {policy}"),
        ),
        Ok(GuardDecision::Denied(reason)) => (Expectation::Denied, reason.to_string()),
        Err(e) => failure(&e),
    }
}

fn unit(result: Result<(), MonitorError>) -> (Expectation, String) {
    match result {
        Ok(()) => (Expectation::Ok, String::new()),
        Err(e) => failure(&e),
    }
}

fn changed(result: Result<bool, MonitorError>) -> (Expectation, String) {
    match result {
        Ok(true) => (Expectation::Ok, String::new()),
        Ok(false) => (Expectation::Refused, String::new()),
        Err(e) => failure(&e),
    }
}

fn failure(error: &MonitorError) -> (Expectation, String) {
    if error.is_denial() {
        (Expectation::Denied, error.to_string())
    } else {
        (Expectation::Error, error.to_string())
    }
}

/// Script engine for scenario files: the source is a JSON document.
///
/// - `{"throw": "msg"}` raises an error.
/// - `{"read": {"privacy": [[..]], "trust": [[..]]}}` guards a read first.
/// - `{"echo_message": true}` posts the pending message as the result.
/// - `{"done": v}` posts `v`; any other document is posted as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralEngine;

#[derive(Debug, Default, Deserialize)]
struct ReadRequest {
    #[serde(default)]
    privacy: Label,
    #[serde(default)]
    trust: Label,
}

impl ScriptEngine for LiteralEngine {
    fn evaluate(&mut self, source: &str, scope: &mut EvalScope<'_>) -> Result<Value, ScriptError> {
        let doc: Value = serde_json::from_str(source)
            .map_err(|e| ScriptError::Thrown(format!("syntax error: {e}")))?;

        if let Some(message) = doc.get("throw") {
            let text = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            return Err(ScriptError::Thrown(text));
        }
        if let Some(read) = doc.get("read") {
            let request: ReadRequest = serde_json::from_value(read.clone())
                .map_err(|e| ScriptError::Thrown(format!("bad read request: {e}")))?;
            scope.guard_read(&request.privacy, &request.trust)?;
        }
        let result = if doc.get("echo_message").is_some() {
            scope.message()?.unwrap_or(Value::Null)
        } else {
            doc.get("done").cloned().unwrap_or_else(|| doc.clone())
        };
        if scope.sandbox().is_some() {
            scope.done(result.clone())?;
        }
        Ok(result)
    }
}
