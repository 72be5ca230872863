//! True sandboxes: isolated evaluation units with fixed boundary labels.
//!
//! The monitor owns one [`Sandbox`] record per handle. Script evaluation and
//! source fetching are collaborators supplied by the embedding through
//! [`ScriptEngine`] and [`SourceFetcher`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::lattice::Label;

use super::compartment::CompartmentId;
use super::guard::GuardDecision;
use super::monitor::Monitor;
use super::MonitorError;

/// Opaque handle to a true sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SandboxHandle(Uuid);

impl SandboxHandle {
    /// Allocate a new handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SandboxHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox-{}", self.0)
    }
}

/// Result posted by a sandboxed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Outcome {
    /// Value passed to `done`.
    Value(Value),
    /// Message of the error the evaluation raised.
    Error(String),
}

impl Outcome {
    /// Whether this is an error result.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Callback receiving a result or message.
pub type Handler = Box<dyn FnMut(&Value)>;

/// Result and message channel of one sandbox.
pub(crate) struct Sandbox {
    compartment: CompartmentId,
    result: Option<Outcome>,
    message: Option<Value>,
    on_success: Option<Handler>,
    on_error: Option<Handler>,
    on_message: Option<Handler>,
}

impl Sandbox {
    pub(crate) fn new(compartment: CompartmentId) -> Self {
        Self {
            compartment,
            result: None,
            message: None,
            on_success: None,
            on_error: None,
            on_message: None,
        }
    }

    pub(crate) fn compartment(&self) -> CompartmentId {
        self.compartment
    }

    pub(crate) fn result(&self) -> Option<&Outcome> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, outcome: Outcome) {
        self.result = Some(outcome);
    }

    pub(crate) fn clear_result(&mut self) {
        self.result = None;
    }

    pub(crate) fn message(&self) -> Option<&Value> {
        self.message.as_ref()
    }

    pub(crate) fn set_message(&mut self, message: Value) {
        self.message = Some(message);
    }

    pub(crate) fn set_result_handlers(&mut self, on_success: Handler, on_error: Option<Handler>) {
        self.on_success = Some(on_success);
        if on_error.is_some() {
            self.on_error = on_error;
        }
    }

    pub(crate) fn set_on_message(&mut self, handler: Handler) {
        self.on_message = Some(handler);
    }

    /// Deliver the result to the caller's handlers.
    ///
    /// Silently does nothing until a result exists and the matching
    /// handlers are registered. Returns whether a handler ran.
    pub(crate) fn dispatch_result(&mut self) -> bool {
        let Some(result) = &self.result else {
            return false;
        };
        let Some(on_success) = self.on_success.as_mut() else {
            return false;
        };
        match result {
            Outcome::Value(value) => {
                on_success(value);
                true
            }
            Outcome::Error(message) => match self.on_error.as_mut() {
                Some(on_error) => {
                    on_error(&Value::String(message.clone()));
                    true
                }
                None => false,
            },
        }
    }

    /// Deliver the pending message to the sandbox's `onmessage` handler.
    pub(crate) fn dispatch_message(&mut self) -> bool {
        match (&self.message, self.on_message.as_mut()) {
            (Some(message), Some(handler)) => {
                handler(message);
                true
            }
            _ => false,
        }
    }
}

/// Error raised by a script engine while evaluating source.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script threw.
    #[error("script error: {0}")]
    Thrown(String),
    /// A monitor check inside the script refused the operation.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Evaluates source text inside a compartment.
///
/// The engine reaches the monitor only through the [`EvalScope`] it is
/// handed, so every read it performs goes through the guard of the
/// compartment it runs in.
pub trait ScriptEngine {
    /// Evaluate `source` and return its completion value.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] if the script throws or a guard check fails.
    fn evaluate(&mut self, source: &str, scope: &mut EvalScope<'_>) -> Result<Value, ScriptError>;
}

impl<F> ScriptEngine for F
where
    F: FnMut(&str, &mut EvalScope<'_>) -> Result<Value, ScriptError>,
{
    fn evaluate(&mut self, source: &str, scope: &mut EvalScope<'_>) -> Result<Value, ScriptError> {
        self(source, scope)
    }
}

/// Error from fetching script source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The URL could not be parsed.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// Offending input.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// Only the configured schemes may be fetched.
    #[error("scheme must be one of {allowed}, got {scheme}")]
    UnsupportedScheme {
        /// Scheme of the requested URL.
        scheme: String,
        /// Comma-separated allowed schemes.
        allowed: String,
    },
    /// The transport failed.
    #[error("fetching {url} failed: {reason}")]
    Failed {
        /// Requested URL.
        url: String,
        /// Transport message.
        reason: String,
    },
}

/// Retrieves script source for a URL.
pub trait SourceFetcher {
    /// Fetch the body of `url` as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Failed`] if the source cannot be retrieved.
    fn fetch(&mut self, url: &Url) -> Result<String, FetchError>;
}

impl<F> SourceFetcher for F
where
    F: FnMut(&Url) -> Result<String, FetchError>,
{
    fn fetch(&mut self, url: &Url) -> Result<String, FetchError> {
        self(url)
    }
}

/// What running code can do to the compartment it runs in.
pub struct EvalScope<'m> {
    monitor: &'m mut Monitor,
    compartment: CompartmentId,
    sandbox: Option<SandboxHandle>,
}

impl<'m> EvalScope<'m> {
    pub(crate) fn new(
        monitor: &'m mut Monitor,
        compartment: CompartmentId,
        sandbox: Option<SandboxHandle>,
    ) -> Self {
        Self {
            monitor,
            compartment,
            sandbox,
        }
    }

    /// Compartment the code runs in.
    pub fn compartment(&self) -> CompartmentId {
        self.compartment
    }

    /// Sandbox the code runs in, if any.
    pub fn sandbox(&self) -> Option<SandboxHandle> {
        self.sandbox
    }

    /// Guard a read of an object labelled `(privacy, trust)`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] when the read is refused.
    pub fn guard_read(
        &mut self,
        privacy: &Label,
        trust: &Label,
    ) -> Result<GuardDecision, MonitorError> {
        self.monitor
            .guard_read(self.compartment, privacy, trust)?
            .into_result()
    }

    /// Guard a read of data owned by another compartment.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SubsumptionDenied`] when the read is refused.
    pub fn guard_read_from(&mut self, source: CompartmentId) -> Result<GuardDecision, MonitorError> {
        self.monitor
            .guard_read_from(self.compartment, source, super::FlowDirection::Read)?
            .into_result()
    }

    /// Current working privacy label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Label`] if the label cannot be copied.
    pub fn privacy_label(&self) -> Result<Label, MonitorError> {
        self.monitor.privacy_label(self.compartment)
    }

    /// Current working trust label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Label`] if the label cannot be copied.
    pub fn trust_label(&self) -> Result<Label, MonitorError> {
        self.monitor.trust_label(self.compartment)
    }

    /// Post the evaluation result back to the scheduling side.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidState`] outside a sandbox.
    pub fn done(&mut self, value: Value) -> Result<(), MonitorError> {
        let handle = self.require_sandbox("done")?;
        self.monitor.sandbox_done(handle, value)
    }

    /// Read the last message posted into the sandbox.
    ///
    /// Reading the message raises the working label to the sandbox label.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidState`] outside a sandbox.
    pub fn message(&mut self) -> Result<Option<Value>, MonitorError> {
        let handle = self.require_sandbox("message")?;
        self.monitor.sandbox_message(handle)
    }

    /// Register the handler for messages posted into the sandbox.
    ///
    /// Registering raises the working label to the sandbox label and
    /// immediately delivers a pending message.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidState`] outside a sandbox.
    pub fn on_message<F>(&mut self, handler: F) -> Result<(), MonitorError>
    where
        F: FnMut(&Value) + 'static,
    {
        let handle = self.require_sandbox("onmessage")?;
        self.monitor.sandbox_on_message(handle, Box::new(handler))
    }

    fn require_sandbox(&self, operation: &str) -> Result<SandboxHandle, MonitorError> {
        self.sandbox.ok_or_else(|| {
            MonitorError::InvalidState(format!("{operation} is only available inside a sandbox"))
        })
    }
}
