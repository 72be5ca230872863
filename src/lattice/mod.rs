//! Label algebra for decentralized information-flow control.
//!
//! A [`Label`] is a conjunction of [`Role`]s and a role is a disjunction of
//! [`Principal`]s. Privacy labels state who must consent before data may be
//! released; trust labels state who vouches for the data. A [`Privilege`]
//! holds the roles a compartment can speak for, which lets it discharge the
//! matching conjuncts during a subsumption check.
//!
//! All types here are plain values. Storing a label somewhere new means
//! cloning it, so floating one compartment never mutates another's label.

use thiserror::Error;

pub mod label;
pub mod principal;
pub mod privilege;
pub mod role;

pub use label::Label;
pub use principal::Principal;
pub use privilege::Privilege;
pub use role::Role;

/// Errors produced while building labels.
///
/// The algebra itself (`and`, `or`, `subsumes`, `reduce`) is total; only
/// construction from untrusted input and fallible copies can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// The string could not be turned into a principal, even under the
    /// synthetic `role:` scheme.
    #[error("invalid principal '{input}': {reason}")]
    InvalidPrincipal {
        /// The rejected input.
        input: String,
        /// Why the URL parser refused it.
        reason: String,
    },
    /// A role with no principals was added to a label.
    #[error("a label cannot contain an empty role")]
    EmptyRole,
    /// JSON label text did not have the `[["p1","p2"],["q1"]]` shape.
    #[error("malformed label JSON: {0}")]
    MalformedJson(String),
    /// Reserving space for a label copy failed.
    #[error("out of memory while copying a label")]
    OutOfMemory,
}
