//! DIFC: decentralized information-flow control for script compartments.
//!
//! Every compartment carries a privacy label and a trust label built from
//! principals. Reads are mediated by a guard that floats the reader's labels
//! to cover what it reads and tightens the network perimeter to match. Fully
//! isolated sandboxes run code under fixed labels and talk to their creator
//! only through guarded channels.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod lattice;

pub mod kernel;

pub mod scenario;
