//! Foundation utilities for bioetl.
//!
//! Shared by every other crate in the workspace: the error taxonomy and exit
//! codes, logging initialization, atomic file writes, canonical JSON and
//! SHA-256 helpers, run identifiers, and the cancellation token.

pub mod atomic_write;
pub mod cancel;
pub mod canonical;
pub mod error;
pub mod exit_codes;
pub mod ids;
pub mod logging;

pub use cancel::CancelToken;
pub use error::EtlError;
pub use exit_codes::ExitCode;
