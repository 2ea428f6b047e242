//! Small cross-cutting helpers used throughout the engine.
//!
//! - [`lit_str`] - compile-time string-literal types (protocol/message_type tags)
//! - [`sig_down`] - graceful shutdown signal handling

pub mod lit_str;
pub mod sig_down;

pub use sig_down::*;
