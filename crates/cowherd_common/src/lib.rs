//! Shared helpers for the Cowherd maintenance service.
//!
//! Small building blocks used by the `cowherdd` binary: error types,
//! interval parsing, template rendering, state path mapping, logging
//! setup, power-state probing, privilege checks and notification
//! delivery.

pub mod duration;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod paths;
pub mod power;
pub mod privilege;
pub mod template;

pub use error::Error;
