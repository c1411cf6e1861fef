//! Shared domain types for the agent orchestration core.
//!
//! Every other crate depends on this one for configuration, error types,
//! provider-neutral messages, streaming events, and trace events. Nothing
//! here talks to a provider, a store, or the network.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod run;
pub mod stream;
pub mod token;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
