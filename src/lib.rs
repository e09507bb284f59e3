//! Deployment orchestration for a small fleet.
//!
//! Rollout builds Python packages from git sources on the control host, ships them to the
//! machines that run them, installs them, and restarts the application instances that use them.
//! Everything is described in a few YAML files (see [config]).
//!
//! # Program flow
//!
//! 1. The user invokes Rollout via the `rollout` binary, naming an entity and one or more of its
//!    actions, e.g. `rollout pyenv prod deploy`.
//!
//! 2. The configuration is loaded and validated in full ([config::Config]).
//!
//! 3. Each action is resolved on the entity and run ([dispatch]). Actions run commands on
//!    the control host ([local]) or on remote hosts ([network]), through [host::Host], and may run
//!    other actions of the same entity in turn.
//!
//! 4. Whatever happened, every SSH session is closed before the program exits.
//!
//! Everything happens on one thread, one command at a time.

pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod local;
pub mod network;
pub mod terminal;

#[doc(hidden)]
pub mod testing;

#[doc(inline)]
pub use crate::core::dispatch;

#[doc(inline)]
pub use error::{Error, Result};
