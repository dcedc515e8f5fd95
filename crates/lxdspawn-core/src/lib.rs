//! Core logic for lxdspawn container lifecycle management
//!
//! This crate provides:
//! - Rendering of the in-guest artifacts (systemd unit, environment file,
//!   cloud-init payload, LXD limit keys)
//! - The lifecycle orchestrator that creates-or-reuses a container, starts
//!   the managed service and polls until it is reachable
//! - Address resolution from live container state
//! - Persisted per-user session state

mod address;
mod error;
mod identity;
mod launch;
mod render;
mod spawner;
mod state;

pub use address::*;
pub use error::*;
pub use identity::*;
pub use launch::*;
pub use render::*;
pub use spawner::*;
pub use state::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
