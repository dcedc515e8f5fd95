//! Configuration parsing for lxdspawn
//!
//! This crate handles:
//! - Global configuration (`~/.config/lxdspawn/config.toml`)
//! - Container name templates (`{username}` expansion)

mod error;
mod global;
mod template;

pub use error::*;
pub use global::*;
pub use template::*;
