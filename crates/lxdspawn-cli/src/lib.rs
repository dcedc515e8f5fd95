//! Command implementations for the lxdspawn binary, exposed for tests

pub mod commands;
