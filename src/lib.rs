//! Library modules for the transfer tracker.
//!
//! Exposed so the binary and the integration tests share one set of
//! engine types.

pub mod config;
pub mod monitor;
pub mod notify;
pub mod server;
pub mod taostats;
pub mod tracker;
