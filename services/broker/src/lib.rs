//! Stratus broker library.
//!
//! Provisions, binds, modifies and deprovisions managed databases and caches
//! on behalf of a platform, and sweeps for drift between broker records and
//! the provider. The crate ships a `stratus-broker` binary; the library
//! surface is what the platform-facing protocol layer and integration tests
//! build on.

pub mod adapter;
pub mod broker;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gate;
pub mod options;
pub mod platform;
pub mod provider;
pub mod record;
pub mod response;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod tags;
