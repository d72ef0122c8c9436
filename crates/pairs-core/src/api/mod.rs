//! API clients for external services.

pub mod conductor;

pub use conductor::{ConductorClient, HttpConductorClient};
