//! Control-plane client and resource provisioning.
//!
//! Resource CRUD is delegated to an external control plane; this module
//! owns the client that talks to it, the typed requests sent through that
//! client, and the idempotent exists/ensure/delete layer built on top.

pub mod cli;
pub mod provision;
pub mod requests;

pub use cli::{AzureCli, CommandRunner};
pub use provision::Provisioner;
