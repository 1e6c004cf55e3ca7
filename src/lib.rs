//! VM Pool Orchestrator
//!
//! A Rust library for managing the lifecycle of a pool of cloud VMs as one
//! logical unit: provisioning, workload setup and deployment, detached
//! task execution and teardown. Resource CRUD is delegated to the cloud
//! control plane; this crate owns the fleet orchestration core — the
//! deterministic naming scheme, the idempotent provisioning sequence, the
//! per-VM fan-out over an SSH transport and the credential distribution
//! that bootstraps it.
//!
//! # Example
//!
//! ```no_run
//! use azpool::cloud::AzureCli;
//! use azpool::{CreateOptions, PoolOrchestrator, PoolSettings};
//! use std::sync::Arc;
//!
//! let client = Arc::new(AzureCli::connect()?);
//! let orchestrator =
//!     PoolOrchestrator::with_ssh_transport("demo", PoolSettings::default(), client)?;
//!
//! let report = orchestrator.create_pool(2, "Standard_DS1_v2", &CreateOptions::default())?;
//! assert_eq!(report.outcomes.len(), 2);
//!
//! orchestrator.delete_pool(|_vms| true)?;
//! # Ok::<(), azpool::Error>(())
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod models;
pub mod naming;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod secrets;

pub use config::PoolSettings;
pub use error::{Error, Result};
pub use orchestrator::{CreateOptions, DispatchMode, PoolOrchestrator};
pub use report::{FanoutReport, VmOutcome};
