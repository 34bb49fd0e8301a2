//! Jellyfin media stack
//!
//! Builds the desired-state graph for a home media server (NFS media volume,
//! Jellystat PostgreSQL database and credentials, Jellyfin Helm release and
//! Jellystat app) and submits it once, in dependency order, to the cluster.
//!
//! ```text
//! ConfigContext ─▶ stack::build_stack ─▶ graph::assemble ─▶ orchestrator::submit ─▶ graph::export
//! ```

pub mod config;
pub mod crd;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod resources;
pub mod stack;
pub mod telemetry;

pub use config::{ConfigContext, ConfigStore, ConfigValue, Environment, Provenance};
pub use error::{Error, Result};
pub use graph::{assemble, export, OutputSet, OutputValue, SubmissionHandle};
