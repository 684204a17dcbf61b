//! Watchtower deployment orchestrator
//!
//! This crate deploys the multi-process watchtower service onto a shared
//! cluster. A single stack identifier selects what happens: build images,
//! refresh production monitors, deploy staging or production, or stand up a
//! branch-scoped ephemeral environment with its own backing stores.
//!
//! # Architecture
//!
//! Every run happens in two phases:
//!
//! - **Planning** is pure. The [`Catalog`] resolves an environment kind into
//!   ordered [`ProcessSpec`]s and [`plan::DeploymentPlan`] turns them into
//!   declarative intents with their dependency edges.
//! - **Reconciliation** submits those intents through the capability traits
//!   in [`gateway`]. The cluster's apply engine owns retries and drift.
//!
//! ```text
//!                 ┌──▶ build ──▶ ImageBuilder
//!                 ├──▶ infra ──▶ MonitoringGateway
//! stack ─▶ resolve┼──▶ stage|prod ───────────────────────▶ Provisioner
//!                 └──▶ *ephemeral* ─▶ EphemeralLifecycle ─▶ Provisioner
//! ```
//!
//! The provisioner waits for the data migration to complete before any
//! workload is submitted. Ephemeral backing stores are ready before the
//! migration starts.

#![forbid(unsafe_code)]

pub mod builder;
pub mod catalog;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod gateway;
pub mod monitoring;
pub mod naming;
pub mod orchestrator;
pub mod plan;
pub mod provisioner;
pub mod resolver;
pub mod secrets;
pub mod types;

// Re-export commonly used types at the crate root
pub use catalog::Catalog;
pub use config::DeployConfig;
pub use ephemeral::{EphemeralEnvironment, EphemeralLifecycleManager};
pub use error::{DeployError, DeployResult};
pub use gateway::{create_gateways, Gateways};
pub use orchestrator::{FlowOutput, Orchestrator};
pub use provisioner::Provisioner;
pub use resolver::{resolve, Flow};
pub use types::{BuildIdentity, EnvironmentContext, EnvironmentKind, ProcessSpec, StableKind};
