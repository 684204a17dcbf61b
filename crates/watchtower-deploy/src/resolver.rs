//! Stack identifier resolution.

use std::fmt;

use crate::error::{DeployError, DeployResult};
use crate::types::{EnvironmentKind, StableKind};

/// Substring that marks a stack as ephemeral.
pub const EPHEMERAL_MARKER: &str = "ephemeral";

/// Top-level flow selected by a stack identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Build images only.
    Build,
    /// Refresh production monitors only.
    InfraOnly,
    /// Deploy to staging or production.
    StableDeploy(StableKind),
    /// Deploy a branch-scoped environment.
    EphemeralDeploy,
}

impl Flow {
    /// Environment kind the flow's catalog is resolved for.
    ///
    /// Monitor refreshes target production.
    #[must_use]
    pub const fn catalog_kind(&self) -> EnvironmentKind {
        match self {
            Self::Build => EnvironmentKind::Build,
            Self::InfraOnly => EnvironmentKind::Stable(StableKind::Production),
            Self::StableDeploy(kind) => EnvironmentKind::Stable(*kind),
            Self::EphemeralDeploy => EnvironmentKind::Ephemeral,
        }
    }

    /// Get the flow name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::InfraOnly => "infra",
            Self::StableDeploy(kind) => kind.as_str(),
            Self::EphemeralDeploy => "ephemeral",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a stack identifier to its flow.
///
/// The ephemeral marker is checked first, so `prod-ephemeral` is ephemeral.
pub fn resolve(stack: &str) -> DeployResult<Flow> {
    if stack.contains(EPHEMERAL_MARKER) {
        return Ok(Flow::EphemeralDeploy);
    }

    match stack {
        "build" => Ok(Flow::Build),
        "infra" => Ok(Flow::InfraOnly),
        "stage" => Ok(Flow::StableDeploy(StableKind::Staging)),
        "prod" => Ok(Flow::StableDeploy(StableKind::Production)),
        _ => Err(DeployError::invalid_environment(stack)),
    }
}
