//! Error types for watchtower-deploy.

use std::fmt;

/// Result type alias using [`DeployError`].
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while orchestrating a deployment.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The stack identifier does not map to any known environment.
    #[error(
        "invalid stack name '{stack}'. Only 'build', 'infra', 'stage', 'prod', or '*ephemeral*' is allowed"
    )]
    InvalidEnvironment {
        /// The offending stack identifier.
        stack: String,
    },

    /// A process specification violates one of its construction invariants.
    #[error("invalid process spec '{process}': {reason}")]
    InvalidSpec {
        /// Process name.
        process: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The one-shot data migration failed; nothing was deployed.
    #[error("data migration failed: {0}")]
    MigrationFailed(String),

    /// One or more per-process provisioning steps failed.
    #[error("{} process(es) failed to provision: {}", failures.len(), FailureList(failures))]
    Provisioning {
        /// Every individual failure, in catalog order.
        failures: Vec<ProcessFailure>,
    },

    /// An ephemeral backing store could not be provisioned.
    #[error("backing store '{store}' failed: {reason}")]
    BackingStore {
        /// Store name.
        store: &'static str,
        /// Underlying cause.
        reason: String,
    },

    /// An image build or push failed.
    #[error("image build failed for {image}: {reason}")]
    Build {
        /// Image name.
        image: String,
        /// Underlying cause.
        reason: String,
    },

    /// The declarative-apply engine rejected an intent.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

impl DeployError {
    /// Create an invalid environment error.
    #[must_use]
    pub fn invalid_environment(stack: impl Into<String>) -> Self {
        Self::InvalidEnvironment {
            stack: stack.into(),
        }
    }

    /// Create an invalid spec error.
    #[must_use]
    pub fn invalid_spec(process: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            process: process.into(),
            reason: reason.into(),
        }
    }

    /// Create a gateway error.
    #[must_use]
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create a backing store error.
    #[must_use]
    pub fn backing_store(store: &'static str, reason: impl fmt::Display) -> Self {
        Self::BackingStore {
            store,
            reason: reason.to_string(),
        }
    }

    /// Create a build error.
    #[must_use]
    pub fn build(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Build {
            image: image.into(),
            reason: reason.into(),
        }
    }
}

/// A failure attributed to a single process during provisioning.
#[derive(Debug)]
pub struct ProcessFailure {
    /// Process name.
    pub process: String,
    /// Which sub-step failed.
    pub step: ProvisionStep,
    /// The error reported by the gateway.
    pub error: DeployError,
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.process, self.step, self.error)
    }
}

/// Per-process provisioning sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Workload create/update.
    Workload,
    /// Horizontal autoscaler.
    Autoscaler,
    /// Public route.
    Route,
    /// Uptime monitor.
    UptimeMonitor,
    /// Resource-utilisation monitor.
    UtilizationMonitor,
}

impl ProvisionStep {
    /// Get the step name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workload => "workload",
            Self::Autoscaler => "autoscaler",
            Self::Route => "route",
            Self::UptimeMonitor => "uptime_monitor",
            Self::UtilizationMonitor => "utilization_monitor",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct FailureList<'a>(&'a [ProcessFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
