//! Core types for watchtower-deploy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::naming;

/// Long-lived environment flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StableKind {
    /// Pre-production environment.
    Staging,
    /// Production.
    Production,
}

impl StableKind {
    /// Get the environment name as used in stack names, secret stores and
    /// configuration file names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "stage",
            Self::Production => "prod",
        }
    }
}

impl fmt::Display for StableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of environment kinds an orchestration run can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    /// Image build only.
    Build,
    /// Monitor refresh only.
    Infra,
    /// Staging or production.
    Stable(StableKind),
    /// Branch-scoped throwaway environment.
    Ephemeral,
}

impl EnvironmentKind {
    /// Every kind, in a fixed order.
    pub const ALL: [Self; 5] = [
        Self::Build,
        Self::Infra,
        Self::Stable(StableKind::Staging),
        Self::Stable(StableKind::Production),
        Self::Ephemeral,
    ];

    /// Get the environment name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Infra => "infra",
            Self::Stable(kind) => kind.as_str(),
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Returns true for production.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Stable(StableKind::Production))
    }

    /// Returns true for ephemeral environments.
    #[must_use]
    pub const fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral)
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster namespace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Create a new namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the namespace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A container image reference (`registry/name:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Create an image reference from its parts.
    #[must_use]
    pub fn new(registry: &str, name: &str, tag: &str) -> Self {
        Self(format!("{registry}/{name}:{tag}"))
    }

    /// Wrap an already formatted reference.
    #[must_use]
    pub fn parse(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source revision identity for one orchestration run.
///
/// Computed once at startup and passed by reference everywhere it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentity {
    /// Short commit hash; the immutable image tag.
    pub revision: String,
    /// Raw branch name.
    pub branch: String,
}

impl BuildIdentity {
    /// Create a build identity.
    #[must_use]
    pub fn new(revision: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            branch: branch.into(),
        }
    }

    /// Branch name made safe for tags and namespaces.
    #[must_use]
    pub fn sanitized_branch(&self) -> String {
        naming::sanitize(&self.branch)
    }

    /// Mutable per-branch tag (`<branch>-latest`).
    #[must_use]
    pub fn branch_tag(&self) -> String {
        format!("{}-latest", self.sanitized_branch())
    }
}

/// How a probe checks the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeMechanism {
    /// Open a TCP connection.
    Tcp {
        /// Container port.
        port: u16,
    },
    /// Run a command inside the container.
    Exec {
        /// Command vector.
        command: Vec<String>,
    },
}

/// An explicit health probe policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Check mechanism.
    pub mechanism: ProbeMechanism,
    /// Delay before the first check.
    pub initial_delay_secs: u32,
    /// Interval between checks.
    pub period_secs: u32,
    /// Per-check timeout.
    pub timeout_secs: u32,
    /// Consecutive failures before the check is considered failed.
    pub failure_threshold: u32,
    /// Consecutive successes before the check is considered passing.
    pub success_threshold: u32,
}

impl Probe {
    /// A TCP probe with the cluster's stock timings.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self {
            mechanism: ProbeMechanism::Tcp { port },
            initial_delay_secs: 0,
            period_secs: 10,
            timeout_secs: 1,
            failure_threshold: 3,
            success_threshold: 1,
        }
    }

    /// An exec probe with the cluster's stock timings.
    #[must_use]
    pub fn exec<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mechanism: ProbeMechanism::Exec {
                command: command.into_iter().map(Into::into).collect(),
            },
            ..Self::tcp(0)
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, secs: u32) -> Self {
        self.initial_delay_secs = secs;
        self
    }

    /// Set the period.
    #[must_use]
    pub const fn with_period(mut self, secs: u32) -> Self {
        self.period_secs = secs;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Liveness/readiness configuration for a process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HealthCheck {
    /// No check.
    #[default]
    Absent,
    /// The cluster gateway's default check.
    Default,
    /// A fully specified probe.
    Explicit(Probe),
}

impl HealthCheck {
    /// Returns true when no check is configured.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Port exposure policy for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortPolicy {
    /// No ports.
    Absent,
    /// The gateway's default service port.
    #[default]
    Default,
}

/// A CPU and memory quota pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    /// CPU quantity (e.g. `256m`).
    pub cpu: String,
    /// Memory quantity (e.g. `512Mi`).
    pub memory: String,
}

impl ResourceQuota {
    /// Create a quota.
    #[must_use]
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
        }
    }
}

/// Resource profile name for hard limits.
pub const LIMITS_PROFILE: &str = "limits";

/// Resource profile name for scheduler requests.
pub const REQUESTS_PROFILE: &str = "requests";

/// Resource quotas keyed by profile name.
///
/// Always holds at least a `limits` and a `requests` profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResourceLimits(BTreeMap<String, ResourceQuota>);

impl ResourceLimits {
    /// Identical limits and requests.
    #[must_use]
    pub fn uniform(cpu: &str, memory: &str) -> Self {
        let quota = ResourceQuota::new(cpu, memory);
        let mut profiles = BTreeMap::new();
        profiles.insert(LIMITS_PROFILE.to_owned(), quota.clone());
        profiles.insert(REQUESTS_PROFILE.to_owned(), quota);
        Self(profiles)
    }

    /// Look up a profile.
    #[must_use]
    pub fn get(&self, profile: &str) -> Option<&ResourceQuota> {
        self.0.get(profile)
    }

    /// Hard limits.
    #[must_use]
    pub fn limits(&self) -> Option<&ResourceQuota> {
        self.get(LIMITS_PROFILE)
    }

    /// Scheduler requests.
    #[must_use]
    pub fn requests(&self) -> Option<&ResourceQuota> {
        self.get(REQUESTS_PROFILE)
    }
}

/// Horizontal autoscaling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoscaling {
    /// Upper replica bound.
    pub max_replicas: u32,
    /// Target average CPU utilisation.
    pub target_cpu_utilization_percent: u32,
}

/// The unit of deployment.
///
/// Constructed through [`ProcessSpecBuilder`], which enforces the field
/// invariants; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSpec {
    name: String,
    replica_count: u32,
    image: Option<ImageRef>,
    command: Vec<String>,
    expose_publicly: bool,
    enable_monitoring: bool,
    liveness_check: HealthCheck,
    readiness_check: HealthCheck,
    port_policy: PortPolicy,
    resource_limits: Option<ResourceLimits>,
    autoscaling: Option<Autoscaling>,
}

impl ProcessSpec {
    /// Start building a spec.
    #[must_use]
    pub fn builder(name: impl Into<String>, replica_count: u32) -> ProcessSpecBuilder {
        ProcessSpecBuilder::new(name, replica_count)
    }

    /// Unique name within the environment.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Desired replica count.
    #[must_use]
    pub const fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// Resolved image, if known.
    #[must_use]
    pub const fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }

    /// Command vector.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Whether a public route is created.
    #[must_use]
    pub const fn expose_publicly(&self) -> bool {
        self.expose_publicly
    }

    /// Whether an uptime monitor is attached.
    #[must_use]
    pub const fn enable_monitoring(&self) -> bool {
        self.enable_monitoring
    }

    /// Liveness check.
    #[must_use]
    pub const fn liveness_check(&self) -> &HealthCheck {
        &self.liveness_check
    }

    /// Readiness check.
    #[must_use]
    pub const fn readiness_check(&self) -> &HealthCheck {
        &self.readiness_check
    }

    /// Port policy.
    #[must_use]
    pub const fn port_policy(&self) -> PortPolicy {
        self.port_policy
    }

    /// Resource limits.
    #[must_use]
    pub const fn resource_limits(&self) -> Option<&ResourceLimits> {
        self.resource_limits.as_ref()
    }

    /// Autoscaling bounds.
    #[must_use]
    pub const fn autoscaling(&self) -> Option<&Autoscaling> {
        self.autoscaling.as_ref()
    }
}

/// Builder for [`ProcessSpec`].
#[derive(Debug, Clone)]
pub struct ProcessSpecBuilder {
    spec: ProcessSpec,
}

impl ProcessSpecBuilder {
    fn new(name: impl Into<String>, replica_count: u32) -> Self {
        Self {
            spec: ProcessSpec {
                name: name.into(),
                replica_count,
                image: None,
                command: Vec::new(),
                expose_publicly: false,
                enable_monitoring: false,
                liveness_check: HealthCheck::Absent,
                readiness_check: HealthCheck::Absent,
                port_policy: PortPolicy::Default,
                resource_limits: None,
                autoscaling: None,
            },
        }
    }

    /// Set the image.
    #[must_use]
    pub fn image(mut self, image: ImageRef) -> Self {
        self.spec.image = Some(image);
        self
    }

    /// Set the command vector.
    #[must_use]
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Expose through a public route.
    #[must_use]
    pub const fn expose_publicly(mut self, expose: bool) -> Self {
        self.spec.expose_publicly = expose;
        self
    }

    /// Attach an uptime monitor.
    #[must_use]
    pub const fn enable_monitoring(mut self, enable: bool) -> Self {
        self.spec.enable_monitoring = enable;
        self
    }

    /// Set the liveness check.
    #[must_use]
    pub fn liveness(mut self, check: HealthCheck) -> Self {
        self.spec.liveness_check = check;
        self
    }

    /// Set the readiness check.
    #[must_use]
    pub fn readiness(mut self, check: HealthCheck) -> Self {
        self.spec.readiness_check = check;
        self
    }

    /// Set the port policy.
    #[must_use]
    pub const fn ports(mut self, policy: PortPolicy) -> Self {
        self.spec.port_policy = policy;
        self
    }

    /// Set resource limits.
    #[must_use]
    pub fn resources(mut self, limits: ResourceLimits) -> Self {
        self.spec.resource_limits = Some(limits);
        self
    }

    /// Enable autoscaling.
    #[must_use]
    pub const fn autoscaling(mut self, max_replicas: u32, target_cpu_percent: u32) -> Self {
        self.spec.autoscaling = Some(Autoscaling {
            max_replicas,
            target_cpu_utilization_percent: target_cpu_percent,
        });
        self
    }

    /// Validate and produce the spec.
    pub fn build(self) -> DeployResult<ProcessSpec> {
        let spec = self.spec;

        if spec.name.is_empty() {
            return Err(DeployError::invalid_spec("", "name must not be empty"));
        }
        if spec.replica_count == 0 {
            return Err(DeployError::invalid_spec(
                &spec.name,
                "replica count must be positive",
            ));
        }
        if let Some(autoscaling) = &spec.autoscaling {
            if autoscaling.max_replicas < spec.replica_count {
                return Err(DeployError::invalid_spec(
                    &spec.name,
                    format!(
                        "autoscaling max replicas {} is below replica count {}",
                        autoscaling.max_replicas, spec.replica_count
                    ),
                ));
            }
            if autoscaling.target_cpu_utilization_percent == 0
                || autoscaling.target_cpu_utilization_percent > 100
            {
                return Err(DeployError::invalid_spec(
                    &spec.name,
                    "autoscaling CPU target must be within 1..=100",
                ));
            }
        }

        Ok(spec)
    }
}

/// Read-only context for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentContext {
    /// Environment kind.
    pub kind: EnvironmentKind,
    /// Target namespace.
    pub namespace: Namespace,
    /// Notification channel for monitors.
    pub notify_target: String,
}

impl EnvironmentContext {
    /// Create a new context.
    #[must_use]
    pub fn new(kind: EnvironmentKind, namespace: Namespace, notify_target: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            notify_target: notify_target.into(),
        }
    }

    /// Environment name.
    #[must_use]
    pub const fn environment(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Resolved cluster the run deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterData {
    /// Cluster name.
    pub name: String,
    /// Which stable tier the cluster belongs to.
    pub tier: StableKind,
    /// Root domain for public routes.
    pub domain: String,
}
