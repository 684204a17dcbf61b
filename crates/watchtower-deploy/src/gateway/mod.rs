//! Capability interfaces for the cluster and monitoring collaborators.
//!
//! The orchestrator only expresses declarative intents and the dependency
//! edges between them. Reconciliation, retries and drift correction belong to
//! the apply engine behind these traits.

mod http;
mod memory;

pub use http::HttpApplyGateway;
pub use memory::{count_by_kind, MemoryGateway, TraceAction, TraceEvent};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, GatewayType};
use crate::error::DeployResult;
use crate::secrets::EnvVar;
use crate::types::{HealthCheck, ImageRef, Namespace, PortPolicy, ResourceLimits, ResourceQuota};

/// Kind of cluster or monitoring object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Isolated namespace.
    Namespace,
    /// Persistent volume claim.
    VolumeClaim,
    /// Stateful backing service.
    StatefulService,
    /// Run-to-completion task.
    OneShotTask,
    /// Replica-managed application workload.
    Workload,
    /// Horizontal autoscaler.
    Autoscaler,
    /// Public ingress route.
    Route,
    /// Synthetic uptime monitor.
    UptimeMonitor,
    /// Resource-utilisation monitor.
    UtilizationMonitor,
}

impl ResourceKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::VolumeClaim => "volume_claim",
            Self::StatefulService => "stateful_service",
            Self::OneShotTask => "one_shot_task",
            Self::Workload => "workload",
            Self::Autoscaler => "autoscaler",
            Self::Route => "route",
            Self::UptimeMonitor => "uptime_monitor",
            Self::UtilizationMonitor => "utilization_monitor",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an object the gateway has reported ready.
///
/// Handles are the dependency edges between intents: an intent listing a
/// handle in `depends_on` must not be applied before that object is ready.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Object kind.
    pub kind: ResourceKind,
    /// Namespace, for namespaced objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    /// Object name.
    pub name: String,
}

impl ResourceHandle {
    /// Create a handle for a namespaced object.
    #[must_use]
    pub fn namespaced(kind: ResourceKind, namespace: &Namespace, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.clone()),
            name: name.into(),
        }
    }

    /// Create a handle for a cluster-scoped object.
    #[must_use]
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Request for an isolated namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceIntent {
    /// Requested name; the gateway may return a different final name.
    pub name: String,
    /// Whether the namespace is throwaway.
    pub ephemeral: bool,
}

/// Persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaimIntent {
    /// Claim name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Storage class.
    pub storage_class: String,
    /// Requested size (e.g. `8Gi`).
    pub size: String,
    /// Access mode.
    pub access_mode: String,
}

/// A named container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    /// Optional port name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number.
    pub port: u16,
}

impl ContainerPort {
    /// An unnamed port.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self { name: None, port }
    }

    /// A named port.
    #[must_use]
    pub fn named(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: Some(name.into()),
            port,
        }
    }
}

/// Where a backing service's data volume comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    /// An existing, ready claim.
    Claim {
        /// The claim.
        claim: ResourceHandle,
    },
    /// A claim template owned by the stateful service itself.
    ClaimTemplate {
        /// Template for the per-replica claim.
        template: VolumeClaimIntent,
    },
}

/// Data volume mount for a backing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume source.
    pub source: VolumeSource,
    /// Mount path inside the container.
    pub mount_path: String,
}

/// Stateful backing service (cache, database, broker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulServiceIntent {
    /// Service name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Container image.
    pub image: ImageRef,
    /// Command override; empty keeps the image entrypoint.
    pub command: Vec<String>,
    /// Exposed ports.
    pub ports: Vec<ContainerPort>,
    /// Environment.
    pub env: Vec<EnvVar>,
    /// Resource limits.
    pub limits: ResourceQuota,
    /// Data volume.
    pub volume: VolumeMount,
    /// Replica count.
    pub replicas: u32,
    /// Whether replicas need stable identities (a stateful set) rather than a
    /// plain deployment.
    pub stable_identity: bool,
}

/// Run-to-completion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OneShotTaskIntent {
    /// Task name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Container image.
    pub image: ImageRef,
    /// Command vector.
    pub command: Vec<String>,
    /// Environment.
    pub env: Vec<EnvVar>,
    /// Resource limits.
    pub resources: ResourceLimits,
    /// Hard prerequisites.
    pub depends_on: Vec<ResourceHandle>,
}

impl OneShotTaskIntent {
    /// Handle the task will have once it completes.
    #[must_use]
    pub fn handle(&self) -> ResourceHandle {
        ResourceHandle::namespaced(ResourceKind::OneShotTask, &self.namespace, &self.name)
    }
}

/// Rolling-update bounds for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingUpdate {
    /// Replicas that may be unavailable during a rollout.
    pub max_unavailable: u32,
    /// Extra replicas allowed during a rollout, as a percentage.
    pub max_surge_percent: u32,
}

impl RollingUpdate {
    /// Never drop below full capacity; surge by half.
    pub const FULL_CAPACITY: Self = Self {
        max_unavailable: 0,
        max_surge_percent: 50,
    };
}

/// Replica-managed application workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadIntent {
    /// Workload name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Desired replicas.
    pub replicas: u32,
    /// Container image.
    pub image: ImageRef,
    /// Command vector.
    pub command: Vec<String>,
    /// Liveness check.
    pub liveness: HealthCheck,
    /// Readiness check.
    pub readiness: HealthCheck,
    /// Port policy.
    pub ports: PortPolicy,
    /// Resource limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
    /// Environment.
    pub env: Vec<EnvVar>,
    /// Tags attached to shipped logs; empty disables log shipping.
    pub log_tags: Vec<String>,
    /// Rollout bounds.
    pub rolling_update: RollingUpdate,
    /// Hard prerequisites.
    pub depends_on: Vec<ResourceHandle>,
}

/// Horizontal autoscaler bound to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerIntent {
    /// Autoscaler name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Workload name being scaled.
    pub target: String,
    /// Lower replica bound.
    pub min_replicas: u32,
    /// Upper replica bound.
    pub max_replicas: u32,
    /// Target average CPU utilisation.
    pub target_cpu_utilization_percent: u32,
}

/// Public route to a workload or service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteIntent {
    /// Route name.
    pub name: String,
    /// Owning namespace.
    pub namespace: Namespace,
    /// Backend name.
    pub target: String,
    /// Backend port; `None` uses the target's default service port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Subdomain under the cluster domain.
    pub subdomain: String,
    /// Cluster root domain.
    pub root_domain: String,
}

impl RouteIntent {
    /// Fully qualified host name.
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}.{}", self.subdomain, self.root_domain)
    }

    /// Reachable URL for the route.
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://{}", self.host())
    }
}

/// A route as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicRoute {
    /// The route object.
    pub handle: ResourceHandle,
    /// Reachable URL, once known.
    pub url: Option<String>,
}

/// Synthetic uptime check against an internal service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeMonitorIntent {
    /// Monitor name.
    pub name: String,
    /// Environment name.
    pub environment: String,
    /// Namespace of the monitored workload.
    pub namespace: Namespace,
    /// Internal service endpoint.
    pub service_name: String,
    /// Percentage of ready replicas below which the monitor alerts.
    pub readiness_threshold_percent: u32,
    /// Notification channel.
    pub notify: String,
}

/// CPU/memory utilisation monitor for a workload's pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationMonitorIntent {
    /// Monitor name.
    pub name: String,
    /// Environment name.
    pub environment: String,
    /// Namespace of the monitored workload.
    pub namespace: Namespace,
    /// Pod name prefix.
    pub pod_name: String,
    /// Notification channel.
    pub notify: String,
}

/// Cluster provisioning capabilities.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Create an isolated namespace, returning its final name.
    async fn create_namespace(&self, intent: &NamespaceIntent) -> DeployResult<Namespace>;

    /// Create a persistent volume claim.
    async fn create_persistent_volume_claim(
        &self,
        intent: &VolumeClaimIntent,
    ) -> DeployResult<ResourceHandle>;

    /// Create a stateful backing service; resolves once it is ready.
    async fn create_stateful_service(
        &self,
        intent: &StatefulServiceIntent,
    ) -> DeployResult<ResourceHandle>;

    /// Run a task to completion; resolves only after it has succeeded.
    async fn run_one_shot_task(&self, intent: &OneShotTaskIntent) -> DeployResult<ResourceHandle>;

    /// Create or update a workload.
    async fn create_or_update_workload(
        &self,
        intent: &WorkloadIntent,
    ) -> DeployResult<ResourceHandle>;

    /// Register a horizontal autoscaler.
    async fn create_autoscaler(&self, intent: &AutoscalerIntent) -> DeployResult<ResourceHandle>;

    /// Register a public route.
    async fn create_public_route(&self, intent: &RouteIntent) -> DeployResult<PublicRoute>;
}

/// Monitoring capabilities.
#[async_trait]
pub trait MonitoringGateway: Send + Sync {
    /// Register a synthetic uptime monitor.
    async fn register_uptime_monitor(
        &self,
        intent: &UptimeMonitorIntent,
    ) -> DeployResult<ResourceHandle>;

    /// Register a resource-utilisation monitor.
    async fn register_utilization_monitor(
        &self,
        intent: &UtilizationMonitorIntent,
    ) -> DeployResult<ResourceHandle>;
}

/// Inputs for one image build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    /// Repository name within the registry.
    pub name: String,
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile location.
    pub dockerfile: PathBuf,
    /// Every tag to apply; the first is the reference returned.
    pub tags: Vec<ImageRef>,
    /// Images whose layers may be reused.
    pub cache_from: Vec<ImageRef>,
    /// Build arguments.
    pub build_args: BTreeMap<String, String>,
}

/// Image building capability.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build (and publish) an image, returning its immutable reference.
    async fn build(&self, request: &BuildRequest) -> DeployResult<ImageRef>;
}

/// Both gateway halves backed by one implementation.
#[derive(Clone)]
pub struct Gateways {
    /// Cluster half.
    pub cluster: Arc<dyn ClusterGateway>,
    /// Monitoring half.
    pub monitoring: Arc<dyn MonitoringGateway>,
}

impl Gateways {
    /// Use one object for both halves.
    #[must_use]
    pub fn shared<G>(gateway: Arc<G>) -> Self
    where
        G: ClusterGateway + MonitoringGateway + 'static,
    {
        Self {
            cluster: gateway.clone(),
            monitoring: gateway,
        }
    }
}

impl fmt::Debug for Gateways {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateways").finish_non_exhaustive()
    }
}

/// Create gateways from configuration.
pub fn create_gateways(config: &ClusterConfig) -> DeployResult<Gateways> {
    match config.gateway {
        GatewayType::Http => Ok(Gateways::shared(Arc::new(HttpApplyGateway::new(config)?))),
        GatewayType::Memory => Ok(Gateways::shared(Arc::new(MemoryGateway::new()))),
    }
}
