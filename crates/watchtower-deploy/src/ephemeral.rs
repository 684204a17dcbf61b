//! Ephemeral environment lifecycle.
//!
//! A branch gets its own namespace plus disposable cache, relational and
//! broker stores. All of them are ready before the provisioner starts; their
//! handles are passed on as hard prerequisites.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join3;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use crate::gateway::{
    ClusterGateway, ContainerPort, NamespaceIntent, ResourceHandle, ResourceKind, RouteIntent,
    StatefulServiceIntent, VolumeClaimIntent, VolumeMount, VolumeSource,
};
use crate::naming;
use crate::secrets::EnvVar;
use crate::types::{ClusterData, ImageRef, Namespace, ResourceQuota};

/// Cache store name.
pub const CACHE_STORE: &str = "redis";
/// Relational store name.
pub const RELATIONAL_STORE: &str = "postgres";
/// Message broker name.
pub const BROKER: &str = "rabbitmq";

const STORAGE_CLASS: &str = "gp2";
const ACCESS_MODE: &str = "ReadWriteOnce";
const BROKER_DASHBOARD_PORT: u16 = 15672;

/// Intents for one backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorePlan {
    /// Store name, for error reporting.
    pub store: &'static str,
    /// Standalone claim, created first and mounted by the service.
    pub claim: Option<VolumeClaimIntent>,
    /// The stateful service.
    pub service: StatefulServiceIntent,
    /// Public route to the service.
    pub route: Option<RouteIntent>,
}

/// Ready handles for the three stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackingStoreSet {
    /// Cache store.
    pub cache: ResourceHandle,
    /// Relational store.
    pub relational: ResourceHandle,
    /// Message broker.
    pub broker: ResourceHandle,
}

/// A provisioned ephemeral environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EphemeralEnvironment {
    /// Isolated namespace.
    pub namespace: Namespace,
    /// Backing stores.
    pub stores: BackingStoreSet,
    /// Broker management URL.
    pub broker_public_url: String,
}

impl EphemeralEnvironment {
    /// Everything application workloads must wait for.
    #[must_use]
    pub fn hard_prerequisites(&self) -> Vec<ResourceHandle> {
        vec![
            ResourceHandle::cluster(ResourceKind::Namespace, self.namespace.as_str()),
            self.stores.relational.clone(),
            self.stores.broker.clone(),
            self.stores.cache.clone(),
        ]
    }
}

fn claim(namespace: &Namespace, name: &str, size: &str) -> VolumeClaimIntent {
    VolumeClaimIntent {
        name: name.to_owned(),
        namespace: namespace.clone(),
        storage_class: STORAGE_CLASS.to_owned(),
        size: size.to_owned(),
        access_mode: ACCESS_MODE.to_owned(),
    }
}

fn claim_mount(claim: &VolumeClaimIntent, mount_path: &str) -> VolumeMount {
    VolumeMount {
        source: VolumeSource::Claim {
            claim: ResourceHandle::namespaced(
                ResourceKind::VolumeClaim,
                &claim.namespace,
                &claim.name,
            ),
        },
        mount_path: mount_path.to_owned(),
    }
}

/// Append-only cache store on an 8Gi claim.
#[must_use]
pub fn cache_store(namespace: &Namespace) -> StorePlan {
    let claim = claim(namespace, CACHE_STORE, "8Gi");
    StorePlan {
        store: CACHE_STORE,
        service: StatefulServiceIntent {
            name: CACHE_STORE.to_owned(),
            namespace: namespace.clone(),
            image: ImageRef::parse("redis"),
            command: vec![
                "redis-server".to_owned(),
                "--appendonly".to_owned(),
                "yes".to_owned(),
            ],
            ports: vec![ContainerPort::new(6379)],
            env: Vec::new(),
            limits: ResourceQuota::new("100m", "250Mi"),
            volume: claim_mount(&claim, "/data"),
            replicas: 1,
            stable_identity: false,
        },
        claim: Some(claim),
        route: None,
    }
}

/// Relational store with fixed bootstrap credentials on an 8Gi claim.
#[must_use]
pub fn relational_store(namespace: &Namespace, database: &str) -> StorePlan {
    let claim = claim(namespace, RELATIONAL_STORE, "8Gi");
    StorePlan {
        store: RELATIONAL_STORE,
        service: StatefulServiceIntent {
            name: RELATIONAL_STORE.to_owned(),
            namespace: namespace.clone(),
            image: ImageRef::parse("postgres"),
            command: Vec::new(),
            ports: vec![ContainerPort::new(5432)],
            env: vec![
                EnvVar::literal("POSTGRES_DB", database),
                EnvVar::literal("POSTGRES_PASSWORD", "password"),
                EnvVar::literal("PGDATA", "/var/lib/postgresql/data/pgdata"),
            ],
            limits: ResourceQuota::new("100m", "250Mi"),
            volume: claim_mount(&claim, "/var/lib/postgresql/data"),
            replicas: 1,
            stable_identity: false,
        },
        claim: Some(claim),
        route: None,
    }
}

/// Broker stateful set with a per-replica claim and a public dashboard route.
#[must_use]
pub fn broker(namespace: &Namespace, domain: &str) -> StorePlan {
    StorePlan {
        store: BROKER,
        claim: None,
        service: StatefulServiceIntent {
            name: BROKER.to_owned(),
            namespace: namespace.clone(),
            image: ImageRef::parse("rabbitmq:3.8.0-management"),
            command: Vec::new(),
            ports: vec![
                ContainerPort::named("api", 5672),
                ContainerPort::named("dashboard", BROKER_DASHBOARD_PORT),
            ],
            env: vec![
                EnvVar::literal("RABBITMQ_DEFAULT_USER", "guest"),
                EnvVar::literal("RABBITMQ_DEFAULT_PASS", "guest"),
                EnvVar::literal("RABBITMQ_DEFAULT_VHOST", "/"),
                EnvVar::literal("RABBITMQ_VM_MEMORY_HIGH_WATERMARK", "1.0"),
            ],
            limits: ResourceQuota::new("150m", "350Mi"),
            volume: VolumeMount {
                source: VolumeSource::ClaimTemplate {
                    template: claim(namespace, "data", "1Gi"),
                },
                mount_path: "/var/lib/rabbitmq".to_owned(),
            },
            replicas: 1,
            stable_identity: true,
        },
        route: Some(RouteIntent {
            name: BROKER.to_owned(),
            namespace: namespace.clone(),
            target: BROKER.to_owned(),
            port: Some(BROKER_DASHBOARD_PORT),
            subdomain: naming::route_subdomain(namespace, BROKER),
            root_domain: domain.to_owned(),
        }),
    }
}

/// Creates branch-scoped environments.
#[derive(Clone)]
pub struct EphemeralLifecycleManager {
    cluster: Arc<dyn ClusterGateway>,
    service: String,
}

impl fmt::Debug for EphemeralLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralLifecycleManager")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl EphemeralLifecycleManager {
    /// Create a manager for a service.
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterGateway>, service: impl Into<String>) -> Self {
        Self {
            cluster,
            service: service.into(),
        }
    }

    /// Allocate the branch's namespace and bring up its backing stores.
    ///
    /// The stores are provisioned concurrently; the first failure aborts the
    /// rest and is reported as a backing-store error.
    pub async fn provision_ephemeral(
        &self,
        branch: &str,
        cluster: &ClusterData,
    ) -> DeployResult<EphemeralEnvironment> {
        let requested = naming::ephemeral_namespace(&self.service, branch);
        info!(branch, namespace = %requested, cluster = %cluster.name, "allocating ephemeral namespace");

        let namespace = self
            .cluster
            .create_namespace(&NamespaceIntent {
                name: requested,
                ephemeral: true,
            })
            .await?;

        let cache = cache_store(&namespace);
        let relational = relational_store(&namespace, &self.service);
        let broker = broker(&namespace, &cluster.domain);

        let ((cache, _), (relational, _), (broker, broker_url)) = try_join3(
            self.provision_store(&cache),
            self.provision_store(&relational),
            self.provision_store(&broker),
        )
        .await?;

        let broker_public_url = broker_url
            .ok_or_else(|| DeployError::backing_store(BROKER, "no public route was created"))?;

        info!(namespace = %namespace, broker = %broker_public_url, "backing stores ready");

        Ok(EphemeralEnvironment {
            namespace,
            stores: BackingStoreSet {
                cache,
                relational,
                broker,
            },
            broker_public_url,
        })
    }

    async fn provision_store(
        &self,
        plan: &StorePlan,
    ) -> DeployResult<(ResourceHandle, Option<String>)> {
        let store = plan.store;
        let mut service = plan.service.clone();

        if let Some(claim) = &plan.claim {
            let handle = self
                .cluster
                .create_persistent_volume_claim(claim)
                .await
                .map_err(|e| DeployError::backing_store(store, e))?;
            debug!(store, claim = %handle, "volume claim ready");
            service.volume.source = VolumeSource::Claim { claim: handle };
        }

        let handle = self
            .cluster
            .create_stateful_service(&service)
            .await
            .map_err(|e| DeployError::backing_store(store, e))?;
        debug!(store, service = %handle, "stateful service ready");

        let url = match &plan.route {
            Some(route) => {
                let created = self
                    .cluster
                    .create_public_route(route)
                    .await
                    .map_err(|e| DeployError::backing_store(store, e))?;
                Some(created.url.unwrap_or_else(|| route.url()))
            }
            None => None,
        };

        Ok((handle, url))
    }
}
