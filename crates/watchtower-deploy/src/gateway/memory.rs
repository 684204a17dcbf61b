//! In-memory recording gateway for dry runs and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{DeployError, DeployResult};
use crate::types::Namespace;

use super::{
    AutoscalerIntent, ClusterGateway, MonitoringGateway, NamespaceIntent, OneShotTaskIntent,
    PublicRoute, ResourceHandle, ResourceKind, RouteIntent, StatefulServiceIntent,
    UptimeMonitorIntent, UtilizationMonitorIntent, VolumeClaimIntent, WorkloadIntent,
};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    /// Intent accepted.
    Submitted,
    /// Run-to-completion task finished successfully.
    Completed,
    /// Intent rejected.
    Failed,
}

/// One entry in the gateway's ordered trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    /// Position in the trace.
    pub sequence: usize,
    /// What happened.
    pub action: TraceAction,
    /// Object affected.
    pub handle: ResourceHandle,
    /// Dependencies declared by the intent.
    pub depends_on: Vec<ResourceHandle>,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<TraceEvent>,
    ready: HashSet<ResourceHandle>,
    objects: Vec<(ResourceHandle, serde_json::Value)>,
    failures: HashSet<(ResourceKind, String)>,
    omit_route_urls: bool,
}

impl State {
    fn record(&mut self, action: TraceAction, handle: &ResourceHandle, depends_on: &[ResourceHandle]) {
        let sequence = self.events.len();
        self.events.push(TraceEvent {
            sequence,
            action,
            handle: handle.clone(),
            depends_on: depends_on.to_vec(),
        });
    }

    fn upsert(&mut self, handle: &ResourceHandle, intent: serde_json::Value) {
        match self.objects.iter_mut().find(|(h, _)| h == handle) {
            Some(entry) => entry.1 = intent,
            None => self.objects.push((handle.clone(), intent)),
        }
    }
}

/// Gateway that records every intent in memory instead of applying it.
///
/// Objects become ready as soon as they are accepted. Intents whose declared
/// dependencies are not ready yet are rejected, so tests catch ordering
/// mistakes. Failures can be injected per object.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every intent for the named object fail.
    #[must_use]
    pub fn with_failure(self, kind: ResourceKind, name: impl Into<String>) -> Self {
        self.state.lock().failures.insert((kind, name.into()));
        self
    }

    /// Report routes without a URL, like an apply engine that leaves the
    /// host to the caller.
    #[must_use]
    pub fn without_route_urls(self) -> Self {
        self.state.lock().omit_route_urls = true;
        self
    }

    /// The ordered trace so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.state.lock().events.clone()
    }

    /// Every accepted object of a kind, in first-submission order.
    #[must_use]
    pub fn objects(&self, kind: ResourceKind) -> Vec<(ResourceHandle, serde_json::Value)> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(handle, _)| handle.kind == kind)
            .cloned()
            .collect()
    }

    /// Every accepted object as a JSON document.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let state = self.state.lock();
        let objects: Vec<_> = state
            .objects
            .iter()
            .map(|(handle, intent)| serde_json::json!({ "resource": handle, "intent": intent }))
            .collect();
        serde_json::Value::Array(objects)
    }

    fn accept<T: Serialize>(
        &self,
        handle: ResourceHandle,
        depends_on: &[ResourceHandle],
        intent: &T,
    ) -> DeployResult<ResourceHandle> {
        let value =
            serde_json::to_value(intent).map_err(|e| DeployError::Serialisation(e.to_string()))?;

        let mut state = self.state.lock();

        if state
            .failures
            .contains(&(handle.kind, handle.name.clone()))
        {
            state.record(TraceAction::Failed, &handle, depends_on);
            return Err(DeployError::gateway(format!("apply rejected {handle}")));
        }

        if let Some(missing) = depends_on.iter().find(|dep| !state.ready.contains(*dep)) {
            let message = format!("{handle} depends on {missing}, which is not ready");
            state.record(TraceAction::Failed, &handle, depends_on);
            return Err(DeployError::gateway(message));
        }

        debug!(resource = %handle, "recorded intent");
        state.record(TraceAction::Submitted, &handle, depends_on);
        state.upsert(&handle, value);
        state.ready.insert(handle.clone());
        Ok(handle)
    }

    fn backend_ready(&self, namespace: &Namespace, name: &str) -> Option<ResourceHandle> {
        let state = self.state.lock();
        [ResourceKind::Workload, ResourceKind::StatefulService]
            .into_iter()
            .map(|kind| ResourceHandle::namespaced(kind, namespace, name))
            .find(|handle| state.ready.contains(handle))
    }
}

#[async_trait]
impl ClusterGateway for MemoryGateway {
    async fn create_namespace(&self, intent: &NamespaceIntent) -> DeployResult<Namespace> {
        let handle = ResourceHandle::cluster(ResourceKind::Namespace, &intent.name);
        self.accept(handle, &[], intent)?;
        Ok(Namespace::new(&intent.name))
    }

    async fn create_persistent_volume_claim(
        &self,
        intent: &VolumeClaimIntent,
    ) -> DeployResult<ResourceHandle> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::VolumeClaim, &intent.namespace, &intent.name);
        self.accept(handle, &[], intent)
    }

    async fn create_stateful_service(
        &self,
        intent: &StatefulServiceIntent,
    ) -> DeployResult<ResourceHandle> {
        let handle = ResourceHandle::namespaced(
            ResourceKind::StatefulService,
            &intent.namespace,
            &intent.name,
        );
        let depends_on = match &intent.volume.source {
            super::VolumeSource::Claim { claim } => vec![claim.clone()],
            super::VolumeSource::ClaimTemplate { .. } => Vec::new(),
        };
        self.accept(handle, &depends_on, intent)
    }

    async fn run_one_shot_task(&self, intent: &OneShotTaskIntent) -> DeployResult<ResourceHandle> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::OneShotTask, &intent.namespace, &intent.name);
        let handle = self.accept(handle, &intent.depends_on, intent)?;

        // Hold the ready mark until the task has "run" so dependants observe
        // completion, not submission.
        self.state.lock().ready.remove(&handle);
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        state.record(TraceAction::Completed, &handle, &[]);
        state.ready.insert(handle.clone());
        Ok(handle)
    }

    async fn create_or_update_workload(
        &self,
        intent: &WorkloadIntent,
    ) -> DeployResult<ResourceHandle> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::Workload, &intent.namespace, &intent.name);
        self.accept(handle, &intent.depends_on, intent)
    }

    async fn create_autoscaler(&self, intent: &AutoscalerIntent) -> DeployResult<ResourceHandle> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::Autoscaler, &intent.namespace, &intent.name);
        let target =
            ResourceHandle::namespaced(ResourceKind::Workload, &intent.namespace, &intent.target);
        self.accept(handle, &[target], intent)
    }

    async fn create_public_route(&self, intent: &RouteIntent) -> DeployResult<PublicRoute> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::Route, &intent.namespace, &intent.name);
        let backend = self
            .backend_ready(&intent.namespace, &intent.target)
            .ok_or_else(|| {
                DeployError::gateway(format!(
                    "{handle} targets {}, which is not ready",
                    intent.target
                ))
            })?;
        let handle = self.accept(handle, &[backend], intent)?;
        let url = (!self.state.lock().omit_route_urls).then(|| intent.url());
        Ok(PublicRoute { handle, url })
    }
}

#[async_trait]
impl MonitoringGateway for MemoryGateway {
    async fn register_uptime_monitor(
        &self,
        intent: &UptimeMonitorIntent,
    ) -> DeployResult<ResourceHandle> {
        let handle =
            ResourceHandle::namespaced(ResourceKind::UptimeMonitor, &intent.namespace, &intent.name);
        self.accept(handle, &[], intent)
    }

    async fn register_utilization_monitor(
        &self,
        intent: &UtilizationMonitorIntent,
    ) -> DeployResult<ResourceHandle> {
        let handle = ResourceHandle::namespaced(
            ResourceKind::UtilizationMonitor,
            &intent.namespace,
            &intent.name,
        );
        self.accept(handle, &[], intent)
    }
}

/// Objects grouped by kind, for assertions.
#[must_use]
pub fn count_by_kind(events: &[TraceEvent]) -> HashMap<ResourceKind, usize> {
    let mut counts = HashMap::new();
    for event in events.iter().filter(|e| e.action == TraceAction::Submitted) {
        *counts.entry(event.handle.kind).or_insert(0) += 1;
    }
    counts
}
