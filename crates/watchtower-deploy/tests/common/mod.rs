//! Common test utilities for orchestration integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use watchtower_deploy::builder::RecordingBuilder;
use watchtower_deploy::gateway::{MemoryGateway, ResourceKind, TraceAction, TraceEvent};
use watchtower_deploy::{BuildIdentity, DeployConfig, Gateways, Orchestrator};

/// Orchestrator wired to recording collaborators.
pub struct TestDeploy {
    pub gateway: Arc<MemoryGateway>,
    pub builder: Arc<RecordingBuilder>,
    pub orchestrator: Orchestrator,
}

impl TestDeploy {
    /// Creates a test orchestrator on branch `feature/login`.
    pub fn new() -> Self {
        Self::with_gateway(MemoryGateway::new())
    }

    /// Creates a test orchestrator around a preconfigured gateway.
    pub fn with_gateway(gateway: MemoryGateway) -> Self {
        let gateway = Arc::new(gateway);
        let builder = Arc::new(RecordingBuilder::new());
        let orchestrator = Orchestrator::new(
            DeployConfig::default(),
            BuildIdentity::new("abc1234", "feature/login"),
            Gateways::shared(gateway.clone()),
            builder.clone(),
        );

        Self {
            gateway,
            builder,
            orchestrator,
        }
    }

    /// The captured trace.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.gateway.events()
    }
}

impl Default for TestDeploy {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence of the first event matching `kind` and `action`.
pub fn first(events: &[TraceEvent], kind: ResourceKind, action: TraceAction) -> Option<usize> {
    events
        .iter()
        .find(|e| e.handle.kind == kind && e.action == action)
        .map(|e| e.sequence)
}

/// Sequences of every event for `kind`, whatever the action.
pub fn all(events: &[TraceEvent], kind: ResourceKind) -> Vec<usize> {
    events
        .iter()
        .filter(|e| e.handle.kind == kind)
        .map(|e| e.sequence)
        .collect()
}
