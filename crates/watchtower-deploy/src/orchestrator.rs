//! Executes resolved flows.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::builder;
use crate::catalog::Catalog;
use crate::config::DeployConfig;
use crate::ephemeral::EphemeralLifecycleManager;
use crate::error::DeployResult;
use crate::gateway::{Gateways, ImageBuilder};
use crate::monitoring::{self, MonitorPolicy};
use crate::naming;
use crate::plan::PlanSettings;
use crate::provisioner::Provisioner;
use crate::resolver::{self, Flow};
use crate::types::{
    BuildIdentity, ClusterData, EnvironmentContext, EnvironmentKind, ImageRef, Namespace,
    StableKind,
};

/// What a flow produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutput {
    /// Built image references.
    Images(Vec<ImageRef>),
    /// Public URLs.
    Urls(Vec<String>),
    /// Number of monitors refreshed.
    Monitors(usize),
}

impl FlowOutput {
    /// Lines to print for the operator.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match self {
            Self::Images(images) => images.iter().map(ToString::to_string).collect(),
            Self::Urls(urls) => urls.clone(),
            Self::Monitors(_) => Vec::new(),
        }
    }
}

/// Runs one orchestration against configured collaborators.
pub struct Orchestrator {
    config: DeployConfig,
    identity: BuildIdentity,
    catalog: Catalog,
    gateways: Gateways,
    builder: Arc<dyn ImageBuilder>,
    npm_token: String,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("identity", &self.identity)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        identity: BuildIdentity,
        gateways: Gateways,
        builder: Arc<dyn ImageBuilder>,
    ) -> Self {
        Self {
            catalog: Catalog::from_config(&config.service),
            config,
            identity,
            gateways,
            builder,
            npm_token: String::new(),
        }
    }

    /// Set the registry token passed to image builds.
    #[must_use]
    pub fn with_npm_token(mut self, token: impl Into<String>) -> Self {
        self.npm_token = token.into();
        self
    }

    /// Resolve a stack identifier and run its flow.
    ///
    /// An unknown stack fails before any collaborator is called.
    pub async fn run_stack(&self, stack: &str) -> DeployResult<FlowOutput> {
        let flow = resolver::resolve(stack)?;
        self.run(flow).await
    }

    /// Run a resolved flow.
    pub async fn run(&self, flow: Flow) -> DeployResult<FlowOutput> {
        info!(
            flow = %flow,
            revision = %self.identity.revision,
            branch = %self.identity.branch,
            "starting orchestration"
        );

        match flow {
            Flow::Build => self
                .build_images(flow.catalog_kind())
                .await
                .map(FlowOutput::Images),
            Flow::InfraOnly => self.refresh_infra().await.map(FlowOutput::Monitors),
            Flow::StableDeploy(tier) => self.deploy_stable(tier).await.map(FlowOutput::Urls),
            Flow::EphemeralDeploy => self.deploy_ephemeral().await.map(FlowOutput::Urls),
        }
    }

    /// Build the primary image and, outside ephemeral runs, the monitor image.
    async fn build_images(&self, kind: EnvironmentKind) -> DeployResult<Vec<ImageRef>> {
        let build = &self.config.build;
        let registry = &self.config.service.registry;
        let service = &self.config.service.name;

        let mut requests = vec![builder::image_request(
            registry,
            service,
            &build.context,
            &build.dockerfile,
            &self.identity,
            &self.npm_token,
        )];
        if !kind.is_ephemeral() {
            requests.push(builder::image_request(
                registry,
                &naming::monitor_image(service),
                &build.context,
                &build.monitor_dockerfile,
                &self.identity,
                &self.npm_token,
            ));
        }

        let mut images = Vec::with_capacity(requests.len());
        for request in &requests {
            let image = self.builder.build(request).await?;
            info!(image = %image, "image built");
            images.push(image);
        }
        Ok(images)
    }

    async fn refresh_infra(&self) -> DeployResult<usize> {
        let ctx = self.stable_context(StableKind::Production);
        let specs = self
            .catalog
            .resolve(EnvironmentKind::Stable(StableKind::Production), &self.identity)?;

        monitoring::refresh_monitors(
            self.gateways.monitoring.as_ref(),
            &ctx,
            &specs,
            &MonitorPolicy::from_config(&self.config.monitoring),
        )
        .await
    }

    async fn deploy_stable(&self, tier: StableKind) -> DeployResult<Vec<String>> {
        let cluster = self.config.cluster.cluster_for(tier);
        let ctx = self.stable_context(tier);
        let specs = self.catalog.resolve(ctx.kind, &self.identity)?;

        info!(namespace = %ctx.namespace, cluster = %cluster.name, "deploying stable environment");
        self.provisioner(&cluster).provision(&ctx, &specs, &[]).await
    }

    async fn deploy_ephemeral(&self) -> DeployResult<Vec<String>> {
        let cluster = self.config.cluster.cluster_for(StableKind::Staging);

        let lifecycle =
            EphemeralLifecycleManager::new(self.gateways.cluster.clone(), &self.config.service.name);
        let environment = lifecycle
            .provision_ephemeral(&self.identity.branch, &cluster)
            .await?;

        self.build_images(EnvironmentKind::Ephemeral).await?;

        let ctx = EnvironmentContext::new(
            EnvironmentKind::Ephemeral,
            environment.namespace.clone(),
            &self.config.monitoring.critical_notify,
        );
        let specs = self.catalog.resolve(ctx.kind, &self.identity)?;

        let mut urls = self
            .provisioner(&cluster)
            .provision(&ctx, &specs, &environment.hard_prerequisites())
            .await?;
        urls.push(environment.broker_public_url);
        Ok(urls)
    }

    fn stable_context(&self, tier: StableKind) -> EnvironmentContext {
        EnvironmentContext::new(
            EnvironmentKind::Stable(tier),
            Namespace::new(&self.config.service.namespace),
            &self.config.monitoring.critical_notify,
        )
    }

    fn provisioner(&self, cluster: &ClusterData) -> Provisioner {
        Provisioner::new(
            self.gateways.clone(),
            PlanSettings {
                service: self.config.service.name.clone(),
                migration_image: self.catalog.primary_image(&self.identity),
                domain: cluster.domain.clone(),
                monitors: MonitorPolicy::from_config(&self.config.monitoring),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecordingBuilder;
    use crate::gateway::MemoryGateway;

    fn orchestrator() -> (Arc<MemoryGateway>, Arc<RecordingBuilder>, Orchestrator) {
        let gateway = Arc::new(MemoryGateway::new());
        let builder = Arc::new(RecordingBuilder::new());
        let orchestrator = Orchestrator::new(
            DeployConfig::default(),
            BuildIdentity::new("abc1234", "feature/login"),
            Gateways::shared(gateway.clone()),
            builder.clone(),
        );
        (gateway, builder, orchestrator)
    }

    #[tokio::test]
    async fn build_flow_builds_primary_and_monitor() {
        let (gateway, builder, orchestrator) = orchestrator();
        let output = orchestrator.run_stack("build").await.unwrap();

        assert_eq!(
            output.lines(),
            vec![
                "registry.example.com/watchtower:abc1234",
                "registry.example.com/watchtower-monitor:abc1234",
            ]
        );
        assert_eq!(builder.requests()[1].dockerfile.to_str(), Some("../health-monitor/Dockerfile"));
        assert!(gateway.events().is_empty());
    }

    #[tokio::test]
    async fn infra_flow_touches_only_monitors() {
        let (gateway, builder, orchestrator) = orchestrator();
        let output = orchestrator.run_stack("infra").await.unwrap();

        assert_eq!(output, FlowOutput::Monitors(4));
        assert!(output.lines().is_empty());
        assert!(builder.requests().is_empty());
        assert!(gateway.events().iter().all(|e| matches!(
            e.handle.kind,
            crate::gateway::ResourceKind::UptimeMonitor
                | crate::gateway::ResourceKind::UtilizationMonitor
        )));
    }

    #[tokio::test]
    async fn invalid_stack_touches_nothing() {
        let (gateway, builder, orchestrator) = orchestrator();
        assert!(orchestrator.run_stack("nonsense").await.is_err());
        assert!(gateway.events().is_empty());
        assert!(builder.requests().is_empty());
    }

    #[tokio::test]
    async fn ephemeral_flow_appends_broker_url() {
        let (_, builder, orchestrator) = orchestrator();
        let output = orchestrator.run_stack("login-ephemeral").await.unwrap();

        let lines = output.lines();
        assert_eq!(
            lines.last().map(String::as_str),
            Some("https://watchtower-feature-login-rabbitmq.megacluster.stage.example.com")
        );
        assert_eq!(lines[0], "https://watchtower-feature-login-web.megacluster.stage.example.com");
        // only the primary image is built for ephemeral environments
        assert_eq!(builder.requests().len(), 1);
    }
}
