//! Applies a deployment plan through the gateways.
//!
//! The migration task is awaited to completion before anything else is
//! submitted. Processes are then provisioned concurrently; each process runs
//! its own sub-steps in order.

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, DeployResult, ProcessFailure, ProvisionStep};
use crate::gateway::{Gateways, ResourceHandle};
use crate::plan::{DeploymentPlan, PlanSettings, ProcessPlan};
use crate::types::{EnvironmentContext, ProcessSpec};

/// Result of provisioning a single process.
#[derive(Debug, Default)]
struct ProcessOutcome {
    url: Option<String>,
    failures: Vec<ProcessFailure>,
}

/// Provisions processes onto the cluster.
#[derive(Debug, Clone)]
pub struct Provisioner {
    gateways: Gateways,
    settings: PlanSettings,
}

impl Provisioner {
    /// Create a provisioner.
    #[must_use]
    pub const fn new(gateways: Gateways, settings: PlanSettings) -> Self {
        Self { gateways, settings }
    }

    /// Plan and apply a run, returning the public URLs of exposed processes.
    ///
    /// Nothing is submitted for any process until the migration task, which
    /// itself waits on `hard_prerequisites`, has completed.
    pub async fn provision(
        &self,
        ctx: &EnvironmentContext,
        specs: &[ProcessSpec],
        hard_prerequisites: &[ResourceHandle],
    ) -> DeployResult<Vec<String>> {
        let plan = DeploymentPlan::build(&self.settings, ctx, specs, hard_prerequisites)?;
        debug!(intents = plan.intent_count(), "deployment planned");
        self.apply(&plan).await
    }

    /// Apply a precomputed plan.
    pub async fn apply(&self, plan: &DeploymentPlan) -> DeployResult<Vec<String>> {
        info!(
            task = %plan.migration.name,
            namespace = %plan.migration.namespace,
            "running data migration"
        );

        let migration = self
            .gateways
            .cluster
            .run_one_shot_task(&plan.migration)
            .await
            .map_err(|e| DeployError::MigrationFailed(e.to_string()))?;

        info!(task = %migration, "data migration completed");

        let outcomes = join_all(
            plan.processes
                .iter()
                .map(|process| self.provision_process(process)),
        )
        .await;

        let mut urls = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            urls.extend(outcome.url);
            failures.extend(outcome.failures);
        }

        if !failures.is_empty() {
            if !urls.is_empty() {
                warn!(urls = ?urls, "some routes were created before the run failed");
            }
            return Err(DeployError::Provisioning { failures });
        }

        info!(urls = ?urls, "provisioning completed");
        Ok(urls)
    }

    async fn provision_process(&self, plan: &ProcessPlan) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();
        let process = plan.process.as_str();

        debug!(process, replicas = plan.workload.replicas, "submitting workload");
        match self.gateways.cluster.create_or_update_workload(&plan.workload).await {
            Ok(handle) => {
                debug!(process, workload = %handle, "workload ready");

                if let Some(autoscaler) = &plan.autoscaler {
                    if let Err(e) = self.gateways.cluster.create_autoscaler(autoscaler).await {
                        outcome.fail(process, ProvisionStep::Autoscaler, e);
                    }
                }

                if let Some(route) = &plan.route {
                    match self.gateways.cluster.create_public_route(route).await {
                        Ok(created) => {
                            outcome.url = Some(created.url.unwrap_or_else(|| route.url()));
                        }
                        Err(e) => outcome.fail(process, ProvisionStep::Route, e),
                    }
                }
            }
            Err(e) => outcome.fail(process, ProvisionStep::Workload, e),
        }

        outcome
            .failures
            .extend(plan.monitors().register(self.gateways.monitoring.as_ref()).await);

        outcome
    }
}

impl ProcessOutcome {
    fn fail(&mut self, process: &str, step: ProvisionStep, error: DeployError) {
        error!(process, step = %step, error = %error, "provisioning step failed");
        self.failures.push(ProcessFailure {
            process: process.to_owned(),
            step,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{Catalog, WEB, WEB_FINANCE, WORKER};
    use crate::gateway::{count_by_kind, MemoryGateway, ResourceKind, TraceAction};
    use crate::monitoring::MonitorPolicy;
    use crate::types::{BuildIdentity, EnvironmentKind, ImageRef, Namespace, StableKind};

    const STAGE: EnvironmentKind = EnvironmentKind::Stable(StableKind::Staging);

    fn setup(gateway: MemoryGateway) -> (Arc<MemoryGateway>, Provisioner) {
        let gateway = Arc::new(gateway);
        let provisioner = Provisioner::new(
            Gateways::shared(gateway.clone()),
            PlanSettings {
                service: "watchtower".to_owned(),
                migration_image: ImageRef::parse("registry.example.com/watchtower:abc1234"),
                domain: "megacluster.stage.example.com".to_owned(),
                monitors: MonitorPolicy::default(),
            },
        );
        (gateway, provisioner)
    }

    fn specs(kind: EnvironmentKind) -> Vec<ProcessSpec> {
        Catalog::new("watchtower", "registry.example.com")
            .resolve(kind, &BuildIdentity::new("abc1234", "master"))
            .unwrap()
    }

    fn ctx(kind: EnvironmentKind) -> EnvironmentContext {
        EnvironmentContext::new(kind, Namespace::new("watchtower"), "@critical")
    }

    #[tokio::test]
    async fn provision_returns_public_urls_in_catalog_order() {
        let (_, provisioner) = setup(MemoryGateway::new());
        let urls = provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://watchtower-web.megacluster.stage.example.com",
                "https://watchtower-web-finance.megacluster.stage.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn route_url_derived_when_gateway_reports_none() {
        let (_, provisioner) = setup(MemoryGateway::new().without_route_urls());
        let urls = provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://watchtower-web.megacluster.stage.example.com",
                "https://watchtower-web-finance.megacluster.stage.example.com",
            ]
        );
    }

    #[tokio::test]
    async fn workloads_depend_on_the_migration() {
        let (gateway, provisioner) = setup(MemoryGateway::new());
        provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap();

        let events = gateway.events();
        let migration = events
            .iter()
            .find(|e| e.handle.kind == ResourceKind::OneShotTask)
            .map(|e| e.handle.clone())
            .unwrap();
        let workloads: Vec<_> = events
            .iter()
            .filter(|e| e.handle.kind == ResourceKind::Workload)
            .collect();
        assert!(!workloads.is_empty());
        for event in workloads {
            assert_eq!(event.depends_on, vec![migration.clone()]);
        }
    }

    #[tokio::test]
    async fn migration_failure_creates_no_workloads() {
        let (gateway, provisioner) = setup(
            MemoryGateway::new().with_failure(ResourceKind::OneShotTask, "watchtower-db-migration"),
        );

        let err = provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::MigrationFailed(_)));
        assert!(gateway.objects(ResourceKind::Workload).is_empty());
        assert!(gateway.objects(ResourceKind::UtilizationMonitor).is_empty());
    }

    #[tokio::test]
    async fn migration_completes_before_first_workload() {
        let (gateway, provisioner) = setup(MemoryGateway::new());
        provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap();

        let events = gateway.events();
        let completed = events
            .iter()
            .position(|e| e.action == TraceAction::Completed)
            .unwrap();
        let first_workload = events
            .iter()
            .position(|e| e.handle.kind == ResourceKind::Workload)
            .unwrap();
        assert!(completed < first_workload);
    }

    #[tokio::test]
    async fn failed_workload_does_not_block_siblings() {
        let (gateway, provisioner) =
            setup(MemoryGateway::new().with_failure(ResourceKind::Workload, WEB_FINANCE));

        let err = provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap_err();

        let DeployError::Provisioning { failures } = err else {
            panic!("expected provisioning failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].process, WEB_FINANCE);
        assert_eq!(failures[0].step, ProvisionStep::Workload);

        // every other process still got its workload
        assert_eq!(gateway.objects(ResourceKind::Workload).len(), specs(STAGE).len() - 1);
    }

    #[tokio::test]
    async fn every_failure_is_reported() {
        let (_, provisioner) = setup(
            MemoryGateway::new()
                .with_failure(ResourceKind::Autoscaler, WEB)
                .with_failure(ResourceKind::Route, WEB_FINANCE)
                .with_failure(ResourceKind::UtilizationMonitor, WORKER),
        );

        let err = provisioner
            .provision(&ctx(STAGE), &specs(STAGE), &[])
            .await
            .unwrap_err();

        let DeployError::Provisioning { failures } = err else {
            panic!("expected provisioning failure");
        };
        let steps: Vec<_> = failures.iter().map(|f| (f.process.as_str(), f.step)).collect();
        assert_eq!(
            steps,
            vec![
                (WEB, ProvisionStep::Autoscaler),
                (WEB_FINANCE, ProvisionStep::Route),
                (WORKER, ProvisionStep::UtilizationMonitor),
            ]
        );
    }

    #[tokio::test]
    async fn sub_step_counts_match_catalog() {
        let kind = EnvironmentKind::Stable(StableKind::Production);
        let (gateway, provisioner) = setup(MemoryGateway::new());
        provisioner
            .provision(&ctx(kind), &specs(kind), &[])
            .await
            .unwrap();

        let counts = count_by_kind(&gateway.events());
        assert_eq!(counts[&ResourceKind::OneShotTask], 1);
        assert_eq!(counts[&ResourceKind::Workload], 7);
        assert_eq!(counts[&ResourceKind::Autoscaler], 1);
        assert_eq!(counts[&ResourceKind::Route], 2);
        assert_eq!(counts[&ResourceKind::UptimeMonitor], 2);
        assert_eq!(counts[&ResourceKind::UtilizationMonitor], 2);
    }
}
