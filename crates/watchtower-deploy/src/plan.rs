//! Intended state for one provisioning run.
//!
//! Planning is pure: it turns process specs into every intent the
//! provisioner will submit, with dependency edges already attached. Nothing
//! here talks to a gateway.

use serde::Serialize;

use crate::error::{DeployError, DeployResult};
use crate::gateway::{
    AutoscalerIntent, OneShotTaskIntent, ResourceHandle, RollingUpdate, RouteIntent,
    UptimeMonitorIntent, UtilizationMonitorIntent, WorkloadIntent,
};
use crate::monitoring::{MonitorPolicy, ProcessMonitors};
use crate::naming;
use crate::secrets;
use crate::types::{EnvironmentContext, ImageRef, ProcessSpec, ResourceLimits};

/// Command run by the migration task.
pub const MIGRATION_COMMAND: [&str; 3] = ["python", "manage.py", "migrate"];

/// Inputs shared by every plan in a run.
#[derive(Debug, Clone)]
pub struct PlanSettings {
    /// Service name.
    pub service: String,
    /// Image the migration task runs.
    pub migration_image: ImageRef,
    /// Root domain for public routes.
    pub domain: String,
    /// Monitor thresholds and channels.
    pub monitors: MonitorPolicy,
}

/// Everything one process needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessPlan {
    /// Process name.
    pub process: String,
    /// The workload.
    pub workload: WorkloadIntent,
    /// Autoscaler bound to the workload.
    pub autoscaler: Option<AutoscalerIntent>,
    /// Public route to the workload.
    pub route: Option<RouteIntent>,
    /// Uptime monitor.
    pub uptime: Option<UptimeMonitorIntent>,
    /// Utilisation monitor.
    pub utilization: Option<UtilizationMonitorIntent>,
}

impl ProcessPlan {
    /// Monitor intents for this process.
    #[must_use]
    pub fn monitors(&self) -> ProcessMonitors {
        ProcessMonitors {
            process: self.process.clone(),
            uptime: self.uptime.clone(),
            utilization: self.utilization.clone(),
        }
    }
}

/// The full intended state of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    /// One-shot migration; every workload depends on it.
    pub migration: OneShotTaskIntent,
    /// Per-process intents, in catalog order.
    pub processes: Vec<ProcessPlan>,
}

impl DeploymentPlan {
    /// Plan a run.
    ///
    /// `hard_prerequisites` gate the migration, and through it every workload.
    pub fn build(
        settings: &PlanSettings,
        ctx: &EnvironmentContext,
        specs: &[ProcessSpec],
        hard_prerequisites: &[ResourceHandle],
    ) -> DeployResult<Self> {
        let env = secrets::process_env(&settings.service, ctx.environment());

        let migration = OneShotTaskIntent {
            name: naming::migration_task(&settings.service),
            namespace: ctx.namespace.clone(),
            image: settings.migration_image.clone(),
            command: MIGRATION_COMMAND.iter().map(|s| (*s).to_owned()).collect(),
            env: env.clone(),
            resources: ResourceLimits::uniform("512m", "512Mi"),
            depends_on: hard_prerequisites.to_vec(),
        };
        let migration_handle = migration.handle();

        let processes = specs
            .iter()
            .map(|spec| plan_process(settings, ctx, spec, &env, &migration_handle))
            .collect::<DeployResult<Vec<_>>>()?;

        Ok(Self {
            migration,
            processes,
        })
    }

    /// Number of intents in the plan.
    #[must_use]
    pub fn intent_count(&self) -> usize {
        1 + self
            .processes
            .iter()
            .map(|p| {
                1 + usize::from(p.autoscaler.is_some())
                    + usize::from(p.route.is_some())
                    + usize::from(p.uptime.is_some())
                    + usize::from(p.utilization.is_some())
            })
            .sum::<usize>()
    }
}

fn plan_process(
    settings: &PlanSettings,
    ctx: &EnvironmentContext,
    spec: &ProcessSpec,
    env: &[secrets::EnvVar],
    migration: &ResourceHandle,
) -> DeployResult<ProcessPlan> {
    let name = spec.name();
    let image = spec
        .image()
        .cloned()
        .ok_or_else(|| DeployError::invalid_spec(name, "image is not resolved"))?;

    let workload = WorkloadIntent {
        name: name.to_owned(),
        namespace: ctx.namespace.clone(),
        replicas: spec.replica_count(),
        image,
        command: spec.command().to_vec(),
        liveness: spec.liveness_check().clone(),
        readiness: spec.readiness_check().clone(),
        ports: spec.port_policy(),
        resources: spec.resource_limits().cloned(),
        env: env.to_vec(),
        log_tags: vec![name.to_owned()],
        rolling_update: RollingUpdate::FULL_CAPACITY,
        depends_on: vec![migration.clone()],
    };

    let autoscaler = spec.autoscaling().map(|autoscaling| AutoscalerIntent {
        name: name.to_owned(),
        namespace: ctx.namespace.clone(),
        target: name.to_owned(),
        min_replicas: spec.replica_count(),
        max_replicas: autoscaling.max_replicas,
        target_cpu_utilization_percent: autoscaling.target_cpu_utilization_percent,
    });

    let route = spec.expose_publicly().then(|| RouteIntent {
        name: name.to_owned(),
        namespace: ctx.namespace.clone(),
        target: name.to_owned(),
        port: None,
        subdomain: naming::route_subdomain(&ctx.namespace, name),
        root_domain: settings.domain.clone(),
    });

    let monitors = ProcessMonitors::for_spec(ctx, spec, &settings.monitors);

    Ok(ProcessPlan {
        process: name.to_owned(),
        workload,
        autoscaler,
        route,
        uptime: monitors.uptime,
        utilization: monitors.utilization,
    })
}
