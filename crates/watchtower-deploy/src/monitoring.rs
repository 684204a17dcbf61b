//! Monitor intents.
//!
//! Two independent paths attach monitors to a process: an uptime monitor when
//! the process enables monitoring, and a utilisation monitor for `web` and
//! `worker` whatever that flag says.

use futures::future::join_all;
use tracing::{error, info};

use crate::catalog::{WEB, WORKER};
use crate::config::MonitoringConfig;
use crate::error::{DeployError, DeployResult, ProcessFailure, ProvisionStep};
use crate::gateway::{MonitoringGateway, UptimeMonitorIntent, UtilizationMonitorIntent};
use crate::naming;
use crate::types::{EnvironmentContext, ProcessSpec};

/// Processes that always get a utilisation monitor.
pub const UTILIZATION_MONITORED: [&str; 2] = [WEB, WORKER];

/// Thresholds and channels that are not part of the environment context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPolicy {
    /// Ready-replica percentage below which uptime monitors alert.
    pub readiness_threshold_percent: u32,
    /// Channel for utilisation warnings.
    pub warning_notify: String,
}

impl MonitorPolicy {
    /// Build the policy from configuration.
    #[must_use]
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self {
            readiness_threshold_percent: config.readiness_threshold_percent,
            warning_notify: config.warning_notify.clone(),
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::from_config(&MonitoringConfig::default())
    }
}

/// Uptime monitor for a process, if the process enables monitoring.
#[must_use]
pub fn uptime_monitor(
    ctx: &EnvironmentContext,
    spec: &ProcessSpec,
    policy: &MonitorPolicy,
) -> Option<UptimeMonitorIntent> {
    spec.enable_monitoring().then(|| UptimeMonitorIntent {
        name: spec.name().to_owned(),
        environment: ctx.environment().to_owned(),
        namespace: ctx.namespace.clone(),
        service_name: naming::monitored_service(&ctx.namespace, spec.name()),
        readiness_threshold_percent: policy.readiness_threshold_percent,
        notify: ctx.notify_target.clone(),
    })
}

/// Utilisation monitor for a process, if it is one of [`UTILIZATION_MONITORED`].
#[must_use]
pub fn utilization_monitor(
    ctx: &EnvironmentContext,
    spec: &ProcessSpec,
    policy: &MonitorPolicy,
) -> Option<UtilizationMonitorIntent> {
    UTILIZATION_MONITORED
        .contains(&spec.name())
        .then(|| UtilizationMonitorIntent {
            name: spec.name().to_owned(),
            environment: ctx.environment().to_owned(),
            namespace: ctx.namespace.clone(),
            pod_name: spec.name().to_owned(),
            notify: policy.warning_notify.clone(),
        })
}

/// Monitors for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMonitors {
    /// Process name.
    pub process: String,
    /// Uptime monitor, if any.
    pub uptime: Option<UptimeMonitorIntent>,
    /// Utilisation monitor, if any.
    pub utilization: Option<UtilizationMonitorIntent>,
}

impl ProcessMonitors {
    /// Compute both monitors for a spec.
    #[must_use]
    pub fn for_spec(ctx: &EnvironmentContext, spec: &ProcessSpec, policy: &MonitorPolicy) -> Self {
        Self {
            process: spec.name().to_owned(),
            uptime: uptime_monitor(ctx, spec, policy),
            utilization: utilization_monitor(ctx, spec, policy),
        }
    }

    /// Register whichever monitors are present, reporting every failure.
    pub async fn register(&self, gateway: &dyn MonitoringGateway) -> Vec<ProcessFailure> {
        let mut failures = Vec::new();

        if let Some(intent) = &self.uptime {
            if let Err(e) = gateway.register_uptime_monitor(intent).await {
                error!(process = %self.process, error = %e, "uptime monitor failed");
                failures.push(ProcessFailure {
                    process: self.process.clone(),
                    step: ProvisionStep::UptimeMonitor,
                    error: e,
                });
            }
        }

        if let Some(intent) = &self.utilization {
            if let Err(e) = gateway.register_utilization_monitor(intent).await {
                error!(process = %self.process, error = %e, "utilisation monitor failed");
                failures.push(ProcessFailure {
                    process: self.process.clone(),
                    step: ProvisionStep::UtilizationMonitor,
                    error: e,
                });
            }
        }

        failures
    }
}

/// Attach or refresh monitors for every process without touching workloads.
///
/// Returns the number of monitors registered.
pub async fn refresh_monitors(
    gateway: &dyn MonitoringGateway,
    ctx: &EnvironmentContext,
    specs: &[ProcessSpec],
    policy: &MonitorPolicy,
) -> DeployResult<usize> {
    let monitors: Vec<_> = specs
        .iter()
        .map(|spec| ProcessMonitors::for_spec(ctx, spec, policy))
        .collect();

    let expected = monitors
        .iter()
        .map(|m| usize::from(m.uptime.is_some()) + usize::from(m.utilization.is_some()))
        .sum::<usize>();

    let failures: Vec<_> = join_all(monitors.iter().map(|m| m.register(gateway)))
        .await
        .into_iter()
        .flatten()
        .collect();

    if !failures.is_empty() {
        return Err(DeployError::Provisioning { failures });
    }

    info!(namespace = %ctx.namespace, count = expected, "monitors refreshed");
    Ok(expected)
}
