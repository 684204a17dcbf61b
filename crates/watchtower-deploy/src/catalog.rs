//! Process catalog: the processes each environment runs.
//!
//! Resolution is pure. The same kind and [`BuildIdentity`] always yield
//! structurally identical specs, in the same order.

use std::collections::HashSet;

use crate::config::ServiceConfig;
use crate::error::{DeployError, DeployResult};
use crate::naming::{self, SERVICE_PORT};
use crate::types::{
    BuildIdentity, EnvironmentKind, HealthCheck, ImageRef, PortPolicy, Probe, ProcessSpec,
    ResourceLimits, StableKind,
};

/// Public web process.
pub const WEB: &str = "web";
/// Long-timeout web process for finance/BI queries.
pub const WEB_FINANCE: &str = "web-finance";
/// Periodic task scheduler.
pub const SCHEDULER: &str = "scheduler";
/// Background task worker.
pub const WORKER: &str = "worker";
/// BNB chain websocket consumer.
pub const BNB_WEBSOCKET_CONSUMER: &str = "bnb-websocket-consumer";
/// Unchained event ingester.
pub const UNCHAINED_EVENT_INGESTER: &str = "unchained-event-ingester";
/// Health monitor.
pub const WATCHTOWER_MONITOR: &str = "watchtower-monitor";

const WEB_MAX_REPLICAS: u32 = 40;
const WEB_TARGET_CPU_PERCENT: u32 = 15;

/// Resolves environment kinds into ordered process specs.
#[derive(Debug, Clone)]
pub struct Catalog {
    service: String,
    registry: String,
}

impl Catalog {
    /// Create a catalog for a service whose images live in `registry`.
    #[must_use]
    pub fn new(service: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            registry: registry.into(),
        }
    }

    /// Create a catalog from the service configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.name, &config.registry)
    }

    /// Primary application image for a revision.
    #[must_use]
    pub fn primary_image(&self, identity: &BuildIdentity) -> ImageRef {
        ImageRef::new(&self.registry, &self.service, &identity.revision)
    }

    /// Health-monitor image for a revision.
    #[must_use]
    pub fn monitor_image(&self, identity: &BuildIdentity) -> ImageRef {
        ImageRef::new(
            &self.registry,
            &naming::monitor_image(&self.service),
            &identity.revision,
        )
    }

    /// Resolve the ordered process list for an environment kind.
    pub fn resolve(
        &self,
        kind: EnvironmentKind,
        identity: &BuildIdentity,
    ) -> DeployResult<Vec<ProcessSpec>> {
        let image = self.primary_image(identity);
        let env = kind.as_str();

        let mut processes = vec![self.web(kind, &image)?];

        if !kind.is_ephemeral() {
            processes.push(
                ProcessSpec::builder(WEB_FINANCE, 2)
                    .image(image.clone())
                    .command(self.gunicorn(&format!("config/gunicorn.{env}.finance.py")))
                    .expose_publicly(true)
                    .liveness(HealthCheck::Explicit(Probe::tcp(SERVICE_PORT)))
                    .readiness(HealthCheck::Explicit(Probe::tcp(SERVICE_PORT)))
                    .ports(PortPolicy::Default)
                    .resources(ResourceLimits::uniform("1024m", "512Mi"))
                    .build()?,
            );
        }

        processes.push(
            ProcessSpec::builder(SCHEDULER, 1)
                .image(image.clone())
                .command([
                    "celery",
                    "-A",
                    self.service.as_str(),
                    "beat",
                    "-l",
                    "info",
                    "--scheduler",
                    "django_celery_beat.schedulers:DatabaseScheduler",
                ])
                .resources(ResourceLimits::uniform("128m", "256Mi"))
                .build()?,
        );

        processes.push(
            ProcessSpec::builder(WORKER, worker_replicas(kind))
                .image(image.clone())
                .command([
                    "celery",
                    "-A",
                    self.service.as_str(),
                    "worker",
                    "-l",
                    "info",
                    "-O",
                    "fair",
                ])
                .resources(ResourceLimits::uniform("256m", "2048Mi"))
                .build()?,
        );

        processes.push(
            ProcessSpec::builder(BNB_WEBSOCKET_CONSUMER, 1)
                .image(image.clone())
                .command(["python", "manage.py", "bnb_queue_blocks"])
                .resources(ResourceLimits::uniform("64m", "256Mi"))
                .build()?,
        );

        processes.push(
            ProcessSpec::builder(UNCHAINED_EVENT_INGESTER, 1)
                .image(image)
                .command(["python", "manage.py", "ingest_unchained_events"])
                .resources(ResourceLimits::uniform("64m", "256Mi"))
                .build()?,
        );

        if !kind.is_ephemeral() {
            processes.push(
                ProcessSpec::builder(WATCHTOWER_MONITOR, 1)
                    .image(self.monitor_image(identity))
                    .command(["monitor"])
                    .enable_monitoring(true)
                    .resources(ResourceLimits::uniform("64m", "128Mi"))
                    .build()?,
            );
        }

        ensure_unique(&processes)?;
        Ok(processes)
    }

    fn web(&self, kind: EnvironmentKind, image: &ImageRef) -> DeployResult<ProcessSpec> {
        let replicas = if kind.is_production() { 18 } else { 3 };
        let readiness = if kind.is_ephemeral() {
            HealthCheck::Absent
        } else {
            HealthCheck::Explicit(web_readiness_probe(kind))
        };

        ProcessSpec::builder(WEB, replicas)
            .image(image.clone())
            .command(self.gunicorn(&format!("config/gunicorn.{}.py", kind.as_str())))
            .expose_publicly(true)
            .enable_monitoring(kind.is_production())
            .liveness(HealthCheck::Explicit(Probe::tcp(SERVICE_PORT)))
            .readiness(readiness)
            .ports(PortPolicy::Default)
            .resources(ResourceLimits::uniform("2048m", "2Gi"))
            .autoscaling(WEB_MAX_REPLICAS, WEB_TARGET_CPU_PERCENT)
            .build()
    }

    fn gunicorn(&self, config_file: &str) -> Vec<String> {
        vec![
            "gunicorn".to_owned(),
            "-c".to_owned(),
            config_file.to_owned(),
            format!("{}.wsgi:application", self.service),
        ]
    }
}

/// Readiness probe for the web process.
///
/// Production waits for five consecutive successes so a rollout does not
/// flap the readiness gate.
#[must_use]
pub fn web_readiness_probe(kind: EnvironmentKind) -> Probe {
    Probe::exec(["./isWebReady.sh"])
        .with_initial_delay(30)
        .with_period(10)
        .with_failure_threshold(2)
        .with_success_threshold(if kind.is_production() { 5 } else { 1 })
        .with_timeout(3)
}

const fn worker_replicas(kind: EnvironmentKind) -> u32 {
    match kind {
        EnvironmentKind::Stable(StableKind::Production | StableKind::Staging) => 20,
        EnvironmentKind::Ephemeral | EnvironmentKind::Build | EnvironmentKind::Infra => 3,
    }
}

fn ensure_unique(processes: &[ProcessSpec]) -> DeployResult<()> {
    let mut seen = HashSet::with_capacity(processes.len());
    for process in processes {
        if !seen.insert(process.name()) {
            return Err(DeployError::invalid_spec(
                process.name(),
                "duplicate process name in catalog",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::types::ProbeMechanism;

    fn catalog() -> Catalog {
        Catalog::new("watchtower", "registry.example.com")
    }

    fn identity() -> BuildIdentity {
        BuildIdentity::new("abc1234", "master")
    }

    fn resolve(kind: EnvironmentKind) -> Vec<ProcessSpec> {
        catalog().resolve(kind, &identity()).unwrap()
    }

    fn find<'a>(processes: &'a [ProcessSpec], name: &str) -> Option<&'a ProcessSpec> {
        processes.iter().find(|p| p.name() == name)
    }

    fn names(processes: &[ProcessSpec]) -> Vec<&str> {
        processes.iter().map(ProcessSpec::name).collect()
    }

    const PROD: EnvironmentKind = EnvironmentKind::Stable(StableKind::Production);
    const STAGE: EnvironmentKind = EnvironmentKind::Stable(StableKind::Staging);

    #[test]
    fn names_unique_in_every_kind() {
        for kind in EnvironmentKind::ALL {
            let processes = resolve(kind);
            let unique: HashSet<_> = names(&processes).into_iter().collect();
            assert_eq!(unique.len(), processes.len(), "duplicates in {kind}");
        }
    }

    #[test]
    fn production_order() {
        assert_eq!(
            names(&resolve(PROD)),
            vec![
                WEB,
                WEB_FINANCE,
                SCHEDULER,
                WORKER,
                BNB_WEBSOCKET_CONSUMER,
                UNCHAINED_EVENT_INGESTER,
                WATCHTOWER_MONITOR,
            ]
        );
    }

    #[test]
    fn ephemeral_drops_finance_and_monitor() {
        assert_eq!(
            names(&resolve(EnvironmentKind::Ephemeral)),
            vec![
                WEB,
                SCHEDULER,
                WORKER,
                BNB_WEBSOCKET_CONSUMER,
                UNCHAINED_EVENT_INGESTER,
            ]
        );
    }

    #[test]
    fn web_finance_and_monitor_present_iff_not_ephemeral() {
        for kind in EnvironmentKind::ALL {
            let processes = resolve(kind);
            let expected = !kind.is_ephemeral();
            assert_eq!(find(&processes, WEB_FINANCE).is_some(), expected, "{kind}");
            assert_eq!(find(&processes, WATCHTOWER_MONITOR).is_some(), expected, "{kind}");
        }
    }

    #[test]
    fn web_autoscaling_bounds_hold_everywhere() {
        for kind in EnvironmentKind::ALL {
            let processes = resolve(kind);
            let web = find(&processes, WEB).unwrap();
            let autoscaling = web.autoscaling().unwrap();
            assert!(autoscaling.max_replicas >= web.replica_count());
            assert_eq!(autoscaling.max_replicas, 40);
            assert_eq!(autoscaling.target_cpu_utilization_percent, 15);
        }
    }

    #[rstest]
    #[case(PROD, 18, 20)]
    #[case(STAGE, 3, 20)]
    #[case(EnvironmentKind::Ephemeral, 3, 3)]
    #[case(EnvironmentKind::Build, 3, 3)]
    #[case(EnvironmentKind::Infra, 3, 3)]
    fn replica_counts(#[case] kind: EnvironmentKind, #[case] web: u32, #[case] worker: u32) {
        let processes = resolve(kind);
        assert_eq!(find(&processes, WEB).unwrap().replica_count(), web);
        assert_eq!(find(&processes, WORKER).unwrap().replica_count(), worker);
        assert_eq!(find(&processes, SCHEDULER).unwrap().replica_count(), 1);
    }

    #[rstest]
    #[case(PROD, Some(5))]
    #[case(STAGE, Some(1))]
    #[case(EnvironmentKind::Build, Some(1))]
    #[case(EnvironmentKind::Infra, Some(1))]
    #[case(EnvironmentKind::Ephemeral, None)]
    fn web_readiness_success_threshold(#[case] kind: EnvironmentKind, #[case] expected: Option<u32>) {
        let processes = resolve(kind);
        let web = find(&processes, WEB).unwrap();
        let threshold = match web.readiness_check() {
            HealthCheck::Explicit(probe) => Some(probe.success_threshold),
            _ => None,
        };
        assert_eq!(threshold, expected);
    }

    #[test]
    fn web_liveness_is_tcp_everywhere() {
        for kind in EnvironmentKind::ALL {
            let processes = resolve(kind);
            let web = find(&processes, WEB).unwrap();
            match web.liveness_check() {
                HealthCheck::Explicit(probe) => {
                    assert_eq!(probe.mechanism, ProbeMechanism::Tcp { port: 8000 });
                }
                other => panic!("unexpected liveness {other:?}"),
            }
        }
    }

    #[test]
    fn background_processes_have_no_checks() {
        let processes = resolve(PROD);
        for name in [SCHEDULER, WORKER, BNB_WEBSOCKET_CONSUMER, UNCHAINED_EVENT_INGESTER] {
            let spec = find(&processes, name).unwrap();
            assert!(spec.liveness_check().is_absent(), "{name}");
            assert!(spec.readiness_check().is_absent(), "{name}");
            assert!(spec.autoscaling().is_none(), "{name}");
        }
    }

    #[test]
    fn finance_never_autoscaled_and_fully_checked() {
        let processes = resolve(STAGE);
        let finance = find(&processes, WEB_FINANCE).unwrap();
        assert_eq!(finance.replica_count(), 2);
        assert!(finance.autoscaling().is_none());
        assert!(!finance.liveness_check().is_absent());
        assert!(!finance.readiness_check().is_absent());
        assert!(finance.expose_publicly());
    }

    #[test]
    fn monitor_uses_its_own_image() {
        let processes = resolve(PROD);
        let monitor = find(&processes, WATCHTOWER_MONITOR).unwrap();
        assert!(monitor.enable_monitoring());
        assert_eq!(
            monitor.image().unwrap().as_str(),
            "registry.example.com/watchtower-monitor:abc1234"
        );
    }

    #[test]
    fn commands_reference_environment_config() {
        let processes = resolve(STAGE);
        assert_eq!(
            find(&processes, WEB).unwrap().command(),
            ["gunicorn", "-c", "config/gunicorn.stage.py", "watchtower.wsgi:application"]
        );
        assert_eq!(
            find(&processes, WEB_FINANCE).unwrap().command()[2],
            "config/gunicorn.stage.finance.py"
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        for kind in EnvironmentKind::ALL {
            assert_eq!(resolve(kind), resolve(kind));
        }
    }

    #[test]
    fn every_spec_carries_both_resource_profiles() {
        for kind in EnvironmentKind::ALL {
            for spec in resolve(kind) {
                let limits = spec.resource_limits().unwrap();
                assert!(limits.limits().is_some() && limits.requests().is_some());
            }
        }
    }
}
