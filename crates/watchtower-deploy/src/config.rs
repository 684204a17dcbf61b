//! Configuration for watchtower-deploy.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{DeployError, DeployResult};
use crate::types::{BuildIdentity, ClusterData, StableKind};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "WATCHTOWER_DEPLOY_";

/// Top-level configuration for an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeployConfig {
    /// Service identity and registry.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Target cluster.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Image build inputs.
    #[serde(default)]
    pub build: BuildConfig,

    /// Monitoring channels.
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Source revision overrides.
    #[serde(default)]
    pub release: ReleaseConfig,
}

impl DeployConfig {
    /// Load configuration from a TOML file.
    ///
    /// Sources are merged in order, later ones overriding earlier:
    /// 1. Default values
    /// 2. The TOML file at `path` (skipped if absent)
    /// 3. Environment variables with the `WATCHTOWER_DEPLOY_` prefix
    pub fn from_file(path: impl AsRef<Path>) -> DeployResult<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))
    }
}

/// Service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name; prefixes images, namespaces and secret stores.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Namespace used by stable environments.
    #[serde(default = "default_service_name")]
    pub namespace: String,

    /// Container registry endpoint.
    #[serde(default = "default_registry")]
    pub registry: String,
}

fn default_service_name() -> String {
    "watchtower".to_owned()
}

fn default_registry() -> String {
    "registry.example.com".to_owned()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            namespace: default_service_name(),
            registry: default_registry(),
        }
    }
}

/// Which gateway implementation applies intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayType {
    /// Declarative-apply engine over HTTP.
    #[default]
    Http,

    /// In-memory recorder; nothing leaves the process.
    Memory,
}

/// Cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name.
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Root domain of the staging cluster.
    #[serde(default = "default_staging_domain")]
    pub staging_domain: String,

    /// Root domain of the production cluster.
    #[serde(default = "default_production_domain")]
    pub production_domain: String,

    /// Gateway implementation.
    #[serde(default)]
    pub gateway: GatewayType,

    /// Base URL of the declarative-apply engine.
    #[serde(default = "default_apply_url")]
    pub apply_url: String,

    /// Per-request timeout in seconds. Applies block until objects are ready,
    /// so this bounds the slowest single rollout.
    #[serde(default = "default_cluster_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cluster_name() -> String {
    "megacluster".to_owned()
}

fn default_staging_domain() -> String {
    "megacluster.stage.example.com".to_owned()
}

fn default_production_domain() -> String {
    "megacluster.prod.example.com".to_owned()
}

fn default_apply_url() -> String {
    "http://localhost:8090".to_owned()
}

const fn default_cluster_timeout_secs() -> u64 {
    900
}

impl ClusterConfig {
    /// Resolve cluster data for a stable tier.
    #[must_use]
    pub fn cluster_for(&self, tier: StableKind) -> ClusterData {
        let domain = match tier {
            StableKind::Staging => &self.staging_domain,
            StableKind::Production => &self.production_domain,
        };
        ClusterData {
            name: self.name.clone(),
            tier,
            domain: domain.clone(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            staging_domain: default_staging_domain(),
            production_domain: default_production_domain(),
            gateway: GatewayType::default(),
            apply_url: default_apply_url(),
            timeout_secs: default_cluster_timeout_secs(),
        }
    }
}

/// Image build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build context directory.
    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// Dockerfile for the application image.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    /// Dockerfile for the health-monitor image.
    #[serde(default = "default_monitor_dockerfile")]
    pub monitor_dockerfile: PathBuf,

    /// Push built tags to the registry.
    #[serde(default = "default_push")]
    pub push: bool,
}

fn default_context() -> PathBuf {
    PathBuf::from("..")
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("../Dockerfile")
}

fn default_monitor_dockerfile() -> PathBuf {
    PathBuf::from("../health-monitor/Dockerfile")
}

const fn default_push() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: default_dockerfile(),
            monitor_dockerfile: default_monitor_dockerfile(),
            push: default_push(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Channel for uptime alerts.
    #[serde(default = "default_critical_notify")]
    pub critical_notify: String,

    /// Channel for utilisation warnings.
    #[serde(default = "default_warning_notify")]
    pub warning_notify: String,

    /// Ready-replica percentage below which uptime monitors alert.
    #[serde(default = "default_readiness_threshold_percent")]
    pub readiness_threshold_percent: u32,
}

fn default_critical_notify() -> String {
    "@webhook-discord-monitoring-critical".to_owned()
}

fn default_warning_notify() -> String {
    "@webhook-discord-monitoring-warning".to_owned()
}

const fn default_readiness_threshold_percent() -> u32 {
    50
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            critical_notify: default_critical_notify(),
            warning_notify: default_warning_notify(),
            readiness_threshold_percent: default_readiness_threshold_percent(),
        }
    }
}

/// Source revision overrides; detected from git when unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReleaseConfig {
    /// Short commit hash.
    pub revision: Option<String>,

    /// Branch name.
    pub branch: Option<String>,
}

impl ReleaseConfig {
    /// Freeze the build identity for this run.
    pub async fn identity(&self) -> DeployResult<BuildIdentity> {
        let revision = match &self.revision {
            Some(revision) => revision.clone(),
            None => git(&["rev-parse", "--short", "HEAD"]).await?,
        };
        let branch = match &self.branch {
            Some(branch) => branch.clone(),
            None => git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?,
        };

        debug!(revision = %revision, branch = %branch, "resolved build identity");
        Ok(BuildIdentity::new(revision, branch))
    }
}

async fn git(args: &[&str]) -> DeployResult<String> {
    let output = Command::new("git").args(args).output().await?;

    if !output.status.success() {
        return Err(DeployError::Config(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DeployConfig::default();
        assert_eq!(config.service.name, "watchtower");
        assert_eq!(config.service.namespace, "watchtower");
        assert_eq!(config.cluster.name, "megacluster");
        assert_eq!(config.cluster.gateway, GatewayType::Http);
        assert_eq!(config.monitoring.readiness_threshold_percent, 50);
        assert!(config.build.push);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [service]
            registry = "123.dkr.ecr.us-east-1.amazonaws.com"

            [cluster]
            gateway = "memory"
            staging_domain = "stage.internal"

            [release]
            revision = "deadbee"
            branch = "feature/login"
        "#;

        let config: DeployConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.service.name, "watchtower");
        assert_eq!(config.service.registry, "123.dkr.ecr.us-east-1.amazonaws.com");
        assert_eq!(config.cluster.gateway, GatewayType::Memory);
        assert_eq!(config.release.revision.as_deref(), Some("deadbee"));
        assert_eq!(
            config.cluster.cluster_for(StableKind::Staging).domain,
            "stage.internal"
        );
    }

    #[test]
    fn cluster_for_tier() {
        let cluster = ClusterConfig::default();
        let prod = cluster.cluster_for(StableKind::Production);
        assert_eq!(prod.tier, StableKind::Production);
        assert_eq!(prod.domain, "megacluster.prod.example.com");
    }

    #[tokio::test]
    async fn configured_identity_skips_git() {
        let release = ReleaseConfig {
            revision: Some("abc1234".to_owned()),
            branch: Some("master".to_owned()),
        };
        let identity = release.identity().await.unwrap();
        assert_eq!(identity, BuildIdentity::new("abc1234", "master"));
    }
}
