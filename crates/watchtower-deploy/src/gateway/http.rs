//! HTTP client for a declarative-apply engine.
//!
//! Each intent is POSTed as JSON to `{apply_url}/v1/apply/{kind}`. The engine
//! answers once the object is ready (or, for one-shot tasks, complete).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClusterConfig;
use crate::error::{DeployError, DeployResult};
use crate::types::Namespace;

use super::{
    AutoscalerIntent, ClusterGateway, MonitoringGateway, NamespaceIntent, OneShotTaskIntent,
    PublicRoute, ResourceHandle, ResourceKind, RouteIntent, StatefulServiceIntent,
    UptimeMonitorIntent, UtilizationMonitorIntent, VolumeClaimIntent, WorkloadIntent,
};

/// Response body returned for every accepted intent.
#[derive(Debug, Deserialize)]
struct ApplyResponse {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Error body returned for rejected intents.
#[derive(Debug, Deserialize)]
struct ApplyErrorBody {
    error: String,
}

/// Gateway backed by a declarative-apply engine's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpApplyGateway {
    client: Client,
    base_url: String,
}

impl HttpApplyGateway {
    /// Create a gateway from configuration.
    pub fn new(config: &ClusterConfig) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            base_url: config.apply_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a gateway with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn endpoint(&self, kind: ResourceKind) -> String {
        format!("{}/v1/apply/{}", self.base_url, kind.as_str())
    }

    async fn apply<T: Serialize + Sync>(
        &self,
        kind: ResourceKind,
        intent: &T,
    ) -> DeployResult<ApplyResponse> {
        let url = self.endpoint(kind);
        debug!(url = %url, kind = %kind, "submitting intent");

        let response = self
            .client
            .post(&url)
            .json(intent)
            .send()
            .await
            .map_err(DeployError::Http)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                response.json().await.map_err(DeployError::Http)
            }
            status => {
                let reason = response
                    .json::<ApplyErrorBody>()
                    .await
                    .map(|body| body.error)
                    .unwrap_or_else(|_| status.to_string());
                Err(DeployError::gateway(format!(
                    "apply {kind} rejected ({status}): {reason}"
                )))
            }
        }
    }

    async fn apply_namespaced<T: Serialize + Sync>(
        &self,
        kind: ResourceKind,
        namespace: &Namespace,
        intent: &T,
    ) -> DeployResult<ResourceHandle> {
        let response = self.apply(kind, intent).await?;
        Ok(handle_from(kind, namespace, response))
    }
}

fn handle_from(kind: ResourceKind, namespace: &Namespace, response: ApplyResponse) -> ResourceHandle {
    let namespace = response
        .namespace
        .map_or_else(|| namespace.clone(), Namespace::new);
    ResourceHandle::namespaced(kind, &namespace, response.name)
}

#[async_trait]
impl ClusterGateway for HttpApplyGateway {
    async fn create_namespace(&self, intent: &NamespaceIntent) -> DeployResult<Namespace> {
        let response = self.apply(ResourceKind::Namespace, intent).await?;
        Ok(Namespace::new(response.name))
    }

    async fn create_persistent_volume_claim(
        &self,
        intent: &VolumeClaimIntent,
    ) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::VolumeClaim, &intent.namespace, intent)
            .await
    }

    async fn create_stateful_service(
        &self,
        intent: &StatefulServiceIntent,
    ) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::StatefulService, &intent.namespace, intent)
            .await
    }

    async fn run_one_shot_task(&self, intent: &OneShotTaskIntent) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::OneShotTask, &intent.namespace, intent)
            .await
    }

    async fn create_or_update_workload(
        &self,
        intent: &WorkloadIntent,
    ) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::Workload, &intent.namespace, intent)
            .await
    }

    async fn create_autoscaler(&self, intent: &AutoscalerIntent) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::Autoscaler, &intent.namespace, intent)
            .await
    }

    async fn create_public_route(&self, intent: &RouteIntent) -> DeployResult<PublicRoute> {
        let response = self.apply(ResourceKind::Route, intent).await?;
        let url = response.url.clone();
        Ok(PublicRoute {
            handle: handle_from(ResourceKind::Route, &intent.namespace, response),
            url,
        })
    }
}

#[async_trait]
impl MonitoringGateway for HttpApplyGateway {
    async fn register_uptime_monitor(
        &self,
        intent: &UptimeMonitorIntent,
    ) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::UptimeMonitor, &intent.namespace, intent)
            .await
    }

    async fn register_utilization_monitor(
        &self,
        intent: &UtilizationMonitorIntent,
    ) -> DeployResult<ResourceHandle> {
        self.apply_namespaced(ResourceKind::UtilizationMonitor, &intent.namespace, intent)
            .await
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::StatusCode as StubStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    /// Minimal apply engine: accepts namespaces and routes, rejects workloads.
    async fn stub_apply(Path(kind): Path<String>, Json(body): Json<Value>) -> Response {
        let name = body["name"].as_str().unwrap_or_default().to_owned();
        match (kind.as_str(), name.as_str()) {
            ("namespace", _) => {
                (StubStatus::CREATED, Json(json!({ "name": format!("{name}-7f3a") })))
                    .into_response()
            }
            ("route", "rabbitmq") => Json(json!({
                "name": name,
                "namespace": "watchtower-x1",
                "url": "https://queues.example.com",
            }))
            .into_response(),
            ("route", _) => Json(json!({ "name": name })).into_response(),
            ("workload", _) => (
                StubStatus::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "image pull failed" })),
            )
                .into_response(),
            _ => (StubStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
        }
    }

    async fn stub_engine() -> HttpApplyGateway {
        let app = Router::new().route("/v1/apply/{kind}", post(stub_apply));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        HttpApplyGateway::with_url(format!("http://{addr}")).unwrap()
    }

    fn route(name: &str) -> RouteIntent {
        RouteIntent {
            name: name.to_owned(),
            namespace: Namespace::new("watchtower"),
            target: name.to_owned(),
            port: None,
            subdomain: format!("watchtower-{name}"),
            root_domain: "megacluster.stage.example.com".to_owned(),
        }
    }

    #[tokio::test]
    async fn namespace_takes_the_engine_name() {
        let gateway = stub_engine().await;
        let namespace = gateway
            .create_namespace(&NamespaceIntent {
                name: "watchtower-feature-x".to_owned(),
                ephemeral: true,
            })
            .await
            .unwrap();
        assert_eq!(namespace.as_str(), "watchtower-feature-x-7f3a");
    }

    #[tokio::test]
    async fn route_without_url_keeps_intent_namespace() {
        let gateway = stub_engine().await;
        let created = gateway.create_public_route(&route("web")).await.unwrap();

        assert_eq!(created.url, None);
        assert_eq!(created.handle.name, "web");
        assert_eq!(created.handle.namespace, Some(Namespace::new("watchtower")));
    }

    #[tokio::test]
    async fn route_reads_url_and_namespace_from_engine() {
        let gateway = stub_engine().await;
        let created = gateway.create_public_route(&route("rabbitmq")).await.unwrap();

        assert_eq!(created.url.as_deref(), Some("https://queues.example.com"));
        assert_eq!(created.handle.namespace, Some(Namespace::new("watchtower-x1")));
    }

    #[tokio::test]
    async fn rejection_carries_engine_reason() {
        let gateway = stub_engine().await;
        let err = gateway
            .apply(ResourceKind::Workload, &json!({ "name": "web" }))
            .await
            .unwrap_err();

        let DeployError::Gateway(message) = err else {
            panic!("expected gateway error, got {err}");
        };
        assert!(message.contains("422"), "{message}");
        assert!(message.contains("image pull failed"), "{message}");
    }

    #[tokio::test]
    async fn rejection_without_error_body_falls_back_to_status() {
        let gateway = stub_engine().await;
        let err = gateway
            .apply(ResourceKind::Autoscaler, &json!({ "name": "web" }))
            .await
            .unwrap_err();

        let DeployError::Gateway(message) = err else {
            panic!("expected gateway error, got {err}");
        };
        assert!(message.contains("500 Internal Server Error"), "{message}");
    }

    #[test]
    fn gateway_creation() {
        let config = ClusterConfig::default();
        assert!(HttpApplyGateway::new(&config).is_ok());
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let gateway = HttpApplyGateway::with_url("http://apply.local:8080/").unwrap();
        assert_eq!(
            gateway.endpoint(ResourceKind::OneShotTask),
            "http://apply.local:8080/v1/apply/one_shot_task"
        );
    }

    #[test]
    fn handle_prefers_engine_namespace() {
        let fallback = Namespace::new("watchtower");
        let response = ApplyResponse {
            name: "web".to_owned(),
            namespace: Some("watchtower-x1".to_owned()),
            url: None,
        };
        let handle = handle_from(ResourceKind::Workload, &fallback, response);
        assert_eq!(handle.namespace, Some(Namespace::new("watchtower-x1")));
    }
}
