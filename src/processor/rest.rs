//! Reference processor that invokes a REST API.
//!
//! The task's parameter payload describes the call:
//!
//! ```json
//! { "method": "POST", "path": "/api/v1/upgrade", "body": { ... }, "headers": { ... } }
//! ```
//!
//! Tasks bound to an element call that element's management endpoint, looked
//! up through an [`InventoryClient`]; unbound tasks call the configured
//! default endpoint. The HTTP status is mapped onto a task state by
//! [`RestApiTaskProcessor::map_status`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{TaskProcessor, TaskResult};
use crate::error::{JobError, ReasonCode, Result};
use crate::model::{ElementId, JobTaskMessage, Task};

/// Resolves the management endpoint of a network element.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn resolve_management_endpoint(&self, element_id: &ElementId) -> anyhow::Result<String>;
}

/// Inventory backed by a fixed element → base URL table.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    endpoints: HashMap<ElementId, String>,
}

impl StaticInventory {
    pub fn new(endpoints: HashMap<ElementId, String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl InventoryClient for StaticInventory {
    async fn resolve_management_endpoint(&self, element_id: &ElementId) -> anyhow::Result<String> {
        self.endpoints
            .get(element_id)
            .cloned()
            .ok_or_else(|| anyhow!("no management endpoint known for element {element_id}"))
    }
}

/// REST call described by a task's parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl RestRequest {
    pub fn from_task(task: &Task) -> anyhow::Result<Self> {
        serde_json::from_value(task.parameter().clone())
            .with_context(|| format!("task {} has no valid REST request parameters", task.task_id()))
    }
}

pub struct RestApiTaskProcessor {
    client: Client,
    inventory: Option<Arc<dyn InventoryClient>>,
    default_endpoint: Option<String>,
}

impl RestApiTaskProcessor {
    pub fn new(
        inventory: Option<Arc<dyn InventoryClient>>,
        default_endpoint: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| JobError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            inventory,
            default_endpoint,
        })
    }

    async fn endpoint_for(&self, task: &Task) -> anyhow::Result<String> {
        match (&task.element().element_id, &self.inventory) {
            (Some(element_id), Some(inventory)) => {
                inventory.resolve_management_endpoint(element_id).await
            }
            (Some(element_id), None) => Err(anyhow!(
                "task targets element {element_id} but no inventory is configured"
            )),
            (None, _) => self
                .default_endpoint
                .clone()
                .ok_or_else(|| anyhow!("no default REST endpoint configured")),
        }
    }

    /// Deterministic mapping of an HTTP status onto the task outcome.
    pub fn map_status(method: &str, url: &str, status: u16) -> TaskResult {
        match status {
            200 | 201 | 204 => TaskResult::completed(vec![JobTaskMessage::new(
                ReasonCode::JOB1000I_REST_API_CALL_SUCCEEDED,
                format!("Successfully sent {method} request to {url} ({status})."),
            )]),
            202 => TaskResult::active(vec![JobTaskMessage::new(
                ReasonCode::JOB1000I_REST_API_CALL_SUCCEEDED,
                format!("{method} request to {url} accepted ({status}), awaiting completion."),
            )]),
            401 | 403 | 409 => TaskResult::rejected(vec![JobTaskMessage::new(
                ReasonCode::JOB1001E_REST_API_CALL_REJECTED,
                format!("{method} request to {url} got rejected ({status})."),
            )]),
            _ => TaskResult::failed(vec![JobTaskMessage::new(
                ReasonCode::JOB1002E_REST_API_CALL_FAILED,
                format!("{method} request to {url} failed ({status})."),
            )]),
        }
    }

    fn call_failed(task: &Task, error: &anyhow::Error) -> TaskResult {
        warn!(
            reason = %ReasonCode::JOB1002E_REST_API_CALL_FAILED,
            task_id = %task.task_id(),
            task_name = %task.task_name(),
            "cannot execute task: {error:#}"
        );
        TaskResult::failed(vec![JobTaskMessage::new(
            ReasonCode::JOB1002E_REST_API_CALL_FAILED,
            format!("Execution failed due to an unexpected error: {error:#}"),
        )])
    }

    async fn invoke(&self, task: &Task) -> anyhow::Result<TaskResult> {
        let request = RestRequest::from_task(task)?;
        let endpoint = self.endpoint_for(task).await?;
        let url = join_url(&endpoint, &request.path);
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .with_context(|| format!("unsupported HTTP method {}", request.method))?;

        let mut builder = self.client.request(method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("{method} request to {url} could not be sent"))?;
        let status = response.status().as_u16();
        info!(task_id = %task.task_id(), %method, %url, status, "REST call finished");
        Ok(Self::map_status(method.as_str(), &url, status))
    }
}

#[async_trait]
impl TaskProcessor for RestApiTaskProcessor {
    async fn execute(&self, task: &Task) -> anyhow::Result<TaskResult> {
        match self.invoke(task).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(Self::call_failed(task, &e)),
        }
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementBinding, TaskId, TaskName, TaskState, TaskType};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rest_task(parameter: serde_json::Value, element: Option<&str>) -> Task {
        Task::new(
            TaskId::new("push").unwrap(),
            TaskName::new("push config").unwrap(),
            TaskType::new("rest").unwrap(),
        )
        .with_parameter(parameter)
        .with_element(ElementBinding {
            element_id: element.map(|e| ElementId::new(e).unwrap()),
            ..ElementBinding::default()
        })
    }

    fn processor(
        inventory: Option<Arc<dyn InventoryClient>>,
        endpoint: Option<String>,
    ) -> RestApiTaskProcessor {
        RestApiTaskProcessor::new(
            inventory,
            endpoint,
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn status_mapping_is_exact() {
        let expected = [
            (200, TaskState::Completed),
            (201, TaskState::Completed),
            (204, TaskState::Completed),
            (202, TaskState::Active),
            (401, TaskState::Rejected),
            (403, TaskState::Rejected),
            (409, TaskState::Rejected),
            (400, TaskState::Failed),
            (404, TaskState::Failed),
            (500, TaskState::Failed),
            (503, TaskState::Failed),
            (301, TaskState::Failed),
        ];
        for (status, state) in expected {
            let result = RestApiTaskProcessor::map_status("POST", "http://el/x", status);
            assert_eq!(result.state, state, "status {status}");
            assert_eq!(result.messages.len(), 1);
        }
    }

    #[test]
    fn rejection_message_carries_reason_and_summary() {
        let result = RestApiTaskProcessor::map_status("PUT", "http://el/config", 409);
        let message = &result.messages[0];
        assert_eq!(message.reason, "JOB1001E_REST_API_CALL_REJECTED");
        assert!(message.message.contains("PUT"));
        assert!(message.message.contains("http://el/config"));
        assert!(message.message.contains("409"));
    }

    #[test]
    fn url_join_normalizes_slashes() {
        assert_eq!(join_url("http://a/", "/b"), "http://a/b");
        assert_eq!(join_url("http://a", "b"), "http://a/b");
    }

    #[tokio::test]
    async fn completes_task_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upgrade"))
            .and(header("x-request-source", "fleetjobs"))
            .and(body_json(json!({"image": "4.2.0"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let task = rest_task(
            json!({
                "method": "post",
                "path": "/api/upgrade",
                "body": {"image": "4.2.0"},
                "headers": {"x-request-source": "fleetjobs"}
            }),
            None,
        );
        let result = processor(None, Some(server.uri()))
            .execute(&task)
            .await
            .unwrap();
        assert_eq!(result.state, TaskState::Completed);
        assert_eq!(result.messages[0].reason, "JOB1000I_REST_API_CALL_SUCCEEDED");
    }

    #[tokio::test]
    async fn accepted_leaves_task_active() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let task = rest_task(json!({"method": "PUT", "path": "/config"}), None);
        let result = processor(None, Some(server.uri()))
            .execute(&task)
            .await
            .unwrap();
        assert_eq!(result.state, TaskState::Active);
    }

    #[tokio::test]
    async fn conflict_rejects_and_server_error_fails() {
        let server = MockServer::start().await;
        Mock::given(path("/conflict"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let p = processor(None, Some(server.uri()));
        let rejected = p
            .execute(&rest_task(json!({"path": "/conflict"}), None))
            .await
            .unwrap();
        assert_eq!(rejected.state, TaskState::Rejected);

        let failed = p
            .execute(&rest_task(json!({"path": "/broken"}), None))
            .await
            .unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.messages[0].reason, "JOB1002E_REST_API_CALL_FAILED");
    }

    #[tokio::test]
    async fn element_tasks_use_inventory_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upgrade"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let inventory = StaticInventory::new(HashMap::from([(
            ElementId::new("leaf1").unwrap(),
            server.uri(),
        )]));
        let p = processor(Some(Arc::new(inventory)), None);

        let result = p
            .execute(&rest_task(json!({"path": "/upgrade"}), Some("leaf1")))
            .await
            .unwrap();
        assert_eq!(result.state, TaskState::Completed);

        let unknown = p
            .execute(&rest_task(json!({"path": "/upgrade"}), Some("leaf2")))
            .await
            .unwrap();
        assert_eq!(unknown.state, TaskState::Failed);
        assert!(unknown.messages[0].message.contains("leaf2"));
    }

    #[tokio::test]
    async fn transport_error_fails_task() {
        let p = processor(None, Some("http://127.0.0.1:1".to_string()));
        let result = p
            .execute(&rest_task(json!({"path": "/x"}), None))
            .await
            .unwrap();
        assert_eq!(result.state, TaskState::Failed);
        assert_eq!(result.messages[0].reason, "JOB1002E_REST_API_CALL_FAILED");
    }

    #[tokio::test]
    async fn invalid_parameters_fail_task() {
        let p = processor(None, Some("http://127.0.0.1:1".to_string()));
        let result = p
            .execute(&rest_task(json!({"method": "POST"}), None))
            .await
            .unwrap();
        assert_eq!(result.state, TaskState::Failed);

        let no_endpoint = processor(None, None)
            .execute(&rest_task(json!({"path": "/x"}), None))
            .await
            .unwrap();
        assert_eq!(no_endpoint.state, TaskState::Failed);
    }
}
