//! HTTP client for the master's scheduler API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tierd_id::{AgentId, TaskId};
use tierd_mesos::{Call, ContainerStatus, NetworkInfo};
use tracing::{debug, error};

use super::{MasterError, MasterResult, SchedulerApi};
use crate::config::Config;
use crate::task::AgentInfo;

/// Header carrying the subscription's stream ID.
pub const STREAM_ID_HEADER: &str = "Mesos-Stream-Id";

const SCHEDULER_PATH: &str = "/api/v1/scheduler";

/// An open subscription: its stream ID and the streaming response body.
pub struct Subscription {
    pub stream_id: String,
    pub response: reqwest::Response,
}

/// Master API client.
pub struct MasterClient {
    client: reqwest::Client,

    /// Client without a request timeout, for the long-lived event stream.
    stream_client: reqwest::Client,

    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlavesResponse {
    #[serde(default)]
    slaves: Vec<AgentInfo>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<MasterTask>,
}

#[derive(Debug, Deserialize)]
struct MasterTask {
    #[serde(default)]
    statuses: Vec<MasterTaskStatus>,
}

#[derive(Debug, Deserialize)]
struct MasterTaskStatus {
    #[serde(default)]
    container_status: Option<ContainerStatus>,
}

impl MasterClient {
    pub fn new(config: &Config) -> MasterResult<Self> {
        let scheme = if config.master_ssl { "https" } else { "http" };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.skip_ssl_verify)
            .build()?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.skip_ssl_verify)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: format!("{}://{}", scheme, config.master),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    fn scheduler_request(&self, client: &reqwest::Client, call: &Call) -> reqwest::RequestBuilder {
        let request = client
            .post(self.url(SCHEDULER_PATH))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(call);
        self.authorize(request)
    }

    /// Open the event stream.
    pub async fn subscribe(&self, call: &Call) -> MasterResult<Subscription> {
        debug!(url = %self.url(SCHEDULER_PATH), "Subscribing to master");

        let response = self
            .scheduler_request(&self.stream_client, call)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Subscribe rejected");
            return Err(MasterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream_id = response
            .headers()
            .get(STREAM_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(MasterError::MissingStreamId)?;

        Ok(Subscription {
            stream_id,
            response,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> MasterResult<T> {
        let response = self
            .authorize(self.client.get(self.url(path)).query(query))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MasterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SchedulerApi for MasterClient {
    async fn call(&self, call: &Call, stream_id: Option<&str>) -> MasterResult<()> {
        let mut request = self.scheduler_request(&self.client, call);
        if let Some(stream_id) = stream_id {
            request = request.header(STREAM_ID_HEADER, stream_id);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(call = ?call.kind, status = %status, body = %body, "Call failed");
            return Err(MasterError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(call = ?call.kind, status = %response.status(), "Call accepted");
        Ok(())
    }

    async fn agent_info(&self, agent_id: &AgentId) -> MasterResult<Option<AgentInfo>> {
        let response: SlavesResponse = self
            .get_json("/master/slaves", &[("slave_id", agent_id.as_str())])
            .await?;
        Ok(response
            .slaves
            .into_iter()
            .find(|agent| agent.id == agent_id.as_str()))
    }

    async fn task_network_infos(&self, task_id: &TaskId) -> MasterResult<Vec<NetworkInfo>> {
        let response: TasksResponse = self
            .get_json("/master/tasks", &[("task_id", task_id.as_str())])
            .await?;
        Ok(response
            .tasks
            .into_iter()
            .flat_map(|task| task.statuses)
            .filter_map(|status| status.container_status)
            .map(|status| status.network_infos)
            .filter(|infos| !infos.is_empty())
            .last()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::test_config;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MasterClient {
        let mut config = test_config();
        config.master = server.address().to_string();
        config.username = Some("sched".to_string());
        config.password = Some("pw".to_string());
        MasterClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_call_sends_stream_id_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCHEDULER_PATH))
            .and(header(STREAM_ID_HEADER, "stream-1"))
            .and(basic_auth("sched", "pw"))
            .and(body_partial_json(json!({"type": "REVIVE"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.call(&Call::revive(), Some("stream-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCHEDULER_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad call"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.call(&Call::suppress(), None).await.unwrap_err();
        assert!(matches!(err, MasterError::Status { status: 400, ref body } if body == "bad call"));
    }

    #[tokio::test]
    async fn test_subscribe_reads_stream_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCHEDULER_PATH))
            .and(body_partial_json(json!({"type": "SUBSCRIBE"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(STREAM_ID_HEADER, "abc-123")
                    .set_body_string("20\n{\"type\":\"HEARTBEAT\"}"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let info = crate::framework::FrameworkIdentity::from_config(&test_config())
            .framework_info(&test_config());
        let subscription = client.subscribe(&Call::subscribe(info)).await.unwrap();
        assert_eq!(subscription.stream_id, "abc-123");
    }

    #[tokio::test]
    async fn test_subscribe_without_stream_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SCHEDULER_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let info = crate::framework::FrameworkIdentity::from_config(&test_config())
            .framework_info(&test_config());
        let result = client.subscribe(&Call::subscribe(info)).await;
        assert!(matches!(result, Err(MasterError::MissingStreamId)));
    }

    #[tokio::test]
    async fn test_agent_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master/slaves"))
            .and(query_param("slave_id", "agent-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "slaves": [{"id": "agent-1", "hostname": "node1.example", "port": 5051, "active": true}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let info = client
            .agent_info(&AgentId::parse("agent-1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.hostname, "node1.example");
        assert_eq!(info.port, Some(5051));
    }

    #[tokio::test]
    async fn test_task_network_infos_uses_latest_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master/tasks"))
            .and(query_param("task_id", "t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tasks": [{
                    "id": "t1",
                    "statuses": [
                        {"state": "TASK_STARTING"},
                        {"state": "TASK_RUNNING", "container_status": {
                            "network_infos": [{"ip_addresses": [{"ip_address": "172.17.0.4"}]}]
                        }}
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let infos = client
            .task_network_infos(&TaskId::parse("t1").unwrap())
            .await
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(
            infos[0].ip_addresses[0].ip_address.as_deref(),
            Some("172.17.0.4")
        );
    }
}
