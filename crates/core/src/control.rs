//! Control-Plane Client
//!
//! The remote agent API is driven through [`ControlClient`]. Each call is
//! attempted exactly once; retry policy, if any, belongs to the caller.

use crate::types::{
    Agent, CreateAgentRequest, JoinRoomRequest, ListenRequest, Listener, ModelCatalog,
    ResourceRef, RoomJoinInfo,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

/// Errors from a single control-plane call.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("could not decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid control client configuration: {0}")]
    Config(String),
}

/// The remote agent API, as used by a session.
#[async_trait]
pub trait ControlClient: Send + Sync {
    /// `GET /models`
    async fn list_models(&self) -> Result<ModelCatalog, ControlError>;

    /// `POST /agents`
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, ControlError>;

    /// `POST /agents/{agent_id}/listen`
    async fn activate_listener(
        &self,
        agent_id: &str,
        request: &ListenRequest,
    ) -> Result<Listener, ControlError>;

    /// `POST /rooms/{listener_id}/join`
    async fn join_room(
        &self,
        listener_id: &str,
        request: &JoinRoomRequest,
    ) -> Result<RoomJoinInfo, ControlError>;

    /// `DELETE /agents/{agent_id}/listen/{listener_id}`
    async fn delete_listener(&self, agent_id: &str, listener_id: &str)
    -> Result<(), ControlError>;

    /// `DELETE /agents/{agent_id}`
    async fn delete_agent(&self, agent_id: &str) -> Result<(), ControlError>;
}

/// [`ControlClient`] over HTTPS with bearer-token authentication.
pub struct HttpControlClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl HttpControlClient {
    /// Creates a client rooted at `base_url`.
    ///
    /// `timeout` bounds every request end to end, including reading the body.
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let base_url = Url::parse(&base_url.into())
            .map_err(|e| ControlError::Config(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ControlError::Config(format!(
                "base URL {base_url} cannot have path segments"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// Builds a request for the path made of `segments`, each percent-encoded.
    fn request(&self, method: Method, segments: &[&str]) -> (String, RequestBuilder) {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        let endpoint = format!("{} {}", method, url.path());
        let builder = self
            .http
            .request(method, url)
            .bearer_auth(self.api_key.expose_secret());
        (endpoint, builder)
    }

    /// Sends the request and returns the body of a 2xx response.
    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<String, ControlError> {
        let transport = |source| ControlError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(%endpoint, status = status.as_u16(), "control call completed");
        if !status.is_success() {
            return Err(ControlError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> Result<T, ControlError> {
        let body = self.send(endpoint, request).await?;
        serde_json::from_str(&body).map_err(|source| ControlError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ControlClient for HttpControlClient {
    #[instrument(skip(self))]
    async fn list_models(&self) -> Result<ModelCatalog, ControlError> {
        let (endpoint, request) = self.request(Method::GET, &["models"]);
        self.send_json(&endpoint, request).await
    }

    #[instrument(skip_all, fields(model = %request.model_name))]
    async fn create_agent(&self, request: &CreateAgentRequest) -> Result<Agent, ControlError> {
        let (endpoint, builder) = self.request(Method::POST, &["agents"]);
        let created: ResourceRef = self.send_json(&endpoint, builder.json(request)).await?;
        Ok(Agent {
            id: created.id,
            model_name: request.model_name.clone(),
            prompt: request.prompt.clone(),
            options: request.options.clone(),
        })
    }

    #[instrument(skip(self, request))]
    async fn activate_listener(
        &self,
        agent_id: &str,
        request: &ListenRequest,
    ) -> Result<Listener, ControlError> {
        let (endpoint, builder) = self.request(Method::POST, &["agents", agent_id, "listen"]);
        let created: ResourceRef = self.send_json(&endpoint, builder.json(request)).await?;
        Ok(Listener {
            id: created.id,
            agent_id: agent_id.to_string(),
            options: request.options.clone(),
        })
    }

    #[instrument(skip(self, request))]
    async fn join_room(
        &self,
        listener_id: &str,
        request: &JoinRoomRequest,
    ) -> Result<RoomJoinInfo, ControlError> {
        let (endpoint, builder) = self.request(Method::POST, &["rooms", listener_id, "join"]);
        self.send_json(&endpoint, builder.json(request)).await
    }

    #[instrument(skip(self))]
    async fn delete_listener(
        &self,
        agent_id: &str,
        listener_id: &str,
    ) -> Result<(), ControlError> {
        let (endpoint, builder) = self.request(
            Method::DELETE,
            &["agents", agent_id, "listen", listener_id],
        );
        self.send(&endpoint, builder).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn delete_agent(&self, agent_id: &str) -> Result<(), ControlError> {
        let (endpoint, builder) = self.request(Method::DELETE, &["agents", agent_id]);
        self.send(&endpoint, builder).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentOptions, JoinOptions, ListenOptions};
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{delete, get, post},
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<String>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer test-key")
    }

    async fn models(headers: HeaderMap) -> impl IntoResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "missing key").into_response();
        }
        Json(json!({ "ultravox-70B-x": { "ctx": 8192 }, "tiny": {} })).into_response()
    }

    async fn create_agent(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
        calls.lock().unwrap().push(format!("create {}", body));
        Json(json!({ "id": "agent-1", "status": "created" }))
    }

    async fn listen(
        State(calls): State<Calls>,
        Path(agent_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        calls
            .lock()
            .unwrap()
            .push(format!("listen {} {}", agent_id, body));
        Json(json!({ "id": "listener-7" }))
    }

    async fn join(Path(listener_id): Path<String>) -> Json<Value> {
        Json(json!({
            "audioSocket": { "url": format!("ws://media.local/{}", listener_id) }
        }))
    }

    async fn delete_listener(
        State(calls): State<Calls>,
        Path((agent_id, listener_id)): Path<(String, String)>,
    ) -> StatusCode {
        calls
            .lock()
            .unwrap()
            .push(format!("delete listener {} {}", agent_id, listener_id));
        StatusCode::NO_CONTENT
    }

    async fn delete_agent(State(calls): State<Calls>, Path(agent_id): Path<String>) -> StatusCode {
        calls
            .lock()
            .unwrap()
            .push(format!("delete agent {}", agent_id));
        StatusCode::NOT_FOUND
    }

    async fn spawn_server() -> (String, Calls) {
        let calls: Calls = Arc::default();
        let app = Router::new()
            .route("/models", get(models))
            .route("/agents", post(create_agent))
            .route("/agents/{agent_id}", delete(delete_agent))
            .route("/agents/{agent_id}/listen", post(listen))
            .route(
                "/agents/{agent_id}/listen/{listener_id}",
                delete(delete_listener),
            )
            .route("/rooms/{listener_id}/join", post(join))
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), calls)
    }

    fn client(base_url: &str, key: &str) -> HttpControlClient {
        HttpControlClient::new(
            base_url,
            SecretString::from(key.to_string()),
            Duration::from_secs(5),
        )
        .expect("client should build")
    }

    #[tokio::test]
    async fn lists_models_with_bearer_token() {
        let (base, _) = spawn_server().await;
        let models = client(&base, "test-key").list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models.select("ultravox-70B"), Some("ultravox-70B-x"));
    }

    #[tokio::test]
    async fn rejected_token_surfaces_status_and_body() {
        let (base, _) = spawn_server().await;
        let err = client(&base, "wrong").list_models().await.unwrap_err();
        match err {
            ControlError::Status {
                endpoint,
                status,
                body,
            } => {
                assert_eq!(endpoint, "GET /models");
                assert_eq!(status, 401);
                assert_eq!(body, "missing key");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provisions_agent_listener_and_room() {
        let (base, calls) = spawn_server().await;
        let client = client(&base, "test-key");

        let agent = client
            .create_agent(&CreateAgentRequest {
                model_name: "ultravox-70B-x".into(),
                prompt: "hello".into(),
                options: AgentOptions {
                    temperature: Some(0.25),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(agent.id, "agent-1");
        assert_eq!(agent.model_name, "ultravox-70B-x");

        let listener = client
            .activate_listener(&agent.id, &ListenRequest::websocket(ListenOptions::default()))
            .await
            .unwrap();
        assert_eq!(listener.id, "listener-7");
        assert_eq!(listener.agent_id, "agent-1");

        let room = client
            .join_room(
                &listener.id,
                &JoinRoomRequest {
                    options: JoinOptions::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            room.audio_socket.map(|s| s.url).as_deref(),
            Some("ws://media.local/listener-7")
        );

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("\"modelName\":\"ultravox-70B-x\""));
        assert!(calls[0].contains("\"temperature\":0.25"));
        assert!(calls[1].starts_with("listen agent-1"));
        assert!(calls[1].contains("\"websocket\":true"));
        assert!(calls[1].contains("\"streamLog\":true"));
    }

    #[tokio::test]
    async fn deletes_hit_nested_paths_and_report_failures() {
        let (base, calls) = spawn_server().await;
        let client = client(&base, "test-key");

        client
            .delete_listener("agent-1", "listener-7")
            .await
            .unwrap();
        let err = client.delete_agent("agent-1").await.unwrap_err();
        assert!(matches!(err, ControlError::Status { status: 404, .. }));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "delete listener agent-1 listener-7".to_string(),
                "delete agent agent-1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let err = client("http://127.0.0.1:9", "test-key")
            .list_models()
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Transport { .. }));
    }

    #[tokio::test]
    async fn ids_are_escaped_as_single_path_segments() {
        let (base, calls) = spawn_server().await;
        let err = client(&base, "test-key")
            .delete_agent("agent/1?force=true")
            .await
            .unwrap_err();
        match err {
            ControlError::Status { endpoint, .. } => {
                assert_eq!(endpoint, "DELETE /agents/agent%2F1%3Fforce=true")
            }
            other => panic!("expected Status error, got {other:?}"),
        }
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["delete agent agent/1?force=true".to_string()]
        );
    }

    #[tokio::test]
    async fn base_url_path_prefix_is_kept() {
        let app = Router::new().route("/v1/models", get(models));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let models = client(&format!("http://{}/v1", addr), "test-key")
            .list_models()
            .await
            .unwrap();
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn unusable_base_urls_are_rejected() {
        for base in ["/", "", "mailto:ops@example.test"] {
            let err = HttpControlClient::new(
                base,
                SecretString::from("k".to_string()),
                Duration::from_secs(1),
            );
            assert!(matches!(err, Err(ControlError::Config(_))), "{base}");
        }
    }
}
