//! Common test utilities - FabricTest harness and a fake Replicate API

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fabricd::{Config, Server};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// 1x1 transparent PNG, as the browser's FileReader would encode it
pub const COUCH_PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// A tiny JPEG header, enough to pass payload validation
pub const FABRIC_JPEG: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQAAAQABAAD/2w==";

pub const TEST_TOKEN: &str = "r8_test_token";

/// How the fake API answers a create-prediction call
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Finish immediately with this output
    Succeed(Value),
    /// Start, stay processing for `polls` polls, then succeed
    PollThenSucceed { polls: usize, output: Value },
    /// Finish immediately as failed with this error
    Fail(String),
    /// Reject the create call with this status and detail
    ApiError(u16, String),
    /// Finish immediately with this status and no output
    Finish(String),
    /// Start, but leave out the poll URL
    NoPollUrl,
    /// Start, then answer every poll with this status and a detail body
    PollError(u16),
}

/// A request the fake API received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub prefer: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct FakeState {
    base_url: String,
    behavior: Behavior,
    requests: Arc<Mutex<Vec<Recorded>>>,
    polls: Arc<AtomicUsize>,
}

/// Fake Replicate API on a random port
pub struct FakeReplicate {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    polls: Arc<AtomicUsize>,
    _handle: JoinHandle<()>,
}

impl FakeReplicate {
    pub async fn start(behavior: Behavior) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let requests = Arc::new(Mutex::new(Vec::new()));
        let polls = Arc::new(AtomicUsize::new(0));
        let state = FakeState {
            base_url: format!("http://{}", addr),
            behavior,
            requests: requests.clone(),
            polls: polls.clone(),
        };

        let router = Router::new()
            .route("/predictions", post(create_prediction))
            .route("/models/{owner}/{name}/predictions", post(create_prediction))
            .route("/predictions/{id}", get(get_prediction))
            .layer(DefaultBodyLimit::disable())
            .with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        Ok(Self {
            addr,
            requests,
            polls,
            _handle: handle,
        })
    }

    /// API base URL to point fabricd at
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Create-prediction calls received so far
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of poll calls received so far
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

fn prediction(state: &FakeState, status: &str, output: Value, error: Value) -> Value {
    json!({
        "id": "pred-1",
        "status": status,
        "output": output,
        "error": error,
        "urls": {
            "get": format!("{}/predictions/pred-1", state.base_url),
            "cancel": format!("{}/predictions/pred-1/cancel", state.base_url),
        },
    })
}

async fn create_prediction(
    State(state): State<FakeState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        authorization: header("authorization"),
        prefer: header("prefer"),
        body,
    });

    match &state.behavior {
        Behavior::Succeed(output) => (
            StatusCode::CREATED,
            Json(prediction(&state, "succeeded", output.clone(), Value::Null)),
        )
            .into_response(),
        Behavior::PollThenSucceed { .. } => (
            StatusCode::CREATED,
            Json(prediction(&state, "starting", Value::Null, Value::Null)),
        )
            .into_response(),
        Behavior::Fail(message) => (
            StatusCode::CREATED,
            Json(prediction(&state, "failed", Value::Null, json!(message))),
        )
            .into_response(),
        Behavior::ApiError(status, detail) => (
            StatusCode::from_u16(*status).unwrap(),
            Json(json!({ "detail": detail })),
        )
            .into_response(),
        Behavior::Finish(status) => (
            StatusCode::CREATED,
            Json(prediction(&state, status, Value::Null, Value::Null)),
        )
            .into_response(),
        Behavior::NoPollUrl => (
            StatusCode::CREATED,
            Json(json!({ "id": "pred-1", "status": "starting" })),
        )
            .into_response(),
        Behavior::PollError(_) => (
            StatusCode::CREATED,
            Json(prediction(&state, "starting", Value::Null, Value::Null)),
        )
            .into_response(),
    }
}

async fn get_prediction(State(state): State<FakeState>, Path(_id): Path<String>) -> Response {
    let seen = state.polls.fetch_add(1, Ordering::SeqCst) + 1;

    let body = match &state.behavior {
        Behavior::PollThenSucceed { polls, output } if seen > *polls => {
            prediction(&state, "succeeded", output.clone(), Value::Null)
        }
        Behavior::PollError(status) => {
            return (
                StatusCode::from_u16(*status).unwrap(),
                Json(json!({ "detail": "prediction lookup failed" })),
            )
                .into_response();
        }
        _ => prediction(&state, "processing", Value::Null, Value::Null),
    };
    Json(body).into_response()
}

/// Test harness that runs a real fabricd server on a random port
pub struct FabricTest {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl FabricTest {
    /// Start a server with no Replicate token
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start a server talking to the fake API with a valid token
    pub async fn start_with_fake(fake: &FakeReplicate) -> Result<Self> {
        let base_url = fake.base_url();
        Self::start_with(move |config| {
            config.replicate.api_token = Some(TEST_TOKEN.to_string());
            config.replicate.api_base = base_url;
        })
        .await
    }

    /// Start a server after adjusting the test config
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Result<Self> {
        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let mut config = Config::default();
        config.server.bind_addr = addr;
        // Unroutable unless a test points it at a fake
        config.replicate.api_base = "http://127.0.0.1:9".to_string();
        config.replicate.request_timeout_secs = 5;
        config.replicate.poll_interval_ms = 10;
        config.replicate.poll_timeout_secs = 5;
        configure(&mut config);

        let server = Arc::new(Server::new(config)?);
        let server_clone = server.clone();

        // Spawn the server in a background task
        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    /// Get the base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// POST a generate request with both images
    pub async fn generate(&self, couch: &str, fabric: &str) -> Result<reqwest::Response> {
        self.post(
            "/api/generate",
            &json!({ "couchImage": couch, "fabricImage": fabric }),
        )
        .await
    }
}

impl Drop for FabricTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}
