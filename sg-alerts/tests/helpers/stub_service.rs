//! In-process stand-in for the external judge and speech services
//!
//! Binds 127.0.0.1 on an ephemeral port. `POST /judge` answers with the
//! configured verdict, `POST /speech` with the configured audio bytes. Both
//! require a bearer token and can be slowed down to exercise timeouts.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// How the stub answers
#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub trigger: bool,
    pub reason: Option<String>,
    pub audio: Vec<u8>,
    pub status: StatusCode,
    pub delay: Duration,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            trigger: true,
            reason: None,
            audio: b"RIFF-stub-audio".to_vec(),
            status: StatusCode::OK,
            delay: Duration::ZERO,
        }
    }
}

impl StubBehavior {
    pub fn approve() -> Self {
        Self::default()
    }

    pub fn reject(reason: &str) -> Self {
        Self {
            trigger: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
struct StubState {
    behavior: Arc<StubBehavior>,
    calls: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

/// Running stub service
pub struct StubService {
    addr: SocketAddr,
    state: StubState,
    handle: JoinHandle<()>,
}

pub const API_KEY: &str = "stub-key";

impl StubService {
    pub async fn start(behavior: StubBehavior) -> Self {
        let state = StubState {
            behavior: Arc::new(behavior),
            calls: Arc::new(AtomicUsize::new(0)),
            bodies: Arc::new(Mutex::new(Vec::new())),
        };

        let router = Router::new()
            .route("/judge", post(judge))
            .route("/speech", post(speech))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn judge_url(&self) -> String {
        format!("http://{}/judge", self.addr)
    }

    pub fn speech_url(&self) -> String {
        format!("http://{}/speech", self.addr)
    }

    /// Requests that reached a handler
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// JSON bodies received, in arrival order
    pub fn bodies(&self) -> Vec<Value> {
        self.state.bodies.lock().unwrap().clone()
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept(state: &StubState, headers: &HeaderMap, body: Value) -> Result<(), Response> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);

    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", API_KEY))
        .unwrap_or(false);
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }

    if !state.behavior.delay.is_zero() {
        tokio::time::sleep(state.behavior.delay).await;
    }
    if !state.behavior.status.is_success() {
        return Err(state.behavior.status.into_response());
    }
    Ok(())
}

async fn judge(State(state): State<StubState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(response) = accept(&state, &headers, body).await {
        return response;
    }
    let mut reply = json!({ "trigger": state.behavior.trigger });
    if let Some(reason) = &state.behavior.reason {
        reply["reason"] = json!(reason);
    }
    Json(reply).into_response()
}

async fn speech(State(state): State<StubState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(response) = accept(&state, &headers, body).await {
        return response;
    }
    (
        [(header::CONTENT_TYPE, "audio/wav")],
        state.behavior.audio.clone(),
    )
        .into_response()
}
