//! HTTP + SSE transport: `POST /rpc` is the JSON-RPC entry point; the rest are
//! 1:1 REST convenience wrappers, plus `GET /events` for server-initiated streams.

use crate::server::authz::Credentials;
use crate::server::hardened::HardenedServer;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;

/// Per-SSE-client outbound queues; a client's events are retained here until
/// its stream is read or it disconnects.
#[derive(Default)]
pub struct SseClients {
    senders: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl SseClients {
    pub fn send(&self, client_id: &str, payload: String) {
        if let Some(sender) = self.senders.get(client_id) {
            let _ = sender.send(payload);
        }
    }

    pub fn broadcast(&self, payload: &str) {
        for sender in self.senders.iter() {
            let _ = sender.send(payload.to_string());
        }
    }
}

#[derive(Clone)]
struct AppState {
    server: Arc<HardenedServer>,
    sse_clients: Arc<SseClients>,
}

pub fn router(server: Arc<HardenedServer>, sse_clients: Arc<SseClients>) -> Router {
    let state = AppState { server, sse_clients };
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/rpc", post(rpc))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .route("/resources", get(list_resources))
        .route("/resources/{*uri}", get(read_resource))
        .route("/prompts", get(list_prompts))
        .route("/prompts/{name}", post(get_prompt))
        .route("/events", get(events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(server: Arc<HardenedServer>, addr: SocketAddr, sse_clients: Arc<SseClients>) -> crate::error::Result<()> {
    let app = router(server, sse_clients);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "healthy", "server": state.server.core.name }))
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": state.server.core.name,
        "version": state.server.core.version,
        "tools": state.server.core.tools().len(),
        "resources": state.server.core.resources().len(),
        "prompts": state.server.core.prompts().len(),
    }))
}

fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);
    Credentials { token, client_id: None, timestamp: None, signature: None, body: None }
}

async fn rpc(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let credentials = credentials_from_headers(&headers);
    match state.server.handle_message(&body, "http-client", &credentials).await {
        Some(response) => (StatusCode::OK, [("content-type", "application/json")], response).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .server
        .core
        .tools()
        .into_iter()
        .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
        .collect();
    Json(json!({ "tools": tools }))
}

async fn call_tool(State(state): State<AppState>, Path(name): Path<String>, Json(arguments): Json<Value>) -> Response {
    let result = state
        .server
        .core
        .call_tool(crate::types::ToolCall { name, arguments, call_id: None })
        .await;
    if result.is_error {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": result }))).into_response();
    }
    Json(result).into_response()
}

async fn list_resources(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "resources": state.server.core.resources() }))
}

async fn read_resource(State(state): State<AppState>, Path(uri): Path<String>) -> Response {
    match state.server.core.read_resource(&uri).await {
        Ok(contents) => Json(contents).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_prompts(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "prompts": state.server.core.prompts() }))
}

async fn get_prompt(State(state): State<AppState>, Path(name): Path<String>, Json(arguments): Json<Value>) -> Response {
    let args = arguments.as_object().cloned().unwrap_or_default().into_iter().collect();
    match state.server.core.get_prompt(&name, args).await {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Removes the client's sender entry once the stream is dropped (disconnect
/// or end of service), so `broadcast`/`send` never targets a dead channel.
struct SseClientGuard {
    clients: Arc<SseClients>,
    client_id: String,
}

impl Drop for SseClientGuard {
    fn drop(&mut self) {
        self.clients.senders.remove(&self.client_id);
    }
}

struct GuardedStream<S> {
    inner: S,
    _guard: SseClientGuard,
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    state.sse_clients.senders.insert(client_id.clone(), tx);
    let guard = SseClientGuard { clients: state.sse_clients.clone(), client_id };

    let stream = UnboundedReceiverStream::new(rx).map(|payload| Ok(Event::default().data(payload)));
    Sse::new(GuardedStream { inner: stream, _guard: guard })
}
