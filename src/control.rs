//! A3 — Control Channel. An axum WebSocket endpoint speaking the envelope
//! of spec §6 verbatim, plus a thin REST mirror for `session:create`/
//! `session:destroy` for callers that don't want a socket. Grounded in the
//! teacher's `api::serve`/`AppState`/`Router` shape (`examples/
//! RcityLucas-RainbowBrowserAI/poc-chromiumoxide/src/api/mod.rs`): a
//! `Router::new().route(...).layer(CorsLayer::permissive())
//! .layer(TraceLayer::new_for_http()).with_state(state)` served from
//! `bind_with_retry`.
//!
//! Every inbound message dispatches to the relevant component and always
//! replies with `success:true`+payload or `success:false`+error (spec §7:
//! this is the one place a `RainbowError` becomes a wire reply instead of
//! being folded into a structured result).

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dom;
use crate::driver::{Driver, FixtureDriver};
use crate::model::RuleSet;
use crate::oracle::Oracle;
use crate::session::{Session, SessionRegistry};
use crate::{detector, extraction, network, pagination, popup, probe};

#[derive(Clone)]
pub struct ControlState {
    pub sessions: Arc<SessionRegistry>,
    pub oracle: Arc<dyn Oracle>,
    /// The last configured rule set per session, set by `scrape:configure`
    /// and consumed by `scrape:execute`/`popup:autoClose`.
    rule_sets: Arc<RwLock<HashMap<Uuid, RuleSet>>>,
}

impl ControlState {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { sessions: Arc::new(SessionRegistry::new()), oracle, rule_sets: Arc::new(RwLock::new(HashMap::new())) }
    }
}

/// `{type, payload, sessionId?, timestamp?}` — spec §6 control message.
#[derive(Debug, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Every reply carries the same `sessionId` and either a result payload or
/// an error string, never both.
#[derive(Debug, Serialize)]
pub struct ControlReply {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    fn ok(reply_kind: impl Into<String>, session_id: Option<Uuid>, payload: serde_json::Value) -> Self {
        Self { kind: reply_kind.into(), session_id, success: true, payload: Some(payload), error: None }
    }

    fn err(reply_kind: impl Into<String>, session_id: Option<Uuid>, error: impl std::fmt::Display) -> Self {
        Self { kind: reply_kind.into(), session_id, success: false, payload: None, error: Some(error.to_string()) }
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/session", post(create_session_rest))
        .route("/session/:id", delete(destroy_session_rest))
        .route("/ws", get(ws_upgrade))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy", "service": "rainbow-scrape"}))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    url: Option<String>,
    html: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

async fn create_session_rest(
    State(state): State<ControlState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let session = spawn_session(&state, req.url, req.html).await;
    (axum::http::StatusCode::OK, Json(SessionResponse { session_id: session.id })).into_response()
}

async fn destroy_session_rest(State(state): State<ControlState>, Path(id): Path<Uuid>) -> Response {
    match state.sessions.destroy(id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => (axum::http::StatusCode::NOT_FOUND, Json(serde_json::json!({"error": e.to_string()}))).into_response(),
    }
}

async fn spawn_session(state: &ControlState, url: Option<String>, html: Option<String>) -> Arc<Session> {
    let driver: Arc<dyn Driver> = Arc::new(FixtureDriver::new(
        html.unwrap_or_else(|| "<html><body></body></html>".to_string()),
        url.unwrap_or_else(|| "https://example.com".to_string()),
    ));
    state.sessions.create(driver)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ControlState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ControlState) {
    loop {
        let raw = match socket.recv().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("control channel read error: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<ControlMessage>(&raw) {
            Ok(message) => dispatch(&state, message).await,
            Err(e) => ControlReply::err("error", None, format!("malformed message: {e}")),
        };

        let encoded = serde_json::to_string(&reply).unwrap_or_else(|_| {
            r#"{"type":"error","success":false,"error":"failed to encode reply"}"#.to_string()
        });
        if socket.send(Message::Text(encoded)).await.is_err() {
            break;
        }
    }
}

/// Dispatch one inbound message to the component that handles it. Unknown
/// message types and missing sessions both produce a `success:false` reply
/// rather than dropping the connection (spec §7 propagation rule).
async fn dispatch(state: &ControlState, message: ControlMessage) -> ControlReply {
    let session_id = message.session_id;
    let reply_kind = result_kind_for(&message.kind);

    macro_rules! session_or_reply {
        () => {
            match session_id.and_then(|id| state.sessions.get(id)) {
                Some(session) => session,
                None => return ControlReply::err(reply_kind, session_id, "unknown or missing sessionId"),
            }
        };
    }

    match message.kind.as_str() {
        "session:create" => {
            let url = message.payload.get("url").and_then(|v| v.as_str()).map(str::to_string);
            let html = message.payload.get("html").and_then(|v| v.as_str()).map(str::to_string);
            let session = spawn_session(state, url, html).await;
            ControlReply::ok(reply_kind, Some(session.id), serde_json::json!({"sessionId": session.id}))
        }

        "session:destroy" => {
            let Some(id) = session_id else {
                return ControlReply::err(reply_kind, None, "sessionId required");
            };
            state.rule_sets.write().await.remove(&id);
            match state.sessions.destroy(id).await {
                Ok(()) => ControlReply::ok(reply_kind, Some(id), serde_json::json!({})),
                Err(e) => ControlReply::err(reply_kind, Some(id), e),
            }
        }

        "navigate" => {
            let session = session_or_reply!();
            let Some(url) = message.payload.get("url").and_then(|v| v.as_str()) else {
                return ControlReply::err(reply_kind, session_id, "payload.url required");
            };
            let result = session.run_exclusive(|driver| Box::pin(async move { driver.goto(url).await })).await;
            reply_from(reply_kind, session_id, result.map(|_| serde_json::json!({"url": url})))
        }

        "input:mouse" => {
            let session = session_or_reply!();
            let dx = message.payload.get("dx").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let dy = message.payload.get("dy").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let result = session.run_exclusive(|driver| Box::pin(async move { driver.mouse_wheel(dx, dy).await })).await;
            reply_from(reply_kind, session_id, result.map(|_| serde_json::json!({})))
        }

        "input:scroll" => {
            let session = session_or_reply!();
            let dy = message.payload.get("dy").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let result = session.run_exclusive(|driver| Box::pin(async move { driver.mouse_wheel(0.0, dy).await })).await;
            reply_from(reply_kind, session_id, result.map(|_| serde_json::json!({})))
        }

        "selector:test" => {
            let session = session_or_reply!();
            let Some(selector) = message.payload.get("selector").and_then(|v| v.as_str()) else {
                return ControlReply::err(reply_kind, session_id, "payload.selector required");
            };
            match session.run_exclusive(|driver| Box::pin(async move { driver.document_html().await })).await {
                Ok(html) => {
                    let doc = dom::parse_document(&html);
                    let (matches, count) = probe::test_selector(&doc, selector);
                    ControlReply::ok(reply_kind, session_id, serde_json::json!({"matches": matches, "count": count}))
                }
                Err(e) => ControlReply::err(reply_kind, session_id, e),
            }
        }

        "dom:autoDetect" => {
            let session = session_or_reply!();
            match session.run_exclusive(|driver| Box::pin(async move { driver.document_html().await })).await {
                Ok(html) => {
                    let doc = dom::parse_document(&html);
                    let result = detector::detect(&doc, &detector::DetectorOptions::default());
                    ControlReply::ok("dom:selected", session_id, serde_json::to_value(result).unwrap())
                }
                Err(e) => ControlReply::err(reply_kind, session_id, e),
            }
        }

        "pagination:detect" => {
            let session = session_or_reply!();
            let container = message.payload.get("containerSelector").and_then(|v| v.as_str()).unwrap_or("body");
            match session.run_exclusive(|driver| Box::pin(async move { driver.document_html().await })).await {
                Ok(html) => {
                    let doc = dom::parse_document(&html);
                    let candidates = pagination::discover(&doc, container);
                    ControlReply::ok("pagination:candidates", session_id, serde_json::to_value(candidates).unwrap())
                }
                Err(e) => ControlReply::err(reply_kind, session_id, e),
            }
        }

        "popup:autoClose" => {
            let session = session_or_reply!();
            let rule_set = state.rule_sets.read().await.get(&session_id.unwrap()).cloned();
            let actions: Vec<popup::ScriptedAction> = rule_set
                .and_then(|rs| rs.dismiss_actions)
                .unwrap_or_default()
                .into_iter()
                .map(|a| popup::ScriptedAction::Click { selector: a.selector })
                .collect();
            let result = session
                .run_exclusive(|driver| Box::pin(async move {
                    let starting_url = driver.current_url().await.unwrap_or_default();
                    let guard_pattern = format!("!{starting_url}");
                    let _ = driver.set_route_guard(&guard_pattern, true).await;
                    let surface = extraction::DriverActionSurface(driver);
                    let outcome = popup::run_sequence(&surface, &actions).await;
                    let _ = driver.set_route_guard(&guard_pattern, false).await;
                    Ok(outcome)
                }))
                .await;
            reply_from("popup:closed", session_id, result.map(|r| serde_json::to_value(r).unwrap()))
        }

        "network:getProducts" => {
            let session = session_or_reply!();
            let result = session
                .run_exclusive(|driver| Box::pin(async move {
                    let responses = driver.drain_responses().await;
                    let mut products = Vec::new();
                    for response in responses {
                        if let Some((path, mapping, confidence)) = network::auto_detect(&response.body) {
                            products.push(serde_json::json!({
                                "url": response.url,
                                "path": path,
                                "mapping": mapping,
                                "confidence": confidence,
                            }));
                        }
                    }
                    Ok(products)
                }))
                .await;
            reply_from("network:products", session_id, result.map(|p| serde_json::json!({"products": p})))
        }

        "scrape:configure" => {
            let Some(id) = session_id else {
                return ControlReply::err(reply_kind, None, "sessionId required");
            };
            match serde_json::from_value::<RuleSet>(message.payload.clone()) {
                Ok(rule_set) => {
                    state.rule_sets.write().await.insert(id, rule_set);
                    ControlReply::ok(reply_kind, Some(id), serde_json::json!({}))
                }
                Err(e) => ControlReply::err(reply_kind, Some(id), format!("invalid rule set: {e}")),
            }
        }

        "scrape:execute" => {
            let session = session_or_reply!();
            let Some(rule_set) = state.rule_sets.read().await.get(&session_id.unwrap()).cloned() else {
                return ControlReply::err(reply_kind, session_id, "no rule set configured for session");
            };
            let result = session
                .run_exclusive(|driver| Box::pin(async move { extraction::run(driver, &rule_set).await }))
                .await;
            reply_from(reply_kind, session_id, result.map(|records| serde_json::json!({"records": records})))
        }

        other => ControlReply::err("error", session_id, format!("unknown message type: {other}")),
    }
}

fn reply_from(
    reply_kind: &str,
    session_id: Option<Uuid>,
    result: crate::error::Result<serde_json::Value>,
) -> ControlReply {
    match result {
        Ok(payload) => ControlReply::ok(reply_kind, session_id, payload),
        Err(e) => ControlReply::err(reply_kind, session_id, e),
    }
}

/// Maps a request message type to its success reply type per spec §6
/// (most are simply suffixed `:result`; a handful have a distinct name).
fn result_kind_for(kind: &str) -> &'static str {
    match kind {
        "session:create" | "session:destroy" => "session:result",
        "navigate" => "navigate:result",
        "input:mouse" | "input:scroll" => "input:result",
        "selector:test" => "selector:result",
        "dom:autoDetect" => "dom:selected",
        "pagination:detect" => "pagination:candidates",
        "popup:autoClose" => "popup:closed",
        "network:getProducts" => "network:products",
        "scrape:configure" | "scrape:execute" => "scrape:result",
        _ => "error",
    }
}

/// Mirrors the teacher's `bind_with_retry`: bind to loopback, retrying on
/// `AddrInUse` up to `attempts` times at successive ports.
pub async fn bind_with_retry(base_port: u16, attempts: u16) -> anyhow::Result<(tokio::net::TcpListener, u16)> {
    for i in 0..attempts {
        let port = base_port + i;
        let addr = format!("127.0.0.1:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("port {} in use, trying {}", port, port + 1);
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("failed to bind {}: {}", addr, e)),
        }
    }
    Err(anyhow::anyhow!("no free port found starting at {} after {} attempts", base_port, attempts))
}

pub async fn serve(port: u16, state: ControlState) -> anyhow::Result<()> {
    let app = router(state);
    let (listener, actual_port) = bind_with_retry(port, 3).await?;
    info!("control channel listening on 127.0.0.1:{}", actual_port);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> ControlState {
        ControlState::new(Arc::new(crate::oracle::DisabledOracle))
    }

    #[tokio::test]
    async fn session_create_and_destroy_round_trip() {
        let state = test_state();
        let create = ControlMessage {
            kind: "session:create".to_string(),
            payload: serde_json::json!({"html": "<div></div>"}),
            session_id: None,
            timestamp: None,
        };
        let reply = dispatch(&state, create).await;
        assert!(reply.success);
        let session_id = reply.session_id.expect("session id in reply");

        let destroy = ControlMessage {
            kind: "session:destroy".to_string(),
            payload: serde_json::Value::Null,
            session_id: Some(session_id),
            timestamp: None,
        };
        let reply = dispatch(&state, destroy).await;
        assert!(reply.success);
        assert!(state.sessions.get(session_id).is_none());
    }

    #[tokio::test]
    async fn unknown_message_type_replies_with_error_not_a_dropped_connection() {
        let state = test_state();
        let message = ControlMessage {
            kind: "totally:unknown".to_string(),
            payload: serde_json::Value::Null,
            session_id: None,
            timestamp: None,
        };
        let reply = dispatch(&state, message).await;
        assert!(!reply.success);
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn dom_auto_detect_dispatches_against_session_document() {
        let state = test_state();
        let html = r#"<html><body><ul><li class="product-card"><img src="a.jpg"><span class="price">$10</span></li><li class="product-card"><img src="b.jpg"><span class="price">$12</span></li><li class="product-card"><img src="c.jpg"><span class="price">$9</span></li></ul></body></html>"#;
        let create = ControlMessage {
            kind: "session:create".to_string(),
            payload: serde_json::json!({"html": html}),
            session_id: None,
            timestamp: None,
        };
        let session_id = dispatch(&state, create).await.session_id.unwrap();

        let detect = ControlMessage {
            kind: "dom:autoDetect".to_string(),
            payload: serde_json::Value::Null,
            session_id: Some(session_id),
            timestamp: None,
        };
        let reply = dispatch(&state, detect).await;
        assert!(reply.success);
        assert_eq!(reply.kind, "dom:selected");
    }

    #[tokio::test]
    async fn missing_session_id_produces_error_reply() {
        let state = test_state();
        let message = ControlMessage {
            kind: "navigate".to_string(),
            payload: serde_json::json!({"url": "https://example.com/next"}),
            session_id: Some(Uuid::new_v4()),
            timestamp: None,
        };
        let reply = dispatch(&state, message).await;
        assert!(!reply.success);
    }
}
