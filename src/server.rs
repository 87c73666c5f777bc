//! Operator-facing HTTP surface: status endpoints plus the inbound webhook.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, Utc};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::{GatewayError, InboundGateway};
use crate::relay::RelayEngine;
use crate::webhook::{AcceptanceRecord, ForwardingBridge, OutboundMessageRequest};

const SERVICE_NAME: &str = "VK Teams Bot with n8n integration";

#[derive(Clone)]
pub struct ApiState {
    config: Arc<Config>,
    relay: Option<Arc<RelayEngine>>,
    bridge: Arc<ForwardingBridge>,
    gateway: InboundGateway,
    started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        config: Arc<Config>,
        relay: Option<Arc<RelayEngine>>,
        bridge: Arc<ForwardingBridge>,
    ) -> Self {
        let gateway = InboundGateway::new(relay.clone(), bridge.clone());
        Self {
            config,
            relay,
            bridge,
            gateway,
            started_at: Utc::now(),
        }
    }

    fn bot_running(&self) -> bool {
        self.relay.as_ref().is_some_and(|r| r.is_running())
    }

    async fn chats(&self) -> Value {
        match &self.relay {
            Some(relay) => json!(relay.active_chats().await),
            None => json!({}),
        }
    }

    async fn chat_count(&self) -> usize {
        match &self.relay {
            Some(relay) => relay.active_chat_count().await,
            None => 0,
        }
    }
}

fn now() -> String {
    Local::now().to_rfc3339()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chats", get(chats))
        .route("/api/stats", get(stats))
        .route("/api/webhook", post(inbound_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

async fn root(State(state): State<ApiState>) -> Json<Value> {
    let status = if state.bot_running() {
        "running"
    } else {
        "stopped"
    };
    Json(json!({
        "bot": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "environment": state.config.general.environment,
        "active_chats": state.chat_count().await,
        "n8n_integration": state.bridge.is_configured(),
        "endpoints": {
            "health": "/health",
            "chats": "/chats",
            "stats": "/api/stats",
            "webhook": "/api/webhook"
        },
        "timestamp": now(),
    }))
}

async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now(),
        "components": {
            "vk_bot": {
                "running": state.bot_running(),
                "token_configured": !state.config.vkteams.bot_token.is_empty(),
                "active_chats": state.chat_count().await,
            },
            "n8n_integration": {
                "webhook_configured": state.bridge.is_configured(),
                "stats": state.bridge.stats().await,
            },
            "api_server": {
                "port": state.config.server.port,
                "environment": state.config.general.environment,
            }
        }
    }))
}

async fn chats(State(state): State<ApiState>) -> Json<Value> {
    if state.relay.is_none() {
        return Json(json!({
            "total_chats": 0,
            "chats": {},
            "error": "Bot instance not initialized",
        }));
    }

    let chats = state.chats().await;
    Json(json!({
        "total_chats": chats.as_object().map_or(0, |c| c.len()),
        "chats": chats,
        "timestamp": now(),
    }))
}

async fn stats(State(state): State<ApiState>) -> Json<Value> {
    let snapshot = match &state.relay {
        Some(relay) => relay.active_chats().await,
        None => Default::default(),
    };
    let total_messages: u64 = snapshot.values().map(|c| c.message_count).sum();
    let last_event_id = state.relay.as_ref().map_or(0, |r| r.last_event_id());
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();

    Json(json!({
        "system_status": {
            "bot_running": state.bot_running(),
            "environment": state.config.general.environment,
            "started_at": state.started_at,
            "uptime_secs": uptime_secs,
            "last_event_id": last_event_id,
        },
        "chat_stats": {
            "total_active_chats": snapshot.len(),
            "total_messages_processed": total_messages,
            "chats": snapshot,
        },
        "n8n_integration": state.bridge.status().await,
        "config": {
            "server_host": state.config.server.host,
            "server_port": state.config.server.port,
            "poll_time": state.config.vkteams.poll_time,
            "bot_api_url": state.config.vkteams.api_url,
        },
        "timestamp": now(),
    }))
}

async fn inbound_webhook(
    State(state): State<ApiState>,
    payload: Result<Json<OutboundMessageRequest>, JsonRejection>,
) -> Result<Json<AcceptanceRecord>, GatewayError> {
    let Json(request) = payload.map_err(|e| {
        warn!("Rejected inbound webhook body: {}", e.body_text());
        GatewayError::Malformed(e.body_text())
    })?;
    state.gateway.handle(&request).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{message_event, RecordingClient};
    use crate::relay::RelaySettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Harness {
        client: Arc<RecordingClient>,
        relay: Arc<RelayEngine>,
        bridge: Arc<ForwardingBridge>,
        app: Router,
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.vkteams.bot_token = "token".into();
        let client = Arc::new(RecordingClient::new());
        let bridge = Arc::new(ForwardingBridge::new(None, Duration::from_secs(1)));
        let relay = Arc::new(RelayEngine::new(
            client.clone(),
            bridge.clone(),
            RelaySettings::from_config(&config),
        ));
        let state = ApiState::new(Arc::new(config), Some(relay.clone()), bridge.clone());
        Harness {
            client,
            relay,
            bridge,
            app: router(state),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_summary() {
        let h = harness();
        h.relay.process_batch(&[message_event(1, "c1", "/x")]).await;

        let response = h
            .app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "running");
        assert_eq!(json["active_chats"], 1);
        assert_eq!(json["n8n_integration"], false);
    }

    #[tokio::test]
    async fn test_root_reports_stopped() {
        let h = harness();
        h.relay.stop();
        let response = h
            .app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "stopped");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let response = h
            .app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["vk_bot"]["running"], true);
        assert_eq!(json["components"]["vk_bot"]["token_configured"], true);
        assert_eq!(json["components"]["n8n_integration"]["stats"]["sent_count"], 0);
        assert_eq!(json["components"]["api_server"]["port"], 8000);
    }

    #[tokio::test]
    async fn test_chats_listing() {
        let h = harness();
        h.relay
            .process_batch(&[
                message_event(1, "c1", "/x"),
                message_event(2, "c2", "/x"),
                message_event(3, "c1", "/x"),
            ])
            .await;

        let response = h
            .app
            .oneshot(Request::get("/chats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total_chats"], 2);
        assert_eq!(json["chats"]["c1"]["message_count"], 2);
        assert_eq!(json["chats"]["c1"]["user_name"], "Ivan Petrov");
    }

    #[tokio::test]
    async fn test_chats_without_relay() {
        let config = Arc::new(Config::default());
        let bridge = Arc::new(ForwardingBridge::new(None, Duration::from_secs(1)));
        let app = router(ApiState::new(config, None, bridge));

        let response = app
            .oneshot(Request::get("/chats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total_chats"], 0);
        assert_eq!(json["error"], "Bot instance not initialized");
    }

    #[tokio::test]
    async fn test_stats_aggregates_messages() {
        let h = harness();
        h.relay
            .process_batch(&[
                message_event(1, "c1", "/x"),
                message_event(2, "c2", "/x"),
                message_event(4, "c1", "/x"),
            ])
            .await;

        let response = h
            .app
            .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["chat_stats"]["total_active_chats"], 2);
        assert_eq!(json["chat_stats"]["total_messages_processed"], 3);
        assert_eq!(json["system_status"]["last_event_id"], 4);
        assert_eq!(json["n8n_integration"]["webhook_url"], "Not configured");
        assert_eq!(json["config"]["poll_time"], 30);
        assert_eq!(
            json["config"]["bot_api_url"],
            "https://api.internal.myteam.mail.ru/bot/v1"
        );
    }

    #[tokio::test]
    async fn test_webhook_delivers_to_known_chat() {
        let h = harness();
        h.relay.process_batch(&[message_event(1, "c1", "/x")]).await;

        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "c1", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["message_length"], 2);

        let sent = h.client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "c1");
        assert_eq!(sent[0].text, "hi");
    }

    #[tokio::test]
    async fn test_webhook_empty_chat_id_is_400() {
        let h = harness();
        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.client.sent().is_empty());
        assert_eq!(h.bridge.stats().await.received_count, 0);
    }

    #[tokio::test]
    async fn test_webhook_whitespace_message_is_delivered() {
        let h = harness();
        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "c1", "message": "   "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.client.sent()[0].text, "   ");
    }

    #[tokio::test]
    async fn test_webhook_malformed_keyboard_is_400() {
        let h = harness();
        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "c1", "message": "pick", "keyboard": "{not json"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.client.sent().is_empty());
        assert_eq!(h.bridge.stats().await.received_count, 0);
    }

    #[tokio::test]
    async fn test_webhook_keyboard_string_reaches_client() {
        let h = harness();
        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({
                    "chat_id": "c1",
                    "message": "pick",
                    "inline_keyboard_markup": r#"{"inlineKeyboard": [[{"text": "A", "callbackData": "a"}]]}"#
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let keyboard = h.client.sent()[0].keyboard.clone().unwrap();
        assert_eq!(
            keyboard.form_value().unwrap().as_deref(),
            Some(r#"[[{"text":"A","callbackData":"a"}]]"#)
        );
    }

    #[tokio::test]
    async fn test_webhook_delivery_failure_is_500() {
        let h = harness();
        h.client.set_send_ok(false);
        let response = h
            .app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "c1", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["detail"],
            "Failed to send message to VK Teams"
        );
    }

    #[tokio::test]
    async fn test_webhook_without_relay_is_500() {
        let config = Arc::new(Config::default());
        let bridge = Arc::new(ForwardingBridge::new(None, Duration::from_secs(1)));
        let app = router(ApiState::new(config, None, bridge));

        let response = app
            .oneshot(post_json(
                "/api/webhook",
                json!({"chat_id": "c1", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
