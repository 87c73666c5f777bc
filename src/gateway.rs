use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info, warn};

use crate::relay::RelayEngine;
use crate::webhook::{AcceptanceRecord, ForwardingBridge, OutboundMessageRequest, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Bot not initialized")]
    NotReady,
    #[error("Invalid request body: {0}")]
    Malformed(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("Failed to send message to VK Teams")]
    DeliveryFailed,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Malformed(_) | GatewayError::Invalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotReady | GatewayError::DeliveryFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Delivers webhook-originated messages into chat.
#[derive(Clone)]
pub struct InboundGateway {
    relay: Option<Arc<RelayEngine>>,
    bridge: Arc<ForwardingBridge>,
}

impl InboundGateway {
    pub fn new(relay: Option<Arc<RelayEngine>>, bridge: Arc<ForwardingBridge>) -> Self {
        Self { relay, bridge }
    }

    pub async fn handle(
        &self,
        request: &OutboundMessageRequest,
    ) -> Result<AcceptanceRecord, GatewayError> {
        let Some(relay) = self.relay.as_ref() else {
            error!("Inbound message rejected: relay not initialized");
            return Err(GatewayError::NotReady);
        };

        let record = self.bridge.accept_inbound(request).await?;

        if !relay.is_known_chat(&request.chat_id).await {
            warn!(
                "Chat {} has not been seen yet, delivering anyway",
                request.chat_id
            );
        }

        let delivered = relay
            .client()
            .send_message(&request.chat_id, &request.message, request.keyboard.as_ref())
            .await;

        if delivered {
            info!("Inbound message delivered to chat {}", request.chat_id);
            Ok(record)
        } else {
            error!("Inbound message for chat {} was not delivered", request.chat_id);
            Err(GatewayError::DeliveryFailed)
        }
    }
}
