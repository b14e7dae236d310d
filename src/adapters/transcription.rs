//! HTTP transcription requester.
//!
//! Posts `{"itemId": ...}` to a remote job endpoint, identifying the caller
//! with a bearer token, and maps the acknowledgement or error response.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use super::{TranscriptionAck, TranscriptionRequestError, TranscriptionRequester};
use crate::domain::ItemId;

/// Acknowledgement body returned by the endpoint
#[derive(Debug, Deserialize)]
struct AckResponse {
    status: TranscriptionAck,
}

/// Error body returned by the endpoint
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpTranscriptionRequester {
    endpoint: String,
    caller_token: Option<String>,
    client: reqwest::Client,
}

impl HttpTranscriptionRequester {
    pub fn new(
        endpoint: impl Into<String>,
        caller_token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into(),
            caller_token,
            client,
        }
    }
}

fn map_status(status: StatusCode, item_id: &ItemId, message: String) -> TranscriptionRequestError {
    match status {
        StatusCode::UNAUTHORIZED => TranscriptionRequestError::Unauthenticated,
        StatusCode::FORBIDDEN => TranscriptionRequestError::PermissionDenied,
        StatusCode::NOT_FOUND => TranscriptionRequestError::NotFound(item_id.clone()),
        StatusCode::PRECONDITION_FAILED | StatusCode::UNPROCESSABLE_ENTITY => {
            TranscriptionRequestError::MissingAudio
        }
        _ => TranscriptionRequestError::Internal(message),
    }
}

#[async_trait]
impl TranscriptionRequester for HttpTranscriptionRequester {
    async fn request(
        &self,
        item_id: &ItemId,
    ) -> Result<TranscriptionAck, TranscriptionRequestError> {
        let token = self
            .caller_token
            .as_deref()
            .ok_or(TranscriptionRequestError::Unauthenticated)?;

        let start = Instant::now();
        info!(%item_id, "Transcription request started");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&serde_json::json!({ "itemId": item_id }))
            .send()
            .await
            .map_err(|e| TranscriptionRequestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorResponse = response.json().await.unwrap_or_default();
            let message = body
                .message
                .unwrap_or_else(|| format!("endpoint returned {}", status));
            return Err(map_status(status, item_id, message));
        }

        let ack: AckResponse = response
            .json()
            .await
            .map_err(|e| {
                TranscriptionRequestError::Internal(format!("invalid acknowledgement: {}", e))
            })?;

        info!(
            %item_id,
            ack = ?ack.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Transcription request completed"
        );
        Ok(ack.status)
    }
}
