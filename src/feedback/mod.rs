//! Observability feedback.
//!
//! After a reward is persisted it can be forwarded to a tracing backend.
//! Forwarding is best effort: a failing sink is logged and otherwise ignored.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::reward::RewardRecord;

/// Endpoint for [`HttpFeedbackSink::from_env`].
pub const FEEDBACK_URL_ENV: &str = "SWE_VERIFY_FEEDBACK_URL";
/// Optional bearer key for [`HttpFeedbackSink::from_env`].
pub const FEEDBACK_API_KEY_ENV: &str = "SWE_VERIFY_FEEDBACK_API_KEY";

/// Errors raised while sending feedback.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Feedback endpoint not configured (set {0})")]
    NotConfigured(&'static str),

    #[error("Feedback request failed: {0}")]
    RequestFailed(String),

    #[error("Feedback endpoint returned {code}: {message}")]
    Rejected { code: u16, message: String },
}

/// One scored observation attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub run_id: String,
    pub key: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl FeedbackEvent {
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, score: f64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            score,
            comment: None,
            detail: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// The reward event for a record.
    pub fn from_record(run_id: impl Into<String>, record: &RewardRecord) -> Self {
        let comment = format!(
            "Task: {} | Score: {:.0}%",
            record.detail.task_id,
            record.percent()
        );
        Self::new(run_id, "reward", record.reward)
            .with_comment(comment)
            .with_detail(serde_json::to_value(&record.detail).unwrap_or_default())
    }

    /// Cost of the agent run in USD.
    pub fn cost(run_id: impl Into<String>, usd: f64) -> Self {
        Self::new(run_id, "cost_usd", usd).with_comment(format!("Agent cost: ${:.4}", usd))
    }

    /// Number of agent steps taken.
    pub fn steps(run_id: impl Into<String>, steps: u64) -> Self {
        Self::new(run_id, "steps", steps as f64).with_comment(format!("Agent steps: {}", steps))
    }
}

/// Destination for feedback events.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &FeedbackEvent) -> Result<(), FeedbackError>;
}

/// Sends every event, logging failures instead of returning them.
///
/// Returns the number of events delivered.
pub async fn forward(sink: &dyn FeedbackSink, events: &[FeedbackEvent]) -> usize {
    let mut sent = 0;
    for event in events {
        match sink.send(event).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(
                sink = %sink.name(),
                run_id = %event.run_id,
                key = %event.key,
                error = %e,
                "Failed to send feedback"
            ),
        }
    }
    sent
}

/// Emits feedback as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl FeedbackSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &FeedbackEvent) -> Result<(), FeedbackError> {
        info!(
            run_id = %event.run_id,
            key = %event.key,
            score = event.score,
            comment = event.comment.as_deref().unwrap_or(""),
            "Feedback"
        );
        Ok(())
    }
}

/// POSTs feedback events as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpFeedbackSink {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpFeedbackSink {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, FeedbackError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FeedbackError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Reads `SWE_VERIFY_FEEDBACK_URL` and `SWE_VERIFY_FEEDBACK_API_KEY`.
    pub fn from_env() -> Result<Self, FeedbackError> {
        let endpoint = env::var(FEEDBACK_URL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(FeedbackError::NotConfigured(FEEDBACK_URL_ENV))?;
        let api_key = env::var(FEEDBACK_API_KEY_ENV).ok().filter(|s| !s.is_empty());
        Self::new(endpoint, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FeedbackSink for HttpFeedbackSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, event: &FeedbackEvent) -> Result<(), FeedbackError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .json(event)
            .send()
            .await
            .map_err(|e| FeedbackError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(FeedbackError::Rejected {
                code: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Picks the HTTP sink when configured, otherwise logs.
pub fn default_sink() -> Box<dyn FeedbackSink> {
    match HttpFeedbackSink::from_env() {
        Ok(sink) => Box::new(sink),
        Err(_) => Box::new(LogSink),
    }
}
