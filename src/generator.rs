//! Content generation source and intake validation.
//!
//! The generation job asks an external service for the next piece of
//! content to post, validates it against platform limits, and enqueues it
//! as a decision unless identical content is already active. The service
//! is optional; without one the operator enqueues decisions by hand.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::OutpostConfig;
use crate::error::GeneratorError;
use crate::store::{NewDecision, Payload, Store, StoreError};

/// A draft produced by a content source.
#[derive(Debug, Clone)]
pub struct GeneratedContent {
    /// What to post.
    pub payload: Payload,
    /// Free-form provenance note from the generator, logged but not stored.
    pub source: Option<String>,
}

/// Source of drafts for the generation job.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Returns the next draft, or `None` when there is nothing to post.
    async fn next_content(&self) -> Result<Option<GeneratedContent>, GeneratorError>;
}

/// Internal response structure from the generator service.
#[derive(Debug, Deserialize)]
struct ApiContent {
    #[serde(flatten)]
    payload: Payload,
    #[serde(default)]
    source: Option<String>,
}

/// Content source backed by an HTTP generator service.
///
/// The service answers `GET` on its content endpoint with a payload in the
/// decision wire shape, or `204 No Content` when it has nothing queued.
pub struct HttpContentSource {
    url: String,
    http: reqwest::Client,
}

impl HttpContentSource {
    /// Creates a source for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `GeneratorError::NotConfigured` if the HTTP client cannot
    /// be built, which only happens with a broken TLS environment.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, GeneratorError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(GeneratorError::Request)?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }

    /// Creates a source from application configuration.
    ///
    /// # Errors
    ///
    /// Returns `GeneratorError::NotConfigured` when no generator URL is set.
    pub fn from_config(config: &OutpostConfig) -> Result<Self, GeneratorError> {
        let url = config
            .generator_url
            .clone()
            .ok_or(GeneratorError::NotConfigured)?;
        Self::new(url, Duration::from_secs(30))
    }

    /// The endpoint this source polls.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn next_content(&self) -> Result<Option<GeneratedContent>, GeneratorError> {
        let response = self.http.get(&self.url).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response".to_string());
            return Err(GeneratorError::Api { status, body });
        }

        let content: ApiContent = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidPayload(format!("malformed response: {e}")))?;

        Ok(Some(GeneratedContent {
            payload: content.payload,
            source: content.source,
        }))
    }
}

/// Checks a payload against platform limits.
///
/// # Errors
///
/// Returns `GeneratorError::InvalidPayload` naming the first violated
/// constraint: empty parts, parts over the character limit, threads that
/// are too short or too long, or a reply without a target.
pub fn validate_payload(
    payload: &Payload,
    max_part_chars: usize,
    max_thread_parts: usize,
) -> Result<(), GeneratorError> {
    fn check_part(text: &str, position: usize, max_chars: usize) -> Result<(), GeneratorError> {
        if text.trim().is_empty() {
            return Err(GeneratorError::InvalidPayload(format!(
                "part {position} is empty"
            )));
        }
        let chars = text.chars().count();
        if chars > max_chars {
            return Err(GeneratorError::InvalidPayload(format!(
                "part {position} has {chars} characters, limit is {max_chars}"
            )));
        }
        Ok(())
    }

    match payload {
        Payload::Single { text } => check_part(text, 1, max_part_chars),
        Payload::Thread { parts } => {
            if parts.len() < 2 {
                return Err(GeneratorError::InvalidPayload(
                    "thread needs at least two parts".to_string(),
                ));
            }
            if parts.len() > max_thread_parts {
                return Err(GeneratorError::InvalidPayload(format!(
                    "thread has {} parts, limit is {max_thread_parts}",
                    parts.len()
                )));
            }
            for (idx, part) in parts.iter().enumerate() {
                check_part(part, idx + 1, max_part_chars)?;
            }
            Ok(())
        }
        Payload::Reply { target, text } => {
            if target.trim().is_empty() {
                return Err(GeneratorError::InvalidPayload(
                    "reply target is empty".to_string(),
                ));
            }
            check_part(text, 1, max_part_chars)
        }
    }
}

/// Errors from a generation run.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a single generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    /// Decision created from the draft, if any.
    pub enqueued: Option<Uuid>,
    /// Active decision the draft duplicated, if it was skipped.
    pub duplicate_of: Option<Uuid>,
}

impl GenerationReport {
    /// Whether the run added a decision to the queue.
    pub fn produced(&self) -> bool {
        self.enqueued.is_some()
    }
}

/// Pulls one draft from the source and enqueues it as a decision.
///
/// Drafts are validated before intake and dropped when identical content
/// was posted or is being delivered within the dedup lookback window. An
/// empty source is not an error.
pub async fn run_generation(
    source: &dyn ContentSource,
    store: &dyn Store,
    config: &OutpostConfig,
) -> Result<GenerationReport, GenerationError> {
    let Some(content) = source.next_content().await? else {
        tracing::debug!("Content source has nothing to post");
        return Ok(GenerationReport::default());
    };

    validate_payload(&content.payload, config.max_part_chars, config.max_thread_parts)?;

    let draft = NewDecision::new(content.payload).with_max_attempts(config.max_attempts as i32);
    let fingerprint = draft.fingerprint();

    if let Some(existing) = store
        .find_recent_fingerprint(&fingerprint, config.dedup_lookback)
        .await?
    {
        tracing::info!(
            existing_id = %existing.id,
            fingerprint = %fingerprint,
            "Skipping draft; identical content already active"
        );
        return Ok(GenerationReport {
            enqueued: None,
            duplicate_of: Some(existing.id),
        });
    }

    let decision = store.enqueue(draft).await?;
    tracing::info!(
        decision_id = %decision.id,
        kind = %decision.kind,
        source = content.source.as_deref().unwrap_or("unattributed"),
        "Enqueued generated decision"
    );

    Ok(GenerationReport {
        enqueued: Some(decision.id),
        duplicate_of: None,
    })
}
