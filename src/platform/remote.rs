//! Platform client backed by the session bridge.
//!
//! Translates pipeline-level actions into bridge REST calls against a
//! specific browser session and maps bridge failures onto platform
//! outcomes. The bridge reports a confirmed platform refusal with a 422,
//! which becomes [`PlatformError::Rejected`]; everything else surfaces as
//! a bridge error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::{BridgeClient, BrowserSession};
use crate::error::{BridgeError, PlatformError};
use crate::store::EngagementSnapshot;

use super::{PlatformClient, VerifyProbe};

/// Bridge status used to signal a confirmed platform refusal.
const REJECTED_STATUS: u16 = 422;

/// Internal request structure for publishing a part.
#[derive(Debug, Serialize)]
struct PostRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

/// Internal response structure for a published part.
#[derive(Debug, Deserialize)]
struct PostResponse {
    post_id: String,
}

/// Internal request structure for a verification lookup.
#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    text: &'a str,
    since: chrono::DateTime<chrono::Utc>,
}

/// Internal response structure for a verification lookup.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    post_id: Option<String>,
}

/// Internal response structure for engagement metrics.
#[derive(Debug, Deserialize)]
struct MetricsResponse {
    impressions: i64,
    likes: i32,
    replies: i32,
    reposts: i32,
}

/// Platform client that drives the platform UI through the bridge.
pub struct RemotePlatform {
    bridge: Arc<BridgeClient>,
}

impl RemotePlatform {
    /// Creates a platform client over an existing bridge connection.
    pub fn new(bridge: Arc<BridgeClient>) -> Self {
        Self { bridge }
    }

    fn map_bridge_error(error: BridgeError) -> PlatformError {
        match error {
            BridgeError::Api { status, body } if status == REJECTED_STATUS => {
                PlatformError::Rejected { reason: body }
            }
            other => PlatformError::Bridge(other),
        }
    }
}

#[async_trait]
impl PlatformClient for RemotePlatform {
    async fn deliver_part(
        &self,
        session: &BrowserSession,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String, PlatformError> {
        let request = PostRequest { text, reply_to };
        let path = format!("/sessions/{}/posts", session.id);

        let response: PostResponse = self
            .bridge
            .post_json(&path, &request)
            .await
            .map_err(Self::map_bridge_error)?;

        tracing::debug!(
            session_id = %session.id,
            post_id = %response.post_id,
            reply_to = ?reply_to,
            "Delivered part"
        );
        Ok(response.post_id)
    }

    async fn verify(
        &self,
        session: &BrowserSession,
        probe: &VerifyProbe,
    ) -> Result<Option<String>, PlatformError> {
        let request = VerifyRequest {
            text: &probe.text,
            since: probe.since,
        };
        let path = format!("/sessions/{}/verify", session.id);

        let response: VerifyResponse = self
            .bridge
            .post_json(&path, &request)
            .await
            .map_err(Self::map_bridge_error)?;

        tracing::debug!(
            session_id = %session.id,
            fingerprint = %probe.fingerprint,
            found = response.post_id.is_some(),
            "Verification lookup"
        );
        Ok(response.post_id)
    }

    async fn scrape_metrics(
        &self,
        session: &BrowserSession,
        external_id: &str,
    ) -> Result<EngagementSnapshot, PlatformError> {
        let path = format!("/sessions/{}/posts/{}/metrics", session.id, external_id);

        let response: MetricsResponse = self
            .bridge
            .get_json(&path)
            .await
            .map_err(Self::map_bridge_error)?;

        Ok(EngagementSnapshot {
            impressions: response.impressions,
            likes: response.likes,
            replies: response.replies,
            reposts: response.reposts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status_maps_to_rejected() {
        let error = BridgeError::Api {
            status: 422,
            body: "duplicate content".to_string(),
        };

        let mapped = RemotePlatform::map_bridge_error(error);
        assert!(matches!(
            mapped,
            PlatformError::Rejected { ref reason } if reason == "duplicate content"
        ));
        assert!(!mapped.needs_verification());
    }

    #[test]
    fn test_other_statuses_stay_bridge_errors() {
        let error = BridgeError::Api {
            status: 500,
            body: "internal".to_string(),
        };

        let mapped = RemotePlatform::map_bridge_error(error);
        assert!(matches!(mapped, PlatformError::Bridge(_)));
    }

    #[test]
    fn test_post_request_skips_absent_reply_target() {
        let request = PostRequest {
            text: "hello",
            reply_to: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("reply_to"));

        let request = PostRequest {
            text: "hello",
            reply_to: Some("12345"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"reply_to\":\"12345\""));
    }

    #[test]
    fn test_verify_probe_new() {
        let since = chrono::Utc::now();
        let probe = VerifyProbe::new("lead text", "abc123", since);
        assert_eq!(probe.text, "lead text");
        assert_eq!(probe.fingerprint, "abc123");
        assert_eq!(probe.since, since);
    }
}
