//! Platform actions executed through a leased browser session.
//!
//! The [`PlatformClient`] trait is the seam between the delivery pipeline
//! and the social platform itself. The production implementation drives
//! the platform UI through the session bridge; tests script outcomes with
//! in-memory fakes.

pub mod remote;

pub use remote::RemotePlatform;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::browser::BrowserSession;
use crate::error::PlatformError;
use crate::store::EngagementSnapshot;

/// Evidence used to find a post whose delivery outcome is unknown.
///
/// Built before a delivery attempt starts so a timed-out attempt can be
/// checked against what actually landed on the platform.
#[derive(Debug, Clone)]
pub struct VerifyProbe {
    /// Lead text of the post being looked for.
    pub text: String,
    /// Content fingerprint of the decision, for logging and correlation.
    pub fingerprint: String,
    /// Only posts published at or after this instant count as a match.
    pub since: DateTime<Utc>,
}

impl VerifyProbe {
    /// Creates a probe for content delivered no earlier than `since`.
    pub fn new(text: impl Into<String>, fingerprint: impl Into<String>, since: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            fingerprint: fingerprint.into(),
            since,
        }
    }
}

/// Actions the pipeline can take against the platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Publishes one part and returns its platform-assigned post id.
    ///
    /// `reply_to` chains the part under an existing post: the previous part
    /// of a thread, or the external target of a reply decision.
    async fn deliver_part(
        &self,
        session: &BrowserSession,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String, PlatformError>;

    /// Looks for a post matching the probe.
    ///
    /// Returns the external id when a matching post is visible, `None` when
    /// nothing matching landed.
    async fn verify(
        &self,
        session: &BrowserSession,
        probe: &VerifyProbe,
    ) -> Result<Option<String>, PlatformError>;

    /// Reads current engagement numbers for a published post.
    async fn scrape_metrics(
        &self,
        session: &BrowserSession,
        external_id: &str,
    ) -> Result<EngagementSnapshot, PlatformError>;
}
