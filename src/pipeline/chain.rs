//! Sequential part delivery for single posts, threads, and replies.

use std::time::Duration;

use tracing::debug;

use crate::browser::BrowserSession;
use crate::error::PlatformError;
use crate::platform::PlatformClient;
use crate::store::Payload;

/// A delivery chain that stopped before every part was published.
#[derive(Debug)]
pub struct ChainFailure {
    /// External ids of the parts confirmed published, in delivery order.
    pub posted: Vec<String>,
    /// The error that stopped the chain.
    pub error: PlatformError,
}

/// Publishes every part of `payload` in order through one browser session.
///
/// Thread parts chain onto the previous part; a reply chains onto its
/// external target. Each part gets its own `part_budget`, and the first
/// part to miss it or fail stops the chain. The failure carries the ids
/// that did land, so the caller can decide whether the decision still
/// counts as posted.
pub async fn deliver_chain(
    platform: &dyn PlatformClient,
    session: &BrowserSession,
    payload: &Payload,
    part_budget: Duration,
) -> Result<Vec<String>, ChainFailure> {
    let parts = payload.parts();
    let mut posted = Vec::with_capacity(parts.len());
    let mut previous: Option<String> = payload.reply_target().map(str::to_string);

    for (index, text) in parts.iter().enumerate() {
        let attempt = platform.deliver_part(session, text, previous.as_deref());
        let external_id = match tokio::time::timeout(part_budget, attempt).await {
            Ok(Ok(id)) => id,
            Ok(Err(error)) => return Err(ChainFailure { posted, error }),
            Err(_) => {
                return Err(ChainFailure {
                    posted,
                    error: PlatformError::Timeout {
                        elapsed: part_budget,
                    },
                })
            }
        };

        debug!(
            part = index + 1,
            total = parts.len(),
            external_id = %external_id,
            "Part published"
        );
        posted.push(external_id.clone());
        previous = Some(external_id);
    }

    Ok(posted)
}
