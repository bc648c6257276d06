//! Deadline and cancellation for external calls.
//!
//! Every call to an embedding service, language model or translator is run
//! through [`bounded`], which races the call against a timeout and a
//! [`CancellationToken`]. A hung network call therefore always resolves, and
//! a conversation reset can abandon it.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RagError;

/// Run `fut` with a deadline and a cancellation token.
///
/// The outer `Result` reports interruption ([`RagError::Timeout`] or
/// [`RagError::Cancelled`]); the inner one is the call's own outcome, which
/// the caller maps onto the error variant of its stage.
pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<anyhow::Result<T>, RagError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RagError::Cancelled { operation }),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => Ok(inner),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "external call timed out");
                Err(RagError::Timeout { operation, after: limit })
            }
        },
    }
}
