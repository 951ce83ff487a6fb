//! Ordered-fallback resolution: try each source in turn, first success wins.

use anyhow::{Result, anyhow};
use std::fmt::Display;
use std::future::Future;
use tracing::debug;

/// Runs `attempt` against each source in order and returns the first success
/// together with the source that produced it.
///
/// # Errors
///
/// Fails with every attempt's error listed when no source succeeds, or when
/// `sources` is empty.
pub async fn first_success<'a, S, T, F, Fut>(sources: &'a [S], mut attempt: F) -> Result<(&'a S, T)>
where
    S: Display,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = Vec::new();
    for source in sources {
        match attempt(source).await {
            Ok(value) => return Ok((source, value)),
            Err(e) => {
                debug!(source = %source, error = %e, "Source failed, trying next");
                failures.push(format!("{source}: {e}"));
            }
        }
    }
    if failures.is_empty() {
        return Err(anyhow!("no sources configured"));
    }
    Err(anyhow!("all sources failed: {}", failures.join("; ")))
}
