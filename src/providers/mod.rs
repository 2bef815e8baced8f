//! Upstream collaborator interfaces
//!
//! The engine consumes abstract data and results providers; concrete
//! HTTP clients live with the surrounding service. Network-facing
//! implementations are expected to honor the retry/timeout helper here
//! so a hung upstream call never starves the scheduling loop.

pub mod mock;

use crate::error::{EngineError, Result};
use crate::types::{EntryId, Outcome, Race, RaceId, RawSignals, WeatherSample};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Supplies the race calendar and per-entry raw signals
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Races scheduled within the given lookahead from now
    async fn get_upcoming_races(&self, within: chrono::Duration) -> Result<Vec<Race>>;

    /// Raw signals for one entry in one race
    async fn get_feature_signals(&self, race_id: &RaceId, entry_id: &EntryId)
        -> Result<RawSignals>;

    /// Latest weather for a race session; None when no forecast exists yet
    async fn get_weather(&self, race_id: &RaceId) -> Result<Option<WeatherSample>>;
}

/// Supplies official results once a race has finished
#[async_trait]
pub trait ResultsProvider: Send + Sync {
    /// Per-entry outcomes; None when results are not yet available
    async fn get_results(&self, race_id: &RaceId)
        -> Result<Option<HashMap<EntryId, Outcome>>>;
}

/// Run an upstream call with a per-attempt timeout and bounded
/// exponential backoff. Every failure path maps to `DataUnavailable` so
/// callers can isolate it to the current entry/race.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    retries: u32,
    per_attempt: Duration,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Duration::from_millis(200);
    let mut last_error = String::new();
    for attempt in 0..=retries {
        match tokio::time::timeout(per_attempt, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                last_error = e.to_string();
                warn!("[Fetch] {} attempt {} failed: {}", label, attempt + 1, e);
            }
            Err(_) => {
                last_error = format!("timed out after {:?}", per_attempt);
                warn!("[Fetch] {} attempt {} timed out", label, attempt + 1);
            }
        }
        if attempt < retries {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
        }
    }
    Err(EngineError::DataUnavailable(format!(
        "{label}: {last_error}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("signals", 3, Duration::from_secs(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::DataUnavailable("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_data_unavailable() {
        let result: Result<u32> = with_retry("signals", 1, Duration::from_secs(1), || async {
            Err(EngineError::DataUnavailable("down".into()))
        })
        .await;
        assert!(matches!(result, Err(EngineError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn test_retry_times_out_hung_call() {
        let result: Result<u32> =
            with_retry("signals", 0, Duration::from_millis(20), || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(EngineError::DataUnavailable(_))));
    }
}
