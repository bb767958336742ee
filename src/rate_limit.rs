// Fixed-window admission control. Windows are aligned to multiples of
// window_ms since the epoch and each (client, window) pair owns one counter
// document, incremented inside `DocumentStore::transact`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::store::{Committed, DocumentStore, Transition};

// Counter record, one per (client, window start)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowCounter {
    pub key: String,
    pub count: u32,
    pub window_start: i64,
    pub created_at: i64,
    pub expire_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitDecision {
    Allowed,
    // the store failed, request let through anyway
    FailedOpen(String),
    Limited { retry_after_secs: u64 },
}

impl AdmitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AdmitDecision::Limited { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            config,
        }
    }

    // Unidentified clients and a disabled config always pass
    pub async fn admit(&self, client_id: Option<&str>, now_ms: i64) -> AdmitDecision {
        let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
            return AdmitDecision::Allowed;
        };
        if self.config.is_disabled() {
            return AdmitDecision::Allowed;
        }

        let window_ms = i64::try_from(self.config.window_ms).unwrap_or(i64::MAX);
        let max = self.config.max;
        let window_start = now_ms.div_euclid(window_ms) * window_ms;
        let window_end = window_start.saturating_add(window_ms);
        let key = window_key(client_id, window_start);

        let counter_key = key.clone();
        let bump = move |current: Option<&Value>| -> Transition {
            let existing = current
                .and_then(|doc| serde_json::from_value::<RateWindowCounter>(doc.clone()).ok());
            let count = existing.as_ref().map_or(0, |c| c.count);
            if count >= max {
                return Transition::Abort;
            }
            let counter = RateWindowCounter {
                key: counter_key,
                count: count + 1,
                window_start,
                created_at: existing.as_ref().map_or(now_ms, |c| c.created_at),
                expire_at: window_end.saturating_add(window_ms),
            };
            match serde_json::to_value(&counter) {
                Ok(doc) => Transition::Put(doc),
                Err(_) => Transition::Abort,
            }
        };

        match self.store.transact(&self.collection, &key, Box::new(bump)).await {
            Ok(Committed::Written(_)) => AdmitDecision::Allowed,
            Ok(Committed::Aborted) => {
                let remaining_ms = (window_end - now_ms).max(0) as u64;
                let retry_after_secs = remaining_ms.div_ceil(1000);
                debug!(client = client_id, key = %key, retry_after_secs, "rate limit exceeded");
                AdmitDecision::Limited { retry_after_secs }
            }
            Err(err) => {
                warn!(client = client_id, error = %err, "rate limiter store failed, admitting");
                AdmitDecision::FailedOpen(err.to_string())
            }
        }
    }
}

pub fn window_key(client_id: &str, window_start: i64) -> String {
    format!("{client_id}-{window_start}")
}

// Periodically removes counters past their expireAt. Admission never depends on it.
pub async fn counter_reaper(store: Arc<dyn DocumentStore>, collection: String, every: Duration) {
    let mut interval = interval(every);

    debug!(collection = %collection, interval = ?every, "counter reaper started");

    loop {
        interval.tick().await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        match store.purge_expired(&collection, now_ms).await {
            Ok(0) => {}
            Ok(removed) => debug!(collection = %collection, removed, "purged expired counters"),
            Err(err) => warn!(collection = %collection, error = %err, "counter purge failed"),
        }
    }
}
