use std::collections::HashMap;

use tokio::sync::Mutex;

/// One-shot-per-`token_id` replay protection. `usedUntil` is supplied
/// by the caller as `ceil(exp + clockSkew)`, so a replay attempted
/// inside the skew window still fails even though the token itself
/// would still pass `verify`.
#[derive(Default)]
pub struct ReplayCache {
    used: Mutex<HashMap<String, i64>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects an empty `token_id` outright. Returns `false` if a live
    /// entry (`used_until >= now`) already exists for it; otherwise
    /// records `used_until` and returns `true`.
    pub async fn try_use(&self, token_id: &str, used_until: i64, now: i64) -> bool {
        if token_id.is_empty() {
            return false;
        }
        let mut used = self.used.lock().await;
        if let Some(existing) = used.get(token_id) {
            if *existing >= now {
                return false;
            }
        }
        used.insert(token_id.to_string(), used_until);
        true
    }

    /// Evicts entries whose `used_until` has passed `now`. Called from
    /// the tunnel's cleanup loop alongside channel expiry sweeps.
    pub async fn cleanup(&self, now: i64) {
        let mut used = self.used.lock().await;
        used.retain(|_, used_until| *used_until >= now);
    }

    pub async fn len(&self) -> usize {
        self.used.lock().await.len()
    }
}
