use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::models::TokenEntry;

struct CacheSlot {
    entry: TokenEntry,
    expires_at: Instant,
}

/// Short-TTL memo of resolved upstream origins, saving a directory hit
/// (and its timestamp refresh) on bursts of sub-resource requests. The
/// router keys entries as `token:<token>`.
///
/// Each insert schedules its own eviction; lookups treat an expired
/// slot that has not been evicted yet the same as an absent one.
#[derive(Clone)]
pub struct ResolverCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CacheSlot>>>,
}

impl ResolverCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, token: &str) -> Option<TokenEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get(token) {
            Some(slot) if slot.expires_at > Instant::now() => Some(slot.entry.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, token: &str, entry: TokenEntry) {
        let expires_at = Instant::now() + self.ttl;
        {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.insert(
                token.to_string(),
                CacheSlot {
                    entry,
                    expires_at,
                },
            );
        }

        let token = token.to_string();
        let ttl = self.ttl;
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut entries = entries.lock().unwrap_or_else(|p| p.into_inner());
            // a fresher insert may have extended the slot
            if entries.get(&token).is_some_and(|slot| slot.expires_at <= Instant::now()) {
                entries.remove(&token);
                debug!(%token, "resolver cache entry evicted");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
