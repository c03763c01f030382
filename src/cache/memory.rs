use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use super::CacheBackend;

/// An in-process [`CacheBackend`], used when no redis server is configured.
///
/// Entries expire like redis keys do: an expired entry reads as missing and is dropped on the next write.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not expired yet.
    ///
    /// # Panics
    ///
    /// Will panic if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("shouldnt be poisoned")
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryBackend {
    async fn get_many(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("shouldnt be poisoned");

        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|(_, expires)| *expires > now)
                    .map(|(value, _)| value.clone())
            })
            .collect())
    }

    async fn set_many(&self, new: Vec<(String, String)>, ttl: Duration) -> anyhow::Result<()> {
        let now = Instant::now();
        let expires = now + ttl;
        let mut entries = self.entries.lock().expect("shouldnt be poisoned");

        entries.retain(|_, (_, at)| *at > now);
        entries.extend(new.into_iter().map(|(key, value)| (key, (value, expires))));

        Ok(())
    }
}
