pub mod memory;
pub mod redis;

pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

use std::{collections::HashMap, future::Future, time::Duration};

use anyhow::Context;
use tracing::{debug, warn};

use crate::color::AlbumColors;

/// A key/value store that can read and write many string values in one round trip.
pub trait CacheBackend: Send + Sync + 'static {
    /// One value per key, in the same order as `keys`.
    fn get_many(
        &self,
        keys: &[String],
    ) -> impl Future<Output = anyhow::Result<Vec<Option<String>>>> + Send;

    /// Write every entry as one batch, each expiring after `ttl`.
    fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Album colors stored as json in a [`CacheBackend`].
///
/// Reads never fail: an unreachable backend or an unreadable entry is a miss.
#[derive(Debug)]
pub struct ColorCache<B> {
    backend: B,
    ttl: Duration,
}

impl<B: CacheBackend> ColorCache<B> {
    #[must_use]
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Look up every album in `keys`, returning `None` for each one without a valid entry.
    pub async fn get(&self, keys: &[String]) -> Vec<Option<AlbumColors>> {
        if keys.is_empty() {
            return Vec::new();
        }

        let values = match self.backend.get_many(keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                warn!(
                    "cache returned {} values for {} keys, treating all as misses",
                    values.len(),
                    keys.len()
                );
                return vec![None; keys.len()];
            }
            Err(err) => {
                warn!("cache read failed, treating all as misses: {err:#}");
                return vec![None; keys.len()];
            }
        };

        let entries: Vec<Option<AlbumColors>> = keys
            .iter()
            .zip(values)
            .map(|(key, value)| {
                let value = value?;
                match serde_json::from_str(&value) {
                    Ok(colors) => Some(colors),
                    Err(err) => {
                        warn!("ignoring corrupt cache entry for `{key}`: {err}");
                        None
                    }
                }
            })
            .collect();

        debug!(
            "cache hits: {}/{}",
            entries.iter().filter(|e| e.is_some()).count(),
            keys.len()
        );

        entries
    }

    /// Store `updates` as a single batch. Nothing is sent if `updates` is empty.
    ///
    /// # Errors
    ///
    /// This function fails if an entry could not be serialized or the backend write failed.
    pub async fn set(&self, updates: &HashMap<String, AlbumColors>) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let entries = updates
            .iter()
            .map(|(key, colors)| -> anyhow::Result<_> {
                Ok((key.clone(), serde_json::to_string(colors)?))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        self.backend
            .set_many(entries, self.ttl)
            .await
            .with_context(|| format!("writing {} cache entries", updates.len()))?;

        debug!("cached {} albums", updates.len());

        Ok(())
    }
}
