use std::time::Duration;

use anyhow::Context;
use redis::{
    Client, Pipeline,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::{sync::OnceCell, time::timeout};
use tracing::{debug, info, warn};

use super::CacheBackend;

/// A [`CacheBackend`] on a redis server.
///
/// Connects lazily, so an unreachable server only turns requests into cache misses. Reads are one
/// `MGET`, writes are one atomic pipeline of `SET key value EX ttl`. Every round trip, connecting
/// included, is abandoned after the configured timeout.
pub struct RedisBackend {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisBackend {
    /// # Errors
    ///
    /// This function fails if `url` is not a valid redis url.
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::open(url).context("invalid redis url")?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            timeout,
        })
    }

    async fn conn(&self) -> anyhow::Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("connecting to redis");
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout)
                    .set_number_of_retries(1);
                let conn = ConnectionManager::new_with_config(self.client.clone(), config).await?;
                info!("connected to redis");
                anyhow::Ok(conn)
            })
            .await
            .context("connecting to redis")?;

        // cheap, shares the underlying multiplexed connection
        Ok(conn.clone())
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        let mut conn = self.conn().await?;

        let values = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .context("MGET")?;

        Ok(values)
    }

    async fn write(&self, pipe: Pipeline) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;

        pipe.query_async::<()>(&mut conn)
            .await
            .context("pipelined SET EX")
    }
}

/// One `SETEX` per entry inside `MULTI`/`EXEC`.
fn write_pipeline(entries: &[(String, String)], ttl: Duration) -> Pipeline {
    // redis rejects an expiry of 0
    let seconds = ttl.as_secs().max(1);

    let mut pipe = redis::pipe();
    pipe.atomic();
    for (key, value) in entries {
        pipe.set_ex(key, value, seconds).ignore();
    }
    pipe
}

/// Raw values are bytes; one that is not utf-8 only misses its own key.
fn decode_values(keys: &[String], raw: Vec<Option<Vec<u8>>>) -> Vec<Option<String>> {
    keys.iter()
        .zip(raw)
        .map(|(key, value)| match String::from_utf8(value?) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring non utf-8 cache entry for `{key}`");
                None
            }
        })
        .collect()
}

impl CacheBackend for RedisBackend {
    async fn get_many(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        let raw = timeout(self.timeout, self.mget(keys))
            .await
            .context("redis read timed out")??;

        if raw.len() != keys.len() {
            // let the caller see the mismatch
            return Ok(raw.into_iter().map(|_| None).collect());
        }

        Ok(decode_values(keys, raw))
    }

    async fn set_many(&self, entries: Vec<(String, String)>, ttl: Duration) -> anyhow::Result<()> {
        let pipe = write_pipeline(&entries, ttl);

        timeout(self.timeout, self.write(pipe))
            .await
            .context("redis write timed out")?
    }
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connected", &self.conn.initialized())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
