//! Redis Backend - Remote Storage (feature `redis`)
//!
//! Each item is a Redis hash with two fields: `v` (tag byte + payload) and
//! `m` (modification time in milliseconds since the epoch). Expiry is
//! delegated to Redis itself: writes and touches set `PEXPIRE` from the
//! adapter's `ttl`, or `PERSIST` when it is zero.

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use redis::{Client, Connection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::options::{OptionRule, OptionSpec, OptionValue, OptionsSchema};
use crate::traits::{Capabilities, ItemContext, StorageBackend};
use crate::value::{CacheValue, Metadata};

const TAG_STRING: u8 = 0;
const TAG_BYTES: u8 = 1;
const TAG_JSON: u8 = 2;

/// `REDIS_URL`, or a local server
#[must_use]
pub fn default_server() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Redis backend over one synchronous connection
pub struct RedisBackend {
    conn: Mutex<Connection>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl RedisBackend {
    /// Backend-specific settings: `server` (default `REDIS_URL` or local)
    #[must_use]
    pub fn schema() -> OptionsSchema {
        OptionsSchema::new()
            .with(OptionSpec::with_default("server", OptionRule::string(), default_server()))
    }

    /// Connect to `REDIS_URL` (or `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub fn new() -> Result<Self> {
        Self::with_url(&default_server())
    }

    /// Connect to a specific server
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis client cannot be created or connection fails.
    pub fn with_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis backend");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;
        let mut conn = client
            .get_connection()
            .context("Failed to establish Redis connection")?;

        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis backend connected successfully");

        Ok(Self {
            conn: Mutex::new(conn),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    /// `(hits, misses, sets)`
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
        )
    }

    fn encode(value: &CacheValue) -> Result<Vec<u8>> {
        let (tag, payload) = match value {
            CacheValue::String(s) => (TAG_STRING, s.as_bytes().to_vec()),
            CacheValue::Bytes(b) => (TAG_BYTES, b.clone()),
            other => (TAG_JSON, serde_json::to_vec(other)?),
        };
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(tag);
        buf.extend(payload);
        Ok(buf)
    }

    fn decode(key: &str, buf: &[u8]) -> Result<CacheValue> {
        let Some((tag, payload)) = buf.split_first() else {
            bail!("Redis item '{key}' is empty");
        };
        match *tag {
            TAG_STRING => Ok(CacheValue::String(
                String::from_utf8(payload.to_vec()).context("Redis string item is not UTF-8")?,
            )),
            TAG_BYTES => Ok(CacheValue::Bytes(payload.to_vec())),
            TAG_JSON => Ok(serde_json::from_slice(payload)?),
            other => bail!("Redis item '{key}' has unknown tag {other}"),
        }
    }

    /// Queue the write of `buf` plus the expiry policy on `pipe`
    fn queue_write(pipe: &mut redis::Pipeline, key: &str, buf: Vec<u8>, ttl: Option<Duration>) {
        pipe.cmd("HSET")
            .arg(key)
            .arg("v")
            .arg(buf)
            .arg("m")
            .arg(now_millis())
            .ignore();
        Self::queue_expiry(pipe, key, ttl);
    }

    fn queue_expiry(pipe: &mut redis::Pipeline, key: &str, ttl: Option<Duration>) {
        match ttl {
            Some(ttl) => {
                let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                pipe.cmd("PEXPIRE").arg(key).arg(ms).ignore();
            }
            None => {
                pipe.cmd("PERSIST").arg(key).ignore();
            }
        }
    }
}

// ===== Trait Implementations =====

impl StorageBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            structured_values: true,
            clear_expired: false,
            optimize: false,
            // Expiry is fixed when an item is written or touched
            read_time_expiry: false,
            max_key_length: Some(512 * 1024 * 1024),
        }
    }

    fn get(&self, key: &str, _ctx: &ItemContext) -> Result<Option<CacheValue>> {
        let buf: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg("v")
            .query(&mut *self.conn.lock())?;
        match buf {
            Some(buf) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Self::decode(key, &buf).map(Some)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn has(&self, key: &str, _ctx: &ItemContext) -> Result<bool> {
        let exists: bool = redis::cmd("EXISTS").arg(key).query(&mut *self.conn.lock())?;
        Ok(exists)
    }

    fn metadata(&self, key: &str, _ctx: &ItemContext) -> Result<Option<Metadata>> {
        let (len, mtime, pttl): (Option<u64>, Option<u64>, i64) = redis::pipe()
            .cmd("HSTRLEN")
            .arg(key)
            .arg("v")
            .cmd("HGET")
            .arg(key)
            .arg("m")
            .cmd("PTTL")
            .arg(key)
            .query(&mut *self.conn.lock())?;

        let Some(mtime) = mtime else {
            return Ok(None);
        };
        let now = SystemTime::now();
        Ok(Some(Metadata {
            mtime: UNIX_EPOCH + Duration::from_millis(mtime),
            expires_at: u64::try_from(pttl)
                .ok()
                .and_then(|ms| now.checked_add(Duration::from_millis(ms))),
            size: len.map(|n| n.saturating_sub(1)),
        }))
    }

    fn set(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        let buf = Self::encode(&value)?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        Self::queue_write(&mut pipe, key, buf, ctx.ttl);
        pipe.query::<()>(&mut *self.conn.lock())?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "[Redis] Stored item");
        Ok(true)
    }

    fn add(&self, key: &str, value: CacheValue, ctx: &ItemContext) -> Result<bool> {
        let buf = Self::encode(&value)?;
        let mut conn = self.conn.lock();
        // HSETNX on the value field decides the race; the rest follows it
        let created: bool = redis::cmd("HSETNX")
            .arg(key)
            .arg("v")
            .arg(buf.as_slice())
            .query(&mut *conn)?;
        if !created {
            return Ok(false);
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::queue_write(&mut pipe, key, buf, ctx.ttl);
        pipe.query::<()>(&mut *conn)?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        let mut conn = self.conn.lock();
        let exists: bool = redis::cmd("EXISTS").arg(key).query(&mut *conn)?;
        if !exists {
            return Ok(false);
        }
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(key)
            .arg("m")
            .arg(now_millis())
            .ignore();
        Self::queue_expiry(&mut pipe, key, ctx.ttl);
        pipe.query::<()>(&mut *conn)?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let removed: u64 = redis::cmd("DEL").arg(key).query(&mut *self.conn.lock())?;
        Ok(removed > 0)
    }

    fn increment(&self, key: &str, delta: i64, ctx: &ItemContext) -> Result<i64> {
        let mut conn = self.conn.lock();
        let outcome: std::result::Result<i64, String> =
            redis::transaction(&mut *conn, &[key], |conn, pipe| {
                let current: Option<Vec<u8>> = redis::cmd("HGET").arg(key).arg("v").query(conn)?;
                let next = match current.as_deref().map(|buf| Self::decode(key, buf)) {
                    None => delta,
                    Some(Ok(CacheValue::Int(n))) => match n.checked_add(delta) {
                        Some(next) => next,
                        None => {
                            return Ok(Some(Err(format!(
                                "incrementing '{key}' by {delta} overflows"
                            ))));
                        }
                    },
                    Some(Ok(other)) => {
                        return Ok(Some(Err(format!(
                            "cannot increment {} item '{key}'",
                            other.kind()
                        ))));
                    }
                    Some(Err(e)) => return Ok(Some(Err(e.to_string()))),
                };
                let buf = match Self::encode(&CacheValue::Int(next)) {
                    Ok(buf) => buf,
                    Err(e) => return Ok(Some(Err(e.to_string()))),
                };
                Self::queue_write(pipe, key, buf, ctx.ttl);
                pipe.cmd("HGET").arg(key).arg("m");
                // None means the watched key changed and the closure reruns
                pipe.query::<Option<(u64,)>>(conn)
                    .map(|done| done.map(|_| Ok(next)))
            })?;
        match outcome {
            Ok(next) => Ok(next),
            Err(reason) => bail!(reason),
        }
    }

    fn flush(&self) -> Result<()> {
        let () = redis::cmd("FLUSHDB").query(&mut *self.conn.lock())?;
        debug!("[Redis] Flushed database");
        Ok(())
    }

    fn configure(&self, name: &str, value: &OptionValue) {
        if name == "server" {
            warn!(
                value = ?value,
                "[Redis] server is fixed once connected; rebuild the adapter to apply it"
            );
        }
    }
}
