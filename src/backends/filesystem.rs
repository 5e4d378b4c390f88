//! Filesystem Backend - One File Per Item
//!
//! Items live under `cache_dir`, sharded into sub-directories by the first
//! byte of the hex-encoded key:
//!
//! ```text
//! <cache_dir>/6b/6b6579.dat
//! ```
//!
//! A file holds one tag byte followed by the payload. Only strings and bytes
//! can be stored; structured values need the `Serializer` plugin in front.
//! The modification time is the file's own mtime, so `touch` is a metadata
//! update and expiry survives process restarts.

use anyhow::{Context, Result, bail};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::options::{OptionRule, OptionSpec, OptionValue, OptionsSchema};
use crate::traits::{Capabilities, ItemContext, StorageBackend};
use crate::value::{CacheValue, Metadata};

const TAG_STRING: u8 = 0;
const TAG_BYTES: u8 = 1;
const EXTENSION: &str = "dat";

/// Longest key whose hex encoding still fits common filename limits
pub const MAX_KEY_LENGTH: usize = 120;

/// Default `cache_dir`: `<system temp dir>/pluggable-cache`
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("pluggable-cache")
}

/// File-per-item backend
pub struct FilesystemBackend {
    cache_dir: PathBuf,
}

impl FilesystemBackend {
    /// Backend-specific settings: `cache_dir`
    #[must_use]
    pub fn schema() -> OptionsSchema {
        let dir = default_cache_dir().to_string_lossy().into_owned();
        OptionsSchema::new()
            .with(OptionSpec::with_default("cache_dir", OptionRule::string(), dir))
    }

    /// Open (and create if needed) a cache directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("cannot create cache dir {}", cache_dir.display()))?;
        info!(cache_dir = %cache_dir.display(), "Filesystem backend initialized");
        Ok(Self { cache_dir })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn path(&self, key: &str) -> PathBuf {
        let name = hex::encode(key.as_bytes());
        let shard = name.get(..2).unwrap_or("00").to_string();
        self.cache_dir
            .join(shard)
            .join(format!("{name}.{EXTENSION}"))
    }

    fn encode(key: &str, value: &CacheValue) -> Result<Vec<u8>> {
        let (tag, payload) = match value {
            CacheValue::String(s) => (TAG_STRING, s.as_bytes()),
            CacheValue::Bytes(b) => (TAG_BYTES, b.as_slice()),
            other => bail!(
                "filesystem backend cannot store {} item '{key}'; attach a serializer plugin",
                other.kind()
            ),
        };
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.push(tag);
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    fn decode(path: &Path, mut buf: Vec<u8>) -> Result<CacheValue> {
        if buf.is_empty() {
            bail!("cache file {} is empty", path.display());
        }
        let tag = buf.remove(0);
        match tag {
            TAG_STRING => Ok(CacheValue::String(
                String::from_utf8(buf)
                    .with_context(|| format!("cache file {} is not UTF-8", path.display()))?,
            )),
            TAG_BYTES => Ok(CacheValue::Bytes(buf)),
            other => bail!("cache file {} has unknown tag {other}", path.display()),
        }
    }

    /// mtime of a live item; expired files are deleted
    fn live_mtime(path: &Path, ctx: &ItemContext) -> Result<Option<(SystemTime, u64)>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("cannot stat {}", path.display())),
        };
        let mtime = meta.modified()?;
        if ctx.is_expired(mtime, SystemTime::now()) {
            Self::remove_file(path)?;
            return Ok(None);
        }
        Ok(Some((mtime, meta.len().saturating_sub(1))))
    }

    fn remove_file(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("cannot remove {}", path.display())),
        }
    }

    /// Every item file currently on disk
    fn item_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for shard in fs::read_dir(&self.cache_dir)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let file = file?.path();
                if file.extension().is_some_and(|ext| ext == EXTENSION) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }
}

// ===== Trait Implementations =====

impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            structured_values: false,
            clear_expired: true,
            optimize: true,
            read_time_expiry: true,
            max_key_length: Some(MAX_KEY_LENGTH),
        }
    }

    fn get(&self, key: &str, ctx: &ItemContext) -> Result<Option<CacheValue>> {
        let path = self.path(key);
        if Self::live_mtime(&path, ctx)?.is_none() {
            return Ok(None);
        }
        match fs::read(&path) {
            Ok(buf) => Self::decode(&path, buf).map(Some),
            // Removed between stat and read
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    fn has(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        Ok(Self::live_mtime(&self.path(key), ctx)?.is_some())
    }

    fn metadata(&self, key: &str, ctx: &ItemContext) -> Result<Option<Metadata>> {
        Ok(Self::live_mtime(&self.path(key), ctx)?.map(|(mtime, size)| Metadata {
            mtime,
            expires_at: ctx.expires_at(mtime),
            size: Some(size),
        }))
    }

    fn set(&self, key: &str, value: CacheValue, _ctx: &ItemContext) -> Result<bool> {
        let buf = Self::encode(key, &value)?;
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write-then-rename so readers never see a partial file
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, &buf).with_context(|| format!("cannot write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("cannot move item into {}", path.display()));
        }
        debug!(key = %key, bytes = buf.len(), "[Filesystem] Stored item");
        Ok(true)
    }

    fn touch(&self, key: &str, ctx: &ItemContext) -> Result<bool> {
        let path = self.path(key);
        if Self::live_mtime(&path, ctx)?.is_none() {
            return Ok(false);
        }
        let file = match File::options().write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("cannot open {}", path.display())),
        };
        file.set_modified(SystemTime::now())?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Self::remove_file(&self.path(key))
    }

    fn flush(&self) -> Result<()> {
        for file in self.item_files()? {
            Self::remove_file(&file)?;
        }
        self.optimize()?;
        debug!(cache_dir = %self.cache_dir.display(), "[Filesystem] Flushed");
        Ok(())
    }

    fn clear_expired(&self, ctx: &ItemContext) -> Result<()> {
        let mut removed = 0;
        for file in self.item_files()? {
            let mtime = match fs::metadata(&file) {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if ctx.is_expired(mtime, SystemTime::now()) && Self::remove_file(&file)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(count = removed, "[Filesystem] Cleaned up expired entries");
        }
        Ok(())
    }

    /// Remove shard directories left empty
    fn optimize(&self) -> Result<()> {
        for shard in fs::read_dir(&self.cache_dir)? {
            let shard = shard?.path();
            if shard.is_dir() && fs::read_dir(&shard)?.next().is_none() {
                // Lost a race with a concurrent write; keep the directory
                if let Err(e) = fs::remove_dir(&shard) {
                    debug!(dir = %shard.display(), error = %e, "[Filesystem] Shard kept");
                }
            }
        }
        Ok(())
    }

    fn configure(&self, name: &str, value: &OptionValue) {
        if name == "cache_dir" {
            warn!(
                value = ?value,
                "[Filesystem] cache_dir is fixed once opened, rebuild the adapter to apply it"
            );
        }
    }
}
