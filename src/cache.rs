use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;
use crate::http::{Method, Response};

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest file stem, hash suffix included.
const MAX_KEY_LEN: usize = 150;

/// Deterministic FNV-1a hasher, so a request maps to the same file across runs.
struct FnvHasher(u64);

impl FnvHasher {
    const BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x00000100000001B3;

    fn new() -> Self {
        Self(Self::BASIS)
    }

    fn write_str(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Everything needed to rebuild a page without touching the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub method: Method,
    pub url: String,
    /// Location after redirects were followed.
    pub final_url: String,
    pub stored_at: String,
    pub response: Response,
}

impl CachedResponse {
    pub fn new(method: Method, url: &Url, final_url: &Url, response: Response) -> Self {
        Self {
            method,
            url: url.to_string(),
            final_url: final_url.to_string(),
            stored_at: now_timestamp(),
            response,
        }
    }
}

fn now_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".into())
}

fn filesystem_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache key for a request: a readable prefix built from the method, URL and
/// body, followed by a hash of the unsanitized request.
///
/// Sanitizing folds `?`, `/` and `=` alike into `_`, so the prefix alone can
/// collide; the hash keeps such requests apart.
pub fn key(method: Method, url: &Url, body: Option<&str>) -> String {
    let body = body.filter(|b| !b.is_empty());
    let mut hasher = FnvHasher::new();
    hasher.write_str(&format!("{method} {url}\n{}", body.unwrap_or_default()));

    let mut readable = format!("{method}_{}", filesystem_safe(url.as_str()));
    if let Some(body) = body {
        readable.push('_');
        readable.push_str(&filesystem_safe(body));
    }
    // ASCII after sanitizing, so any byte offset is a char boundary.
    readable.truncate(MAX_KEY_LEN - 17);
    format!("{readable}_{:016x}", hasher.finish())
}

/// Base directory for cached responses: `~/.formwalk/cache`
pub fn cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".formwalk")
        .join("cache")
}

// ── ResponseCache ───────────────────────────────────────────────────────────

pub struct ResponseCache {
    base: PathBuf,
    expiry: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            base: cache_dir(),
            expiry: DEFAULT_EXPIRY,
        }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self {
            base,
            expiry: DEFAULT_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        self.get_at(key, SystemTime::now())
    }

    /// Look up `key` as of `now`. Entries older than the expiry are misses;
    /// an entry exactly at the expiry still counts.
    pub fn get_at(&self, key: &str, now: SystemTime) -> Result<Option<CachedResponse>> {
        let path = self.path_for(key);
        let modified = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > self.expiry {
            debug!(key = %key, age_secs = age.as_secs(), "cache entry expired");
            return Ok(None);
        }

        let json = fs::read_to_string(&path)?;
        match serde_json::from_str::<CachedResponse>(&json) {
            Ok(entry) => {
                debug!(key = %key, "cache hit");
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry, ignoring");
                Ok(None)
            }
        }
    }

    /// Save an entry. Returns the path written.
    pub fn put(&self, key: &str, entry: &CachedResponse) -> Result<PathBuf> {
        fs::create_dir_all(&self.base)?;
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(entry)?;
        fs::write(&path, json)?;
        debug!(key = %key, path = %path.display(), "cached response");
        Ok(path)
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every cached entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        if !self.base.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.base)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
