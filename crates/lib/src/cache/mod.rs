//! Content-addressed installable cache.
//!
//! Downloaded dependency archives are stored under
//! `<root>/<hh>/<full-hash>`, where `hh` is the first two digest characters.
//! The path is derived purely from the content hash: distinct archives never
//! collide, and identical archives referenced by several packages occupy one
//! file.
//!
//! # Concurrency
//!
//! Writes go through a temp file followed by an atomic rename into the final
//! content-addressed path, so concurrent fetchers of the same hash cannot
//! corrupt the store: whichever writer wins the rename, the file's content
//! is the same, and a loser simply re-verifies the winner's file. Within one
//! process a per-hash mutex avoids downloading the same archive twice, and
//! [`InstallCache::fetch_all`] bounds overall fan-out with a semaphore.
//!
//! # Integrity
//!
//! A cache hit is re-verified before being returned; a corrupt file on disk
//! is deleted and refetched. A download whose digest does not match the
//! declared hash is discarded and surfaces [`FetchError::IntegrityMismatch`]
//! without retrying: the bytes are wrong, not the wire.

pub mod transport;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::manifest::ArchiveRef;
use crate::resolve::ResolutionPlan;
use crate::util::hash::{ContentHash, hash_bytes};

/// Explicit cache configuration; nothing is read from ambient global state,
/// so independent runs (and tests) get independent caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Directory the content-addressed store lives in.
  pub root: PathBuf,
  /// Maximum number of concurrent downloads in [`InstallCache::fetch_all`].
  pub concurrency: usize,
  /// Additional attempts for transient transport failures.
  pub retry_limit: u32,
}

impl CacheConfig {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    CacheConfig {
      root: root.into(),
      concurrency: default_concurrency(),
      retry_limit: 2,
    }
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
    self.retry_limit = retry_limit;
    self
  }
}

fn default_concurrency() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// A verified archive present in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub hash: ContentHash,
  pub path: PathBuf,
  pub size: u64,
  pub fetched_at: SystemTime,
}

/// Errors fetching or verifying an installable archive.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Network or I/O level transport fault; retried within the budget.
  #[error("transport failure fetching {url}: {message}")]
  Transport { url: String, message: String },

  /// The source has no archive at this URL.
  #[error("archive not found at {url}")]
  NotFound { url: String },

  /// The source rejected our credentials (or their absence).
  #[error("authentication failed for {url} (HTTP {status})")]
  Auth { url: String, status: u16 },

  #[error("unsupported URL scheme '{scheme}' in '{url}'")]
  UnsupportedScheme { url: String, scheme: String },

  /// Downloaded bytes do not hash to the declared digest. Never retried on
  /// the same bytes and never installed.
  #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
  IntegrityMismatch {
    url: String,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("cache i/o error: {0}")]
  Io(#[from] std::io::Error),
}

impl FetchError {
  /// Whether a retry could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, FetchError::Transport { .. })
  }
}

/// The content-addressed archive store.
///
/// Cloning is cheap and clones share the per-hash in-flight table, so one
/// cache value can be handed to many concurrent tasks.
#[derive(Clone)]
pub struct InstallCache {
  root: PathBuf,
  concurrency: usize,
  retry_limit: u32,
  client: reqwest::Client,
  inflight: Arc<Mutex<HashMap<ContentHash, Arc<Mutex<()>>>>>,
}

impl InstallCache {
  pub fn new(config: CacheConfig) -> Self {
    InstallCache {
      root: config.root,
      concurrency: config.concurrency.max(1),
      retry_limit: config.retry_limit,
      client: reqwest::Client::new(),
      inflight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// The content-addressed path an archive with this digest occupies.
  pub fn entry_path(&self, hash: &ContentHash) -> PathBuf {
    self.root.join(&hash.0[..2]).join(&hash.0)
  }

  /// The cache entry for `hash` if its file is present. Does not verify.
  pub fn lookup(&self, hash: &ContentHash) -> Option<CacheEntry> {
    let path = self.entry_path(hash);
    let metadata = std::fs::metadata(&path).ok()?;
    Some(CacheEntry {
      hash: hash.clone(),
      path,
      size: metadata.len(),
      fetched_at: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
    })
  }

  /// Recompute a file's digest and compare it to `expected`.
  pub async fn verify(path: &Path, expected: &ContentHash) -> std::io::Result<bool> {
    let bytes = tokio::fs::read(path).await?;
    Ok(&hash_bytes(&bytes) == expected)
  }

  /// Return the local path of a verified archive, downloading it first if
  /// the cache cannot already satisfy the request.
  ///
  /// The happy path touches no network: an existing file that re-verifies is
  /// returned as-is. Transient transport failures are retried within the
  /// configured budget; integrity and auth failures are not.
  pub async fn fetch_or_reuse(&self, archive: &ArchiveRef, token: Option<&str>) -> Result<CacheEntry, FetchError> {
    let guard = self.inflight_lock(&archive.hash).await;
    let _locked = guard.lock().await;

    let path = self.entry_path(&archive.hash);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
      if Self::verify(&path, &archive.hash).await? {
        debug!(hash = %archive.hash.short(), "cache hit");
        return self.entry(&archive.hash, path);
      }
      warn!(hash = %archive.hash.short(), path = %path.display(), "cached archive is corrupt, refetching");
      tokio::fs::remove_file(&path).await.ok();
    }

    let mut attempt: u32 = 0;
    loop {
      match self.download_once(archive, token).await {
        Ok(entry) => return Ok(entry),
        Err(err) if err.is_transient() && attempt < self.retry_limit => {
          attempt += 1;
          warn!(url = %archive.url, error = %err, attempt, "transient fetch failure, retrying");
          tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
        Err(err) => return Err(err),
      }
    }
  }

  /// Fetch every installable in `plan`, bounded by the configured
  /// concurrency. Entries are returned in plan order; the first failure
  /// aborts the remaining downloads.
  pub async fn fetch_all(&self, plan: &ResolutionPlan, token: Option<&str>) -> Result<Vec<CacheEntry>, FetchError> {
    let semaphore = Arc::new(Semaphore::new(self.concurrency));
    let mut join_set = JoinSet::new();

    for node in plan.installables() {
      let Some(archive) = node.archive.clone() else {
        continue;
      };
      let cache = self.clone();
      let token = token.map(str::to_string);
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore.acquire().await.unwrap();
        let entry = cache.fetch_or_reuse(&archive, token.as_deref()).await?;
        Ok::<_, FetchError>(entry)
      });
    }

    let mut by_hash: HashMap<ContentHash, CacheEntry> = HashMap::new();
    while let Some(joined) = join_set.join_next().await {
      let entry = joined.map_err(|err| FetchError::Io(std::io::Error::other(err)))??;
      by_hash.insert(entry.hash.clone(), entry);
    }

    let mut entries = Vec::new();
    for node in plan.installables() {
      if let Some(hash) = node.hash()
        && let Some(entry) = by_hash.get(hash)
      {
        entries.push(entry.clone());
      }
    }
    Ok(entries)
  }

  async fn inflight_lock(&self, hash: &ContentHash) -> Arc<Mutex<()>> {
    let mut table = self.inflight.lock().await;
    table.entry(hash.clone()).or_default().clone()
  }

  async fn download_once(&self, archive: &ArchiveRef, token: Option<&str>) -> Result<CacheEntry, FetchError> {
    info!(url = %archive.url, hash = %archive.hash.short(), "fetching archive");

    let bytes = transport::download(&self.client, &archive.url, token).await?;

    let actual = hash_bytes(&bytes);
    if actual != archive.hash {
      return Err(FetchError::IntegrityMismatch {
        url: archive.url.clone(),
        expected: archive.hash.clone(),
        actual,
      });
    }

    let final_path = self.entry_path(&archive.hash);
    if let Some(parent) = final_path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    // Temp file in the cache root so the rename stays on one filesystem.
    let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
    temp.write_all(&bytes)?;
    temp.flush()?;

    if let Err(persist_err) = temp.persist(&final_path) {
      // Lost the rename race to another process; the winner's bytes must be
      // the same content, but verify before trusting them.
      if Self::verify(&final_path, &archive.hash).await.unwrap_or(false) {
        debug!(hash = %archive.hash.short(), "lost fetch race, reusing winner's archive");
      } else {
        return Err(FetchError::Io(persist_err.error));
      }
    }

    info!(hash = %archive.hash.short(), path = %final_path.display(), size = bytes.len(), "archive cached");
    self.entry(&archive.hash, final_path)
  }

  fn entry(&self, hash: &ContentHash, path: PathBuf) -> Result<CacheEntry, FetchError> {
    let metadata = std::fs::metadata(&path)?;
    Ok(CacheEntry {
      hash: hash.clone(),
      path,
      size: metadata.len(),
      fetched_at: metadata.modified().unwrap_or_else(|_| SystemTime::now()),
    })
  }
}
