//! Content-addressed result store.
//!
//! The pipeline consults the store before doing any expensive work and writes
//! to it after a successful extraction. Both halves are expressed through the
//! [`ResultStore`] trait so the backing medium can change (local directory,
//! object storage, key-value database) without touching
//! [`crate::extract::Extractor`].
//!
//! ## On-disk layout ([`FsResultStore`])
//!
//! ```text
//! <root>/
//!   3f/
//!     3f9a…c1.bin    raw upload bytes
//!     3f9a…c1.json   StructuredResult
//! ```
//!
//! Every path is derived from the fingerprint alone. The raw bytes are
//! written before the result, so an existing `.json` implies a complete
//! artifact and `lookup` is a plain existence check plus one read. The read
//! entry is re-validated like a fresh model reply; one that fails is
//! reported as [`StoreError::Corrupt`].
//!
//! Writes go to a uniquely named temp file in the shard directory and are
//! renamed into place. Two concurrent uploads of the same image race only on
//! the final rename, and both carry identical content.

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::output::StructuredResult;
use crate::pipeline::validate::validate_response;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Lookup-before-compute persistence keyed by [`Fingerprint`].
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Return the stored result for `fingerprint`, if any.
    ///
    /// Must not perform network calls or recomputation.
    async fn lookup(&self, fingerprint: &Fingerprint)
        -> Result<Option<StructuredResult>, StoreError>;

    /// Persist the raw upload and its result under `fingerprint`.
    ///
    /// Idempotent: storing the same pair twice leaves the store unchanged.
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        raw: &[u8],
        result: &StructuredResult,
    ) -> Result<(), StoreError>;
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// [`ResultStore`] backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsResultStore {
    root: PathBuf,
}

impl FsResultStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// the first `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the raw upload bytes.
    pub fn image_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(fingerprint.shard())
            .join(format!("{fingerprint}.bin"))
    }

    /// Location of the serialised [`StructuredResult`].
    pub fn result_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(fingerprint.shard())
            .join(format!("{fingerprint}.json"))
    }
}

#[async_trait]
impl ResultStore for FsResultStore {
    async fn lookup(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StructuredResult>, StoreError> {
        let path = self.result_path(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        // Stored entries pass the same checks as a fresh model reply.
        let text = std::str::from_utf8(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        validate_response(text)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path,
                detail: e.to_string(),
            })
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        raw: &[u8],
        result: &StructuredResult,
    ) -> Result<(), StoreError> {
        let image_path = self.image_path(fingerprint);
        let result_path = self.result_path(fingerprint);
        let json = serde_json::to_vec_pretty(result).map_err(|e| StoreError::Corrupt {
            path: result_path.clone(),
            detail: e.to_string(),
        })?;

        if tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
            debug!("Raw upload already stored: {}", image_path.display());
        } else {
            write_atomic(image_path, raw.to_vec()).await?;
        }
        write_atomic(result_path.clone(), json).await?;

        debug!("Stored result: {}", result_path.display());
        Ok(())
    }
}

/// Write `bytes` to `path` via temp file + rename.
async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store write task failed: {e}")))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ── In-memory store ──────────────────────────────────────────────────────

/// Process-local [`ResultStore`]; contents vanish with the process.
///
/// Used by tests and by callers that want deduplication within one run
/// without touching disk.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: Mutex<HashMap<Fingerprint, (Vec<u8>, StructuredResult)>>,
    puts: AtomicUsize,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls received, including repeats.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of distinct fingerprints held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw upload bytes stored under `fingerprint`.
    pub fn raw_bytes(&self, fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .ok()?
            .get(fingerprint)
            .map(|(raw, _)| raw.clone())
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn lookup(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<StructuredResult>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(fingerprint).map(|(_, result)| result.clone()))
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        raw: &[u8],
        result: &StructuredResult,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        entries.insert(fingerprint.clone(), (raw.to_vec(), result.clone()));
        Ok(())
    }
}
