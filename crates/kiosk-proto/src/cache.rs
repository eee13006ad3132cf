//! Durable key-addressed media store.
//!
//! One directory per namespace. Each entry is a payload file named by the
//! SHA-256 of its key plus a JSON sidecar holding the key and insertion time.
//! An entry exists only once both files are in place; payloads are written to
//! a temp file and renamed so a crash never leaves a half-written entry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::EngineResult;

const PAYLOAD_EXT: &str = "bin";
const SIDECAR_EXT: &str = "json";

/// Metadata stored next to every payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub inserted_at: DateTime<Utc>,
    pub len: u64,
}

/// Locally resolvable reference to a cached payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaHandle {
    pub key: String,
    pub digest: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MediaCache {
    dir: PathBuf,
}

pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Writes `bytes` to `tmp` and renames it over `dest`. `tmp` never
/// outlives a failed attempt.
async fn replace_file(tmp: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let result = match tokio::fs::write(tmp, bytes).await {
        Ok(()) => tokio::fs::rename(tmp, dest).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(tmp).await;
    }
    result
}

/// Deletes temp files left by writes that never reached their rename.
async fn sweep_temp_files(dir: &Path) -> std::io::Result<usize> {
    let mut swept = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => swept += 1,
                Err(e) => warn!("MediaCache: cannot remove {}: {}", path.display(), e),
            }
        }
    }
    Ok(swept)
}

impl MediaCache {
    /// Opens (creating if needed) the store `namespace` under `root`.
    /// Opening the same store twice yields equivalent handles.
    pub async fn open(root: &Path, namespace: &str) -> EngineResult<Self> {
        let dir = root.join(namespace);
        tokio::fs::create_dir_all(&dir).await?;
        let swept = sweep_temp_files(&dir).await?;
        if swept > 0 {
            debug!("MediaCache: removed {} leftover temp file(s)", swept);
        }
        debug!("MediaCache: opened {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn payload_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.{PAYLOAD_EXT}"))
    }

    fn sidecar_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.{SIDECAR_EXT}"))
    }

    pub async fn lookup(&self, key: &str) -> Option<MediaHandle> {
        let digest = key_digest(key);
        let payload = self.payload_path(&digest);
        let present = tokio::fs::try_exists(&payload).await.unwrap_or(false)
            && tokio::fs::try_exists(self.sidecar_path(&digest))
                .await
                .unwrap_or(false);
        present.then(|| MediaHandle {
            key: key.to_string(),
            digest,
            path: payload,
        })
    }

    /// Stores `payload` under `key`. Overwrites an existing entry with the
    /// same key; concurrent puts of one key leave a single complete entry.
    pub async fn put(&self, key: &str, payload: &[u8]) -> EngineResult<MediaHandle> {
        let digest = key_digest(key);
        let payload_path = self.payload_path(&digest);
        let nonce: u64 = rand::random();

        let tmp = self.dir.join(format!("{digest}.{nonce:016x}.tmp"));
        replace_file(&tmp, &payload_path, payload).await?;

        let entry = CacheEntry {
            key: key.to_string(),
            inserted_at: Utc::now(),
            len: payload.len() as u64,
        };
        let sidecar_tmp = self.dir.join(format!("{digest}.{nonce:016x}.meta.tmp"));
        let sidecar = serde_json::to_vec_pretty(&entry)?;
        replace_file(&sidecar_tmp, &self.sidecar_path(&digest), &sidecar).await?;

        debug!("MediaCache: stored {} ({} bytes)", key, payload.len());
        Ok(MediaHandle {
            key: key.to_string(),
            digest,
            path: payload_path,
        })
    }

    pub async fn read(&self, handle: &MediaHandle) -> EngineResult<Vec<u8>> {
        Ok(tokio::fs::read(&handle.path).await?)
    }

    /// Resolves a digest (as exposed to the renderer) back to its entry.
    pub async fn handle_for_digest(&self, digest: &str) -> Option<MediaHandle> {
        if !is_digest(digest) {
            return None;
        }
        let path = self.payload_path(digest);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }
        let entry = self.read_sidecar(digest).await?;
        Some(MediaHandle {
            key: entry.key,
            digest: digest.to_string(),
            path,
        })
    }

    async fn read_sidecar(&self, digest: &str) -> Option<CacheEntry> {
        let bytes = tokio::fs::read(self.sidecar_path(digest)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("MediaCache: unreadable sidecar for {}: {}", digest, e);
                None
            }
        }
    }

    pub async fn entries(&self) -> EngineResult<Vec<CacheEntry>> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                continue;
            }
            let Some(digest) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_digest(digest) {
                continue;
            }
            if let Some(entry) = self.read_sidecar(digest).await {
                out.push(entry);
            }
        }
        out.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_lookup_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        assert!(cache.lookup("http://cdn/a.png").await.is_none());

        let handle = cache.put("http://cdn/a.png", b"png-bytes").await.unwrap();
        assert_eq!(cache.read(&handle).await.unwrap(), b"png-bytes");

        let reopened = MediaCache::open(dir.path(), "media").await.unwrap();
        let found = reopened.lookup("http://cdn/a.png").await.unwrap();
        assert_eq!(found, handle);
        assert_eq!(reopened.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overwrite_keeps_a_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        cache.put("k", b"one").await.unwrap();
        let handle = cache.put("k", b"two").await.unwrap();
        assert_eq!(cache.read(&handle).await.unwrap(), b"two");

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "k");
        assert_eq!(entries[0].len, 3);
    }

    #[tokio::test]
    async fn payload_without_sidecar_is_not_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        let digest = key_digest("orphan");
        std::fs::write(cache.payload_path(&digest), b"x").unwrap();
        assert!(cache.lookup("orphan").await.is_none());
        assert!(cache.handle_for_digest(&digest).await.is_none());
    }

    #[tokio::test]
    async fn digest_lookup_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        let handle = cache.put("http://cdn/b.jpg", b"jpg").await.unwrap();
        assert_eq!(cache.handle_for_digest(&handle.digest).await.unwrap().key, "http://cdn/b.jpg");
        assert!(cache.handle_for_digest("../../etc/passwd").await.is_none());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = MediaCache::open(dir.path(), "media").await.unwrap();
        let b = MediaCache::open(dir.path(), "other").await.unwrap();
        a.put("k", b"v").await.unwrap();
        assert!(b.lookup("k").await.is_none());
    }

    fn temp_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[tokio::test]
    async fn failed_put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        // A non-empty directory where the sidecar belongs makes its rename fail.
        let sidecar = cache.sidecar_path(&key_digest("k"));
        std::fs::create_dir_all(sidecar.join("blocker")).unwrap();

        let err = cache.put("k", b"v").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
        assert!(temp_files(cache.dir()).is_empty());
        assert!(cache.lookup("k").await.is_none());
    }

    #[tokio::test]
    async fn open_sweeps_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        cache.put("k", b"v").await.unwrap();
        let digest = key_digest("x");
        let tmp = cache.dir().join(format!("{digest}.00000000000000ab.tmp"));
        let sidecar_tmp = cache.dir().join(format!("{digest}.00000000000000ab.meta.tmp"));
        std::fs::write(&tmp, b"x").unwrap();
        std::fs::write(&sidecar_tmp, b"{").unwrap();

        let reopened = MediaCache::open(dir.path(), "media").await.unwrap();
        assert!(temp_files(reopened.dir()).is_empty());
        assert!(reopened.lookup("k").await.is_some());
    }
}
