//! Durable hierarchy store.
//!
//! Each cached source is one file under the store directory, named after the
//! source id and fingerprint. A file is a 4-byte little-endian header length,
//! a bincode header (magic, format version, crate version, payload checksum)
//! and the bincode payload. Files that fail to decode or verify are treated
//! as misses and removed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::CacheError;
use crate::hierarchy::ClassHierarchy;
use crate::model::{Fingerprint, SourceId};

const STORE_MAGIC: [u8; 4] = *b"CFGT";

/// Bump on any breaking change to the header or payload layout.
const STORE_FORMAT_VERSION: u32 = 1;

const STORE_EXT: &str = "bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreHeader {
    magic: [u8; 4],
    format_version: u32,
    crate_version: String,
    checksum: Fingerprint,
}

/// A hierarchy as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub source: SourceId,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub hierarchy: ClassHierarchy,
}

/// One-file-per-source store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct HierarchyStore {
    dir: PathBuf,
}

impl HierarchyStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a source at a given fingerprint.
    pub fn entry_path(&self, source: &SourceId, fingerprint: Fingerprint) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", file_prefix(source), fingerprint, STORE_EXT))
    }

    /// Writes an entry, replacing any older file for the same source.
    pub fn save(&self, entry: &PersistedEntry) -> Result<PathBuf, CacheError> {
        let payload = bincode::serialize(entry).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let header = StoreHeader {
            magic: STORE_MAGIC,
            format_version: STORE_FORMAT_VERSION,
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            checksum: Fingerprint::of_bytes(&payload),
        };
        let header_bytes = bincode::serialize(&header).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);

        self.remove(&entry.source)?;

        let path = self.entry_path(&entry.source, entry.fingerprint);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &output).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;

        debug!("Persisted {} ({} bytes) to {}", entry.source, output.len(), path.display());
        Ok(path)
    }

    /// Reads and verifies the entry for `source` at `fingerprint`.
    ///
    /// A missing file is `Ok(None)`; a file that fails any check is
    /// [`CacheError::Corruption`].
    pub fn load(&self, source: &SourceId, fingerprint: Fingerprint) -> Result<Option<PersistedEntry>, CacheError> {
        let path = self.entry_path(source, fingerprint);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        let entry = decode(&raw).map_err(|reason| CacheError::Corruption {
            path: path.clone(),
            reason,
        })?;
        if &entry.source != source || entry.fingerprint != fingerprint {
            return Err(CacheError::Corruption {
                path,
                reason: "entry does not match its file name".to_string(),
            });
        }
        Ok(Some(entry))
    }

    /// Like [`load`](Self::load) but never fails: corrupt files are logged and
    /// deleted, and every error is reported as a miss.
    pub fn load_or_discard(&self, source: &SourceId, fingerprint: Fingerprint) -> Option<PersistedEntry> {
        match self.load(source, fingerprint) {
            Ok(entry) => entry,
            Err(CacheError::Corruption { path, reason }) => {
                warn!("Discarding corrupt cache file {}: {}", path.display(), reason);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
                None
            }
            Err(e) => {
                warn!("Failed to read cached hierarchy for {}: {}", source, e);
                None
            }
        }
    }

    /// Removes every file for `source`. Returns how many were removed.
    pub fn remove(&self, source: &SourceId) -> Result<usize, CacheError> {
        let prefix = file_prefix(source);
        self.remove_matching(|name| name.starts_with(&prefix))
    }

    /// Removes every entry file in the store.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.remove_matching(|_| true)
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> Result<usize, CacheError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXT) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if matches(name) {
                std::fs::remove_file(&path).map_err(|e| CacheError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// `<readable id>-<id hash>-`; the hash keeps ids that sanitize alike apart.
fn file_prefix(source: &SourceId) -> String {
    let readable: String = source
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .take(64)
        .collect();
    format!("{}-{:016x}-", readable, xxh3_64(source.as_str().as_bytes()))
}

fn decode(raw: &[u8]) -> Result<PersistedEntry, String> {
    if raw.len() < 4 {
        return Err("file too short".to_string());
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err("truncated header".to_string());
    }

    let header: StoreHeader = bincode::deserialize(&raw[4..4 + header_len])
        .map_err(|e| format!("unreadable header: {e}"))?;
    if header.magic != STORE_MAGIC {
        return Err("bad magic".to_string());
    }
    if header.format_version != STORE_FORMAT_VERSION {
        return Err(format!(
            "format version {} (expected {})",
            header.format_version, STORE_FORMAT_VERSION
        ));
    }

    let payload = &raw[4 + header_len..];
    let actual = Fingerprint::of_bytes(payload);
    if actual != header.checksum {
        return Err(format!("checksum mismatch: expected {}, got {}", header.checksum, actual));
    }

    bincode::deserialize(payload).map_err(|e| format!("unreadable payload: {e}"))
}
