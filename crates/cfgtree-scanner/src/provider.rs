//! Source providers: discovery and extraction of source text

use std::path::PathBuf;
use std::sync::RwLock;

use cfgtree_core::{Fingerprint, FingerprintBuilder, SourceId};

use crate::error::ProviderError;

/// One text file of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the source root.
    pub relative_path: PathBuf,
    pub text: String,
    /// Detected encoding, e.g. `utf-8` or `windows-1252`.
    pub encoding: String,
    /// Size of the file as stored, before decoding.
    pub size: u64,
}

impl SourceFile {
    pub fn new(relative_path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            relative_path: relative_path.into(),
            size: text.len() as u64,
            text,
            encoding: "utf-8".to_string(),
        }
    }
}

/// Everything a provider extracts for one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBundle {
    pub files: Vec<SourceFile>,
    /// Declared prefix; file paths in diagnostics are `prefix/relative`.
    pub prefix: String,
}

impl SourceBundle {
    pub fn qualified_path(&self, file: &SourceFile) -> PathBuf {
        if self.prefix.is_empty() {
            file.relative_path.clone()
        } else {
            PathBuf::from(&self.prefix).join(&file.relative_path)
        }
    }
}

/// Upstream collaborator that knows where sources live.
pub trait SourceProvider: Send + Sync {
    /// Known sources in scan order. Later sources win global lookups.
    fn sources(&self) -> Vec<SourceId>;

    /// Cheap change detector; must differ whenever the content differs.
    fn fingerprint(&self, source: &SourceId) -> Result<Fingerprint, ProviderError>;

    fn extract(&self, source: &SourceId) -> Result<SourceBundle, ProviderError>;
}

/// In-memory provider. Fingerprints hash the full content with XXH3.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    sources: RwLock<Vec<(SourceId, SourceBundle)>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a source. A new source goes last in scan order.
    pub fn insert(&self, id: impl Into<SourceId>, bundle: SourceBundle) {
        let id = id.into();
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        match sources.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = bundle,
            None => sources.push((id, bundle)),
        }
    }

    /// Shorthand for a single-file source without a prefix.
    pub fn insert_text(&self, id: impl Into<SourceId>, text: impl Into<String>) {
        self.insert(
            id,
            SourceBundle {
                files: vec![SourceFile::new("config.cpp", text)],
                prefix: String::new(),
            },
        );
    }

    pub fn remove(&self, id: &SourceId) -> bool {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        let before = sources.len();
        sources.retain(|(existing, _)| existing != id);
        sources.len() != before
    }

    fn with_bundle<T>(&self, id: &SourceId, f: impl FnOnce(&SourceBundle) -> T) -> Result<T, ProviderError> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        sources
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, bundle)| f(bundle))
            .ok_or_else(|| ProviderError::NotFound(id.clone()))
    }
}

impl SourceProvider for MemoryProvider {
    fn sources(&self) -> Vec<SourceId> {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        sources.iter().map(|(id, _)| id.clone()).collect()
    }

    fn fingerprint(&self, source: &SourceId) -> Result<Fingerprint, ProviderError> {
        self.with_bundle(source, |bundle| {
            let mut builder = FingerprintBuilder::new();
            builder.field(bundle.prefix.as_bytes());
            for file in &bundle.files {
                builder
                    .field(file.relative_path.to_string_lossy().as_bytes())
                    .field(file.text.as_bytes());
            }
            builder.finish()
        })
    }

    fn extract(&self, source: &SourceId) -> Result<SourceBundle, ProviderError> {
        self.with_bundle(source, SourceBundle::clone)
    }
}
