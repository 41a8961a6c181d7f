//! Folder-backed provider: every immediate subdirectory of a root is one
//! source.
//!
//! Files are walked with `ignore::WalkBuilder` with all ignore rules turned
//! off, since mod folders routinely carry `.gitignore` files that hide
//! generated configs. The fingerprint covers relative path, size and mtime of
//! every matching file, so unchanged folders are never re-read.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use cfgtree_core::{Fingerprint, FingerprintBuilder, SourceId};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::{CfgtreeConfig, DEFAULT_MAX_FILE_SIZE};
use crate::error::{ConfigError, ProviderError};
use crate::provider::{SourceBundle, SourceFile, SourceProvider};

/// File holding the declared prefix of a source folder.
pub const PREFIX_FILE: &str = "$PBOPREFIX$";

#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
    extensions: Vec<String>,
    max_file_size: u64,
}

struct FileMeta {
    path: PathBuf,
    relative: PathBuf,
    size: u64,
    modified: u64,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: CfgtreeConfig::default().scanner.extensions,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Provider over `scanner.source_root`, filtered like the scanner.
    pub fn from_config(config: &CfgtreeConfig) -> Result<Self, ConfigError> {
        let root = config
            .scanner
            .source_root
            .clone()
            .ok_or_else(|| ConfigError::Invalid("scanner.source_root is not set".into()))?;
        Ok(Self::new(root)
            .with_extensions(config.scanner.extensions.clone())
            .with_max_file_size(config.scanner.max_file_size))
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Files over the limit are listed with empty text and their real size
    /// so the scanner can report them as skipped.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source_dir(&self, source: &SourceId) -> Result<PathBuf, ProviderError> {
        let name = source.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ProviderError::NotFound(source.clone()));
        }
        let dir = self.root.join(name);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ProviderError::NotFound(source.clone()))
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
    }

    /// Matching files under `dir`, sorted by relative path.
    fn list_files(&self, dir: &Path) -> Result<Vec<FileMeta>, ProviderError> {
        let walker = WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) || !self.matches(entry.path()) {
                continue;
            }
            let path = entry.path().to_path_buf();
            let metadata = entry.metadata().map_err(|e| ProviderError::Other(e.to_string()))?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            let relative = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
            files.push(FileMeta {
                path,
                relative,
                size: metadata.len(),
                modified,
            });
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }
}

impl SourceProvider for DirectoryProvider {
    fn sources(&self) -> Vec<SourceId> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list source root {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names.into_iter().map(SourceId::new).collect()
    }

    fn fingerprint(&self, source: &SourceId) -> Result<Fingerprint, ProviderError> {
        let dir = self.source_dir(source)?;
        let mut builder = FingerprintBuilder::new();
        if let Ok(prefix) = std::fs::read(dir.join(PREFIX_FILE)) {
            builder.field(&prefix);
        }
        for file in self.list_files(&dir)? {
            builder
                .field(file.relative.to_string_lossy().as_bytes())
                .number(file.size)
                .number(file.modified);
        }
        Ok(builder.finish())
    }

    fn extract(&self, source: &SourceId) -> Result<SourceBundle, ProviderError> {
        let dir = self.source_dir(source)?;
        let prefix = match std::fs::read(dir.join(PREFIX_FILE)) {
            Ok(bytes) => decode_text(&bytes).0.trim().to_string(),
            Err(_) => String::new(),
        };

        let mut files = Vec::new();
        for meta in self.list_files(&dir)? {
            if meta.size > self.max_file_size {
                files.push(SourceFile {
                    relative_path: meta.relative,
                    text: String::new(),
                    encoding: String::new(),
                    size: meta.size,
                });
                continue;
            }
            let bytes = std::fs::read(&meta.path).map_err(|e| ProviderError::Io {
                path: meta.path.clone(),
                source: e,
            })?;
            let (text, encoding) = decode_text(&bytes);
            files.push(SourceFile {
                relative_path: meta.relative,
                text,
                encoding: encoding.to_string(),
                size: meta.size,
            });
        }
        debug!("Extracted {} files from {}", files.len(), dir.display());
        Ok(SourceBundle { files, prefix })
    }
}

/// UTF-8 (BOM stripped) when valid, otherwise Latin-1, which maps every
/// byte to a char.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return (text.to_string(), "utf-8-sig");
        }
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), "latin1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn layout() -> tempfile::TempDir {
        let root = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("mod_b/sub")).unwrap();
        fs::create_dir_all(root.path().join("mod_a")).unwrap();
        fs::write(root.path().join("mod_a/config.cpp"), "class A {};").unwrap();
        fs::write(root.path().join("mod_a/readme.txt"), "not config").unwrap();
        fs::write(root.path().join("mod_b/sub/b.hpp"), "class B: A {};").unwrap();
        fs::write(root.path().join("mod_b/config.cpp"), "#include \"sub/b.hpp\"").unwrap();
        fs::write(root.path().join("mod_b").join(PREFIX_FILE), "x\\mod_b\n").unwrap();
        fs::write(root.path().join("loose.cpp"), "class Loose {};").unwrap();
        root
    }

    #[test]
    fn sources_are_sorted_subdirectories() {
        let root = layout();
        let provider = DirectoryProvider::new(root.path());
        assert_eq!(provider.sources(), vec![SourceId::new("mod_a"), SourceId::new("mod_b")]);
    }

    #[test]
    fn extract_filters_and_orders_files() {
        let root = layout();
        let provider = DirectoryProvider::new(root.path());
        let bundle = provider.extract(&SourceId::new("mod_b")).unwrap();
        let paths: Vec<_> = bundle.files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("config.cpp"), PathBuf::from("sub/b.hpp")]);
        assert_eq!(bundle.prefix, "x\\mod_b");

        let a = provider.extract(&SourceId::new("mod_a")).unwrap();
        assert_eq!(a.files.len(), 1);
        assert_eq!(a.files[0].text, "class A {};");
        assert!(a.prefix.is_empty());
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let root = layout();
        let provider = DirectoryProvider::new(root.path());
        let id = SourceId::new("mod_a");
        let first = provider.fingerprint(&id).unwrap();
        assert_eq!(first, provider.fingerprint(&id).unwrap());

        fs::write(root.path().join("mod_a/extra.hpp"), "class Extra {};").unwrap();
        assert_ne!(first, provider.fingerprint(&id).unwrap());
    }

    #[test]
    fn unknown_and_escaping_ids() {
        let root = layout();
        let provider = DirectoryProvider::new(root.path());
        assert!(matches!(provider.extract(&SourceId::new("nope")), Err(ProviderError::NotFound(_))));
        assert!(matches!(provider.fingerprint(&SourceId::new("..")), Err(ProviderError::NotFound(_))));
        assert!(matches!(provider.extract(&SourceId::new("mod_b/sub")), Err(ProviderError::NotFound(_))));
    }

    #[test]
    fn oversized_files_are_listed_without_text() {
        let root = layout();
        let provider = DirectoryProvider::new(root.path()).with_max_file_size(5);
        let bundle = provider.extract(&SourceId::new("mod_a")).unwrap();
        assert_eq!(bundle.files.len(), 1);
        assert!(bundle.files[0].text.is_empty());
        assert_eq!(bundle.files[0].size, 11);
    }

    #[test]
    fn decode_fallbacks() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFclass A {};"), ("class A {};".to_string(), "utf-8-sig"));
        assert_eq!(decode_text(b"plain"), ("plain".to_string(), "utf-8"));
        let (text, encoding) = decode_text(b"name = \"Caf\xE9\";");
        assert_eq!(encoding, "latin1");
        assert!(text.contains("Café"));
    }

    #[test]
    fn from_config_requires_root() {
        let config = CfgtreeConfig::default();
        assert!(DirectoryProvider::from_config(&config).is_err());
    }
}
