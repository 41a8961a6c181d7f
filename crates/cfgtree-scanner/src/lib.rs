//! Source providers, configuration and the scan service

pub mod cancel;
pub mod config;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod service;


pub use cancel::{CancelToken, ProgressCallback};
pub use config::{CacheSettings, CfgtreeConfig, ScannerConfig, DEFAULT_MAX_FILE_SIZE, ENV_PREFIX};
pub use directory::{decode_text, DirectoryProvider, PREFIX_FILE};
pub use error::{ConfigError, ProviderError, ScanError};
pub use pipeline::build_source;
pub use provider::{MemoryProvider, SourceBundle, SourceFile, SourceProvider};
pub use service::{ClassService, GlobalView, ScanReport};
