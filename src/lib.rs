//! Class hierarchy scanning for declarative configuration sources
//!
//! The work happens in three crates, re-exported here:
//! - `cfgtree-parser` turns class-definition text into definitions and diagnostics
//! - `cfgtree-core` builds, validates, resolves and caches hierarchies
//! - `cfgtree-scanner` drives providers, the worker pool and the query API
//!
//! This crate adds logging setup and helpers to open a folder-backed service.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

pub use cfgtree_core;
pub use cfgtree_parser;
pub use cfgtree_scanner;

pub use cfgtree_core::{
    ClassDefinition, ClassHierarchy, Diagnostic, DiagnosticKind, MergePolicy, PropertyMap, PropertyValue, Severity,
    SourceId,
};
pub use cfgtree_parser::{parse_source, render};
pub use cfgtree_scanner::{
    CancelToken, CfgtreeConfig, ClassService, DirectoryProvider, MemoryProvider, ScanError, ScanReport,
    SourceProvider,
};

pub mod telemetry {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    /// Installs the fmt subscriber filtered to `cfgtree=info`, or
    /// `cfgtree=debug` when verbose. Fails if a global subscriber is
    /// already set.
    pub fn init(verbose: bool) -> anyhow::Result<()> {
        let log_level = if verbose { "debug" } else { "info" };
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(format!("cfgtree={}", log_level)))
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
        tracing::info!("cfgtree v{}", env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}

/// Opens a service over `scanner.source_root`.
pub fn open(config: CfgtreeConfig) -> anyhow::Result<ClassService> {
    let provider = DirectoryProvider::from_config(&config).context("no source folder configured")?;
    let root = provider.root().to_path_buf();
    let provider: Arc<dyn SourceProvider> = Arc::new(provider);
    ClassService::new(provider, config).with_context(|| format!("failed to open sources under {}", root.display()))
}

/// Loads `cfgtree.toml` (plus `.env` and `CFGTREE_*` overrides) and opens
/// the service it describes.
pub fn open_config_file(path: &Path) -> anyhow::Result<ClassService> {
    let config = CfgtreeConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    open(config)
}
