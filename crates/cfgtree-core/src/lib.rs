//! cfgtree core: class model, hierarchy builder, validator and caches

pub mod builder;
pub mod cache;
pub mod diagnostics;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod persist;
pub mod property;
pub mod validator;


#[cfg(test)]
pub mod test_utils;

pub use builder::{BuildOptions, HierarchyBuilder, MergePolicy};
pub use cache::{CacheConfig, CacheEntry, CacheManager, CacheStats, DEFAULT_CAPACITY, DEFAULT_MAX_AGE};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use error::CacheError;
pub use hierarchy::{ClassHierarchy, ClassNode, InvalidReason};
pub use model::{
    normalize, ClassDefinition, ClassKind, Fingerprint, FingerprintBuilder, Location, ParsedFile, PropertyValue,
    SourceId,
};
pub use persist::{HierarchyStore, PersistedEntry};
pub use property::{Property, PropertyMap};
pub use validator::{
    detect_cycles, levenshtein_distance, suggest_names, validate_required, PropertyResolver, ValidationSummary,
    Validator, ValidatorOptions,
};
