//! Scan orchestration and the class query API

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use cfgtree_core::{
    validate_required, BuildOptions, CacheManager, ClassDefinition, ClassHierarchy, Diagnostic, Fingerprint,
    FingerprintBuilder, HierarchyBuilder, HierarchyStore, PersistedEntry, PropertyMap, PropertyResolver, SourceId,
    Validator,
};
use chrono::Utc;
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::{CancelToken, ProgressCallback};
use crate::config::CfgtreeConfig;
use crate::error::ScanError;
use crate::pipeline::build_source;
use crate::provider::SourceProvider;

type BuildResult = Result<Arc<ClassHierarchy>, ScanError>;

/// Shared slot for one in-flight build; every concurrent caller waits on it.
type BuildSlot = Arc<OnceLock<BuildResult>>;

/// Outcome of a batch scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub hierarchies: BTreeMap<SourceId, Arc<ClassHierarchy>>,
    pub failures: BTreeMap<SourceId, ScanError>,
    /// Sources never dispatched because the scan was cancelled.
    pub skipped: Vec<SourceId>,
    pub elapsed: Duration,
}

impl ScanReport {
    pub fn total_classes(&self) -> usize {
        self.hierarchies.values().map(|h| h.len()).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.hierarchies.values().map(|h| h.error_count()).sum()
    }

    /// Every requested source produced a hierarchy.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

/// Merged view over every cached hierarchy, tagged with the cache
/// generation it was built from.
#[derive(Debug)]
pub struct GlobalView {
    generation: u64,
    hierarchy: ClassHierarchy,
    resolver: PropertyResolver,
}

impl GlobalView {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    pub fn resolver(&self) -> &PropertyResolver {
        &self.resolver
    }
}

/// Entry point: scans sources through the cache and answers class queries
/// across everything cached.
pub struct ClassService {
    provider: Arc<dyn SourceProvider>,
    config: CfgtreeConfig,
    cache: Arc<CacheManager>,
    store: Option<HierarchyStore>,
    pool: rayon::ThreadPool,
    in_flight: DashMap<(SourceId, Fingerprint), BuildSlot>,
    builds: AtomicUsize,
    global: RwLock<Option<Arc<GlobalView>>>,
    progress: Option<ProgressCallback>,
}

impl ClassService {
    pub fn new(provider: Arc<dyn SourceProvider>, config: CfgtreeConfig) -> Result<Self, ScanError> {
        config.validate()?;

        let cache = CacheManager::new(config.cache_config()).map_err(|e| ScanError::InvalidArgument(e.to_string()))?;
        let store = match &config.cache.dir {
            Some(dir) => Some(HierarchyStore::open(dir).map_err(|e| ScanError::Config(e.to_string()))?),
            None => None,
        };
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cfgtree-scan-{i}"))
            .build()
            .map_err(|e| ScanError::Config(format!("failed to start worker pool: {e}")))?;

        debug!("Class service ready: {} workers, store {:?}", workers, config.cache.dir);
        Ok(Self {
            provider,
            config,
            cache: Arc::new(cache),
            store,
            pool,
            in_flight: DashMap::new(),
            builds: AtomicUsize::new(0),
            global: RwLock::new(None),
            progress: None,
        })
    }

    /// Shares an existing cache between services.
    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &CfgtreeConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn provider(&self) -> &Arc<dyn SourceProvider> {
        &self.provider
    }

    /// Number of parse+build runs so far. Cache and store hits don't count.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Returns the hierarchy of one source, building it if the cached copy
    /// is missing or stale. Concurrent calls for the same source and
    /// fingerprint share a single build.
    pub fn scan_source(&self, source: &SourceId) -> BuildResult {
        if source.is_empty() {
            return Err(ScanError::InvalidArgument("source id must not be empty".into()));
        }
        let fingerprint = self
            .provider
            .fingerprint(source)
            .map_err(|e| ScanError::unavailable(source, e))?;
        if let Some(entry) = self.cache.get(source, fingerprint) {
            return Ok(entry.hierarchy());
        }

        let key = (source.clone(), fingerprint);
        let slot = Arc::clone(&*self.in_flight.entry(key.clone()).or_default());
        let result = slot.get_or_init(|| self.load_or_build(source, fingerprint)).clone();
        self.in_flight.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        result
    }

    /// [`scan_source`](Self::scan_source) unless `cancel` already fired.
    pub fn scan_source_until(&self, source: &SourceId, cancel: &CancelToken) -> BuildResult {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled(source.clone()));
        }
        self.scan_source(source)
    }

    fn load_or_build(&self, source: &SourceId, fingerprint: Fingerprint) -> BuildResult {
        // A build that just finished may have populated the cache.
        if let Some(entry) = self.cache.get(source, fingerprint) {
            return Ok(entry.hierarchy());
        }

        if let Some(store) = &self.store {
            if let Some(persisted) = store.load_or_discard(source, fingerprint) {
                debug!("Restored {} from {}", source, store.dir().display());
                let hierarchy = Arc::new(persisted.hierarchy);
                self.cache.put(source.clone(), Arc::clone(&hierarchy), fingerprint);
                return Ok(hierarchy);
            }
        }

        let bundle = self
            .provider
            .extract(source)
            .map_err(|e| ScanError::unavailable(source, e))?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let hierarchy = Arc::new(build_source(source, bundle, fingerprint, &self.config));
        debug!(
            "Built {} in {:?}: {} classes, {} diagnostics",
            source,
            started.elapsed(),
            hierarchy.len(),
            hierarchy.diagnostics().len()
        );

        if let Some(store) = &self.store {
            let entry = PersistedEntry {
                source: source.clone(),
                fingerprint,
                created_at: Utc::now(),
                hierarchy: (*hierarchy).clone(),
            };
            if let Err(e) = store.save(&entry) {
                warn!("Failed to persist {}: {}", source, e);
            }
        }
        self.cache.put(source.clone(), Arc::clone(&hierarchy), fingerprint);
        Ok(hierarchy)
    }

    /// Scans `sources` on the worker pool.
    ///
    /// Failures are recorded per source. Once `cancel` fires (or the
    /// configured deadline passes) no further source is dispatched; builds
    /// already running finish and are cached.
    pub fn scan_all(&self, sources: &[SourceId], cancel: &CancelToken) -> ScanReport {
        let started = Instant::now();
        let token = match self.config.deadline() {
            Some(deadline) => cancel.clone().deadline_at(started + deadline),
            None => cancel.clone(),
        };
        let total = sources.len();
        let completed = AtomicUsize::new(0);
        info!("Scanning {} sources on {} workers", total, self.pool.current_num_threads());

        let outcomes: Vec<(SourceId, BuildResult)> = self.pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let result = self.scan_source_until(source, &token);
                    if !matches!(result, Err(ScanError::Cancelled(_))) {
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(progress) = &self.progress {
                            progress(done, total, source.as_str());
                        }
                    }
                    (source.clone(), result)
                })
                .collect()
        });

        let mut report = ScanReport::default();
        for (source, outcome) in outcomes {
            match outcome {
                Ok(hierarchy) => {
                    report.hierarchies.insert(source, hierarchy);
                }
                Err(ScanError::Cancelled(_)) => report.skipped.push(source),
                Err(e) => {
                    warn!("Scan of {} failed: {}", source, e);
                    report.failures.insert(source, e);
                }
            }
        }
        report.skipped.sort();
        report.skipped.dedup();
        report.elapsed = started.elapsed();

        info!(
            "Scanned {} sources in {:?}: {} classes, {} failed, {} skipped",
            report.hierarchies.len(),
            report.elapsed,
            report.total_classes(),
            report.failures.len(),
            report.skipped.len()
        );
        report
    }

    /// Scans every source the provider knows about.
    pub fn scan_all_sources(&self, cancel: &CancelToken) -> ScanReport {
        self.scan_all(&self.provider.sources(), cancel)
    }

    /// Merged view over all cached sources, rebuilt when the cache
    /// generation moved. Expired entries are swept first so a memoized
    /// view never outlives them.
    pub fn global(&self) -> Arc<GlobalView> {
        self.cache.sweep_expired();
        let generation = self.cache.generation();
        {
            let current = self.global.read().unwrap_or_else(|e| e.into_inner());
            if let Some(view) = current.as_ref().filter(|v| v.generation == generation) {
                return Arc::clone(view);
            }
        }

        let view = Arc::new(self.build_global(generation));
        let mut current = self.global.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(Arc::clone(&view));
        view
    }

    fn build_global(&self, generation: u64) -> GlobalView {
        let order: HashMap<SourceId, usize> = self
            .provider
            .sources()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        let mut entries = self.cache.snapshot();
        entries.sort_by(|(a, _), (b, _)| {
            let rank_a = order.get(a).copied().unwrap_or(usize::MAX);
            let rank_b = order.get(b).copied().unwrap_or(usize::MAX);
            rank_a.cmp(&rank_b).then_with(|| a.cmp(b))
        });

        let mut builder = HierarchyBuilder::new(BuildOptions {
            merge_policy: self.config.scanner.merge_policy,
            section_prefixes: self.config.scanner.section_prefixes.clone(),
        });
        let mut fingerprint = FingerprintBuilder::new();
        for (source, entry) in &entries {
            fingerprint.field(source.as_str().as_bytes()).field(&entry.fingerprint().0);
            builder.add_hierarchy(&entry.hierarchy());
        }

        let mut hierarchy = builder.build(SourceId::new("*"), fingerprint.finish());
        Validator::new(self.config.validator_options()).validate(&mut hierarchy);
        let resolver = PropertyResolver::new(&hierarchy);
        debug!(
            "Global view at generation {}: {} sources, {} classes",
            generation,
            entries.len(),
            hierarchy.len()
        );
        GlobalView {
            generation,
            hierarchy,
            resolver,
        }
    }

    /// Case-insensitive lookup across all cached sources; the source latest
    /// in scan order wins.
    pub fn get_class(&self, name: &str) -> Option<ClassDefinition> {
        self.global().hierarchy.class(name).cloned()
    }

    /// Own properties merged over every ancestor's, across sources.
    pub fn resolve_properties(&self, name: &str) -> Option<PropertyMap> {
        self.global().resolver.resolve(name).cloned()
    }

    /// Classes across all sources that own or inherit `property`.
    pub fn classes_with_property(&self, property: &str) -> BTreeSet<String> {
        let view = self.global();
        view.resolver.classes_with_property(&view.hierarchy, property)
    }

    /// Classes whose parent is not defined by any cached source.
    pub fn unresolved_roots(&self) -> BTreeSet<String> {
        self.global().hierarchy.unresolved_roots()
    }

    pub fn find_children(&self, name: &str) -> BTreeSet<String> {
        self.global().hierarchy.children_of(name)
    }

    pub fn find_descendants(&self, name: &str) -> BTreeSet<String> {
        self.global().hierarchy.descendants_of(name)
    }

    /// `name` followed by its ancestors up to the root.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        self.global().hierarchy.ancestry(name)
    }

    /// Cross-source findings: merge conflicts, cycles and unresolved parents
    /// that only show up once sources are combined.
    pub fn global_diagnostics(&self) -> Vec<Diagnostic> {
        self.global().hierarchy.diagnostics().to_vec()
    }

    /// Classes across all sources lacking any of `required` after
    /// inheritance.
    pub fn check_required(&self, required: &[&str]) -> Vec<Diagnostic> {
        let view = self.global();
        validate_required(&view.hierarchy, &view.resolver, required)
    }

    /// Drops one source from memory and disk. Returns whether it was cached.
    pub fn invalidate(&self, source: &SourceId) -> bool {
        let removed = self.cache.invalidate(source);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(source) {
                warn!("Failed to remove persisted {}: {}", source, e);
            }
        }
        removed
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!("Failed to clear {}: {}", store.dir().display(), e);
            }
        }
    }
}
