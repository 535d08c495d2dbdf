//! Namespace registry.
//!
//! Holds every registered job under its fully-qualified id (`namespace.jobId`,
//! or the bare id for ungrouped jobs) plus a per-namespace view. Writers build
//! a new catalog and swap it in whole, so readers see either the old or the
//! new state. Path lookups go through a bounded TTL cache.

use crate::config::ResolutionCacheConfig;
use crate::definition::JobDefinition;
use crate::error::{JobError, JobResult};
use crate::router::JobsRouter;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Separator between a namespace and a job id.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Split `namespace.jobId` into its parts. Paths without a separator have no
/// namespace.
pub fn split_job_path(path: &str) -> (Option<&str>, &str) {
    match path.split_once(NAMESPACE_SEPARATOR) {
        Some((namespace, job_id)) => (Some(namespace), job_id),
        None => (None, path),
    }
}

/// Build `namespace.jobId`.
pub fn qualify(namespace: &str, job_id: &str) -> String {
    format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, job_id)
}

/// A resolved job path.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub namespace: Option<String>,
    pub job_id: String,
    pub namespaced_job_id: String,
    pub definition: Arc<JobDefinition>,
}

#[derive(Debug, Default, Clone)]
struct Catalog {
    /// Fully-qualified id to definition.
    jobs: HashMap<String, Arc<JobDefinition>>,
    /// Namespace to job id to definition.
    namespaces: BTreeMap<String, BTreeMap<String, Arc<JobDefinition>>>,
}

struct CacheEntry {
    value: Arc<ResolvedJob>,
    inserted_at: Instant,
}

/// Bounded, TTL-limited path cache.
struct ResolutionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl ResolutionCache {
    fn new(config: &ResolutionCacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: config.capacity.max(1),
            ttl: config.ttl(),
        }
    }

    fn get(&self, path: &str) -> Option<Arc<ResolvedJob>> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(path);
                None
            }
            None => None,
        }
    }

    fn insert(&self, path: String, value: Arc<ResolvedJob>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&path) {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            path,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Registry of job definitions.
pub struct NamespaceRegistry {
    catalog: RwLock<Arc<Catalog>>,
    cache: ResolutionCache,
    scans: AtomicU64,
}

impl std::fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.snapshot();
        f.debug_struct("NamespaceRegistry")
            .field("jobs", &catalog.jobs.len())
            .field("namespaces", &catalog.namespaces.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new(&ResolutionCacheConfig::default())
    }
}

impl NamespaceRegistry {
    pub fn new(cache: &ResolutionCacheConfig) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(Catalog::default())),
            cache: ResolutionCache::new(cache),
            scans: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().clone()
    }

    /// Apply `update` to a copy of the catalog and publish it.
    fn publish<T>(&self, update: impl FnOnce(&mut Catalog) -> JobResult<T>) -> JobResult<T> {
        let mut catalog = self.catalog.write();
        let mut next = Catalog::clone(&catalog);
        let out = update(&mut next)?;
        *catalog = Arc::new(next);
        drop(catalog);
        self.cache.clear();
        Ok(out)
    }

    /// Register one ungrouped job under its own name. Replaces an existing
    /// job with the same name.
    pub fn register(&self, definition: JobDefinition) -> JobResult<Arc<JobDefinition>> {
        let name = definition.name().to_string();
        if name.is_empty() {
            return Err(JobError::Configuration("job name must not be empty".to_string()));
        }
        let definition = Arc::new(definition);
        let stored = definition.clone();
        let replaced = self.publish(move |catalog| Ok(catalog.jobs.insert(name, stored).is_some()))?;
        if replaced {
            warn!(job_name = %definition.name(), "Replaced registered job");
        }
        info!(job_name = %definition.name(), "Registered job");
        Ok(definition)
    }

    /// Register many jobs at once, keyed by their fully-qualified id.
    ///
    /// Ids of the form `namespace.jobId` also join that namespace's view.
    pub fn bulk_register<I>(&self, jobs: I) -> JobResult<Vec<Arc<JobDefinition>>>
    where
        I: IntoIterator<Item = (String, JobDefinition)>,
    {
        let jobs: Vec<(String, Arc<JobDefinition>)> = jobs
            .into_iter()
            .map(|(id, definition)| {
                let definition = if definition.name() == id {
                    definition
                } else {
                    definition.renamed(id.clone())
                };
                (id, Arc::new(definition))
            })
            .collect();

        let registered: Vec<Arc<JobDefinition>> = jobs.iter().map(|(_, d)| d.clone()).collect();
        self.publish(move |catalog| {
            for (id, definition) in jobs {
                if let (Some(namespace), job_id) = split_job_path(&id) {
                    catalog
                        .namespaces
                        .entry(namespace.to_string())
                        .or_default()
                        .insert(job_id.to_string(), definition.clone());
                }
                catalog.jobs.insert(id, definition);
            }
            Ok(())
        })?;

        info!(count = registered.len(), "Bulk registered jobs");
        Ok(registered)
    }

    /// Merge namespaced routers.
    ///
    /// Fails with `NAMESPACE_CONFLICT`, registering nothing, when two routers
    /// share a namespace or a namespace is already registered.
    pub fn merge(&self, routers: Vec<JobsRouter>) -> JobResult<Vec<Arc<JobDefinition>>> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for router in &routers {
            let namespace = router.namespace();
            if namespace.is_empty() || namespace.contains(NAMESPACE_SEPARATOR) {
                return Err(JobError::Configuration(format!(
                    "namespace '{}' must be non-empty and must not contain '{}'",
                    namespace, NAMESPACE_SEPARATOR
                )));
            }
            if !seen.insert(namespace.to_string()) && !duplicates.iter().any(|d| d == namespace) {
                duplicates.push(namespace.to_string());
            }
        }

        let registered = self.publish(|catalog| {
            let mut duplicates = duplicates;
            for namespace in &seen {
                if catalog.namespaces.contains_key(namespace) && !duplicates.contains(namespace) {
                    duplicates.push(namespace.clone());
                }
            }
            if !duplicates.is_empty() {
                duplicates.sort();
                return Err(JobError::NamespaceConflict(duplicates));
            }

            let mut registered = Vec::new();
            for router in routers {
                let namespace = router.namespace().to_string();
                let view = catalog.namespaces.entry(namespace.clone()).or_default();
                for (job_id, definition) in router.into_jobs() {
                    let qualified = qualify(&namespace, &job_id);
                    let definition = Arc::new(definition.renamed(qualified.clone()));
                    view.insert(job_id, definition.clone());
                    catalog.jobs.insert(qualified, definition.clone());
                    registered.push(definition);
                }
            }
            Ok(registered)
        });

        match &registered {
            Ok(jobs) => info!(namespaces = seen.len(), jobs = jobs.len(), "Merged job routers"),
            Err(e) => warn!(error = %e, "Router merge rejected"),
        }
        registered
    }

    /// Look up a job by its registered name.
    pub fn get(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.snapshot().jobs.get(name).cloned()
    }

    /// Resolve a `namespace.jobId` (or bare) path through the cache.
    pub fn resolve(&self, path: &str) -> JobResult<Arc<ResolvedJob>> {
        if let Some(hit) = self.cache.get(path) {
            return Ok(hit);
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let catalog = self.snapshot();
        let (namespace, job_id) = split_job_path(path);

        let Some(definition) = catalog.jobs.get(path).cloned() else {
            let available = match namespace {
                Some(namespace) => catalog
                    .namespaces
                    .get(namespace)
                    .map(|jobs| jobs.keys().cloned().collect())
                    .unwrap_or_default(),
                None => {
                    let mut names: Vec<String> = catalog.jobs.keys().cloned().collect();
                    names.sort();
                    names
                }
            };
            return Err(JobError::JobNotFound {
                path: path.to_string(),
                available,
            });
        };

        let resolved = Arc::new(ResolvedJob {
            namespace: namespace.map(str::to_string),
            job_id: job_id.to_string(),
            namespaced_job_id: path.to_string(),
            definition,
        });
        self.cache.insert(path.to_string(), resolved.clone());
        debug!(path = %path, "Resolved job path");
        Ok(resolved)
    }

    /// Resolve `job_id` inside `namespace`.
    pub fn resolve_in(&self, namespace: &str, job_id: &str) -> JobResult<Arc<ResolvedJob>> {
        self.resolve(&qualify(namespace, job_id))
    }

    /// Number of catalog scans performed by [`resolve`](Self::resolve).
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.snapshot().namespaces.keys().cloned().collect()
    }

    /// Job ids inside one namespace, sorted.
    pub fn jobs_in(&self, namespace: &str) -> Vec<String> {
        self.snapshot()
            .namespaces
            .get(namespace)
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered definition, sorted by name.
    pub fn definitions(&self) -> Vec<Arc<JobDefinition>> {
        let mut all: Vec<Arc<JobDefinition>> = self.snapshot().jobs.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.snapshot().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every job and cached path.
    pub fn clear(&self) {
        *self.catalog.write() = Arc::new(Catalog::default());
        self.cache.clear();
    }
}
