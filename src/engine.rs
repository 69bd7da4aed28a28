//! The execution entry point and its construction configuration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{Result, SupersequelError};
use crate::helpers::{HelperSet, Helpers};
use crate::query::{Batch, Definition, QueryRequest, Response, User};
use crate::registry::{Registry, TemplateCache};
use crate::scheduler::Scheduler;
use crate::storage::{QueryFn, Storage};

/// Cleanup hook for the storage resource, run once per batch whatever its outcome.
pub type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

/// Runs the release hook when dropped, so it also fires if the batch future is
/// cancelled mid-flight.
struct Release<'a>(Option<&'a ReleaseHook>);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if let Some(hook) = self.0 {
            hook();
        }
    }
}

pub struct Supersequel {
    helpers: Arc<Helpers>,
    storage: Arc<dyn Storage>,
    release: Option<ReleaseHook>,
    cache: TemplateCache,
}

impl Supersequel {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn helpers(&self) -> &Arc<Helpers> {
        &self.helpers
    }

    /// A registry over `definitions` that shares this engine's template cache.
    pub fn registry(&self, definitions: Vec<Definition>) -> Registry {
        Registry::with_cache(definitions, Arc::clone(&self.helpers), self.cache.clone())
    }

    /// Run a batch whose definitions travel with it.
    pub async fn execute(&self, batch: Batch) -> Result<Response> {
        let registry = self.registry(batch.definitions);
        self.execute_with(&registry, &batch.user, &batch.queries).await
    }

    /// Run `queries` for `user` against an existing registry.
    pub async fn execute_with(&self, registry: &Registry, user: &User, queries: &[QueryRequest]) -> Result<Response> {
        let _release = Release(self.release.as_ref());
        let started = Instant::now();
        let outcome = Scheduler::new(registry, self.storage.as_ref(), user).run(queries).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            Ok(results) => info!(ms = elapsed_ms, queries = results.len(), "batch complete"),
            Err(e) => warn!(ms = elapsed_ms, kind = e.code(), error = %e, "batch failed"),
        }
        outcome.map(|queries| Response { queries })
    }
}

impl fmt::Debug for Supersequel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Supersequel")
            .field("helpers", &self.helpers)
            .field("release", &self.release.is_some())
            .field("cached_templates", &self.cache.len())
            .finish()
    }
}

#[derive(Default)]
pub struct Builder {
    helpers: Vec<HelperSet>,
    release: Option<ReleaseHook>,
    storage: Option<Arc<dyn Storage>>,
    cache_capacity: Option<usize>,
}

impl Builder {
    pub fn helpers(mut self, set: HelperSet) -> Self {
        self.helpers.push(set);
        self
    }

    pub fn release<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(hook));
        self
    }

    /// Bound the number of compiled templates kept across batches.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn storage<S: Storage + 'static>(mut self, storage: S) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use an async closure as the storage collaborator.
    pub fn query<F, Fut, E>(self, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<String, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        self.storage(QueryFn(f))
    }

    pub fn build(self) -> Result<Supersequel> {
        let storage = self
            .storage
            .ok_or_else(|| SupersequelError::Config("a storage collaborator is required".to_string()))?;
        Ok(Supersequel {
            helpers: Arc::new(Helpers::new(self.helpers)?),
            storage,
            release: self.release,
            cache: self.cache_capacity.map(TemplateCache::with_capacity).unwrap_or_default(),
        })
    }
}
