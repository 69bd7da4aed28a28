//! Definition registry, compiled-template cache and access control.

use core::hash::BuildHasherDefault;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use seahash::SeaHasher;
use tracing::debug;

use crate::error::{Result, SupersequelError};
use crate::helpers::Helpers;
use crate::query::{Definition, User};
use crate::template::CompiledTemplate;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Default number of compiled templates an engine keeps.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

type CacheKey = (String, String);

#[derive(Debug, Default)]
struct Kept {
    templates: HashMap<CacheKey, Arc<CompiledTemplate>, OtherHasher>,
    order: VecDeque<CacheKey>,
}

/// Compiled templates keyed by definition name and statement text, so two
/// registries that happen to reuse a name for different statements never share
/// a compilation. Holds at most `capacity` templates; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct TemplateCache {
    kept: Arc<RwLock<Kept>>,
    capacity: usize,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache keeping at most `capacity` templates (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self { kept: Arc::default(), capacity: capacity.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_or_compile(&self, definition: &Definition, helpers: &Helpers) -> Result<Arc<CompiledTemplate>> {
        let key = (definition.name().to_string(), definition.statement().to_string());
        if let Some(kept) = self.kept.read().unwrap_or_else(|p| p.into_inner()).templates.get(&key) {
            return Ok(Arc::clone(kept));
        }
        // compile outside the lock; a racing compile of the same key produces an equal template
        let compiled = Arc::new(CompiledTemplate::compile(definition.statement(), helpers)?);
        debug!(name = definition.name(), history = compiled.reads_history(), "compiled template");
        let mut kept = self.kept.write().unwrap_or_else(|p| p.into_inner());
        if let Some(raced) = kept.templates.get(&key) {
            return Ok(Arc::clone(raced));
        }
        while kept.templates.len() >= self.capacity {
            let Some(oldest) = kept.order.pop_front() else { break };
            kept.templates.remove(&oldest);
            debug!(name = %oldest.0, "evicted template");
        }
        kept.order.push_back(key.clone());
        kept.templates.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.kept.read().unwrap_or_else(|p| p.into_inner()).templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allowed iff every access the definition requires is held by the user.
pub fn authorize(user: &User, definition: &Definition) -> bool {
    definition.access().is_subset(&user.access)
}

/// The active set of definitions, each compiled at most once.
#[derive(Debug, Clone)]
pub struct Registry {
    definitions: HashMap<String, Definition, OtherHasher>,
    helpers: Arc<Helpers>,
    cache: TemplateCache,
}

impl Registry {
    pub fn new(definitions: Vec<Definition>, helpers: Arc<Helpers>) -> Self {
        Self::with_cache(definitions, helpers, TemplateCache::new())
    }

    pub fn with_cache(definitions: Vec<Definition>, helpers: Arc<Helpers>, cache: TemplateCache) -> Self {
        let mut registry = Self { definitions: HashMap::default(), helpers, cache };
        registry.register(definitions);
        registry
    }

    /// Replace the active set of definitions. Later duplicates of a name win.
    pub fn register(&mut self, definitions: Vec<Definition>) {
        self.definitions = definitions.into_iter().map(|d| (d.name().to_string(), d)).collect();
    }

    pub fn lookup(&self, name: &str) -> Result<&Definition> {
        self.definitions
            .get(name)
            .ok_or_else(|| SupersequelError::DefinitionNotFound { name: name.to_string() })
    }

    pub fn get_or_compile(&self, name: &str) -> Result<Arc<CompiledTemplate>> {
        let definition = self.lookup(name)?;
        self.cache.get_or_compile(definition, &self.helpers)
    }

    /// Compile every definition now, surfacing the first template error.
    pub fn compile_all(&self) -> Result<()> {
        let mut names: Vec<&String> = self.definitions.keys().collect();
        names.sort();
        for name in names {
            self.get_or_compile(name).map_err(|e| match e {
                SupersequelError::TemplateCompile { message, line, col } => SupersequelError::TemplateCompile {
                    message: format!("{name}: {message}"),
                    line,
                    col,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Look up `name` and check `user` may run it.
    pub fn authorized(&self, user: &User, name: &str) -> Result<&Definition> {
        let definition = self.lookup(name)?;
        if !authorize(user, definition) {
            return Err(SupersequelError::Unauthorized {
                name: name.to_string(),
                required: definition.access().iter().cloned().collect(),
            });
        }
        Ok(definition)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
