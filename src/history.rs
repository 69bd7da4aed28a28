//! Per-batch record of completed query results, addressable by query id.
//!
//! A `History` lives exactly as long as one batch invocation. Entries are written
//! once, when the query with that id completes, and read by later templates
//! through `{{$history.<id>}}`. Each entry remembers the batch position of its
//! writer: a reader only sees entries written by requests submitted before it,
//! never its own or a later one's, whatever order they actually completed in.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::registry::OtherHasher;

#[derive(Debug, Clone)]
struct Entry {
    writer: usize,
    results: String,
}

#[derive(Debug, Default)]
pub struct History {
    entries: RwLock<HashMap<String, Entry, OtherHasher>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the results of query `id`, submitted at position `writer` in its
    /// batch. A second write for the same id is ignored.
    pub fn record(&self, id: &str, writer: usize, results: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), Entry { writer, results: results.to_string() });
        true
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .map(|entry| entry.results.clone())
    }

    /// The results of `id` as seen from position `reader`: only entries whose
    /// writer was submitted strictly earlier are visible.
    pub fn visible_to(&self, id: &str, reader: usize) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .filter(|entry| entry.writer < reader)
            .map(|entry| entry.results.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
