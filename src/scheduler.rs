//! Ordering and concurrency of one batch.
//!
//! Requests marked `sync` form a pipeline: each one is rendered only after every
//! earlier sync request has completed, so it observes their history entries.
//! All other requests fan out concurrently alongside that pipeline. The one
//! exception are async requests whose template reads `$history`: they start after
//! the pipeline and the history-free async requests have all completed, which
//! makes their history reads deterministic. A request only ever sees entries
//! written by requests submitted before it. Every request runs to its own
//! completion or failure; results are then put back in submission order.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::{join, join_all};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SupersequelError};
use crate::history::History;
use crate::query::{QueryRequest, QueryResult, User};
use crate::registry::Registry;
use crate::storage::Storage;
use crate::template::{CompiledTemplate, RenderContext};

/// A request that passed authorization and compilation.
struct Prepared<'q> {
    index: usize,
    request: &'q QueryRequest,
    template: Arc<CompiledTemplate>,
}

pub struct Scheduler<'a> {
    registry: &'a Registry,
    storage: &'a dyn Storage,
    user: &'a User,
    history: History,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a Registry, storage: &'a dyn Storage, user: &'a User) -> Self {
        Self { registry, storage, user, history: History::new() }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn prepare(&self, request: &QueryRequest) -> Result<Arc<CompiledTemplate>> {
        self.registry.authorized(self.user, &request.name)?;
        self.registry.get_or_compile(&request.name)
    }

    async fn execute(&self, prepared: &Prepared<'_>) -> Result<String> {
        let request = prepared.request;
        let properties = Value::Object(request.properties.clone());
        let ctx = RenderContext::new(&properties, &self.history).reader(prepared.index);
        let rendered = prepared.template.render(ctx)?;
        let statement = rendered.trim();
        debug!(index = prepared.index, name = %request.name, "executing");
        let results = self.storage.query(statement).await?;
        if let Some(id) = &request.id {
            self.history.record(&id.to_string(), prepared.index, &results);
        }
        debug!(index = prepared.index, name = %request.name, "completed");
        Ok(results)
    }

    async fn pipeline(&self, queue: &[Prepared<'_>]) -> Vec<(usize, Result<String>)> {
        let mut done = Vec::with_capacity(queue.len());
        for prepared in queue {
            done.push((prepared.index, self.execute(prepared).await));
        }
        done
    }

    async fn fan_out(&self, group: &[Prepared<'_>]) -> Vec<(usize, Result<String>)> {
        join_all(group.iter().map(|prepared| async move { (prepared.index, self.execute(prepared).await) })).await
    }

    /// Run `queries` and return their results in submission order, or the failure
    /// of the lowest-indexed request that failed.
    pub async fn run(&self, queries: &[QueryRequest]) -> Result<Vec<QueryResult>> {
        reject_duplicate_ids(queries)?;

        let mut slots: Vec<Option<Result<String>>> = queries.iter().map(|_| None).collect();
        let mut sync = Vec::new();
        let mut independent = Vec::new();
        let mut dependent = Vec::new();
        for (index, request) in queries.iter().enumerate() {
            match self.prepare(request) {
                Ok(template) => {
                    let prepared = Prepared { index, request, template };
                    if request.sync {
                        sync.push(prepared);
                    } else if prepared.template.reads_history() {
                        dependent.push(prepared);
                    } else {
                        independent.push(prepared);
                    }
                }
                Err(e) => slots[index] = Some(Err(e)),
            }
        }
        debug!(sync = sync.len(), independent = independent.len(), dependent = dependent.len(), "scheduling batch");

        let (sequential, concurrent) = join(self.pipeline(&sync), self.fan_out(&independent)).await;
        let late = self.fan_out(&dependent).await;
        for (index, outcome) in sequential.into_iter().chain(concurrent).chain(late) {
            slots[index] = Some(outcome);
        }

        let mut results = Vec::with_capacity(queries.len());
        let mut failure = None;
        for ((index, request), slot) in queries.iter().enumerate().zip(slots) {
            match slot {
                Some(Ok(results_text)) => results.push(QueryResult {
                    id: request.id.clone(),
                    name: request.name.clone(),
                    results: results_text,
                }),
                Some(Err(e)) => {
                    warn!(index, name = %request.name, error = %e, "query failed");
                    if failure.is_none() {
                        failure = Some(identify(index, request, e));
                    }
                }
                None => {
                    let e = SupersequelError::Storage("query was never executed".to_string());
                    failure.get_or_insert_with(|| identify(index, request, e));
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

fn identify(index: usize, request: &QueryRequest, source: SupersequelError) -> SupersequelError {
    SupersequelError::Request {
        index,
        id: request.id.clone(),
        name: request.name.clone(),
        source: Box::new(source),
    }
}

fn reject_duplicate_ids(queries: &[QueryRequest]) -> Result<()> {
    let mut seen = HashSet::new();
    for (index, request) in queries.iter().enumerate() {
        if let Some(id) = &request.id {
            if !seen.insert(id.to_string()) {
                let e = SupersequelError::DuplicateQueryId { id: id.to_string() };
                return Err(identify(index, request, e));
            }
        }
    }
    Ok(())
}
