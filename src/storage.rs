//! The storage collaborator: whatever actually runs a finished statement.

use std::future::Future;

use async_trait::async_trait;

use crate::error::{Result, SupersequelError};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Run `statement` and return its raw result.
    async fn query(&self, statement: &str) -> Result<String>;
}

/// Adapts an async closure `Fn(String) -> Future<Output = Result<String, E>>` into a [`Storage`].
pub struct QueryFn<F>(pub F);

#[async_trait]
impl<F, Fut, E> Storage for QueryFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<String, E>> + Send + 'static,
    E: std::fmt::Display + 'static,
{
    async fn query(&self, statement: &str) -> Result<String> {
        (self.0)(statement.to_string()).await.map_err(|e| SupersequelError::Storage(e.to_string()))
    }
}

/// Returns each statement unchanged instead of running it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoStorage;

#[async_trait]
impl Storage for EchoStorage {
    async fn query(&self, statement: &str) -> Result<String> {
        Ok(statement.to_string())
    }
}
