use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::{Extension, Json, Router, routing::post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::Supersequel;
use crate::error::{Result, SupersequelError};
use crate::query::{Definition, QueryId, QueryRequest, Response, User};
use crate::registry::Registry;

/// Static configuration of one mounted middleware.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub definitions: Vec<Definition>,
}

/// Inbound request body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryBody {
    pub queries: Vec<QueryRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<QueryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ErrorBody {
    fn from_error(e: &SupersequelError) -> Self {
        let (index, id, name) = match e {
            SupersequelError::Request { index, id, name, .. } => (Some(*index), id.clone(), Some(name.clone())),
            _ => (None, None, None),
        };
        Self { status: "error".into(), error: e.to_string(), kind: e.code().into(), index, id, name }
    }
}

pub fn status_of(e: &SupersequelError) -> StatusCode {
    match e.kind() {
        SupersequelError::DefinitionNotFound { .. } => StatusCode::NOT_FOUND,
        SupersequelError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        SupersequelError::TemplateCompile { .. }
        | SupersequelError::UnescapableValue(_)
        | SupersequelError::MissingHistoryReference { .. }
        | SupersequelError::DuplicateQueryId { .. }
        | SupersequelError::Helper { .. } => StatusCode::BAD_REQUEST,
        SupersequelError::Storage(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Definitions fixed at mount time, executed for whichever principal the
/// transport hands over.
#[derive(Debug, Clone)]
pub struct Middleware {
    engine: Arc<Supersequel>,
    registry: Arc<Registry>,
}

impl Middleware {
    /// Compiles every configured definition up front.
    pub fn new(engine: Arc<Supersequel>, config: MiddlewareConfig) -> Result<Self> {
        let registry = engine.registry(config.definitions);
        registry.compile_all()?;
        info!(definitions = registry.len(), "middleware ready");
        Ok(Self { engine, registry: Arc::new(registry) })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Transport-neutral handling of one inbound batch.
    pub async fn handle(&self, user: &User, body: QueryBody) -> Result<Response> {
        self.engine.execute_with(&self.registry, user, &body.queries).await
    }

    /// `POST <path>` with a `{queries}` body; the principal must already be in the
    /// request extensions.
    pub fn router(self, path: &str) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::POST])
            .allow_headers(Any);
        Router::new()
            .route(path, post(move |Extension(user): Extension<User>, Json(body): Json<QueryBody>| {
                let middleware = self.clone();
                async move {
                    match middleware.handle(&user, body).await {
                        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
                        Err(e) => {
                            let status = status_of(&e);
                            warn!(error = %e, code = %status.as_u16(), "batch error");
                            (status, Json(ErrorBody::from_error(&e))).into_response()
                        }
                    }
                }
            }))
            .layer(cors)
    }
}

impl Supersequel {
    /// Mount `config`'s definitions as a transport adapter.
    pub fn middleware(self: &Arc<Self>, config: MiddlewareConfig) -> Result<Middleware> {
        Middleware::new(Arc::clone(self), config)
    }
}

/// Builds the principal from `x-user-id` and comma-separated `x-user-access`
/// headers. Only suitable behind a proxy that sets those headers itself.
pub async fn principal_from_headers(mut request: Request, next: Next) -> HttpResponse {
    let headers = request.headers();
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null);
    let access = headers
        .get("x-user-access")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').map(str::trim).filter(|a| !a.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    request.extensions_mut().insert(User { id, access });
    next.run(request).await
}
