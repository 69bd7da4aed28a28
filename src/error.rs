use thiserror::Error;

use crate::query::QueryId;

#[derive(Error, Debug)]
pub enum SupersequelError {
    #[error("Definition not found: {name}")]
    DefinitionNotFound { name: String },
    #[error("Unauthorized: {name} requires access {required:?}")]
    Unauthorized { name: String, required: Vec<String> },
    #[error("Template error: {message}")]
    TemplateCompile { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Unescapable value: {0}")]
    UnescapableValue(String),
    #[error("Missing history reference: {id}")]
    MissingHistoryReference { id: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Duplicate query id: {id}")]
    DuplicateQueryId { id: String },
    #[error("Helper error: {name}: {message}")]
    Helper { name: String, message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Query {index} ({name}): {source}")]
    Request {
        index: usize,
        id: Option<QueryId>,
        name: String,
        #[source]
        source: Box<SupersequelError>,
    },
}

impl SupersequelError {
    /// The underlying failure, with any request identity peeled off.
    pub fn kind(&self) -> &SupersequelError {
        match self {
            Self::Request { source, .. } => source.kind(),
            other => other,
        }
    }

    /// Short machine-readable name of the failure kind.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            Self::DefinitionNotFound { .. } => "definition_not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::TemplateCompile { .. } => "template_error",
            Self::UnescapableValue(_) => "unescapable_value",
            Self::MissingHistoryReference { .. } => "missing_history_reference",
            Self::Storage(_) => "storage_error",
            Self::DuplicateQueryId { .. } => "duplicate_query_id",
            Self::Helper { .. } => "helper_error",
            Self::Config(_) => "config_error",
            Self::Request { .. } => "request_error",
        }
    }

    pub(crate) fn template(message: impl Into<String>) -> Self {
        Self::TemplateCompile { message: message.into(), line: None, col: None }
    }
}

pub type Result<T> = std::result::Result<T, SupersequelError>;

// Helper conversions
impl From<config::ConfigError> for SupersequelError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl From<pest::error::Error<crate::template::Rule>> for SupersequelError {
    fn from(e: pest::error::Error<crate::template::Rule>) -> Self {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        Self::TemplateCompile { message: e.variant.message().into_owned(), line: Some(line), col: Some(col) }
    }
}
