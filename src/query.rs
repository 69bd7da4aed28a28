//! Request and response shapes exchanged with callers.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Caller-chosen identifier of a query within a batch. Echoed back exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryId {
    Text(String),
    Number(i64),
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryId::Text(s) => f.write_str(s),
            QueryId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for QueryId {
    fn from(s: &str) -> Self { QueryId::Text(s.to_string()) }
}

/// A named statement template plus the access it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    name: String,
    #[serde(alias = "template")]
    statement: String,
    #[serde(default)]
    access: BTreeSet<String>,
}

impl Definition {
    pub fn new<I, S>(name: impl Into<String>, statement: impl Into<String>, access: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            statement: statement.into(),
            access: access.into_iter().map(Into::into).collect(),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn statement(&self) -> &str {
        &self.statement
    }
    pub fn access(&self) -> &BTreeSet<String> {
        &self.access
    }
}

/// The principal submitting a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub access: BTreeSet<String>,
}

impl User {
    pub fn new<I, S>(id: impl Into<Value>, access: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { id: id.into(), access: access.into_iter().map(Into::into).collect() }
    }
}

/// One element of a submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QueryId>,
    pub name: String,
    #[serde(default)]
    pub sync: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

/// Callers may send `"properties": null` for a statement without placeholders.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl QueryRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), sync: false, properties: Map::new() }
    }
    pub fn id(mut self, id: impl Into<QueryId>) -> Self {
        self.id = Some(id.into());
        self
    }
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One element of a completed batch; `properties` are not echoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QueryId>,
    pub name: String,
    pub results: String,
}

/// Everything `execute` needs for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub user: User,
    pub queries: Vec<QueryRequest>,
    #[serde(default)]
    pub definitions: Vec<Definition>,
}

/// The `{queries: [...]}` envelope returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub queries: Vec<QueryResult>,
}
