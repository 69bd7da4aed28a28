//! Supersequel – batch execution of named, access-controlled statement templates.
//!
//! A caller submits a batch of *query requests*. Each request names a
//! [`query::Definition`] (a statement template plus the access it requires) and
//! supplies properties to substitute into it. For every request the engine:
//! * checks the caller's access against the definition ([`registry::authorize`]),
//! * renders the compiled template, escaping every substituted value ([`escape`]),
//! * hands the finished statement to the storage collaborator ([`storage::Storage`]),
//! * records the result in the batch [`history::History`] under the request id.
//!
//! Results come back in submission order regardless of execution order.
//!
//! ## Modules
//! * [`escape`] – literal, identifier and HTML-then-literal escaping.
//! * [`template`] – the template language (parser + renderer). Grammar details live in `template.pest`.
//! * [`helpers`] – prefixed helper functions callable from templates, plus a standard set.
//! * [`registry`] – definitions, the compiled-template cache and access control.
//! * [`history`] – per-batch results addressable as `{{$history.<id>}}`.
//! * [`scheduler`] – sync pipeline / async fan-out and reassembly.
//! * [`engine`] – [`Supersequel`], the entry point, and its builder.
//! * [`server`] – the axum transport adapter.
//! * [`settings`] – configuration for the bundled binary.
//!
//! ## Template Language
//! `{{name}}` substitutes a quoted literal, `{{: name}}` a backtick-quoted
//! identifier (`*` passes through), `{{? name}}` an HTML-escaped literal.
//! `{{#each}}`, `{{#if}}`, `{{#unless}}` and `{{#with}}` blocks are built in; any
//! registered helper can be called inline (`{{_trim name}}`), in a sub-expression
//! (`{{#if (_isString this)}}`) or as a block that post-processes its rendered body
//! (`{{#_trim ", "}}...{{/_trim}}`).
//!
//! ## Sync and Async Requests
//! Requests marked `sync` run one after another in submission order, each seeing
//! the history of those before it. The rest run concurrently with that pipeline.
//!
//! ## Quick Start
//! ```
//! use supersequel::{Supersequel, helpers, query::{Batch, Definition, QueryRequest, User}};
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = Supersequel::builder()
//!     .helpers(helpers::standard("_"))
//!     .query(|statement: String| async move { Ok::<_, String>(statement) })
//!     .build()
//!     .unwrap();
//! let batch = Batch {
//!     user: User::new(1, ["user"]),
//!     queries: vec![QueryRequest::new("by.name").property("name", "O'Brien")],
//!     definitions: vec![Definition::new("by.name", "SELECT * FROM users WHERE `name`={{name}}", ["user"])],
//! };
//! let response = engine.execute(batch).await.unwrap();
//! assert_eq!(response.queries[0].results, r"SELECT * FROM users WHERE `name`='O\'Brien'");
//! # });
//! ```

pub mod engine;
pub mod error;
pub mod escape;
pub mod helpers;
pub mod history;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod settings;
pub mod storage;
pub mod template;
pub mod value;

pub use engine::Supersequel;
pub use error::{Result, SupersequelError};
