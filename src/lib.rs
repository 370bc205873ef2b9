//! logfuse: federated log search across heterogeneous log stores.
//!
//! One backend-agnostic search specification is dispatched to one or more
//! log stores (Elasticsearch/OpenSearch, Splunk, CloudWatch Insights, or a
//! remote command's stdout), each backend's native wire format is normalized
//! into a uniform [`LogEntry`](model::LogEntry) shape, and results come back
//! as a bounded initial batch, a paginated sequence, or a live-tailed stream
//! merged across sources.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use logfuse::backend::opensearch::{OpenSearchBackend, OpenSearchClient};
//! use logfuse::backend::Backend;
//! use logfuse::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> logfuse::Result<()> {
//!     let backend = OpenSearchBackend::new(OpenSearchClient::new("http://localhost:9200"));
//!
//!     let search: LogSearch = serde_json::from_str(
//!         r#"{
//!           "filter": {"field": "level", "value": "ERROR"},
//!           "range": {"last": "30m"},
//!           "size": 100,
//!           "options": {"index": "prod-logs"}
//!         }"#,
//!     )?;
//!
//!     let mut result = backend.query(CancellationToken::new(), search).await?;
//!     let (entries, _updates) = result.entries(CancellationToken::new()).await?;
//!     for entry in entries {
//!         println!("{} {}", entry.level, entry.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`search`]: the [`LogSearch`](search::LogSearch) specification, merge
//!   inheritance, and `${VAR}` resolution
//! - [`filter`]: the recursive filter AST, validation, and client-side
//!   evaluation
//! - [`backend`]: the backend contract, the multi-source aggregator, the
//!   shared follower loop, and the concrete backends
//! - [`model`]: the normalized [`LogEntry`](model::LogEntry) record
//! - [`extract`]: JSON and regex field extraction for line-based sources
//! - [`opt`]: the tri-state [`Opt`](opt::Opt) optional used by the merge
//!   model
//! - [`timefmt`]: accepted timestamp formats and duration parsing
//! - [`config`]: sources and inheritable search templates
//! - [`cli`]: command-line interface
//! - [`error`]: error types and handling

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod filter;
pub mod model;
pub mod opt;
pub mod search;
pub mod timefmt;

// Re-export commonly used types at the crate root
pub use error::{FuseError, Result};
pub use model::LogEntry;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Prelude module for convenient imports.
pub mod prelude {

    pub use crate::backend::{Backend, SearchResult};
    pub use crate::error::{FuseError, Result};
    pub use crate::filter::{Filter, FilterOp};
    pub use crate::model::LogEntry;
    pub use crate::opt::Opt;
    pub use crate::search::LogSearch;
}
