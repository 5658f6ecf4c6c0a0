//! Remora: Telemetry Sidecar Agent
//!
//! Runs next to an instrumented application and accepts its telemetry over
//! HTTP, forwarding span events to a Zipkin collector and meter samples and
//! log lines to Elasticsearch.
//!
//! # Features
//!
//! - **Span Correlation**: Hex trace/span ids become server-side spans joined
//!   to the caller's trace, kept open until the matching close event
//! - **Index Provisioning**: Idempotent index creation and mapping updates,
//!   with optional daily index rotation
//! - **Best-Effort Delivery**: Backend failures are logged, never returned to
//!   the application
//! - **Span Expiry**: Optional TTL sweep for spans that are never closed
//!
//! # Example
//!
//! ```no_run
//! use remora::agent::Agent;
//! use remora::config::AgentConfig;
//! use remora::store::{DocumentStore, MemoryStore};
//! use remora::trace::{RecordingReporter, SpanReporter, TraceMessage};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let reporter: Arc<dyn SpanReporter> = Arc::new(RecordingReporter::new());
//! let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
//! let agent = Agent::with_backends(AgentConfig::default(), Some(reporter), Some(store));
//!
//! let trace = TraceMessage::new("5e27c67030932221", "38357d8f309b379d", "mysql-query")
//!     .with_message("select * from Patients");
//! agent.trace(&trace);
//! agent.close(&trace);
//!
//! agent.meter(br#"{"unit":"byte per second","value":9231.123}"#).await;
//! agent.log(b"foobar").await;
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod ingest;
pub mod store;
pub mod trace;

// Re-export commonly used types
pub use agent::{Agent, AgentError};
pub use config::{AgentConfig, Cli, ConfigError};
pub use ingest::{IngestOutcome, Ingestor};
pub use store::{Document, DocumentStore, ElasticClient, IndexPolicy, StoreError};
pub use trace::{SpanRegistry, TraceMessage, TracingContext, ZipkinCollector};
