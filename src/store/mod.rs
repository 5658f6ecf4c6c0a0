//! Document store access
//!
//! Meter and log events are persisted as envelope documents into an index
//! named after the agent:
//! ```json
//! {"@timestamp": "2018-02-19T12:32:32Z", "meter": {"value": 9231.123, "unit": "byte per second"}}
//! {"@timestamp": "2018-02-19T12:32:33Z", "log": {"value": "foobar"}}
//! ```

pub mod client;
pub mod document;
pub mod index;
pub mod memory;

pub use client::{DocumentStore, ElasticClient, StoreError};
pub use document::{Document, DocumentKind, LogMessage, MeterMessage};
pub use index::{ensure_index, index_body, mapping_properties, IndexPolicy, Provisioned};
pub use memory::MemoryStore;
