//! Meter and log ingestion
//!
//! Delivery is best effort: decode and store failures are logged and
//! reported as an [`IngestOutcome`], never raised to the HTTP caller.

pub mod telemetry;

pub use telemetry::{IngestOutcome, Ingestor};
