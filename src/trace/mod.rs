//! Span correlation
//!
//! The application reports span events with hex identifiers. Each
//! `(traceId, spanId)` pair is turned into a server-side span joined to the
//! caller's context and kept open in the [`SpanRegistry`] until the matching
//! close event arrives. Finished spans go to a [`SpanReporter`], normally the
//! [`ZipkinCollector`].

pub mod context;
pub mod reaper;
pub mod registry;
pub mod span;
pub mod zipkin;

pub use context::{parse_hex_u64, HexError, TraceId, TraceMessage, TracingContext};
pub use reaper::{reap_expired_spans, SpanReaper, TIMEOUT_EVENT};
pub use registry::SpanRegistry;
pub use span::{
    Annotation, FinishedSpan, RecordingReporter, Span, SpanContext, SpanKind, SpanReporter,
    Tracer,
};
pub use zipkin::{CollectorError, Endpoint, ZipkinCollector, ZipkinSpan};
