//! Open span handles and the tracer that starts them

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::{random_id, TraceId, TracingContext};

/// Receives spans once they are finished
pub trait SpanReporter: Send + Sync {
    fn report(&self, span: FinishedSpan);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Unspecified,
    Server,
}

impl SpanKind {
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            SpanKind::Unspecified => None,
            SpanKind::Server => Some("SERVER"),
        }
    }
}

/// Identifiers of a started span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: u64,
    pub parent_id: Option<u64>,
    /// The span id is shared with the remote caller's client span
    pub shared: bool,
    pub sampled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

/// A span after `finish`, ready for the collector
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub context: SpanContext,
    pub name: String,
    pub kind: SpanKind,
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub annotations: Vec<Annotation>,
}

struct SpanState {
    annotations: Vec<Annotation>,
    finished: bool,
}

struct SpanInner {
    context: SpanContext,
    name: String,
    kind: SpanKind,
    start: DateTime<Utc>,
    clock: Instant,
    state: Mutex<SpanState>,
    reporter: Arc<dyn SpanReporter>,
}

/// Shared handle to an open span. Clones refer to the same span.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    fn start(
        name: &str,
        kind: SpanKind,
        context: SpanContext,
        reporter: Arc<dyn SpanReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                context,
                name: name.to_string(),
                kind,
                start: Utc::now(),
                clock: Instant::now(),
                state: Mutex::new(SpanState {
                    annotations: Vec::new(),
                    finished: false,
                }),
                reporter,
            }),
        }
    }

    pub fn context(&self) -> &SpanContext {
        &self.inner.context
    }

    pub fn operation(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> SpanKind {
        self.inner.kind
    }

    /// Time since the span was started
    pub fn age(&self) -> Duration {
        self.inner.clock.elapsed()
    }

    /// Attach a timestamped event. Returns false if the span is already finished.
    pub fn log_event(&self, event: impl Into<String>) -> bool {
        let mut state = self.inner.state.lock();
        if state.finished {
            tracing::debug!(
                span_id = %format_args!("{:016x}", self.inner.context.span_id),
                "dropping event on finished span"
            );
            return false;
        }
        state.annotations.push(Annotation {
            timestamp: Utc::now(),
            value: event.into(),
        });
        true
    }

    /// Finish the span and hand it to the reporter.
    ///
    /// Only the first call reports; it returns true. Later calls return false.
    pub fn finish(&self) -> bool {
        let annotations = {
            let mut state = self.inner.state.lock();
            if state.finished {
                return false;
            }
            state.finished = true;
            std::mem::take(&mut state.annotations)
        };

        let finished = FinishedSpan {
            context: self.inner.context,
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            start: self.inner.start,
            duration: self.inner.clock.elapsed(),
            annotations,
        };
        self.inner.reporter.report(finished);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    /// True when both handles point at the same span
    pub fn same_as(&self, other: &Span) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.inner.name)
            .field("context", &self.inner.context)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

/// Starts spans that report to a shared reporter
#[derive(Clone)]
pub struct Tracer {
    reporter: Arc<dyn SpanReporter>,
}

impl Tracer {
    pub fn new(reporter: Arc<dyn SpanReporter>) -> Self {
        Self { reporter }
    }

    /// Start a span with fresh identifiers and no link to any caller
    pub fn start_span(&self, operation: &str) -> Span {
        let context = SpanContext {
            trace_id: TraceId::random(),
            span_id: random_id(),
            parent_id: None,
            shared: false,
            sampled: true,
        };
        Span::start(
            operation,
            SpanKind::Unspecified,
            context,
            Arc::clone(&self.reporter),
        )
    }

    /// Start the server side of a remote call, joining the caller's span
    pub fn start_server_span(&self, operation: &str, remote: &TracingContext) -> Span {
        let context = SpanContext {
            trace_id: remote.trace_id,
            span_id: remote.span_id,
            parent_id: remote.parent_span_id,
            shared: true,
            sampled: remote.sampled,
        };
        Span::start(
            operation,
            SpanKind::Server,
            context,
            Arc::clone(&self.reporter),
        )
    }
}

/// Reporter that keeps finished spans in memory
#[derive(Default)]
pub struct RecordingReporter {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }
}

impl SpanReporter for RecordingReporter {
    fn report(&self, span: FinishedSpan) {
        self.spans.lock().push(span);
    }
}
