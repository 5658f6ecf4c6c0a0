//! Registry of open spans keyed by trace id + span id

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::context::{TraceMessage, TracingContext};
use super::span::{Span, Tracer};

/// Open spans shared by all request handlers.
///
/// The whole map sits behind one lock: keys come from requests and there is
/// nothing to shard on.
pub struct SpanRegistry {
    tracer: Tracer,
    spans: Mutex<HashMap<String, Span>>,
}

impl SpanRegistry {
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            spans: Mutex::new(HashMap::new()),
        }
    }

    /// Return the open span for this message, starting one if needed.
    ///
    /// A message whose ids cannot be parsed gets an untied span that is not
    /// stored in the registry.
    pub fn get_or_create(&self, trace: &TraceMessage) -> Span {
        let key = trace.span_key();
        let mut spans = self.spans.lock();

        if let Some(span) = spans.get(&key) {
            tracing::info!(span_id = %trace.span_id, "updating trace");
            return span.clone();
        }

        tracing::info!(span_id = %trace.span_id, "building trace");
        match TracingContext::build(trace) {
            Some(context) => {
                let span = self.tracer.start_server_span(&trace.operation, &context);
                spans.insert(key, span.clone());
                tracing::info!(span_id = %trace.span_id, "trace built");
                span
            }
            None => {
                tracing::warn!(
                    operation = %trace.operation,
                    "uncorrelated trace message, starting untied span"
                );
                self.tracer.start_span(&trace.operation)
            }
        }
    }

    /// Drop the entry for this message. The span is not finished here.
    pub fn release(&self, trace: &TraceMessage) -> Option<Span> {
        self.spans.lock().remove(&trace.span_key())
    }

    pub fn contains(&self, trace: &TraceMessage) -> bool {
        self.spans.lock().contains_key(&trace.span_key())
    }

    /// Remove spans older than `ttl` and return them, unfinished
    pub fn drain_expired(&self, ttl: Duration) -> Vec<Span> {
        let mut spans = self.spans.lock();
        let expired: Vec<String> = spans
            .iter()
            .filter(|(_, span)| span.age() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| spans.remove(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }
}
