//! Expiry of spans that are opened but never closed

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;

use super::registry::SpanRegistry;

/// Annotation attached to spans finished by the reaper
pub const TIMEOUT_EVENT: &str = "timeout";

/// Background worker that finishes spans left open longer than a TTL
pub struct SpanReaper {
    registry: Arc<SpanRegistry>,
    ttl: Duration,
    interval: Duration,
    running: Arc<AtomicBool>,
    stopped: Notify,
}

impl SpanReaper {
    pub fn new(registry: Arc<SpanRegistry>, ttl: Duration, interval: Duration) -> Self {
        Self {
            registry,
            ttl,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            stopped: Notify::new(),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                "Span reaper started with ttl {:?}, interval {:?}",
                self.ttl,
                self.interval
            );

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.stopped.notified() => break,
                }

                let reaped = reap_expired_spans(&self.registry, self.ttl);
                if reaped > 0 {
                    tracing::info!("Span reaper finished {} abandoned spans", reaped);
                }
            }

            tracing::info!("Span reaper stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopped.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Finish and remove every span older than `ttl`. Returns how many were reaped.
pub fn reap_expired_spans(registry: &SpanRegistry, ttl: Duration) -> usize {
    let expired = registry.drain_expired(ttl);
    let mut reaped = 0;

    for span in expired {
        span.log_event(TIMEOUT_EVENT);
        if span.finish() {
            reaped += 1;
        }
    }

    reaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::context::TraceMessage;
    use crate::trace::span::{RecordingReporter, Tracer};

    #[test]
    fn test_reap_finishes_with_timeout_event() {
        let reporter = Arc::new(RecordingReporter::new());
        let registry = SpanRegistry::new(Tracer::new(reporter.clone()));
        registry.get_or_create(&TraceMessage::new("5e27c67030932221", "38357d8f309b379d", "op"));

        assert_eq!(reap_expired_spans(&registry, Duration::from_secs(60)), 0);
        assert_eq!(reap_expired_spans(&registry, Duration::ZERO), 1);

        assert!(registry.is_empty());
        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].annotations.last().unwrap().value, TIMEOUT_EVENT);
    }

    #[tokio::test]
    async fn test_worker_reaps_in_background() {
        let reporter = Arc::new(RecordingReporter::new());
        let registry = Arc::new(SpanRegistry::new(Tracer::new(reporter.clone())));
        registry.get_or_create(&TraceMessage::new("1", "2", "op"));

        let reaper = Arc::new(SpanReaper::new(
            Arc::clone(&registry),
            Duration::ZERO,
            Duration::from_millis(10),
        ));
        let handle = Arc::clone(&reaper).start();
        assert!(reaper.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should stop promptly")
            .unwrap();

        assert!(registry.is_empty());
        assert_eq!(reporter.len(), 1);
    }
}
