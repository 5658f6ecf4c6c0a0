//! Zipkin v2 HTTP collector
//!
//! Finished spans are buffered in memory and shipped as a JSON array to the
//! collector endpoint (e.g. `http://localhost:9411/api/v2/spans`) by a
//! background worker, either on every flush interval or as soon as a batch
//! fills up. Failed uploads are logged and dropped.

use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;

use super::span::{FinishedSpan, SpanReporter};

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Where reported spans say they were recorded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    /// Build from a service name and an address like `http://10.0.0.5:8080`.
    /// Host names that are not IP literals are left out.
    pub fn new(service_name: impl Into<String>, address: &str) -> Self {
        let mut endpoint = Self {
            service_name: service_name.into(),
            ..Default::default()
        };

        let Ok(url) = reqwest::Url::parse(address) else {
            return endpoint;
        };

        if let Some(host) = url.host_str() {
            match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
                Ok(IpAddr::V4(ip)) => endpoint.ipv4 = Some(ip.to_string()),
                Ok(IpAddr::V6(ip)) => endpoint.ipv6 = Some(ip.to_string()),
                Err(_) => {}
            }
        }
        endpoint.port = url.port_or_known_default().filter(|p| *p != 0);
        endpoint
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZipkinAnnotation {
    pub timestamp: i64,
    pub value: String,
}

/// Zipkin v2 span as sent on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipkinSpan {
    pub trace_id: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Microseconds since epoch
    pub timestamp: i64,
    /// Microseconds
    pub duration: i64,
    pub local_endpoint: Endpoint,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<ZipkinAnnotation>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub shared: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

impl ZipkinSpan {
    pub fn from_finished(span: &FinishedSpan, local_endpoint: &Endpoint, debug: bool) -> Self {
        let duration = i64::try_from(span.duration.as_micros()).unwrap_or(i64::MAX);

        Self {
            trace_id: span.context.trace_id.to_string(),
            id: format!("{:016x}", span.context.span_id),
            parent_id: span.context.parent_id.map(|id| format!("{:016x}", id)),
            name: span.name.clone(),
            kind: span.kind.as_str(),
            timestamp: span.start.timestamp_micros(),
            // zipkin treats 0 as "unknown"
            duration: duration.max(1),
            local_endpoint: local_endpoint.clone(),
            annotations: span
                .annotations
                .iter()
                .map(|a| ZipkinAnnotation {
                    timestamp: a.timestamp.timestamp_micros(),
                    value: a.value.clone(),
                })
                .collect(),
            shared: span.context.shared,
            debug,
        }
    }
}

/// Buffered span reporter posting to a Zipkin collector
pub struct ZipkinCollector {
    http_client: reqwest::Client,
    url: String,
    local_endpoint: Endpoint,
    debug: bool,
    batch_size: usize,
    flush_interval: Duration,
    buffer: Mutex<Vec<ZipkinSpan>>,
    /// Held for a whole upload so `close` sees batches already in flight
    sending: tokio::sync::Mutex<()>,
    notify: Notify,
    running: AtomicBool,
}

impl ZipkinCollector {
    pub fn new(
        url: impl Into<String>,
        local_endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<Self, CollectorError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| CollectorError::Config(format!("invalid zipkin url '{}': {}", url, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("remora/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollectorError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            local_endpoint,
            debug: false,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            buffer: Mutex::new(Vec::new()),
            sending: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Mark every reported span as a debug span
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Number of spans waiting to be sent
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Start the background flush worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(url = %self.url, "Zipkin collector started");

            let mut interval = time::interval(self.flush_interval);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.notify.notified() => {}
                }

                if let Err(e) = self.flush().await {
                    tracing::error!("could not send spans to zipkin: {}", e);
                }
            }

            tracing::info!("Zipkin collector stopped");
        })
    }

    /// Send everything currently buffered. Returns the number of spans sent.
    ///
    /// Waits for an upload already in progress before taking the next batch.
    pub async fn flush(&self) -> Result<usize, CollectorError> {
        let _sending = self.sending.lock().await;
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        tracing::debug!("sending {} spans to {}", batch.len(), self.url);

        let response = self
            .http_client
            .post(&self.url)
            .json(&batch)
            .send()
            .await
            .map_err(|e| CollectorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(batch.len())
    }

    /// Stop the worker and send whatever is left
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();

        match self.flush().await {
            Ok(0) => {}
            Ok(sent) => tracing::info!("flushed {} spans on close", sent),
            Err(e) => tracing::error!("could not flush spans on close: {}", e),
        }
    }
}

impl SpanReporter for ZipkinCollector {
    fn report(&self, span: FinishedSpan) {
        let span = ZipkinSpan::from_finished(&span, &self.local_endpoint, self.debug);
        let pending = {
            let mut buffer = self.buffer.lock();
            buffer.push(span);
            buffer.len()
        };

        if pending >= self.batch_size {
            self.notify.notify_one();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Collector rejected spans with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::context::TraceMessage;
    use crate::trace::registry::SpanRegistry;
    use crate::trace::span::Tracer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoint_from_address() {
        let endpoint = Endpoint::new("vdc-agent", "http://10.0.0.5:8080");
        assert_eq!(endpoint.ipv4.as_deref(), Some("10.0.0.5"));
        assert_eq!(endpoint.port, Some(8080));

        let endpoint = Endpoint::new("vdc-agent", "http://[::1]:9000");
        assert_eq!(endpoint.ipv6.as_deref(), Some("::1"));

        let endpoint = Endpoint::new("vdc-agent", "http://0.0.0.0:0");
        assert_eq!(endpoint.ipv4.as_deref(), Some("0.0.0.0"));
        assert_eq!(endpoint.port, None);

        let endpoint = Endpoint::new("vdc-agent", "not a url");
        assert_eq!(endpoint.service_name, "vdc-agent");
        assert!(endpoint.ipv4.is_none());
    }

    #[tokio::test]
    async fn test_flush_posts_zipkin_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/spans"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let collector = Arc::new(
            ZipkinCollector::new(
                format!("{}/api/v2/spans", server.uri()),
                Endpoint::new("vdc-agent", "http://127.0.0.1:8080"),
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let registry = SpanRegistry::new(Tracer::new(collector.clone()));

        let trace = TraceMessage::new("5e27c67030932221", "38357d8f309b379d", "mysql-query")
            .with_parent("00000000000000ff");
        let span = registry.get_or_create(&trace);
        span.log_event("select * from Patients");
        span.finish();
        assert_eq!(collector.pending(), 1);

        assert_eq!(collector.flush().await.unwrap(), 1);
        assert_eq!(collector.pending(), 0);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let sent = &body[0];
        assert_eq!(sent["traceId"], "5e27c67030932221");
        assert_eq!(sent["id"], "38357d8f309b379d");
        assert_eq!(sent["parentId"], "00000000000000ff");
        assert_eq!(sent["name"], "mysql-query");
        assert_eq!(sent["kind"], "SERVER");
        assert_eq!(sent["shared"], true);
        assert_eq!(sent["localEndpoint"]["serviceName"], "vdc-agent");
        assert_eq!(sent["annotations"][0]["value"], "select * from Patients");
    }

    #[tokio::test]
    async fn test_flush_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let collector = Arc::new(
            ZipkinCollector::new(server.uri(), Endpoint::default(), Duration::from_secs(5))
                .unwrap(),
        );
        Tracer::new(collector.clone()).start_span("op").finish();

        match collector.flush().await {
            Err(CollectorError::Rejected { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // dropped, not retried
        assert_eq!(collector.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_flushes_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let collector = Arc::new(
            ZipkinCollector::new(server.uri(), Endpoint::default(), Duration::from_secs(5))
                .unwrap()
                .with_flush_interval(Duration::from_secs(3600)),
        );
        let handle = Arc::clone(&collector).start();

        Tracer::new(collector.clone()).start_span("op").finish();
        collector.close().await;
        handle.abort();

        assert_eq!(collector.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_waits_for_upload_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let collector = Arc::new(
            ZipkinCollector::new(server.uri(), Endpoint::default(), Duration::from_secs(5))
                .unwrap(),
        );
        Tracer::new(collector.clone()).start_span("op").finish();

        let uploading = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.flush().await })
        };
        while collector.pending() > 0 {
            tokio::task::yield_now().await;
        }

        let started = std::time::Instant::now();
        collector.close().await;
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(uploading.await.unwrap().unwrap(), 1);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = ZipkinCollector::new("::nope::", Endpoint::default(), Duration::from_secs(1));
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }
}
