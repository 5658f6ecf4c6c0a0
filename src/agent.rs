//! The agent: span correlation and telemetry ingestion behind one facade

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::{AgentConfig, ConfigError};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::store::{DocumentStore, ElasticClient, Provisioned, StoreError};
use crate::trace::{
    CollectorError, Endpoint, Span, SpanReaper, SpanRegistry, SpanReporter, TraceMessage, Tracer,
    ZipkinCollector,
};

const BACKEND_TIMEOUT: Duration = Duration::from_secs(15);
const STORE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Agent {
    config: AgentConfig,
    /// `None` when tracing is disabled
    registry: Option<Arc<SpanRegistry>>,
    collector: Option<Arc<ZipkinCollector>>,
    reaper: Option<Arc<SpanReaper>>,
    ingestor: Ingestor,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    /// Connect to the configured backends, wait for the store and provision
    /// the index. Any failure here is fatal for the agent.
    pub async fn connect(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;

        let collector = if config.tracing {
            let endpoint = Endpoint::new(config.service_name.clone(), &config.endpoint);
            let collector = ZipkinCollector::new(
                config.zipkin_endpoint.clone(),
                endpoint,
                BACKEND_TIMEOUT,
            )?
            .with_debug(config.verbose);
            Some(Arc::new(collector))
        } else {
            tracing::info!("tracing disabled");
            None
        };

        let store: Option<Arc<dyn DocumentStore>> = if config.store {
            let client = ElasticClient::new(&config.elastic_url, BACKEND_TIMEOUT)?;
            wait_for_store(&client, config.store_wait()).await?;
            Some(Arc::new(client) as Arc<dyn DocumentStore>)
        } else {
            tracing::warn!("running without a document store, documents are only logged");
            None
        };

        let reporter = collector
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn SpanReporter>);
        let mut agent = Self::with_backends(config, reporter, store);
        agent.collector = collector;

        if let Some(result) = agent.ingestor.provision().await? {
            let index = agent.ingestor.current_index();
            match result {
                Provisioned::Created => tracing::info!(index = %index, "index created"),
                Provisioned::Updated => tracing::info!(index = %index, "index mapping updated"),
            }
        }

        Ok(agent)
    }

    /// Assemble an agent from ready-made backends. A `None` reporter disables
    /// tracing, a `None` store makes ingestion log-only.
    pub fn with_backends(
        config: AgentConfig,
        reporter: Option<Arc<dyn SpanReporter>>,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        let registry = reporter.map(|reporter| Arc::new(SpanRegistry::new(Tracer::new(reporter))));

        let reaper = match (&registry, config.span_ttl()) {
            (Some(registry), Some(ttl)) => Some(Arc::new(SpanReaper::new(
                Arc::clone(registry),
                ttl,
                reaper_interval(ttl),
            ))),
            _ => None,
        };

        let ingestor = Ingestor::new(
            store,
            config.name.clone(),
            config.index_policy,
            config.verbose,
        );

        Self {
            config,
            registry,
            collector: None,
            reaper,
            ingestor,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> Option<&Arc<SpanRegistry>> {
        self.registry.as_ref()
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Start the collector flush worker and, if configured, the span reaper
    pub fn start_workers(&self) {
        let mut workers = self.workers.lock();

        if let Some(collector) = &self.collector {
            workers.push(Arc::clone(collector).start());
        }
        if let Some(reaper) = &self.reaper {
            workers.push(Arc::clone(reaper).start());
        }
    }

    /// Open (or look up) the span for this message and attach its message
    /// as an event
    pub fn trace(&self, trace: &TraceMessage) -> Option<Span> {
        let Some(registry) = &self.registry else {
            tracing::warn!("trace request ignored, tracing disabled");
            return None;
        };

        let span = registry.get_or_create(trace);
        if !trace.message.is_empty() {
            span.log_event(trace.message.clone());
        }
        Some(span)
    }

    /// Finish the span for this message and drop it from the registry.
    ///
    /// Closing a key that was never opened still starts a span and finishes
    /// it right away, so the collector sees a zero-length span.
    pub fn close(&self, trace: &TraceMessage) -> Option<Span> {
        let Some(registry) = &self.registry else {
            tracing::warn!("close request ignored, tracing disabled");
            return None;
        };

        if !registry.contains(trace) {
            tracing::warn!(
                span_id = %trace.span_id,
                operation = %trace.operation,
                "closing a span that was never opened"
            );
        }

        let span = registry.get_or_create(trace);
        span.finish();
        registry.release(trace);
        Some(span)
    }

    pub async fn meter(&self, body: &[u8]) -> IngestOutcome {
        self.ingestor.ingest_meter(body).await
    }

    pub async fn log(&self, body: &[u8]) -> IngestOutcome {
        self.ingestor.ingest_log(body).await
    }

    /// Stop workers and close backend connections. Open spans are abandoned.
    pub async fn shutdown(&self) {
        if let Some(reaper) = &self.reaper {
            reaper.stop();
        }

        if let Some(registry) = &self.registry {
            if !registry.is_empty() {
                tracing::info!("abandoning {} open spans", registry.len());
            }
        }

        if let Some(collector) = &self.collector {
            collector.close().await;
        }

        if let Some(store) = self.ingestor.store() {
            store.close().await;
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for mut handle in workers {
            if tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("worker did not stop within {:?}, aborting", WORKER_STOP_TIMEOUT);
                handle.abort();
            }
        }
    }
}

/// Sweep a few times per TTL, but not more than once a second
fn reaper_interval(ttl: Duration) -> Duration {
    (ttl / 4).max(Duration::from_secs(1))
}

/// Poll the store until it answers or `timeout` passes
pub async fn wait_for_store(store: &dyn DocumentStore, timeout: Duration) -> Result<(), AgentError> {
    let deadline = Instant::now() + timeout;

    loop {
        match store.ping().await {
            Ok(()) => return Ok(()),
            Err(e) if Instant::now() >= deadline => {
                return Err(AgentError::StoreUnavailable(e.to_string()));
            }
            Err(e) => {
                tracing::info!("waiting for document store: {}", e);
                tokio::time::sleep(STORE_POLL_INTERVAL).await;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Tracing collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),
}
