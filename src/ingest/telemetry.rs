use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::{
    ensure_index, Document, DocumentKind, DocumentStore, IndexPolicy, LogMessage, MeterMessage,
    Provisioned, StoreError,
};

/// What happened to one ingested payload
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Written to the store
    Stored { index: String, kind: DocumentKind },
    /// No store configured, the document was only logged
    Skipped { kind: DocumentKind },
    /// The body could not be decoded; nothing was written
    Rejected(String),
    /// The store refused or could not be reached
    Failed(String),
}

impl IngestOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, IngestOutcome::Stored { .. })
    }
}

/// Turns meter and log payloads into store documents
pub struct Ingestor {
    store: Option<Arc<dyn DocumentStore>>,
    agent_name: String,
    policy: IndexPolicy,
    verbose: bool,
    /// Last index provisioning was attempted for, successful or not
    provisioned: Mutex<Option<String>>,
}

impl Ingestor {
    pub fn new(
        store: Option<Arc<dyn DocumentStore>>,
        agent_name: impl Into<String>,
        policy: IndexPolicy,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            agent_name: agent_name.into(),
            policy,
            verbose,
            provisioned: Mutex::new(None),
        }
    }

    pub fn current_index(&self) -> String {
        self.policy.index_name(&self.agent_name)
    }

    pub fn store(&self) -> Option<&Arc<dyn DocumentStore>> {
        self.store.as_ref()
    }

    /// Provision the current index. Meant to run once before serving.
    pub async fn provision(&self) -> Result<Option<Provisioned>, StoreError> {
        let Some(store) = &self.store else {
            tracing::info!("no document store configured, skipping index provisioning");
            return Ok(None);
        };

        let index = self.current_index();
        let mut provisioned = self.provisioned.lock().await;
        let result = ensure_index(store.as_ref(), &index).await?;
        *provisioned = Some(index);
        Ok(Some(result))
    }

    pub async fn ingest_meter(&self, body: &[u8]) -> IngestOutcome {
        self.ingest_meter_at(body, Utc::now()).await
    }

    /// Decode a meter sample received at `now` and store it
    pub async fn ingest_meter_at(&self, body: &[u8], now: DateTime<Utc>) -> IngestOutcome {
        if self.verbose {
            tracing::debug!(body = %String::from_utf8_lossy(body), "meter request");
        }

        let mut meter: MeterMessage = match serde_json::from_slice(body) {
            Ok(meter) => meter,
            Err(e) => {
                tracing::warn!("failed to read meter message: {}", e);
                return IngestOutcome::Rejected(e.to_string());
            }
        };

        if self.verbose {
            meter.raw = Some(String::from_utf8_lossy(body).into_owned());
        }

        let timestamp = meter.stamp(now);
        self.submit(Document::meter(timestamp, meter)).await
    }

    pub async fn ingest_log(&self, body: &[u8]) -> IngestOutcome {
        self.ingest_log_at(body, Utc::now()).await
    }

    /// Wrap a raw log line received at `now` and store it
    pub async fn ingest_log_at(&self, body: &[u8], now: DateTime<Utc>) -> IngestOutcome {
        let value = String::from_utf8_lossy(body).into_owned();
        if self.verbose {
            tracing::debug!(body = %value, "log request");
        }

        let log = LogMessage {
            timestamp: Some(now),
            value,
        };
        self.submit(Document::log(now, log)).await
    }

    async fn submit(&self, document: Document) -> IngestOutcome {
        let kind = document.kind();

        let Some(store) = &self.store else {
            tracing::info!(kind = kind.as_str(), "no document store, not writing {:?}", document);
            return IngestOutcome::Skipped { kind };
        };

        let index = self.current_index();
        self.ensure_current(store.as_ref(), &index).await;

        match store.index_document(&index, &document).await {
            Ok(()) => IngestOutcome::Stored { index, kind },
            Err(e) => {
                tracing::error!(index = %index, kind = kind.as_str(), "could not write to store: {}", e);
                IngestOutcome::Failed(e.to_string())
            }
        }
    }

    /// Provision `index` if it is not the one handled last, e.g. after the
    /// daily index rolled over. Each index name gets a single attempt.
    async fn ensure_current(&self, store: &dyn DocumentStore, index: &str) {
        let mut provisioned = self.provisioned.lock().await;
        if provisioned.as_deref() == Some(index) {
            return;
        }
        *provisioned = Some(index.to_string());

        if let Err(e) = ensure_index(store, index).await {
            tracing::error!(index = %index, "could not provision index, writing without mapping: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ingestor(verbose: bool) -> (Ingestor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(
            Some(store.clone() as Arc<dyn DocumentStore>),
            "vdc",
            IndexPolicy::Static,
            verbose,
        );
        (ingestor, store)
    }

    #[tokio::test]
    async fn test_meter_without_timestamp_gets_receipt_time() {
        let (ingestor, store) = ingestor(false);
        ingestor.provision().await.unwrap();

        let before = Utc::now();
        let outcome = ingestor
            .ingest_meter(br#"{"unit":"byte per second","value":9231.123}"#)
            .await;
        let after = Utc::now();

        assert!(outcome.is_stored());
        let docs = store.documents("vdc");
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert!(doc.timestamp >= before && doc.timestamp <= after);
        let meter = doc.meter.as_ref().unwrap();
        assert_eq!(meter.timestamp, Some(doc.timestamp));
        assert_eq!(meter.value.as_f64(), Some(9231.123));
        assert_eq!(meter.unit.as_deref(), Some("byte per second"));
        assert!(meter.raw.is_none());
    }

    #[tokio::test]
    async fn test_meter_keeps_sender_timestamp() {
        let (ingestor, store) = ingestor(false);
        ingestor
            .ingest_meter(br#"{"timestamp":"2018-02-19T12:32:32Z","value":1}"#)
            .await;

        let doc = &store.documents("vdc")[0];
        assert_eq!(doc.timestamp.to_rfc3339(), "2018-02-19T12:32:32+00:00");
    }

    #[tokio::test]
    async fn test_verbose_keeps_raw_body() {
        let (ingestor, store) = ingestor(true);
        let body = br#"{"value":{"cpu":0.5},"name":"load"}"#;
        ingestor.ingest_meter(body).await;

        let doc = &store.documents("vdc")[0];
        let meter = doc.meter.as_ref().unwrap();
        assert_eq!(meter.raw.as_deref(), Some(std::str::from_utf8(body).unwrap()));
        assert_eq!(meter.value["cpu"], 0.5);
    }

    #[tokio::test]
    async fn test_log_line() {
        let (ingestor, store) = ingestor(false);

        let before = Utc::now();
        let outcome = ingestor.ingest_log(b"foobar").await;
        let after = Utc::now();

        assert_eq!(
            outcome,
            IngestOutcome::Stored {
                index: "vdc".to_string(),
                kind: DocumentKind::Log
            }
        );
        let doc = &store.documents("vdc")[0];
        let log = doc.log.as_ref().unwrap();
        assert_eq!(log.value, "foobar");
        assert!(doc.timestamp >= before && doc.timestamp <= after);
        assert_eq!(log.timestamp, Some(doc.timestamp));
    }

    #[tokio::test]
    async fn test_bad_meter_is_rejected_without_write() {
        let (ingestor, store) = ingestor(false);
        ingestor.provision().await.unwrap();

        let outcome = ingestor.ingest_meter(b"{not json").await;
        assert!(matches!(outcome, IngestOutcome::Rejected(_)));
        assert!(store.documents("vdc").is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_raised() {
        let (ingestor, store) = ingestor(false);
        ingestor.provision().await.unwrap();
        store.set_available(false);

        let outcome = ingestor.ingest_log(b"foobar").await;
        assert!(matches!(outcome, IngestOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_index_provisioned_once() {
        let (ingestor, store) = ingestor(false);
        ingestor.provision().await.unwrap();
        ingestor.ingest_log(b"a").await;
        ingestor.ingest_log(b"b").await;

        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.mapping_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_provisioning_is_not_repeated() {
        let (ingestor, store) = ingestor(false);
        store.set_available(false);
        let first = ingestor.ingest_log(b"a").await;
        assert!(matches!(first, IngestOutcome::Failed(_)));

        store.set_available(true);
        let second = ingestor.ingest_log(b"b").await;

        // no second provisioning round, so the index is still missing
        assert!(matches!(second, IngestOutcome::Failed(_)));
        assert_eq!(store.create_calls(), 0);
        assert_eq!(store.mapping_calls(), 0);
    }

    #[tokio::test]
    async fn test_without_store() {
        let ingestor = Ingestor::new(None, "vdc", IndexPolicy::Daily, false);
        assert_eq!(ingestor.provision().await.unwrap(), None);
        assert_eq!(
            ingestor.ingest_log(b"foobar").await,
            IngestOutcome::Skipped {
                kind: DocumentKind::Log
            }
        );
    }
}
