//! Best-effort mirror of access decisions to a remote store.
//!
//! Documents are handed to a worker thread so HTTP latency never reaches the
//! control loop. The first failed delivery trips a breaker for the rest of
//! the process lifetime; later documents are dropped. Local logs are the
//! record of truth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::common::config::RemoteConfig;
use crate::common::error::{KioskError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteDocument {
    pub datetime: String,
    pub employee_id: String,
    pub employee_name: String,
    pub employee_pin: String,
    pub promille: f64,
    pub result: String,
    pub fallback_pin: bool,
}

impl RemoteDocument {
    /// Same document, same key, so retries are deduplicated server-side.
    pub fn idempotency_key(&self) -> Result<String> {
        let body = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&body)))
    }
}

pub trait RemoteSink: Send {
    fn send(&self, document: &RemoteDocument) -> Result<()>;
}

/// `POST {base_url}/entries` with an `Idempotency-Key` header.
pub struct HttpSink {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base = config
            .base_url
            .as_deref()
            .ok_or_else(|| KioskError::Config("remote.base_url is not set".to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| KioskError::Remote(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/entries", base.trim_end_matches('/')),
        })
    }
}

impl RemoteSink for HttpSink {
    fn send(&self, document: &RemoteDocument) -> Result<()> {
        let key = document.idempotency_key()?;
        self.client
            .post(&self.endpoint)
            .header("Idempotency-Key", key)
            .json(document)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| KioskError::Remote(e.to_string()))?;
        Ok(())
    }
}

pub struct RemoteMirror {
    tx: Option<mpsc::Sender<RemoteDocument>>,
    tripped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RemoteMirror {
    pub fn start(sink: Box<dyn RemoteSink>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<RemoteDocument>();
        let tripped = Arc::new(AtomicBool::new(false));
        let breaker = tripped.clone();

        let worker = std::thread::Builder::new()
            .name("remote-log".to_string())
            .spawn(move || {
                for document in rx {
                    if breaker.load(Ordering::Acquire) {
                        continue;
                    }
                    match sink.send(&document) {
                        Ok(()) => debug!(employee_id = %document.employee_id, "remote_log_sent"),
                        Err(e) => {
                            breaker.store(true, Ordering::Release);
                            warn!(error = %e, "remote_log_failed, mirroring disabled until restart");
                        }
                    }
                }
                info!("remote_log_worker_stopped");
            })?;

        Ok(Self {
            tx: Some(tx),
            tripped,
            worker: Some(worker),
        })
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Queues a document unless the breaker has tripped. Never blocks.
    pub fn submit(&self, document: RemoteDocument) {
        if self.is_tripped() {
            debug!("remote_log_skipped, breaker open");
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(document).is_err() {
                self.tripped.store(true, Ordering::Release);
            }
        }
    }

    /// Waits for queued documents to be delivered or dropped.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("remote log worker panicked");
            }
        }
    }
}

impl Drop for RemoteMirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn document(promille: f64) -> RemoteDocument {
        RemoteDocument {
            datetime: "2026-10-16T08:00:00".to_string(),
            employee_id: "1".to_string(),
            employee_name: "Test Employee".to_string(),
            employee_pin: "0000".to_string(),
            promille,
            result: "pass".to_string(),
            fallback_pin: false,
        }
    }

    struct Collecting(Arc<Mutex<Vec<RemoteDocument>>>);

    impl RemoteSink for Collecting {
        fn send(&self, document: &RemoteDocument) -> Result<()> {
            self.0.lock().push(document.clone());
            Ok(())
        }
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let a = document(0.1).idempotency_key().unwrap();
        assert_eq!(a, document(0.1).idempotency_key().unwrap());
        assert_ne!(a, document(0.2).idempotency_key().unwrap());
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_healthy_sink_receives_everything() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut mirror = RemoteMirror::start(Box::new(Collecting(received.clone()))).unwrap();
        mirror.submit(document(0.0));
        mirror.submit(document(0.6));
        mirror.shutdown();
        assert_eq!(received.lock().len(), 2);
        assert!(!mirror.is_tripped());
    }

    #[test]
    fn test_http_sink_requires_base_url() {
        assert!(HttpSink::new(&RemoteConfig::default()).is_err());
    }
}
