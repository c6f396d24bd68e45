//! External collaborator adapters (C13, §6): the interfaces the core
//! consumes at its edges, plus one concrete uploader implementation.
//!
//! Grounded on `control::client::TelemetryClient`'s "talk to an HTTP
//! endpoint with a blocking client, log around it, surface an `anyhow`
//! error" shape; `HttpUploader` below follows that shape almost
//! verbatim, swapped onto the `Uploader` trait's contract from §6.

use crate::address::NodeAddr;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;

/// One image-capture event the detector pipeline hands to the core
/// (§6's detector interface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorRecord {
    pub path: String,
    pub epoch_ms: u64,
}

/// Pull-style source of detector records. Out of scope is the
/// capture/inference pipeline itself; the core only ever polls
/// `try_next_image`, non-blocking, the same way it polls the radio.
pub trait Detector: Send + Sync {
    fn try_next_image(&self) -> Option<DetectorRecord>;

    /// Re-enqueues a path after a failed transfer attempt (§4.9: "the
    /// path is re-enqueued with a pause").
    fn requeue(&self, record: DetectorRecord);
}

/// Reads image bytes from wherever the detector recorded them. Kept
/// separate from `Detector` so a test can inject bytes without touching
/// the filesystem.
pub trait Storage: Send + Sync {
    fn read_image(&self, path: &str) -> std::io::Result<Vec<u8>>;
}

/// Filesystem-backed `Storage`.
pub struct FsStorage;

impl Storage for FsStorage {
    fn read_image(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Best-effort free-memory probe (§5, §10.7), consulted only for logging.
pub trait MemoryProbe: Send + Sync {
    fn free_bytes(&self) -> Option<u64>;
}

/// A probe that never reports anything, for platforms/tests with no
/// meaningful memory introspection.
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn free_bytes(&self) -> Option<u64> {
        None
    }
}

/// The three upload categories the command center forwards, per §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMessageType {
    Heartbeat,
    EventText,
    Event,
}

/// A single record handed to the uploader at the command center (§6).
/// `payload` is already base64-wrapped by the caller for image records,
/// and left as opaque ciphertext bytes for heartbeat/event-text records.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub machine_id: NodeAddr,
    pub message_type: UploadMessageType,
    pub payload: Vec<u8>,
    pub epoch_ms: u64,
}

/// Uploads one record to the cloud endpoint. Transient failures are the
/// uploader's concern (§7: "the core only reports delivery within the
/// mesh"); the core only needs a success/failure boolean.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, record: UploadRecord) -> bool;
}

/// HTTP uploader talking to a cloud ingest endpoint over a blocking
/// `reqwest` client, mirroring `TelemetryClient::send_command`'s
/// request/response handling.
pub struct HttpUploader {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpUploader {
    pub fn new(endpoint: String, api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().context("failed to build HTTP client for uploader")?;
        Ok(HttpUploader { client, endpoint, api_key })
    }

    fn post(&self, record: &UploadRecord) -> Result<bool> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Api-Key", &self.api_key)
            .json(record)
            .send()
            .context("network error uploading record")?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            let body = response.text().unwrap_or_default();
            log::warn!("uploader rejected record ({}): {}", status.as_u16(), body);
            Ok(false)
        } else {
            let body = response.text().unwrap_or_default();
            log::warn!("uploader server error ({}): {}", status.as_u16(), body);
            Ok(false)
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, record: UploadRecord) -> bool {
        match self.post(&record) {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("uploader call failed: {e:#}");
                false
            }
        }
    }
}

/// Base64-wraps image bytes into an `UploadRecord` payload, per §6's
/// "image bytes are base64-wrapped into the payload field".
pub fn base64_wrap_image(bytes: &[u8]) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes).into_bytes()
}
