//! Per-request audit records and their fire-and-forget persistence.
//!
//! One [`AuditRecord`] is written per request under
//! `logs/{date}/{session}/{turn}_{request}.json`. Writes run on a
//! [`TaskTracker`] so shutdown can drain them; failures are logged and dropped.

use crate::config::AuditConfig;
use crate::error::Result;
use crate::providers::Provider;
use crate::routing::Route;
use crate::translate::anthropic_types::MessagesResponse;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub request_id: String,
    pub session_id: String,
    pub turn_index: u32,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub original_model: String,
    pub wire_model: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub latency_ms: u64,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditError {
    pub status: u16,
    pub message: String,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl AuditRecord {
    pub fn new(
        request_id: impl Into<String>,
        session_id: impl Into<String>,
        turn_index: u32,
        route: &Route,
        request: serde_json::Value,
        streaming: bool,
    ) -> Self {
        let metadata = request.get("metadata").filter(|m| !m.is_null()).cloned();
        Self {
            request_id: request_id.into(),
            session_id: session_id.into(),
            turn_index,
            timestamp: Utc::now(),
            provider: route.provider,
            original_model: route.original_model.clone(),
            wire_model: route.wire_model.clone(),
            request,
            response: None,
            latency_ms: 0,
            streaming,
            error: None,
            metadata,
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: &MessagesResponse) -> Self {
        self.response = serde_json::to_value(response).ok();
        self
    }

    /// Attach a raw upstream body (passed through untranslated).
    #[must_use]
    pub fn with_raw_response(mut self, body: serde_json::Value) -> Self {
        self.response = Some(body);
        self
    }

    #[must_use]
    pub fn with_error(mut self, status: u16, message: &str) -> Self {
        self.error = Some(AuditError {
            status,
            message: truncate_chars(message, MAX_ERROR_CHARS).to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_latency(mut self, started: Instant) -> Self {
        self.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Store key: `logs/{YYYY-MM-DD}/{session}/{turn}_{request}.json`.
    pub fn key(&self) -> String {
        format!(
            "logs/{}/{}/{}_{}.json",
            self.timestamp.format("%Y-%m-%d"),
            sanitize_segment(&self.session_id),
            self.turn_index,
            sanitize_segment(&self.request_id)
        )
    }
}

/// Keep ids from escaping their key segment.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Cut `s` to at most `max` characters.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Keyed object sink for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;
}

/// Writes each record to `<root>/<key>`.
#[derive(Debug, Clone)]
pub struct FsAuditStore {
    root: PathBuf,
}

impl FsAuditStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AuditStore for FsAuditStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<BTreeMap<String, Bytes>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.records.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    /// All stored records parsed as JSON, in key order.
    pub async fn records(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .await
            .values()
            .filter_map(|b| serde_json::from_slice(b).ok())
            .collect()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.records.lock().await.insert(key.to_string(), body);
        Ok(())
    }
}

/// Background audit writer. Cloning shares the store and the task tracker.
#[derive(Clone)]
pub struct AuditWriter {
    store: Option<Arc<dyn AuditStore>>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for AuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditWriter")
            .field("enabled", &self.store.is_some())
            .field("pending", &self.tracker.len())
            .finish()
    }
}

impl AuditWriter {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store: Some(store),
            tracker: TaskTracker::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        if config.enabled {
            Self::new(Arc::new(FsAuditStore::new(config.dir.clone())))
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Persist a finished record in the background.
    pub fn write(&self, record: AuditRecord) {
        let Some(store) = self.store.clone() else {
            return;
        };
        self.tracker.spawn(persist(store, record));
    }

    /// Persist once the streamed response has been reassembled. Latency is
    /// measured from `started` to the end of reassembly.
    pub fn write_after<F>(&self, record: AuditRecord, started: Instant, reassembled: F)
    where
        F: Future<Output = MessagesResponse> + Send + 'static,
    {
        let Some(store) = self.store.clone() else {
            return;
        };
        self.tracker.spawn(async move {
            let response = reassembled.await;
            let record = record.with_response(&response).with_latency(started);
            persist(store, record).await;
        });
    }

    /// Stop accepting work and wait for pending writes.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn persist(store: Arc<dyn AuditStore>, record: AuditRecord) {
    let key = record.key();
    let body = match serde_json::to_vec_pretty(&record) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to serialize audit record");
            return;
        }
    };

    match store.put(&key, body).await {
        Ok(()) => tracing::debug!(key = %key, "Audit record written"),
        Err(e) => tracing::warn!(key = %key, error = %e, "Audit write failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::translate::anthropic_types::ResponseContentBlock;

    fn route() -> Route {
        Route {
            provider: Provider::Vllm,
            wire_model: "meta-llama/Llama-3-70b".to_string(),
            original_model: "vllm:meta-llama/Llama-3-70b".to_string(),
        }
    }

    fn record() -> AuditRecord {
        let mut record = AuditRecord::new(
            "req_001",
            "sess_001",
            0,
            &route(),
            serde_json::json!({"model": "vllm:meta-llama/Llama-3-70b", "metadata": {"user_id": "u"}}),
            false,
        );
        record.timestamp = DateTime::parse_from_rfc3339("2026-02-15T10:00:00.000Z")
            .unwrap()
            .with_timezone(&Utc);
        record
    }

    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn put(&self, _key: &str, _body: Bytes) -> Result<()> {
            Err(GatewayError::other("bucket unavailable"))
        }
    }

    #[test]
    fn test_key_format() {
        assert_eq!(record().key(), "logs/2026-02-15/sess_001/0_req_001.json");
    }

    #[test]
    fn test_key_sanitizes_session() {
        let mut r = record();
        r.session_id = "../../etc/passwd".to_string();
        r.turn_index = 3;
        assert_eq!(r.key(), "logs/2026-02-15/.._.._etc_passwd/3_req_001.json");

        r.session_id = "..".to_string();
        assert_eq!(r.key(), "logs/2026-02-15/_/3_req_001.json");
    }

    #[test]
    fn test_record_shape() {
        let value = serde_json::to_value(record().with_error(502, &"x".repeat(800))).unwrap();
        assert_eq!(value["requestId"], "req_001");
        assert_eq!(value["turnIndex"], 0);
        assert_eq!(value["timestamp"], "2026-02-15T10:00:00.000Z");
        assert_eq!(value["provider"], "vllm");
        assert_eq!(value["wireModel"], "meta-llama/Llama-3-70b");
        assert_eq!(value["response"], serde_json::Value::Null);
        assert_eq!(value["metadata"]["user_id"], "u");
        assert_eq!(value["error"]["status"], 502);
        assert_eq!(value["error"]["message"].as_str().unwrap().len(), 500);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_failing_store_is_swallowed() {
        let writer = AuditWriter::new(Arc::new(FailingStore));
        writer.write(record());
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_after_records_reassembled_response() {
        let store = Arc::new(MemoryAuditStore::new());
        let writer = AuditWriter::new(store.clone());

        let mut response = MessagesResponse::empty("msg_1", "claude-3");
        response.content.push(ResponseContentBlock::Text {
            text: "done".to_string(),
        });
        let mut streaming = record();
        streaming.streaming = true;
        writer.write_after(streaming, Instant::now(), async move { response });
        writer.shutdown().await;

        let stored = store.get("logs/2026-02-15/sess_001/0_req_001.json").await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(value["streaming"], true);
        assert_eq!(value["response"]["content"][0]["text"], "done");
    }

    #[tokio::test]
    async fn test_fs_store_writes_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AuditWriter::new(Arc::new(FsAuditStore::new(dir.path())));
        writer.write(record());
        writer.shutdown().await;

        let path = dir.path().join("logs/2026-02-15/sess_001/0_req_001.json");
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["sessionId"], "sess_001");
    }

    #[tokio::test]
    async fn test_disabled_writer_is_noop() {
        let writer = AuditWriter::disabled();
        assert!(!writer.is_enabled());
        writer.write(record());
        writer.shutdown().await;
    }
}
