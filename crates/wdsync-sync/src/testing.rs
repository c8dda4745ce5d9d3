//! In-memory collaborators for reconciler and pipeline tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use wdsync_adapters::{MANAGER_ID_FIELD, WORKER_ID_FIELD, WORKER_TABLE};
use wdsync_core::{KnownSnapshot, SourceRecord, UpsertOutcome};
use wdsync_storage::{ConfigStore, FetchError, RecordSource, UpsertError, UpsertRequest};

/// Config store that answers from a fixed snapshot and remembers every write.
pub struct RecordingStore {
    snapshot: KnownSnapshot,
    rejected: BTreeSet<String>,
    requests: Mutex<Vec<UpsertRequest>>,
}

impl RecordingStore {
    pub fn new(snapshot: KnownSnapshot) -> Self {
        Self {
            snapshot,
            rejected: BTreeSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(mut self, id: &str) -> Self {
        self.rejected.insert(id.to_string());
        self
    }

    pub fn requests(&self) -> Vec<UpsertRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Identifiers of keyed writes, in the order they were issued.
    pub fn keyed_ids(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| r.identifier.map(String::from))
            .collect()
    }

    pub fn payload_for(&self, id: &str) -> Option<Value> {
        self.requests()
            .into_iter()
            .find(|r| r.identifier.as_ref().map(|i| i.as_str()) == Some(id))
            .map(|r| serde_json::from_str(&r.payload).unwrap())
    }
}

#[async_trait]
impl ConfigStore for RecordingStore {
    async fn fetch_snapshot(&self, _config_name: &str) -> Result<KnownSnapshot, FetchError> {
        Ok(self.snapshot.clone())
    }

    async fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome, UpsertError> {
        self.requests.lock().unwrap().push(request.clone());
        match &request.identifier {
            Some(id) if self.rejected.contains(id.as_str()) => Err(UpsertError::Rejected {
                status: 400,
                message: format!("cannot write {id}"),
            }),
            Some(id) if self.snapshot.lookup(id).is_some() => Ok(UpsertOutcome::updated(1)),
            _ => Ok(UpsertOutcome::inserted(1)),
        }
    }
}

/// Services API stand-in serving canned rows per endpoint.
#[derive(Default)]
pub struct StaticSource {
    rows: BTreeMap<String, Vec<SourceRecord>>,
}

impl StaticSource {
    pub fn with(mut self, endpoint: &str, rows: Vec<SourceRecord>) -> Self {
        self.rows.insert(endpoint.to_string(), rows);
        self
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn fetch_records(&self, endpoint: &str) -> Result<Vec<SourceRecord>, FetchError> {
        self.rows
            .get(endpoint)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                status: 404,
                url: endpoint.to_string(),
            })
    }
}

pub fn row(value: Value) -> SourceRecord {
    value.as_object().cloned().expect("object row")
}

pub fn snapshot(value: Value) -> KnownSnapshot {
    serde_json::from_value(value).expect("snapshot")
}

/// Worker row carrying every field the worker table requires.
pub fn worker(userid: &str, manager: &str, employee_id: &str) -> SourceRecord {
    let mut r = SourceRecord::new();
    for source in WORKER_TABLE.source_fields() {
        r.insert(source.to_string(), json!(""));
    }
    r.insert(WORKER_ID_FIELD.into(), json!(userid));
    r.insert(MANAGER_ID_FIELD.into(), json!(manager));
    r.insert("EMPLOYEEID".into(), json!(employee_id));
    r.insert("EMAILADDRESS".into(), json!(format!("{}@example.org", userid.to_lowercase())));
    r.insert("ACTIVEFLAG".into(), json!("Y"));
    r
}

/// Buffers formatted info-level log lines while the guard from `install` is alive.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(Level::INFO)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().expect("log buffer")).into_owned()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: self.buffer.clone(),
        }
    }
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
