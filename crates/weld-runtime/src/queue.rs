//! File-backed cross-process message queue.
//!
//! External processes append one JSON record per line; the server polls
//! every ~200 ms, draining the whole file under an exclusive advisory
//! lock and truncating it to zero. A malformed line is logged and
//! skipped; a failed poll cycle is skipped entirely.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weld_core::{Gateway, QueueError, QueueResult};

/// How often the queue file is drained.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Back-off applied after a failed poll cycle.
const POLL_BACKOFF: Duration = Duration::from_millis(100);

/// A client id in a queue record; external writers may use strings or
/// numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientRef {
    Text(String),
    Number(u64),
}

impl ClientRef {
    fn as_id(&self) -> String {
        match self {
            Self::Text(id) => id.clone(),
            Self::Number(id) => id.to_string(),
        }
    }
}

/// One line of the queue file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueRecord {
    /// Targeted delivery to a single client.
    Emit {
        #[serde(rename = "clientId")]
        client_id: ClientRef,
        event: String,
        data: Value,
    },
    /// Fan-out over the usual broadcast filters.
    Broadcast {
        event: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
}

/// Appends records to a queue file; the producer-side counterpart of the
/// poller, usable from any process.
#[derive(Debug, Clone)]
pub struct QueueWriter {
    path: PathBuf,
}

impl QueueWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Appends one record as a JSON line (with trailing newline), under
    /// the same exclusive lock the poller takes.
    pub fn append(&self, record: &QueueRecord) -> QueueResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| QueueError::BadRecord(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        FileExt::lock_exclusive(&file)?;
        let result = writeln!(file, "{line}");
        let _ = FileExt::unlock(&file);
        result.map_err(QueueError::from)
    }

    /// Queues a targeted emit.
    pub fn emit(&self, client: impl Into<String>, event: impl Into<String>, data: Value) -> QueueResult<()> {
        self.append(&QueueRecord::Emit {
            client_id: ClientRef::Text(client.into()),
            event: event.into(),
            data,
        })
    }

    /// Queues a broadcast.
    pub fn broadcast(
        &self,
        event: impl Into<String>,
        data: Value,
        namespace: Option<String>,
        room: Option<String>,
    ) -> QueueResult<()> {
        self.append(&QueueRecord::Broadcast {
            event: event.into(),
            data,
            namespace,
            room,
        })
    }
}

/// Drains the queue file: locks it, reads every line, truncates to zero,
/// unlocks. A missing file is an empty drain.
pub fn drain_file(path: &Path) -> QueueResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    FileExt::lock_exclusive(&file)?;

    let mut contents = String::new();
    let result = file
        .read_to_string(&mut contents)
        .map_err(QueueError::from)
        .and_then(|_| file.set_len(0).map_err(QueueError::from));
    let _ = FileExt::unlock(&file);
    result?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parses one queue line. Beyond the serde shape, `data` must be an
/// object and emit fields must be non-empty.
pub fn parse_record(line: &str) -> QueueResult<QueueRecord> {
    let record: QueueRecord =
        serde_json::from_str(line).map_err(|e| QueueError::BadRecord(e.to_string()))?;
    let data = match &record {
        QueueRecord::Emit { event, data, .. } | QueueRecord::Broadcast { event, data, .. } => {
            if event.is_empty() {
                return Err(QueueError::BadRecord("empty event name".into()));
            }
            data
        }
    };
    if !data.is_object() {
        return Err(QueueError::BadRecord("'data' is not an object".into()));
    }
    Ok(record)
}

/// Applies a record through the gateway.
pub async fn apply_record(gateway: &Gateway, record: QueueRecord) {
    match record {
        QueueRecord::Emit {
            client_id,
            event,
            data,
        } => {
            let client = client_id.as_id();
            if let Err(e) = gateway.send(&client, event, data).await {
                warn!(client = %client, error = %e, "queued emit failed");
            }
        }
        QueueRecord::Broadcast {
            event,
            data,
            namespace,
            room,
        } => {
            gateway
                .broadcast(&event, data, namespace.as_deref(), room.as_deref())
                .await;
        }
    }
}

/// One poll cycle: drain, parse, dispatch. Bad lines are skipped.
pub async fn poll_once(gateway: &Gateway, path: &Path) -> QueueResult<usize> {
    let owned = path.to_path_buf();
    let lines = tokio::task::spawn_blocking(move || drain_file(&owned))
        .await
        .map_err(|e| QueueError::Io(e.to_string()))??;

    let mut applied = 0;
    for line in lines {
        match parse_record(&line) {
            Ok(record) => {
                apply_record(gateway, record).await;
                applied += 1;
            }
            Err(e) => warn!(error = %e, line = %line, "skipping malformed queue record"),
        }
    }
    if applied > 0 {
        debug!(applied, "queue records dispatched");
    }
    Ok(applied)
}

/// Spawns the poller loop: every [`POLL_INTERVAL`] until cancellation,
/// with a short back-off after a failed cycle.
pub fn spawn_poller(
    gateway: Gateway,
    path: PathBuf,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = poll_once(&gateway, &path).await {
                        warn!(error = %e, "queue poll cycle skipped");
                        time::sleep(POLL_BACKOFF).await;
                    }
                }
            }
        }
        debug!("queue poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drain_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.jsonl");
        assert!(drain_file(&path).unwrap().is_empty());
    }

    #[test]
    fn drain_reads_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"b\":2}\n").unwrap();

        let lines = drain_file(&path).unwrap();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert!(drain_file(&path).unwrap().is_empty());
    }

    #[test]
    fn writer_then_drain_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        let writer = QueueWriter::new(&path);
        writer.emit("c1", "news", json!({"t": 1})).unwrap();
        writer
            .broadcast("tick", json!({}), Some("/".into()), None)
            .unwrap();

        let lines = drain_file(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(matches!(
            parse_record(&lines[0]).unwrap(),
            QueueRecord::Emit { .. }
        ));
        assert!(matches!(
            parse_record(&lines[1]).unwrap(),
            QueueRecord::Broadcast { .. }
        ));
    }

    #[test]
    fn parse_accepts_numeric_client_ids() {
        let record =
            parse_record(r#"{"type":"emit","clientId":42,"event":"e","data":{}}"#).unwrap();
        match record {
            QueueRecord::Emit { client_id, .. } => assert_eq!(client_id.as_id(), "42"),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_bad_records() {
        assert!(parse_record("not json").is_err());
        assert!(parse_record(r#"{"type":"emit","event":"e","data":{}}"#).is_err());
        assert!(parse_record(r#"{"type":"mystery","event":"e","data":{}}"#).is_err());
        assert!(parse_record(r#"{"type":"broadcast","event":"e","data":[1]}"#).is_err());
        assert!(parse_record(r#"{"type":"broadcast","event":"","data":{}}"#).is_err());
    }

    #[tokio::test]
    async fn poll_skips_bad_lines_and_applies_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");
        std::fs::write(
            &path,
            "garbage\n{\"type\":\"broadcast\",\"event\":\"ok\",\"data\":{}}\n",
        )
        .unwrap();

        let gateway = Gateway::new();
        let applied = poll_once(&gateway, &path).await.unwrap();
        assert_eq!(applied, 1);
    }
}
