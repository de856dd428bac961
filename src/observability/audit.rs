/// Submission audit trail.
///
/// The engine hands every attempt's outcome to a [`SubmissionRecorder`].
/// Recording is fire-and-forget: a recorder must never block or fail the
/// submission that produced the record.
use crate::config::types::{QueryboxError, Result};
use crate::observability::metrics::{get_metrics, MetricsRegistry};
use crate::verdict::verdict::SubmissionOutcome;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use uuid::Uuid;

/// One submission attempt as handed to the audit trail
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    /// Arrival order across the process
    pub sequence: u64,
    /// Arrival order among this user's attempts on this assignment
    pub attempt_number: u32,
    pub user_id: String,
    pub assignment_id: String,
    pub query: String,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: SubmissionOutcome,
}

/// Destination for submission records
pub trait SubmissionRecorder: Send + Sync {
    /// Hand off a record; must return promptly and never panic
    fn record(&self, record: SubmissionRecord);
}

/// Writes records through the logging facade
#[derive(Debug, Default)]
pub struct LogRecorder;

impl SubmissionRecorder for LogRecorder {
    fn record(&self, record: SubmissionRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => info!(target: "querybox::submissions", "{}", line),
            Err(e) => warn!("Failed to serialize submission record: {}", e),
        }
    }
}

/// Appends JSON lines to an audit file from a single writer thread.
///
/// A bounded queue sits in front of the writer. When it is full the record
/// is dropped with a warning instead of stalling the caller. Lines land in
/// completion order; `sequence` and `attemptNumber` carry arrival order.
pub struct AuditLogRecorder {
    sender: Option<Sender<SubmissionRecord>>,
    writer: Option<JoinHandle<()>>,
    audit_path: PathBuf,
    metrics: Arc<MetricsRegistry>,
}

impl AuditLogRecorder {
    pub fn open(audit_path: &Path, queue_capacity: usize) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    QueryboxError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| QueryboxError::Config(format!("Failed to open audit log: {}", e)))?;

        let (sender, receiver) = bounded(queue_capacity.max(1));
        let writer = std::thread::Builder::new()
            .name("querybox-audit".to_string())
            .spawn(move || write_loop(receiver, file))?;

        Ok(Self {
            sender: Some(sender),
            writer: Some(writer),
            audit_path: audit_path.to_path_buf(),
            metrics: get_metrics(),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    /// Stop accepting records and wait for the queue to drain
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        // closing the channel ends the writer loop once the queue is empty
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("Audit writer thread panicked");
            }
        }
    }
}

impl SubmissionRecorder for AuditLogRecorder {
    fn record(&self, record: SubmissionRecord) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return,
        };
        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                self.metrics.records_dropped.inc();
                warn!(
                    "Audit queue full; dropping record for submission {}",
                    record.submission_id
                );
            }
            Err(TrySendError::Disconnected(record)) => {
                self.metrics.records_dropped.inc();
                error!(
                    "Audit writer is gone; dropping record for submission {}",
                    record.submission_id
                );
            }
        }
    }
}

impl Drop for AuditLogRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

fn write_loop(receiver: Receiver<SubmissionRecord>, file: File) {
    let mut out = BufWriter::new(file);

    for record in receiver.iter() {
        let written = serde_json::to_writer(&mut out, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush());
        if let Err(e) = written {
            error!(
                "Failed to write audit record for submission {}: {}",
                record.submission_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::verdict::SubmissionStatus;

    fn record(sequence: u64, user: &str, assignment: &str, status: SubmissionStatus) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: Uuid::new_v4(),
            sequence,
            attempt_number: sequence as u32,
            user_id: user.to_string(),
            assignment_id: assignment.to_string(),
            query: "SELECT 1".to_string(),
            received_at: Utc::now(),
            outcome: SubmissionOutcome {
                status,
                row_count: None,
                elapsed_ms: None,
                error_message: None,
                is_correct: status == SubmissionStatus::Correct,
            },
        }
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_audit_log_keeps_stamped_attempt_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("submissions.jsonl");

        let recorder = AuditLogRecorder::open(&path, 16)
            .unwrap()
            .with_metrics(Arc::new(MetricsRegistry::new()));
        let mut slow = record(1, "u1", "a1", SubmissionStatus::Incorrect);
        slow.attempt_number = 1;
        let mut fast = record(2, "u1", "a1", SubmissionStatus::Correct);
        fast.attempt_number = 2;
        // the later submission finishes first
        recorder.record(fast);
        recorder.record(record(3, "u2", "a1", SubmissionStatus::Blocked));
        recorder.record(slow);
        recorder.shutdown();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        let sequences: Vec<u64> = lines.iter().map(|l| l["sequence"].as_u64().unwrap()).collect();
        assert_eq!(sequences, vec![2, 3, 1]);
        assert_eq!(lines[0]["attemptNumber"], 2);
        assert_eq!(lines[0]["status"], "correct");
        assert_eq!(lines[0]["isCorrect"], true);
        assert_eq!(lines[2]["attemptNumber"], 1);
        assert_eq!(lines[2]["status"], "incorrect");
    }

    #[test]
    fn test_audit_log_appends_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submissions.jsonl");

        for seq in 0..2 {
            let recorder = AuditLogRecorder::open(&path, 4).unwrap();
            recorder.record(record(seq, "u", "a", SubmissionStatus::Error));
            recorder.shutdown();
        }
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn test_record_serialization_is_flat() {
        let value = serde_json::to_value(record(7, "u", "a", SubmissionStatus::Blocked)).unwrap();
        assert_eq!(value["status"], "blocked");
        assert_eq!(value["userId"], "u");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["attemptNumber"], 7);
        assert!(value.get("outcome").is_none());
    }

    #[test]
    fn test_log_recorder_never_panics() {
        LogRecorder.record(record(1, "u", "a", SubmissionStatus::Correct));
    }
}
