//! Failure queue
//!
//! Hand-off between the run stage and the healer: one record per failed
//! run. In-process pipelines keep it in memory; stage commands back it with
//! a JSON-lines file so `run` and `heal` can execute as separate processes.

use crate::types::{Diagnostic, FailureClass};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Structured error-log entry for one failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub testcase_id: String,
    pub script_id: String,
    pub generation: u32,
    pub failure_class: FailureClass,
    pub diagnostic: Diagnostic,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        testcase_id: impl Into<String>,
        script_id: impl Into<String>,
        generation: u32,
        failure_class: FailureClass,
        diagnostic: Diagnostic,
    ) -> Self {
        Self {
            testcase_id: testcase_id.into(),
            script_id: script_id.into(),
            generation,
            failure_class,
            diagnostic,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
enum Backing {
    Memory(Vec<FailureRecord>),
    Jsonl(PathBuf),
}

/// Append/drain queue of failure records
#[derive(Debug)]
pub struct FailureQueue {
    backing: Mutex<Backing>,
}

impl FailureQueue {
    pub fn in_memory() -> Self {
        Self {
            backing: Mutex::new(Backing::Memory(Vec::new())),
        }
    }

    /// Queue backed by a JSON-lines file, created on first append
    pub fn persistent(path: impl AsRef<Path>) -> Self {
        Self {
            backing: Mutex::new(Backing::Jsonl(path.as_ref().to_path_buf())),
        }
    }

    pub fn append(&self, record: FailureRecord) -> Result<()> {
        let mut backing = self.backing.lock();
        match &mut *backing {
            Backing::Memory(records) => records.push(record),
            Backing::Jsonl(path) => {
                let mut line = serde_json::to_string(&record)?;
                line.push('\n');
                let mut file = OpenOptions::new().create(true).append(true).open(&*path)?;
                file.write_all(line.as_bytes())?;
                file.flush()?;
            }
        }
        debug!("Queued failure record");
        Ok(())
    }

    /// Records currently queued, without consuming them
    pub fn peek(&self) -> Result<Vec<FailureRecord>> {
        let backing = self.backing.lock();
        match &*backing {
            Backing::Memory(records) => Ok(records.clone()),
            Backing::Jsonl(path) => read_jsonl(path),
        }
    }

    /// Take every queued record, oldest first, leaving the queue empty
    pub fn drain(&self) -> Result<Vec<FailureRecord>> {
        let mut backing = self.backing.lock();
        match &mut *backing {
            Backing::Memory(records) => Ok(std::mem::take(records)),
            Backing::Jsonl(path) => {
                let records = read_jsonl(path)?;
                if path.exists() {
                    std::fs::write(&*path, b"")?;
                }
                Ok(records)
            }
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.peek()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<FailureRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed failure record at line {}: {}", lineno + 1, e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureCategory;
    use tempfile::TempDir;

    fn record(tc: &str) -> FailureRecord {
        FailureRecord::new(
            tc,
            "script-1",
            0,
            FailureClass {
                category: FailureCategory::Timeout,
                confidence: 0.8,
                suggested_fix_hint: "rerun".into(),
                selector: None,
            },
            Diagnostic::new("Timeout 30000ms exceeded"),
        )
    }

    #[test]
    fn test_memory_drain_empties_queue() {
        let queue = FailureQueue::in_memory();
        queue.append(record("a")).unwrap();
        queue.append(record("b")).unwrap();

        let drained = queue.drain().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].testcase_id, "a");
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_jsonl_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("errors.jsonl");

        FailureQueue::persistent(&path).append(record("a")).unwrap();
        FailureQueue::persistent(&path).append(record("b")).unwrap();

        let queue = FailureQueue::persistent(&path);
        assert_eq!(queue.len().unwrap(), 2);
        let drained = queue.drain().unwrap();
        assert_eq!(drained[1].testcase_id, "b");
        assert!(FailureQueue::persistent(&path).is_empty().unwrap());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("errors.jsonl");
        let good = serde_json::to_string(&record("a")).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        assert_eq!(FailureQueue::persistent(&path).drain().unwrap().len(), 1);
    }
}
