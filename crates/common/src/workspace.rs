//! On-disk working directory
//!
//! ```text
//! <workdir>/
//!   snapshots/<id>.json
//!   testcases/<id>.yaml
//!   scripts/            (see ArtifactStore)
//!   ledger/<tc>.json    one partition per testcase
//!   errors.jsonl        failure queue
//!   report.json
//! ```

use crate::artifact::ArtifactStore;
use crate::ledger::{LedgerSink, LineageRecord, RunLedger};
use crate::queue::FailureQueue;
use crate::report::RunReport;
use crate::types::{Snapshot, TestCaseSpec};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Handle to a uiheal working directory
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    artifacts: ArtifactStore,
}

impl Workspace {
    /// Open (and create if needed) a workspace
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in ["snapshots", "testcases", "ledger", "tmp"] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        let artifacts = ArtifactStore::new(root.join("scripts")).await?;
        debug!("Opened workspace at {}", root.display());
        Ok(Self { root, artifacts })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn errors_log(&self) -> PathBuf {
        self.root.join("errors.jsonl")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn failure_queue(&self) -> FailureQueue {
        FailureQueue::persistent(self.errors_log())
    }

    /// Write via temp file + rename so readers never see a partial file
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp_path = self
            .root
            .join("tmp")
            .join(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    fn files_with_extension(&self, dir: &str, ext: &str) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(self.root.join(dir))
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(ext))
            .collect();
        paths.sort();
        paths
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", id))
    }

    /// Store a snapshot; an existing snapshot id is never rewritten
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let path = self.snapshot_path(&snapshot.id);
        if path.exists() {
            return Err(Error::ArtifactConflict(path.display().to_string()));
        }
        let data = serde_json::to_vec_pretty(snapshot)?;
        self.write_atomic(&path, &data).await?;
        info!(
            "Stored snapshot {} ({} elements) from {}",
            snapshot.id,
            snapshot.element_index.len(),
            snapshot.source_url
        );
        Ok(path)
    }

    pub async fn load_snapshot(&self, id: &str) -> Result<Snapshot> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(Error::not_found("snapshot", id));
        }
        let data = fs::read(&path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// All snapshots, oldest capture first
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for path in self.files_with_extension("snapshots", "json") {
            let data = fs::read(&path).await?;
            match serde_json::from_slice::<Snapshot>(&data) {
                Ok(s) => snapshots.push(s),
                Err(e) => warn!("Ignoring unreadable snapshot {}: {}", path.display(), e),
            }
        }
        snapshots.sort_by_key(|s| s.captured_at);
        Ok(snapshots)
    }

    // ------------------------------------------------------------------
    // Test cases
    // ------------------------------------------------------------------

    fn testcase_path(&self, id: &str) -> PathBuf {
        self.root.join("testcases").join(format!("{}.yaml", id))
    }

    pub async fn save_testcase(&self, spec: &TestCaseSpec) -> Result<PathBuf> {
        let path = self.testcase_path(&spec.id);
        if path.exists() {
            return Err(Error::ArtifactConflict(path.display().to_string()));
        }
        let data = serde_yaml::to_string(spec)?;
        self.write_atomic(&path, data.as_bytes()).await?;
        debug!(testcase = %spec.id, "Stored test case spec");
        Ok(path)
    }

    pub async fn load_testcase(&self, id: &str) -> Result<TestCaseSpec> {
        let path = self.testcase_path(id);
        if !path.exists() {
            return Err(Error::not_found("testcase", id));
        }
        let data = fs::read_to_string(&path).await?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// All test case specs ordered by id
    pub async fn list_testcases(&self) -> Result<Vec<TestCaseSpec>> {
        let mut specs = Vec::new();
        for path in self.files_with_extension("testcases", "yaml") {
            let data = fs::read_to_string(&path).await?;
            specs.push(serde_yaml::from_str::<TestCaseSpec>(&data)?);
        }
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(specs)
    }

    // ------------------------------------------------------------------
    // Ledger partitions
    // ------------------------------------------------------------------

    fn partition_path(&self, testcase_id: &str) -> PathBuf {
        self.root.join("ledger").join(format!("{}.json", testcase_id))
    }

    pub async fn save_partition(&self, record: &LineageRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.partition_path(&record.testcase_id), &data)
            .await
    }

    pub async fn load_partition(&self, testcase_id: &str) -> Result<Option<LineageRecord>> {
        let path = self.partition_path(testcase_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Rebuild the run ledger from every stored partition
    pub async fn load_ledger(&self) -> Result<RunLedger> {
        let mut records = Vec::new();
        for path in self.files_with_extension("ledger", "json") {
            let data = fs::read(&path).await?;
            records.push(serde_json::from_slice::<LineageRecord>(&data)?);
        }
        debug!("Loaded {} ledger partitions", records.len());
        Ok(RunLedger::from_records(records))
    }

    // ------------------------------------------------------------------
    // Requirements
    // ------------------------------------------------------------------

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join("requirements.txt")
    }

    /// Store extracted requirements as a numbered list
    pub async fn save_requirements(&self, requirements: &[String]) -> Result<PathBuf> {
        let path = self.requirements_path();
        let text: String = requirements
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}\n", i + 1, r))
            .collect();
        self.write_atomic(&path, text.as_bytes()).await?;
        info!("Wrote {} requirement(s) to {}", requirements.len(), path.display());
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Report
    // ------------------------------------------------------------------

    pub async fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.report_path();
        let data = serde_json::to_vec_pretty(report)?;
        self.write_atomic(&path, &data).await?;
        info!("Wrote report to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl LedgerSink for Workspace {
    async fn persist(&self, record: &LineageRecord) -> Result<()> {
        self.save_partition(record).await
    }
}
