//! Script artifact store
//!
//! Lays out every generation of a script as its own file:
//! - `<tc>.js`: generation 0
//! - `<tc>.js.bak`: backup of generation 0, written once at the first heal
//! - `<tc>.js.g<N>.healed`: generation N
//!
//! Writes go through a temp file that is hard-linked into place, so an
//! existing artifact is never replaced. Rewriting identical bytes is a no-op.

use crate::types::Script;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Filesystem store for generated scripts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store at the given root directory
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join("rejected")).await?;
        fs::create_dir_all(root.join("tmp")).await?;

        debug!("Initialized artifact store at {:?}", root);

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute SHA-256 hash of data
    pub fn hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn original_path(&self, testcase_id: &str) -> PathBuf {
        self.root.join(format!("{}.js", testcase_id))
    }

    pub fn backup_path(&self, testcase_id: &str) -> PathBuf {
        self.root.join(format!("{}.js.bak", testcase_id))
    }

    pub fn healed_path(&self, testcase_id: &str, generation: u32) -> PathBuf {
        self.root.join(format!("{}.js.g{}.healed", testcase_id, generation))
    }

    /// Where a given script generation lives
    pub fn script_path(&self, script: &Script) -> PathBuf {
        if script.generation == 0 {
            self.original_path(&script.testcase_id)
        } else {
            self.healed_path(&script.testcase_id, script.generation)
        }
    }

    /// Write `data` to `path` only if nothing else is there
    async fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
        if path.exists() {
            let existing = fs::read(path).await?;
            if existing == data {
                debug!("Artifact {} already present", path.display());
                return Ok(());
            }
            return Err(Error::ArtifactConflict(path.display().to_string()));
        }

        let tmp_path = self
            .root
            .join("tmp")
            .join(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp_path, data).await?;

        // hard_link fails if the destination exists, unlike rename
        let linked = fs::hard_link(&tmp_path, path).await;
        fs::remove_file(&tmp_path).await?;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::ArtifactConflict(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a generation-0 script and record its path
    pub async fn persist_original(&self, script: &mut Script) -> Result<PathBuf> {
        if script.generation != 0 {
            return Err(Error::InvalidLineage {
                testcase_id: script.testcase_id.clone(),
                reason: format!("expected generation 0, got {}", script.generation),
            });
        }
        let path = self.original_path(&script.testcase_id);
        self.write_new(&path, script.source_text.as_bytes()).await?;
        script.path = Some(path.clone());
        info!(testcase = %script.testcase_id, "Stored original script {}", path.display());
        Ok(path)
    }

    /// Persist a healed generation, backing up generation 0 on the first heal
    pub async fn persist_healed(&self, parent: &Script, healed: &mut Script) -> Result<PathBuf> {
        if healed.generation != parent.generation + 1
            || healed.parent_id.as_deref() != Some(parent.id.as_str())
        {
            return Err(Error::InvalidLineage {
                testcase_id: healed.testcase_id.clone(),
                reason: format!(
                    "generation {} is not a child of generation {}",
                    healed.generation, parent.generation
                ),
            });
        }

        if parent.generation == 0 {
            let backup = self.backup_path(&parent.testcase_id);
            self.write_new(&backup, parent.source_text.as_bytes()).await?;
            debug!("Backed up original script to {}", backup.display());
        }

        let path = self.healed_path(&healed.testcase_id, healed.generation);
        self.write_new(&path, healed.source_text.as_bytes()).await?;
        healed.path = Some(path.clone());
        info!(
            testcase = %healed.testcase_id,
            generation = healed.generation,
            "Stored healed script {}",
            path.display()
        );
        Ok(path)
    }

    /// Read the backup of generation 0
    pub async fn read_backup(&self, testcase_id: &str) -> Result<String> {
        let path = self.backup_path(testcase_id);
        if !path.exists() {
            return Err(Error::not_found("backup", testcase_id));
        }
        Ok(fs::read_to_string(&path).await?)
    }

    /// Keep output that failed validation for inspection
    pub async fn write_rejected(&self, testcase_id: &str, source: &str) -> Result<PathBuf> {
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self
            .root
            .join("rejected")
            .join(format!("{}-{}.error.js", testcase_id, &suffix[..8]));
        self.write_new(&path, source.as_bytes()).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_backup_survives_repeated_heals() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path()).await.unwrap();

        let mut gen0 = Script::original("login", "await page.click('#submit');");
        store.persist_original(&mut gen0).await.unwrap();

        let mut parent = gen0.clone();
        for n in 1..=3 {
            let mut next = parent.derive_healed(format!("await page.click('#submit-{}');", n));
            store.persist_healed(&parent, &mut next).await.unwrap();
            assert!(store.healed_path("login", n).exists());
            parent = next;
        }

        let backup = store.read_backup("login").await.unwrap();
        assert_eq!(backup.as_bytes(), gen0.source_text.as_bytes());

        let original = fs::read_to_string(store.original_path("login")).await.unwrap();
        assert_eq!(original, gen0.source_text);
    }

    #[tokio::test]
    async fn test_never_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path()).await.unwrap();

        let mut first = Script::original("tc", "one");
        store.persist_original(&mut first).await.unwrap();

        // same bytes again is accepted
        let mut again = Script::original("tc", "one");
        store.persist_original(&mut again).await.unwrap();

        let mut other = Script::original("tc", "two");
        let err = store.persist_original(&mut other).await.unwrap_err();
        assert!(matches!(err, Error::ArtifactConflict(_)));

        let on_disk = fs::read_to_string(store.original_path("tc")).await.unwrap();
        assert_eq!(on_disk, "one");
    }

    #[tokio::test]
    async fn test_rejects_non_child_generation() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path()).await.unwrap();

        let gen0 = Script::original("tc", "a");
        let gen1 = gen0.derive_healed("b");
        let mut gen2 = gen1.derive_healed("c");

        let err = store.persist_healed(&gen0, &mut gen2).await.unwrap_err();
        assert!(matches!(err, Error::InvalidLineage { .. }));
    }

    #[tokio::test]
    async fn test_rejected_output_is_kept_aside() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::new(tmp.path()).await.unwrap();

        let path = store.write_rejected("tc", "const x = (;").await.unwrap();
        assert!(path.starts_with(tmp.path().join("rejected")));
        assert!(!store.original_path("tc").exists());
    }
}
