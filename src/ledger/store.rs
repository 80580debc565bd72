//! Persistence seam for project ledgers
//!
//! Stores deal in raw snapshot bytes (serialized `ProjectState` JSON); parsing
//! lives with the `Project` handle so corrupt data can be told apart from I/O
//! failures.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::core::errors::LedgerError;

pub const METADATA_FILE: &str = "metadata.json";

/// Durable storage for per-project ledger snapshots
pub trait LedgerStore: Send + Sync {
    /// Directory that contains every project directory
    fn library_root(&self) -> &Path;

    /// Snapshot bytes, or `None` when the project has never been saved
    fn read(&self, project_id: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Replaces the whole snapshot
    fn write(&self, project_id: &str, snapshot: &[u8]) -> Result<(), LedgerError>;

    fn exists(&self, project_id: &str) -> Result<bool, LedgerError>;

    /// Drops the snapshot only. Returns whether one existed.
    fn remove(&self, project_id: &str) -> Result<bool, LedgerError>;

    /// Ids of every project with a snapshot
    fn list(&self) -> Result<Vec<String>, LedgerError>;

    /// Working directory of a project; executors write stems here
    fn project_dir(&self, project_id: &str) -> Result<PathBuf, LedgerError> {
        check_project_id(project_id)?;
        Ok(self.library_root().join(project_id))
    }

    /// Removes the snapshot and the project's directory
    fn delete(&self, project_id: &str) -> Result<bool, LedgerError> {
        let dir = self.project_dir(project_id)?;
        let had_snapshot = self.remove(project_id)?;
        let had_dir = dir.exists();
        if had_dir {
            let root = fs::canonicalize(self.library_root())
                .map_err(|e| LedgerError::io(self.library_root(), e))?;
            let resolved = fs::canonicalize(&dir).map_err(|e| LedgerError::io(&dir, e))?;
            if !resolved.starts_with(&root) {
                return Err(LedgerError::OutsideLibrary(resolved));
            }
            fs::remove_dir_all(&resolved).map_err(|e| LedgerError::io(&resolved, e))?;
        }
        info!("Deleted project '{}'", project_id);
        Ok(had_snapshot || had_dir)
    }
}

/// Project ids double as directory names and must stay a single path segment
pub fn check_project_id(project_id: &str) -> Result<(), LedgerError> {
    let mut components = Path::new(project_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(LedgerError::OutsideLibrary(PathBuf::from(project_id))),
    }
}

/// `<library>/<project_id>/metadata.json`, replaced atomically on every write
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    root: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LedgerError::io(&root, e))?;
        Ok(Self { root })
    }

    fn metadata_path(&self, project_id: &str) -> Result<PathBuf, LedgerError> {
        Ok(self.project_dir(project_id)?.join(METADATA_FILE))
    }
}

impl LedgerStore for JsonLedgerStore {
    fn library_root(&self) -> &Path {
        &self.root
    }

    fn read(&self, project_id: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        let path = self.metadata_path(project_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LedgerError::io(path, e)),
        }
    }

    fn write(&self, project_id: &str, snapshot: &[u8]) -> Result<(), LedgerError> {
        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;
        let path = dir.join(METADATA_FILE);

        // Sibling temp file, then an atomic rename over the target.
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| LedgerError::io(&dir, e))?;
        tmp.write_all(snapshot)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| LedgerError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| LedgerError::io(&path, e.error))?;
        debug!("Wrote ledger snapshot {}", path.display());
        Ok(())
    }

    fn exists(&self, project_id: &str) -> Result<bool, LedgerError> {
        Ok(self.metadata_path(project_id)?.is_file())
    }

    fn remove(&self, project_id: &str) -> Result<bool, LedgerError> {
        let path = self.metadata_path(project_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LedgerError::io(path, e)),
        }
    }

    fn list(&self) -> Result<Vec<String>, LedgerError> {
        let entries = fs::read_dir(&self.root).map_err(|e| LedgerError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable library entry: {}", e);
                    continue;
                }
            };
            if entry.path().join(METADATA_FILE).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Snapshots kept zstd-compressed in an embedded sled database at
/// `<library>/.ledger`
#[derive(Clone)]
pub struct SledLedgerStore {
    root: PathBuf,
    tree: sled::Tree,
}

impl SledLedgerStore {
    const TREE: &'static str = "projects";
    const COMPRESSION_LEVEL: i32 = 3;

    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LedgerError::io(&root, e))?;
        let db = sled::open(root.join(".ledger"))?;
        let tree = db.open_tree(Self::TREE)?;
        info!("Opened sled ledger at {}", root.display());
        Ok(Self { root, tree })
    }
}

impl LedgerStore for SledLedgerStore {
    fn library_root(&self) -> &Path {
        &self.root
    }

    fn read(&self, project_id: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        check_project_id(project_id)?;
        match self.tree.get(project_id.as_bytes())? {
            Some(compressed) => {
                let bytes = zstd::decode_all(&compressed[..]).map_err(LedgerError::Compression)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    fn write(&self, project_id: &str, snapshot: &[u8]) -> Result<(), LedgerError> {
        let dir = self.project_dir(project_id)?;
        fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;
        let compressed =
            zstd::encode_all(snapshot, Self::COMPRESSION_LEVEL).map_err(LedgerError::Compression)?;
        self.tree.insert(project_id.as_bytes(), compressed)?;
        self.tree.flush()?;
        Ok(())
    }

    fn exists(&self, project_id: &str) -> Result<bool, LedgerError> {
        check_project_id(project_id)?;
        Ok(self.tree.contains_key(project_id.as_bytes())?)
    }

    fn remove(&self, project_id: &str) -> Result<bool, LedgerError> {
        check_project_id(project_id)?;
        let removed = self.tree.remove(project_id.as_bytes())?.is_some();
        self.tree.flush()?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<String>, LedgerError> {
        let mut ids = Vec::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }
}
