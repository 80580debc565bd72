//! Execution ledger
//!
//! Durable per-project record of which modules completed, with the input they
//! consumed and the stems they produced. A module id enters `results` at most
//! once; once present the module is permanently complete for that project.

pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::{ModuleId, StemKey};
use crate::core::errors::{LedgerError, Result, StemflowError};

pub use store::{JsonLedgerStore, LedgerStore, SledLedgerStore, METADATA_FILE};

/// Outcome of one successful module execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub model: String,
    pub input_used: PathBuf,
    pub outputs: BTreeMap<StemKey, PathBuf>,
}

/// Display fields the orchestrator never interprets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Persisted snapshot of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(rename = "id", default)]
    pub project_id: String,
    #[serde(default)]
    pub input_original: Option<PathBuf>,
    #[serde(default)]
    pub results: BTreeMap<ModuleId, ModuleResult>,
    #[serde(flatten)]
    pub display: DisplayMetadata,
}

impl ProjectState {
    pub fn new(project_id: impl Into<String>, input_original: Option<PathBuf>) -> Self {
        Self {
            project_id: project_id.into(),
            input_original,
            results: BTreeMap::new(),
            display: DisplayMetadata::default(),
        }
    }

    pub fn to_snapshot(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Parses a snapshot; the store key wins over any id recorded inside it
    pub fn from_snapshot(
        project_id: &str,
        bytes: &[u8],
    ) -> std::result::Result<Self, serde_json::Error> {
        let mut state: ProjectState = serde_json::from_slice(bytes)?;
        state.project_id = project_id.to_string();
        Ok(state)
    }
}

/// A loaded project bound to the store that persists it
pub struct Project {
    state: ProjectState,
    dir: PathBuf,
    store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("state", &self.state)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Project {
    /// Allocates the project directory and writes the initial snapshot
    #[instrument(skip(store, original_input))]
    pub fn create(
        store: Arc<dyn LedgerStore>,
        original_input: impl Into<PathBuf>,
        project_id: &str,
    ) -> Result<Self> {
        let dir = project_dir(store.as_ref(), project_id)?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| StemflowError::storage("create project", LedgerError::io(&dir, e)))?;

        let project = Self {
            state: ProjectState::new(project_id, Some(original_input.into())),
            dir,
            store,
        };
        project.save()?;
        info!("Created new project '{}' at {}", project_id, project.dir.display());
        Ok(project)
    }

    #[instrument(skip(store))]
    pub fn load(store: Arc<dyn LedgerStore>, project_id: &str) -> Result<Self> {
        let dir = project_dir(store.as_ref(), project_id)?;
        let bytes = match store.read(project_id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(StemflowError::project_not_found(project_id)),
            Err(LedgerError::Compression(e)) => {
                return Err(StemflowError::corrupt_ledger(project_id, e))
            }
            Err(e) => return Err(StemflowError::storage("load project", e)),
        };
        let state = ProjectState::from_snapshot(project_id, &bytes)
            .map_err(|e| StemflowError::corrupt_ledger(project_id, e))?;
        info!("Loaded existing project '{}'", project_id);
        Ok(Self { state, dir, store })
    }

    /// Loads the project when a snapshot exists, otherwise creates it with
    /// `original_input`. An existing project keeps its own recorded input.
    pub fn load_or_create(
        store: Arc<dyn LedgerStore>,
        original_input: impl Into<PathBuf>,
        project_id: &str,
    ) -> Result<Self> {
        let exists = store
            .exists(project_id)
            .map_err(|e| StemflowError::storage("load project", e))?;
        if exists {
            Self::load(store, project_id)
        } else {
            Self::create(store, original_input, project_id)
        }
    }

    /// Like `load_or_create`, but a corrupt snapshot is replaced by a fresh
    /// ledger built from the caller's `original_input`. Completed results in
    /// the corrupt snapshot are lost.
    pub fn load_or_reinitialize(
        store: Arc<dyn LedgerStore>,
        original_input: impl Into<PathBuf>,
        project_id: &str,
    ) -> Result<Self> {
        let original_input = original_input.into();
        match Self::load_or_create(store.clone(), original_input.clone(), project_id) {
            Err(StemflowError::CorruptLedger { source, .. }) => {
                warn!(
                    "Reinitializing corrupt ledger for '{}': {}",
                    project_id, source
                );
                Self::create(store, original_input, project_id)
            }
            other => other,
        }
    }

    /// Overwrites the persisted snapshot with the in-memory state
    pub fn save(&self) -> Result<()> {
        let snapshot = self
            .state
            .to_snapshot()
            .map_err(|e| StemflowError::storage("save project", LedgerError::Json(e)))?;
        self.store
            .write(&self.state.project_id, &snapshot)
            .map_err(|e| StemflowError::storage("save project", e))
    }

    pub fn id(&self) -> &str {
        &self.state.project_id
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    /// Working directory; executors write stems here
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn original_input(&self) -> Option<&Path> {
        self.state.input_original.as_deref()
    }

    pub fn is_completed(&self, module_id: &str) -> bool {
        self.state.results.contains_key(module_id)
    }

    pub fn result(&self, module_id: &str) -> Option<&ModuleResult> {
        self.state.results.get(module_id)
    }

    pub fn get_output(&self, module_id: &str, stem: &str) -> Option<&Path> {
        self.result(module_id)
            .and_then(|result| result.outputs.get(stem))
            .map(PathBuf::as_path)
    }

    /// Stem keys a completed module actually produced
    pub fn available_stems(&self, module_id: &str) -> Vec<StemKey> {
        self.result(module_id)
            .map(|result| result.outputs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn executed_modules(&self) -> Vec<ModuleId> {
        self.state.results.keys().cloned().collect()
    }

    /// Appends a module result and persists the full snapshot. A module that
    /// is already recorded keeps its first result.
    #[instrument(skip(self, result), fields(project = %self.state.project_id))]
    pub fn record_result(&mut self, module_id: &str, result: ModuleResult) -> Result<()> {
        if self.is_completed(module_id) {
            warn!("Module '{}' already recorded; keeping first result", module_id);
            return Ok(());
        }
        self.state.results.insert(module_id.to_string(), result);
        if let Err(e) = self.save() {
            // Not complete unless persisted.
            self.state.results.remove(module_id);
            return Err(e);
        }
        info!("Recorded result for module '{}'", module_id);
        Ok(())
    }

    pub fn set_display_metadata(&mut self, display: DisplayMetadata) -> Result<()> {
        self.state.display = display;
        self.save()
    }
}

fn project_dir(store: &dyn LedgerStore, project_id: &str) -> Result<PathBuf> {
    store
        .project_dir(project_id)
        .map_err(|e| StemflowError::storage("resolve project directory", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json_store(dir: &Path) -> Arc<dyn LedgerStore> {
        Arc::new(JsonLedgerStore::new(dir).unwrap())
    }

    fn result_for(input: &str, outputs: &[(&str, &str)]) -> ModuleResult {
        ModuleResult {
            model: "model.ckpt".into(),
            input_used: PathBuf::from(input),
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
                .collect(),
        }
    }

    #[test]
    fn test_create_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(dir.path());

        let mut project = Project::create(store.clone(), "input.wav", "p1").unwrap();
        project
            .record_result("root", result_for("input.wav", &[("X", "outX.flac")]))
            .unwrap();
        project
            .set_display_metadata(DisplayMetadata {
                name: Some("Song".into()),
                original_file: Some("input.wav".into()),
                date: Some("20240101120000".into()),
                thumbnail: None,
            })
            .unwrap();

        let loaded = Project::load(store, "p1").unwrap();
        assert_eq!(loaded.state(), project.state());
        assert_eq!(loaded.original_input(), Some(Path::new("input.wav")));
        assert_eq!(loaded.get_output("root", "X"), Some(Path::new("outX.flac")));
        assert_eq!(loaded.get_output("root", "Y"), None);
    }

    #[test]
    fn test_load_missing_project() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::load(json_store(dir.path()), "nope").unwrap_err();
        assert!(matches!(err, StemflowError::ProjectNotFound { .. }));
    }

    #[test]
    fn test_load_corrupt_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(dir.path());
        store.write("p1", b"{not json").unwrap();

        let err = Project::load(store.clone(), "p1").unwrap_err();
        assert!(matches!(err, StemflowError::CorruptLedger { .. }));
        assert!(err.is_fatal_to_request());

        // load_or_create does not paper over corruption
        let err = Project::load_or_create(store, "other.wav", "p1").unwrap_err();
        assert!(matches!(err, StemflowError::CorruptLedger { .. }));
    }

    #[test]
    fn test_reinitialize_corrupt_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(dir.path());
        store.write("p1", b"garbage").unwrap();

        let project = Project::load_or_reinitialize(store, "fresh.wav", "p1").unwrap();
        assert_eq!(project.original_input(), Some(Path::new("fresh.wav")));
        assert!(project.executed_modules().is_empty());
    }

    #[test]
    fn test_load_or_create_keeps_existing_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(dir.path());
        Project::create(store.clone(), "first.wav", "p1").unwrap();

        let project = Project::load_or_create(store, "second.wav", "p1").unwrap();
        assert_eq!(project.original_input(), Some(Path::new("first.wav")));
    }

    #[test]
    fn test_record_result_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = json_store(dir.path());
        let mut project = Project::create(store.clone(), "in.wav", "p1").unwrap();

        project.record_result("m", result_for("in.wav", &[("A", "a1")])).unwrap();
        project.record_result("m", result_for("in.wav", &[("A", "a2")])).unwrap();

        assert_eq!(project.executed_modules(), vec!["m".to_string()]);
        assert_eq!(project.get_output("m", "A"), Some(Path::new("a1")));
        let reloaded = Project::load(store, "p1").unwrap();
        assert_eq!(reloaded.get_output("m", "A"), Some(Path::new("a1")));
    }

    #[test]
    fn test_reads_legacy_snapshot_without_id() {
        let legacy = br#"{
            "input_original": "/lib/p/song.wav",
            "results": {
                "vocal_instrumental": {
                    "model": "m.ckpt",
                    "input_used": "/lib/p/song.wav",
                    "outputs": {"Vocals": "/lib/p/base_vocals.flac"}
                }
            },
            "name": "song"
        }"#;
        let state = ProjectState::from_snapshot("p", legacy).unwrap();
        assert_eq!(state.project_id, "p");
        assert_eq!(state.display.name.as_deref(), Some("song"));
        assert!(state.results.contains_key("vocal_instrumental"));
    }

    #[test]
    fn test_sled_backed_project() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn LedgerStore> = Arc::new(SledLedgerStore::open(dir.path()).unwrap());
        let mut project = Project::create(store.clone(), "in.wav", "p1").unwrap();
        project.record_result("m", result_for("in.wav", &[("A", "a")])).unwrap();

        let loaded = Project::load(store, "p1").unwrap();
        assert_eq!(loaded.state(), project.state());
    }
}
