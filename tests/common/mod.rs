//! Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stemflow::progress::DownloadProgress;
use stemflow::{
    Catalog, ExecutionObserver, Executor, JsonLedgerStore, LedgerError, LedgerStore,
    ModuleDefinition, SeparationRequest,
};

/// One `separate` invocation seen by the fake
#[derive(Debug, Clone, PartialEq)]
pub struct SeparateCall {
    pub model: String,
    pub input: PathBuf,
    pub written: Vec<String>,
}

/// Scripted executor: writes an empty file per declared output, unless told
/// to fail a model or omit a file stem
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<SeparateCall>>,
    loads: Mutex<Vec<String>>,
    failing_models: Mutex<HashSet<String>>,
    omitted: Mutex<HashSet<String>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_model(&self, model: &str) {
        self.failing_models.lock().insert(model.to_string());
    }

    pub fn omit_output(&self, file_stem: &str) {
        self.omitted.lock().insert(file_stem.to_string());
    }

    pub fn calls(&self) -> Vec<SeparateCall> {
        self.calls.lock().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    fn output_format(&self) -> &str {
        "flac"
    }

    async fn load(&self, model: &str, observer: &dyn ExecutionObserver) -> anyhow::Result<()> {
        self.loads.lock().push(model.to_string());
        observer.on_model_download(model, DownloadProgress::Status("cached".into()));
        Ok(())
    }

    async fn separate(
        &self,
        request: &SeparationRequest<'_>,
        observer: &dyn ExecutionObserver,
    ) -> anyhow::Result<()> {
        let mut call = SeparateCall {
            model: request.model.to_string(),
            input: request.input.to_path_buf(),
            written: Vec::new(),
        };
        if self.failing_models.lock().contains(request.model) {
            self.calls.lock().push(call);
            bail!("model {} crashed", request.model);
        }

        observer.on_progress(50);
        let omitted = self.omitted.lock().clone();
        for file_stem in request.output_names.values() {
            if omitted.contains(file_stem) {
                continue;
            }
            let path = request.output_path(file_stem, self.output_format());
            std::fs::write(&path, b"stem")?;
            call.written.push(format!("{}.{}", file_stem, self.output_format()));
        }
        observer.on_progress(100);
        self.calls.lock().push(call);
        Ok(())
    }
}

/// `root` (X, Y) <- `child` (Z from X) <- `grandchild` (W from Z), plus an
/// independent `solo`
pub fn test_catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::from_definitions(vec![
            ModuleDefinition::new("root", "root.ckpt")
                .with_output("X", "outX")
                .with_output("Y", "outY"),
            ModuleDefinition::new("child", "child.ckpt")
                .with_dependency("root", "X")
                .with_output("Z", "outZ"),
            ModuleDefinition::new("grandchild", "grandchild.ckpt")
                .with_dependency("child", "Z")
                .with_output("W", "outW"),
            ModuleDefinition::new("solo", "solo.ckpt").with_output("S", "outS"),
        ])
        .unwrap(),
    )
}

pub fn json_store(dir: &Path) -> Arc<dyn LedgerStore> {
    Arc::new(JsonLedgerStore::new(dir).unwrap())
}

/// JSON store that refuses every write after the first `budget`
pub struct WriteLimitedStore {
    inner: JsonLedgerStore,
    remaining: AtomicUsize,
}

impl WriteLimitedStore {
    pub fn new(dir: &Path, budget: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: JsonLedgerStore::new(dir).unwrap(),
            remaining: AtomicUsize::new(budget),
        })
    }
}

impl LedgerStore for WriteLimitedStore {
    fn library_root(&self) -> &Path {
        self.inner.library_root()
    }

    fn read(&self, project_id: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.inner.read(project_id)
    }

    fn write(&self, project_id: &str, snapshot: &[u8]) -> Result<(), LedgerError> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(LedgerError::io(
                self.inner.library_root().join(project_id),
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        self.inner.write(project_id, snapshot)
    }

    fn exists(&self, project_id: &str) -> Result<bool, LedgerError> {
        self.inner.exists(project_id)
    }

    fn remove(&self, project_id: &str) -> Result<bool, LedgerError> {
        self.inner.remove(project_id)
    }

    fn list(&self) -> Result<Vec<String>, LedgerError> {
        self.inner.list()
    }
}

/// Writes a small audio-named file to ingest
pub fn source_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"RIFF").unwrap();
    path
}
