use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::naming::{project_date, project_id_for, sanitize_filename};
use crate::catalog::{Catalog, ModuleId};
use crate::core::config::{Config, LedgerBackend};
use crate::core::errors::{Result, StemflowError};
use crate::ledger::{DisplayMetadata, JsonLedgerStore, LedgerStore, Project, SledLedgerStore};
use crate::orchestrator::{CommandExecutor, Executor, Orchestrator, RunReport};
use crate::progress::{JobChannel, ProgressBus, ProgressSink};

const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];
const MAX_ID_SUFFIX: usize = 100;

/// A new input file to ingest and process
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Placeholder id the client is already subscribed to
    pub job_id: String,
    /// File to copy into the new project
    pub source: PathBuf,
    /// Name the client knows the file by; defaults to the source file name
    pub filename: Option<String>,
    pub modules: Vec<ModuleId>,
    pub display_name: Option<String>,
    pub thumbnail: Option<String>,
}

impl UploadRequest {
    pub fn new(
        job_id: impl Into<String>,
        source: impl Into<PathBuf>,
        modules: Vec<ModuleId>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            source: source.into(),
            filename: None,
            modules,
            display_name: None,
            thumbnail: None,
        }
    }
}

/// Result of processing one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub id: String,
    pub stems: Vec<String>,
    pub executed_modules: Vec<ModuleId>,
    pub report: RunReport,
    pub thumbnail: Option<String>,
}

/// One entry of the project history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    pub stems: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Opens the ledger backend selected in `config`
pub fn open_store(config: &Config) -> Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.ledger_backend {
        LedgerBackend::Json => Arc::new(
            JsonLedgerStore::new(&config.library_dir)
                .map_err(|e| StemflowError::storage("open ledger", e))?,
        ),
        LedgerBackend::Sled => Arc::new(
            SledLedgerStore::open(&config.library_dir)
                .map_err(|e| StemflowError::storage("open ledger", e))?,
        ),
    };
    Ok(store)
}

/// The YAML catalog named in `config`, or the built-in one
pub fn load_catalog(config: &Config) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => Catalog::from_yaml_file(path)
            .map_err(|e| StemflowError::configuration(format!("invalid catalog: {}", e))),
        None => Ok(Catalog::builtin()),
    }
}

/// Job-level composition of ledger, orchestrator and progress bus
pub struct SeparationService {
    store: Arc<dyn LedgerStore>,
    orchestrator: Orchestrator,
    bus: ProgressBus,
}

impl SeparationService {
    pub fn new(store: Arc<dyn LedgerStore>, orchestrator: Orchestrator, bus: ProgressBus) -> Self {
        Self {
            store,
            orchestrator,
            bus,
        }
    }

    /// Wires the configured store, catalog and bus around `executor`
    pub fn with_executor(config: &Config, executor: Arc<dyn Executor>) -> Result<Self> {
        config.validate()?;
        let store = open_store(config)?;
        let catalog = Arc::new(load_catalog(config)?);
        let orchestrator = Orchestrator::new(catalog, executor);
        Ok(Self::new(store, orchestrator, ProgressBus::from_config(config)))
    }

    /// Service backed by the external separator program
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_executor(config, Arc::new(CommandExecutor::from_config(config)))
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.bus
    }

    pub fn catalog(&self) -> &Catalog {
        self.orchestrator.catalog()
    }

    fn check_modules(&self, modules: &[ModuleId]) -> Result<()> {
        let unknown = self.catalog().validate(modules);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StemflowError::unknown_module(unknown.join(", ")))
        }
    }

    /// Ingests a new file under a fresh project id and runs the requested
    /// modules. Progress goes to the channel of `request.job_id`, which is
    /// renamed to the project id once that is known.
    #[instrument(skip(self, request), fields(job = %request.job_id))]
    pub async fn process_upload(&self, request: UploadRequest) -> Result<ProcessOutcome> {
        self.check_modules(&request.modules)?;
        let mut job = JobChannel::open(&self.bus, request.job_id.as_str());

        let original_name = match &request.filename {
            Some(name) => name.clone(),
            None => request
                .source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let filename = sanitize_filename(&original_name);
        let (project_id, dir) = self
            .reserve_project_id(&project_id_for(&Local::now(), &filename))
            .await?;
        let original = dir.join(&filename);
        tokio::fs::copy(&request.source, &original)
            .await
            .map_err(|e| StemflowError::io(format!("copy {}", request.source.display()), e))?;
        info!("Ingested '{}' as project '{}'", original_name, project_id);

        job.rename(project_id.as_str())?;

        let mut project = Project::create(self.store.clone(), &original, &project_id)?;
        self.process(&mut project, &request.modules, &job, request.display_name, request.thumbnail)
            .await
    }

    /// Claims a fresh project directory, suffixing `-2`, `-3`, ... while
    /// `base` is taken
    async fn reserve_project_id(&self, base: &str) -> Result<(String, PathBuf)> {
        for attempt in 1..=MAX_ID_SUFFIX {
            let id = match attempt {
                1 => base.to_string(),
                n => format!("{}-{}", base, n),
            };
            let taken = self
                .store
                .exists(&id)
                .map_err(|e| StemflowError::storage("check project id", e))?;
            if taken {
                continue;
            }
            let dir = self
                .store
                .project_dir(&id)
                .map_err(|e| StemflowError::storage("resolve project directory", e))?;
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("Project id '{}' is taken", id);
                }
                Err(e) => {
                    return Err(StemflowError::io(format!("create {}", dir.display()), e));
                }
            }
        }
        Err(StemflowError::configuration(format!("no free project id for '{}'", base)))
    }

    /// Runs more modules on an existing project, streaming under its id
    #[instrument(skip(self, modules))]
    pub async fn run_additional(
        &self,
        project_id: &str,
        modules: &[ModuleId],
    ) -> Result<ProcessOutcome> {
        self.check_modules(modules)?;
        let mut project = Project::load(self.store.clone(), project_id)?;
        let job = JobChannel::open(&self.bus, project_id);
        self.process(&mut project, modules, &job, None, None).await
    }

    async fn process(
        &self,
        project: &mut Project,
        modules: &[ModuleId],
        sink: &dyn ProgressSink,
        display_name: Option<String>,
        thumbnail: Option<String>,
    ) -> Result<ProcessOutcome> {
        let report = self.orchestrator.run_many(project, modules, sink).await;

        let original_file = original_file_name(project);
        let existing = project.state().display.clone();
        let name = display_name.or(existing.name).or_else(|| {
            original_file
                .as_deref()
                .and_then(|file| Path::new(file).file_stem())
                .map(|stem| stem.to_string_lossy().into_owned())
        });
        let date = project_date(project.id())
            .map(str::to_string)
            .or(existing.date)
            .unwrap_or_else(|| Local::now().format("%Y%m%d%H%M%S").to_string());
        let display = DisplayMetadata {
            name,
            original_file: original_file.clone(),
            date: Some(date),
            thumbnail: thumbnail.or(existing.thumbnail),
        };
        // The modules already ran; the caller still gets their report.
        if let Err(e) = project.set_display_metadata(display) {
            warn!("Cannot save display metadata of '{}': {}", project.id(), e);
        }
        let stems = match list_stems(project.dir(), original_file.as_deref()) {
            Ok(stems) => stems,
            Err(e) => {
                warn!("Cannot list stems of '{}': {}", project.id(), e);
                Vec::new()
            }
        };
        Ok(ProcessOutcome {
            id: project.id().to_string(),
            stems,
            executed_modules: project.executed_modules(),
            report,
            thumbnail: project.state().display.thumbnail.clone(),
        })
    }

    pub fn project(&self, project_id: &str) -> Result<Project> {
        Project::load(self.store.clone(), project_id)
    }

    /// Every readable project, newest id first
    pub fn history(&self) -> Result<Vec<ProjectSummary>> {
        let ids = self
            .store
            .list()
            .map_err(|e| StemflowError::storage("list projects", e))?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let project = match Project::load(self.store.clone(), &id) {
                Ok(project) => project,
                Err(e) => {
                    warn!("Skipping project '{}': {}", id, e);
                    continue;
                }
            };
            let original = original_file_name(&project);
            let stems = match list_stems(project.dir(), original.as_deref()) {
                Ok(stems) => stems,
                Err(e) => {
                    warn!("Cannot list stems of '{}': {}", id, e);
                    Vec::new()
                }
            };
            let display = &project.state().display;
            summaries.push(ProjectSummary {
                name: display.name.clone().unwrap_or_else(|| id.clone()),
                date: display.date.clone().unwrap_or_else(|| id.clone()),
                original,
                stems,
                thumbnail: display.thumbnail.clone(),
                id,
            });
        }
        summaries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(summaries)
    }

    /// Removes the project's ledger and directory
    pub fn delete(&self, project_id: &str) -> Result<()> {
        let existed = self
            .store
            .delete(project_id)
            .map_err(|e| StemflowError::storage("delete project", e))?;
        if !existed {
            return Err(StemflowError::project_not_found(project_id));
        }
        Ok(())
    }
}

fn original_file_name(project: &Project) -> Option<String> {
    project.state().display.original_file.clone().or_else(|| {
        project
            .original_input()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
    })
}

/// Audio files in a project directory other than the original input, sorted
pub fn list_stems(dir: &Path, original: Option<&str>) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StemflowError::io(format!("list {}", dir.display()), e))?;
    let mut stems = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StemflowError::io(format!("list {}", dir.display()), e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_audio && Some(name.as_str()) != original {
            stems.push(name);
        }
    }
    stems.sort();
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service(library: &Path) -> SeparationService {
        let config = Config {
            library_dir: library.to_path_buf(),
            ..Config::default()
        };
        let executor = Arc::new(CommandExecutor::from_config(&config));
        SeparationService::with_executor(&config, executor).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_project_id_skips_taken_ids() {
        let library = tempfile::tempdir().unwrap();
        let service = service(library.path());
        let base = "20240101120000_So";

        let (first, dir) = service.reserve_project_id(base).await.unwrap();
        assert_eq!(first, base);
        assert!(dir.is_dir());

        let (second, _) = service.reserve_project_id(base).await.unwrap();
        assert_eq!(second, "20240101120000_So-2");

        // An existing ledger holds its id
        service.store.write("20240101120000_So-3", b"{}").unwrap();
        let (third, _) = service.reserve_project_id(base).await.unwrap();
        assert_eq!(third, "20240101120000_So-4");
        assert_eq!(project_date(&third), Some("20240101120000"));
    }
}
