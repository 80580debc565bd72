use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::executor::{Executor, ModuleObserver, SeparationRequest};
use super::report::{ModuleFailure, RunReport};
use crate::catalog::{Catalog, ModuleDefinition, ModuleId, StemKey};
use crate::core::errors::{Result, StemflowError};
use crate::ledger::{ModuleResult, Project};
use crate::progress::{ProgressEvent, ProgressSink};

/// Lifecycle of one module attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    ResolvingDependency,
    Executing,
    Recorded,
    Failed,
}

fn transition(module: &str, state: AttemptState) {
    debug!(module, state = ?state, "module attempt");
}

/// Runs catalog modules against a project ledger.
///
/// Each (project, module) pair reaches the executor at most once; a module
/// already in the ledger is answered from it.
pub struct Orchestrator {
    catalog: Arc<Catalog>,
    executor: Arc<dyn Executor>,
}

impl Orchestrator {
    pub fn new(catalog: Arc<Catalog>, executor: Arc<dyn Executor>) -> Self {
        Self { catalog, executor }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn definition(&self, module_id: &str) -> Result<&ModuleDefinition> {
        self.catalog
            .lookup(module_id)
            .ok_or_else(|| StemflowError::unknown_module(module_id))
    }

    /// Input path for `module_id`, running any incomplete ancestors first.
    ///
    /// Ancestors are materialized iteratively along the dependency chain, not
    /// by recursion: one `ResolvingDependency` event per missing link, child
    /// side first, then the missing ancestors run root first.
    #[instrument(skip(self, project, sink), fields(project = %project.id()))]
    pub async fn resolve_input(
        &self,
        project: &mut Project,
        module_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let definition = self.definition(module_id)?;
        let chain = self.catalog.dependency_chain(module_id);

        let mut missing: Vec<&ModuleId> = Vec::new();
        for link in chain.windows(2).rev() {
            let (parent, child) = (&link[0], &link[1]);
            if project.is_completed(parent) {
                break;
            }
            transition(child, AttemptState::ResolvingDependency);
            info!("Module '{}' requires '{}'; running it first", child, parent);
            sink.emit(ProgressEvent::ResolvingDependency {
                module: child.clone(),
                parent: parent.clone(),
            });
            missing.push(parent);
        }

        for ancestor in missing.into_iter().rev() {
            let ancestor_def = self.definition(ancestor)?;
            self.execute(project, ancestor_def, sink).await?;
        }

        input_for(project, definition)
    }

    /// Outputs of `module_id`, executing it (and its missing ancestors) only
    /// if the ledger has no result for it yet
    #[instrument(skip(self, project, sink), fields(project = %project.id()))]
    pub async fn run_module(
        &self,
        project: &mut Project,
        module_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<StemKey, PathBuf>> {
        let definition = self.definition(module_id)?;
        transition(module_id, AttemptState::Pending);

        if let Some(result) = project.result(module_id) {
            info!("Module '{}' already completed; skipping", module_id);
            sink.emit(ProgressEvent::Completed {
                module: module_id.to_string(),
            });
            return Ok(result.outputs.clone());
        }

        self.resolve_input(project, module_id, sink).await?;
        self.execute(project, definition, sink).await
    }

    /// Runs `module_ids` in the given order. A failure is reported for its
    /// module and the batch moves on.
    #[instrument(skip_all, fields(project = %project.id()))]
    pub async fn run_many<S: AsRef<str>>(
        &self,
        project: &mut Project,
        module_ids: &[S],
        sink: &dyn ProgressSink,
    ) -> RunReport {
        let mut report = RunReport::default();
        for module_id in module_ids {
            let module_id = module_id.as_ref();
            match self.run_module(project, module_id, sink).await {
                Ok(_) => report.completed.push(module_id.to_string()),
                Err(e) => {
                    transition(module_id, AttemptState::Failed);
                    error!("Error running module '{}': {}", module_id, e);
                    sink.emit(ProgressEvent::error(e.to_string()));
                    report.failures.push(ModuleFailure::new(module_id, &e));
                }
            }
        }
        info!(
            "Batch finished: {} completed, {} failed",
            report.completed.len(),
            report.failures.len()
        );
        report
    }

    /// Invokes the executor for a module whose input is available and records
    /// the stems that materialized
    async fn execute(
        &self,
        project: &mut Project,
        definition: &ModuleDefinition,
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<StemKey, PathBuf>> {
        let module_id = &definition.id;
        if let Some(result) = project.result(module_id) {
            return Ok(result.outputs.clone());
        }
        let input = input_for(project, definition)?;

        transition(module_id, AttemptState::Executing);
        info!("Running module '{}' on {}", module_id, input.display());
        let observer = ModuleObserver {
            module: module_id,
            sink,
        };

        self.executor
            .load(&definition.model, &observer)
            .await
            .map_err(|e| StemflowError::execution(module_id.as_str(), e))?;

        let output_dir = project.dir().to_path_buf();
        let request = SeparationRequest {
            model: &definition.model,
            input: &input,
            output_dir: &output_dir,
            output_names: &definition.output_names,
        };
        self.executor
            .separate(&request, &observer)
            .await
            .map_err(|e| StemflowError::execution(module_id.as_str(), e))?;

        let format = self.executor.output_format();
        let mut outputs = BTreeMap::new();
        for (stem, file_stem) in &definition.output_names {
            let path = request.output_path(file_stem, format);
            if path.is_file() {
                outputs.insert(stem.clone(), path);
            } else {
                warn!(
                    "Module '{}' did not produce stem '{}' at {}",
                    module_id,
                    stem,
                    path.display()
                );
            }
        }

        project.record_result(
            module_id,
            ModuleResult {
                model: definition.model.clone(),
                input_used: input,
                outputs: outputs.clone(),
            },
        )?;
        transition(module_id, AttemptState::Recorded);
        sink.emit(ProgressEvent::Completed {
            module: module_id.clone(),
        });
        Ok(outputs)
    }
}

/// Input of a module whose parent (if any) is already complete
fn input_for(project: &Project, definition: &ModuleDefinition) -> Result<PathBuf> {
    match (&definition.depends_on, &definition.input_stem) {
        (Some(parent), Some(stem)) => project
            .get_output(parent, stem)
            .map(|path| path.to_path_buf())
            .ok_or_else(|| StemflowError::DependencyOutputMissing {
                module: definition.id.clone(),
                parent: parent.clone(),
                stem: stem.clone(),
                available: project.available_stems(parent),
            }),
        _ => project
            .original_input()
            .map(|path| path.to_path_buf())
            .ok_or_else(|| StemflowError::missing_original_input(definition.id.as_str())),
    }
}
