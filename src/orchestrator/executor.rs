use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::catalog::{ModuleId, StemKey};
use crate::progress::{DownloadProgress, ProgressEvent, ProgressSink};

/// Callbacks an executor uses to report progress of one call
pub trait ExecutionObserver: Send + Sync {
    /// Separation progress, 0-100
    fn on_progress(&self, percent: u8);

    /// Model fetch progress while loading
    fn on_model_download(&self, model: &str, progress: DownloadProgress);
}

/// Input to one separation call
#[derive(Debug, Clone)]
pub struct SeparationRequest<'a> {
    pub model: &'a str,
    pub input: &'a Path,
    pub output_dir: &'a Path,
    /// Stem key -> output file stem; files land at `<output_dir>/<stem>.<format>`
    pub output_names: &'a BTreeMap<StemKey, String>,
}

impl SeparationRequest<'_> {
    /// Path the executor is expected to produce for `file_stem`
    pub fn output_path(&self, file_stem: &str, format: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", file_stem, format))
    }
}

/// The opaque capability that turns one input file into named stems
#[async_trait]
pub trait Executor: Send + Sync {
    /// Extension of the files `separate` writes
    fn output_format(&self) -> &str;

    /// Makes `model` ready for use, downloading it if needed
    async fn load(&self, model: &str, observer: &dyn ExecutionObserver) -> anyhow::Result<()>;

    /// Writes one file per entry of `request.output_names`. Missing files
    /// after a successful return are tolerated by the caller.
    async fn separate(
        &self,
        request: &SeparationRequest<'_>,
        observer: &dyn ExecutionObserver,
    ) -> anyhow::Result<()>;
}

/// Republishes executor callbacks as progress events tagged with a module
pub(crate) struct ModuleObserver<'a> {
    pub module: &'a ModuleId,
    pub sink: &'a dyn ProgressSink,
}

impl ExecutionObserver for ModuleObserver<'_> {
    fn on_progress(&self, percent: u8) {
        self.sink.emit(ProgressEvent::Progress {
            module: self.module.clone(),
            percent: percent.min(100),
        });
    }

    fn on_model_download(&self, model: &str, progress: DownloadProgress) {
        self.sink.emit(ProgressEvent::ModelDownloading {
            module: self.module.clone(),
            model: model.to_string(),
            progress,
        });
    }
}
