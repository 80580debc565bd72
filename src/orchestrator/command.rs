//! Executor backed by an external separator program.
//!
//! The program is invoked once per call with the model, input and output
//! naming on its command line; progress is scraped from its stderr.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::executor::{ExecutionObserver, Executor, SeparationRequest};
use crate::core::config::Config;
use crate::progress::DownloadProgress;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    output_format: String,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, output_format: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            output_format: output_format.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.separator_command, &config.output_format)
    }

    fn command(&self, model: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-m")
            .arg(model)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Runs `command`, handing every stderr line to `on_line`
    async fn run<F>(&self, mut command: Command, mut on_line: F) -> anyhow::Result<()>
    where
        F: FnMut(&str) + Send,
    {
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.program))?;

        let mut last_line = String::new();
        if let Some(stderr) = child.stderr.take() {
            // Progress bars redraw with '\r', log lines end with '\n'.
            let mut segments = BufReader::new(stderr).split(b'\r');
            while let Some(segment) = segments.next_segment().await? {
                for line in String::from_utf8_lossy(&segment).lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    on_line(line);
                    last_line = line.to_string();
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            bail!("'{}' exited with {}: {}", self.program, status, last_line);
        }
        Ok(())
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn output_format(&self) -> &str {
        &self.output_format
    }

    async fn load(&self, model: &str, observer: &dyn ExecutionObserver) -> anyhow::Result<()> {
        info!("Loading model {}", model);
        let mut command = self.command(model);
        command.arg("--download_model_only");
        self.run(command, |line| {
            if let Some(percent) = parse_percent(line) {
                observer.on_model_download(model, DownloadProgress::Percent(percent));
            } else if line.to_ascii_lowercase().contains("download") {
                observer.on_model_download(model, DownloadProgress::Status(line.to_string()));
            }
        })
        .await
        .with_context(|| format!("failed to load model {}", model))
    }

    async fn separate(
        &self,
        request: &SeparationRequest<'_>,
        observer: &dyn ExecutionObserver,
    ) -> anyhow::Result<()> {
        let names = serde_json::to_string(request.output_names)?;
        let mut command = self.command(request.model);
        command
            .arg(request.input)
            .arg("--output_dir")
            .arg(request.output_dir)
            .arg("--output_format")
            .arg(self.output_format.to_ascii_uppercase())
            .arg("--custom_output_names")
            .arg(names);
        debug!("Separating {} with {}", request.input.display(), request.model);

        let mut last_percent = None;
        self.run(command, |line| {
            if let Some(percent) = parse_percent(line) {
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    observer.on_progress(percent);
                }
            }
        })
        .await
        .with_context(|| format!("separation of {} failed", display(request.input)))
    }
}

fn display(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// First `NN%` in a progress line, clamped to 100
pub fn parse_percent(line: &str) -> Option<u8> {
    let bytes = line.as_bytes();
    for (index, _) in line.match_indices('%') {
        let start = bytes[..index]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |p| p + 1);
        if start < index {
            if let Ok(value) = line[start..index].parse::<u32>() {
                return Some(value.min(100) as u8);
            }
        }
    }
    None
}
