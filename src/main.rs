use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stemflow::{Config, JobChannel, Project, SeparationService, UploadRequest};

#[derive(Parser, Debug)]
#[command(name = "stemflow", version, about = "Dependency-aware audio stem separation")]
struct Args {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the modules of the catalog
    Modules,
    /// Ingest a file as a new project and run modules on it
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Progress channel id; random when omitted
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(required = true)]
        modules: Vec<String>,
    },
    /// Run more modules on an existing project
    Resume {
        project: String,
        #[arg(required = true)]
        modules: Vec<String>,
    },
    /// Print a project's ledger
    Show { project: String },
    /// List projects, newest first
    Projects,
    /// Delete a project and its files
    Delete { project: String },
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(level).context("invalid log level")?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Prints the frames of `job_id` to stdout until its channel closes
fn print_frames(service: &SeparationService, job_id: &str) -> tokio::task::JoinHandle<()> {
    let mut frames = service.bus().subscribe(job_id);
    tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(frame.as_bytes());
            let _ = stdout.flush();
        }
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;
    let config = Config::load_or_default(args.config.as_deref())?;
    let service = SeparationService::from_config(&config)?;

    match args.command {
        Commands::Modules => {
            for module in service.catalog().list() {
                let parent = module
                    .depends_on
                    .as_deref()
                    .map(|p| format!(" (needs {})", p))
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<22} {}{}",
                    module.id, module.category, module.description, parent
                );
            }
        }
        Commands::Run {
            input,
            job,
            name,
            modules,
        } => {
            let job_id = job.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            // Subscribe before the job starts; a rejected request still ends the stream.
            let placeholder = JobChannel::open(service.bus(), job_id.as_str());
            let printer = print_frames(&service, &job_id);

            let mut request = UploadRequest::new(job_id, input, modules);
            request.display_name = name;
            let outcome = service.process_upload(request).await;
            drop(placeholder);
            let _ = printer.await;
            print_json(&outcome?)?;
        }
        Commands::Resume { project, modules } => {
            let outcome = service.run_additional(&project, &modules).await?;
            print_json(&outcome)?;
        }
        Commands::Show { project } => {
            let project: Project = service.project(&project)?;
            print_json(project.state())?;
        }
        Commands::Projects => print_json(&service.history()?)?,
        Commands::Delete { project } => {
            service.delete(&project)?;
            println!("Deleted {}", project);
        }
    }
    Ok(())
}
