//! # cinder CLI Entry Point
//!
//! Parses arguments with clap, installs the tracing subscriber and hands the
//! work to the library. The process exits with the number of failed
//! invocations (clamped to 255), so `0` means everything is up to date.
//!
//! ## Commands
//! - `build`: run the steps and libraries described by `cinder.toml`
//! - `exec`: submit a single command invocation
//! - `clean`: forget recorded build times

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cinder::build;
use cinder::depfile;
use cinder::{InvocationSpec, Session, SessionConfig, TaskGroup};

#[derive(Parser)]
#[command(name = "cinder")]
#[command(about = "Incremental build orchestrator with jobserver support", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project described by cinder.toml
    Build {
        /// Show commands and skip decisions
        #[arg(short, long)]
        verbose: bool,
        /// Local job slots when not running under make
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Path to cinder.toml [default: ./cinder.toml]
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one command, skipping it when nothing changed
    Exec {
        /// Show commands and skip decisions
        #[arg(short, long)]
        verbose: bool,
        /// Local job slots when not running under make
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Working directory [default: current directory]
        #[arg(short = 'C', long = "directory")]
        directory: Option<PathBuf>,
        /// Where build_times.json and trace.json live [default: working directory]
        #[arg(long)]
        state: Option<PathBuf>,
        /// Shown instead of the command in logs and the trace
        #[arg(long)]
        description: Option<String>,
        /// File the command reads or writes; checked for changes, not passed to the command
        #[arg(long = "input")]
        inputs: Vec<PathBuf>,
        /// Output whose timestamps are restored if its content is unchanged
        #[arg(long = "check-hash")]
        check_hash: Vec<PathBuf>,
        /// Extra dependency that forces a rerun when newer
        #[arg(long = "dep")]
        deps: Vec<PathBuf>,
        /// Make-style depfile whose (absolute) entries become dependencies
        #[arg(long)]
        depfile: Option<PathBuf>,
        /// Command tokens, joined with spaces and run through the shell
        #[arg(last = true, required = true)]
        tokens: Vec<String>,
    },
    /// Remove recorded build times and the trace
    Clean {
        /// Also remove the build directory
        #[arg(long)]
        all: bool,
        /// Path to cinder.toml [default: ./cinder.toml]
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("CINDER_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            verbose,
            jobs,
            config,
        } => {
            init_tracing(verbose);
            run_build(config, jobs).await
        }
        Commands::Exec {
            verbose,
            jobs,
            directory,
            state,
            description,
            inputs,
            check_hash,
            deps,
            depfile,
            tokens,
        } => {
            init_tracing(verbose);
            let request = ExecRequest {
                directory,
                state,
                description,
                inputs,
                check_hash,
                deps,
                depfile,
                tokens,
            };
            run_exec(request, jobs).await
        }
        Commands::Clean { all, config } => {
            init_tracing(false);
            build::load_config(config.as_deref())
                .and_then(|project| build::clean(&project, all))
                .map(|()| 0)
        }
    };

    match result {
        Ok(failures) => ExitCode::from(failures.min(255) as u8),
        Err(e) => {
            eprintln!("{} {:#}", "x".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run_build(config: Option<PathBuf>, jobs: Option<usize>) -> Result<usize> {
    let start_time = Instant::now();
    let project = build::load_config(config.as_deref())?;
    let jobs = jobs.or(project.config.jobs);
    let session = Arc::new(
        Session::open(SessionConfig::from_env(project.state_dir(), jobs))
            .context("Failed to open build session")?,
    );

    let result = build::build_project(&project, Arc::clone(&session)).await;
    session.close().context("Failed to save build state")?;

    let failures = build::failure_count(&result);
    report(failures, start_time);
    Ok(failures)
}

struct ExecRequest {
    directory: Option<PathBuf>,
    state: Option<PathBuf>,
    description: Option<String>,
    inputs: Vec<PathBuf>,
    check_hash: Vec<PathBuf>,
    deps: Vec<PathBuf>,
    depfile: Option<PathBuf>,
    tokens: Vec<String>,
}

async fn run_exec(request: ExecRequest, jobs: Option<usize>) -> Result<usize> {
    let start_time = Instant::now();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let working_dir = match request.directory {
        Some(dir) => cwd.join(dir),
        None => cwd.clone(),
    };
    let state_dir = request
        .state
        .map(|state| cwd.join(state))
        .unwrap_or_else(|| working_dir.clone());

    let mut deps: Vec<PathBuf> = request.deps.iter().map(|d| cwd.join(d)).collect();
    if let Some(path) = &request.depfile {
        deps.extend(depfile::read_strict(&cwd.join(path))?);
    }

    let mut builder = InvocationSpec::builder(&working_dir)
        .args(request.tokens)
        .extra_deps(deps);
    if let Some(description) = request.description {
        builder = builder.description(description);
    }
    for input in &request.inputs {
        builder = builder.input(cwd.join(input));
    }
    for output in &request.check_hash {
        builder = builder.check_hash(cwd.join(output));
    }
    let spec = builder.build();

    let session = Arc::new(
        Session::open(SessionConfig::from_env(state_dir, jobs))
            .context("Failed to open build session")?,
    );
    let mut group = TaskGroup::new();
    let worker = Arc::clone(&session);
    group.spawn(async move { worker.run_command(&spec).await });
    let result = group.join().await;
    session.close().context("Failed to save build state")?;

    let failures = build::failure_count(&result);
    report(failures, start_time);
    Ok(failures)
}

fn report(failures: usize, start_time: Instant) {
    let elapsed = start_time.elapsed().as_secs_f64();
    if failures == 0 {
        println!("{} Finished in {:.2}s", "✓".green(), elapsed);
    } else {
        println!(
            "{} {} invocation(s) failed after {:.2}s",
            "x".red(),
            failures,
            elapsed
        );
    }
}
