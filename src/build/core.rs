use super::utils::{collect_sources, object_path};
use crate::compiler::Compiler;
use crate::config::{LibraryConfig, Project, StepConfig};
use crate::error::{BuildError, Result};
use crate::group::TaskGroup;
use crate::session::Session;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

// --- CORE: Build Project ---
/// Run every step stage in order, then all libraries concurrently.
pub async fn build_project(project: &Project, session: Arc<Session>) -> Result<()> {
    run_steps(project, &session).await?;

    let compiler = Compiler::new(
        Arc::clone(&session),
        project.config.toolchain.clone(),
        project.source_root(),
        project.build_dir(),
    );

    let mut group = TaskGroup::new();
    for library in &project.config.libraries {
        let compiler = compiler.clone();
        let output = project.path(&library.output);
        let sources = collect_sources(project, &library.sources);
        let objects: Vec<(PathBuf, PathBuf)> = sources
            .into_iter()
            .map(|source| {
                let object = object_path(project, &library.output, &source);
                (source, object)
            })
            .collect();
        group.spawn(build_library(compiler, library.clone(), objects, output));
    }
    group.join().await
}

async fn run_steps(project: &Project, session: &Arc<Session>) -> Result<()> {
    let mut stages: BTreeMap<u32, Vec<&StepConfig>> = BTreeMap::new();
    for step in &project.config.steps {
        stages.entry(step.stage).or_default().push(step);
    }

    for (stage, steps) in stages {
        debug!("Running stage {} ({} step(s))", stage, steps.len());
        let mut group = TaskGroup::new();
        for step in steps {
            let session = Arc::clone(session);
            let spec = project.step_spec(step);
            group.spawn(async move { session.run_command(&spec).await });
        }
        group.join().await?;
    }
    Ok(())
}

async fn build_library(
    compiler: Compiler,
    library: LibraryConfig,
    objects: Vec<(PathBuf, PathBuf)>,
    output: PathBuf,
) -> Result<()> {
    if objects.is_empty() {
        info!("No sources for {}", output.display());
        return Ok(());
    }

    let flags = Arc::new(library.flags);
    let mut group = TaskGroup::new();
    for (source, object) in &objects {
        if library.preprocess {
            let compiler = compiler.clone();
            let flags = Arc::clone(&flags);
            let (source, preprocessed) = (source.clone(), object.with_extension("pp"));
            group.spawn(async move { compiler.preprocess(&source, &preprocessed, &flags).await });
        }
        let compiler = compiler.clone();
        let flags = Arc::clone(&flags);
        let (source, object) = (source.clone(), object.clone());
        group.spawn(async move { compiler.compile(&source, &object, &flags).await });
    }
    group.join().await?;

    let objects: Vec<PathBuf> = objects.into_iter().map(|(_, object)| object).collect();
    compiler.archive(&objects, &output).await?;
    Ok(())
}

/// Number of failures behind a build result; what the process exits with.
pub fn failure_count(result: &Result<()>) -> usize {
    match result {
        Ok(()) => 0,
        Err(BuildError::Cancelled) => 1,
        Err(e) => e.failure_count(),
    }
}
