use crate::compiler::Toolchain;
use crate::invocation::{CommandPart, InvocationSpec};
use crate::paths::resolve;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `cinder.toml`.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct CinderConfig {
    /// Local gate capacity when no jobserver is advertised.
    pub jobs: Option<usize>,
    #[serde(default)]
    pub toolchain: Toolchain,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepConfig>,
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub source: PathBuf,
    pub build: PathBuf,
    /// Defaults to the build directory.
    pub state: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            build: PathBuf::from("build"),
            state: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct StepConfig {
    #[serde(default)]
    pub stage: u32,
    pub description: Option<String>,
    pub command: Vec<CommandPart>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub check_hash: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LibraryConfig {
    pub output: PathBuf,
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub preprocess: bool,
}

/// A parsed `cinder.toml` together with the directory it was found in.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: CinderConfig,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, config: CinderConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn source_root(&self) -> PathBuf {
        resolve(&self.root, &self.config.paths.source)
    }

    pub fn build_dir(&self) -> PathBuf {
        resolve(&self.root, &self.config.paths.build)
    }

    pub fn state_dir(&self) -> PathBuf {
        match &self.config.paths.state {
            Some(state) => resolve(&self.root, state),
            None => self.build_dir(),
        }
    }

    /// Resolve a path written in `cinder.toml`.
    pub fn path(&self, path: &Path) -> PathBuf {
        resolve(&self.root, path)
    }

    pub fn step_spec(&self, step: &StepConfig) -> InvocationSpec {
        let source_root = self.source_root();
        let working_dir = match &step.cwd {
            Some(cwd) => resolve(&source_root, cwd),
            None => source_root,
        };

        let parts = step.command.iter().map(|part| match part {
            CommandPart::Path { path } => CommandPart::path(self.path(path)),
            text => text.clone(),
        });
        let mut builder = InvocationSpec::builder(working_dir).args(parts);
        if let Some(description) = &step.description {
            builder = builder.description(description.as_str());
        }
        for input in &step.inputs {
            builder = builder.input(self.path(input));
        }
        for output in &step.check_hash {
            builder = builder.check_hash(self.path(output));
        }
        builder.build()
    }
}
