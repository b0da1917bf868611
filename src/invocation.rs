//! Invocation descriptions submitted to a [`Session`](crate::Session).
//!
//! An [`InvocationSpec`] is immutable once built. Path tokens in the command
//! are rendered relative to the working directory and double as the
//! invocation's explicit inputs.

use crate::key::InvocationKey;
use crate::paths::relative_to;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One token of a command line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandPart {
    /// Inserted verbatim. May hold several shell words.
    Text(String),
    /// A file the command reads or writes.
    Path { path: PathBuf },
}

impl CommandPart {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        CommandPart::Path { path: path.into() }
    }

    fn render(&self, working_dir: &Path) -> String {
        match self {
            CommandPart::Text(text) => text.clone(),
            CommandPart::Path { path } => relative_to(path, working_dir).to_string_lossy().to_string(),
        }
    }
}

impl From<&str> for CommandPart {
    fn from(value: &str) -> Self {
        CommandPart::Text(value.to_string())
    }
}

impl From<String> for CommandPart {
    fn from(value: String) -> Self {
        CommandPart::Text(value)
    }
}

impl From<PathBuf> for CommandPart {
    fn from(value: PathBuf) -> Self {
        CommandPart::Path { path: value }
    }
}

impl From<&Path> for CommandPart {
    fn from(value: &Path) -> Self {
        CommandPart::Path {
            path: value.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationSpec {
    parts: Vec<CommandPart>,
    working_dir: PathBuf,
    description: Option<String>,
    inputs: Vec<PathBuf>,
    check_hash: Vec<PathBuf>,
    extra_deps: Vec<PathBuf>,
    command: String,
    key: InvocationKey,
}

impl InvocationSpec {
    pub fn builder(working_dir: impl Into<PathBuf>) -> InvocationBuilder {
        InvocationBuilder {
            parts: Vec::new(),
            working_dir: working_dir.into(),
            description: None,
            inputs: Vec::new(),
            check_hash: Vec::new(),
            extra_deps: Vec::new(),
        }
    }

    pub fn parts(&self) -> &[CommandPart] {
        &self.parts
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Every path token of the command, then any inputs added explicitly.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn check_hash(&self) -> &[PathBuf] {
        &self.check_hash
    }

    pub fn extra_deps(&self) -> &[PathBuf] {
        &self.extra_deps
    }

    /// The command line handed to the shell.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn key(&self) -> &InvocationKey {
        &self.key
    }

    /// Description for logs and trace events, falling back to the command.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }

    /// `path` relative to the working directory, for log messages.
    pub fn display_path(&self, path: &Path) -> String {
        relative_to(path, &self.working_dir).display().to_string()
    }
}

pub struct InvocationBuilder {
    parts: Vec<CommandPart>,
    working_dir: PathBuf,
    description: Option<String>,
    inputs: Vec<PathBuf>,
    check_hash: Vec<PathBuf>,
    extra_deps: Vec<PathBuf>,
}

impl InvocationBuilder {
    pub fn arg(mut self, part: impl Into<CommandPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn args<I, P>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<CommandPart>,
    {
        self.parts.extend(parts.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Track `path` as an input without putting it on the command line.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    pub fn check_hash(mut self, path: impl Into<PathBuf>) -> Self {
        self.check_hash.push(path.into());
        self
    }

    pub fn extra_deps<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.extra_deps.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> InvocationSpec {
        let command = self
            .parts
            .iter()
            .map(|part| part.render(&self.working_dir))
            .collect::<Vec<_>>()
            .join(" ");
        let key = InvocationKey::derive(&command, &self.working_dir);

        let mut inputs: Vec<PathBuf> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                CommandPart::Path { path } => Some(path.clone()),
                CommandPart::Text(_) => None,
            })
            .collect();
        inputs.extend(self.inputs);

        InvocationSpec {
            parts: self.parts,
            working_dir: self.working_dir,
            description: self.description,
            inputs,
            check_hash: self.check_hash,
            extra_deps: self.extra_deps,
            command,
            key,
        }
    }
}
