//! Stable identity for a unit of work.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// SHA-256 over the rendered command text and the working directory.
///
/// The key doubles as the Build-Time Store key, so it must not depend on
/// anything that changes between runs of the tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationKey(String);

impl InvocationKey {
    pub fn derive(command: &str, working_dir: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(command.as_bytes());
        hasher.update(working_dir.to_string_lossy().as_bytes());
        InvocationKey(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InvocationKey {
    fn from(value: String) -> Self {
        InvocationKey(value)
    }
}
