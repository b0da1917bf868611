//! Build state cleanup.
//!
//! - `cinder clean` - Remove the build-time store and the trace
//! - `cinder clean --all` - Also remove the whole build directory

use crate::config::Project;
use crate::session::{STORE_FILE, TRACE_FILE};
use anyhow::{Context, Result};
use colored::*;
use std::fs;

pub fn clean(project: &Project, all: bool) -> Result<()> {
    let mut cleaned = false;

    // 1. State files (default)
    let state_dir = project.state_dir();
    for name in [STORE_FILE, TRACE_FILE] {
        let path = state_dir.join(name);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            cleaned = true;
        }
    }

    // 2. Everything under the build directory
    let build_dir = project.build_dir();
    if all && build_dir.exists() {
        fs::remove_dir_all(&build_dir)
            .with_context(|| format!("Failed to remove {}", build_dir.display()))?;
        println!("{} Removed {}", "🗑️".red(), build_dir.display());
        cleaned = true;
    }

    if cleaned {
        println!("{} Clean complete.", "✓".green());
    } else {
        println!("{} Nothing to clean", "!".yellow());
    }
    Ok(())
}
