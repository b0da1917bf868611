//! Make-style dependency files as written by `cc -MMD` / `-MF`.
//!
//! Only the prerequisite paths matter here. Rule targets (tokens ending in
//! `:`) and bare `\` continuation markers are skipped.

use crate::error::{BuildError, Result};
use crate::paths::resolve;
use std::fs;
use std::path::{Path, PathBuf};

/// What to do with an entry that is not an absolute path.
#[derive(Debug, Clone, Copy)]
enum Relative<'a> {
    Reject,
    ResolveAgainst(&'a Path),
}

fn parse(content: &str, origin: &Path, relative: Relative<'_>) -> Result<Vec<PathBuf>> {
    let mut deps = Vec::new();
    for entry in content.split_whitespace() {
        if entry == "\\" || entry.ends_with(':') {
            continue;
        }
        let path = Path::new(entry);
        if path.is_absolute() {
            deps.push(path.to_path_buf());
            continue;
        }
        match relative {
            Relative::ResolveAgainst(root) => deps.push(resolve(root, path)),
            Relative::Reject => {
                return Err(BuildError::DepfileFormat {
                    path: origin.to_path_buf(),
                    entry: entry.to_string(),
                });
            }
        }
    }
    Ok(deps)
}

/// Parse `content` where every prerequisite must be absolute.
pub fn parse_strict(content: &str, origin: &Path) -> Result<Vec<PathBuf>> {
    parse(content, origin, Relative::Reject)
}

/// Read the depfile at `path` if it exists, resolving relative entries
/// against `root`. A missing depfile simply means no extra dependencies yet.
pub fn read_extra_deps(path: &Path, root: &Path) -> Result<Vec<PathBuf>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BuildError::io(path, "read", e)),
    };
    parse(&content, path, Relative::ResolveAgainst(root))
}

/// Read and strictly parse the depfile at `path`.
pub fn read_strict(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path).map_err(|e| BuildError::io(path, "read", e))?;
    parse_strict(&content, path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const DEPFILE: &str = "build/main.o: /src/main.c \\\n /src/include/board.h \\\n /usr/include/stdint.h\n";

    #[test]
    fn test_strict_skips_targets_and_continuations() {
        let deps = parse_strict(DEPFILE, Path::new("build/main.d")).unwrap();
        assert_eq!(
            deps,
            vec![
                PathBuf::from("/src/main.c"),
                PathBuf::from("/src/include/board.h"),
                PathBuf::from("/usr/include/stdint.h"),
            ]
        );
    }

    #[test]
    fn test_strict_rejects_relative_entries() {
        let err = parse_strict("a.o: a.c ../inc/a.h\n", Path::new("a.d")).unwrap_err();
        match err {
            BuildError::DepfileFormat { entry, .. } => assert_eq!(entry, "a.c"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_extra_deps_resolve_against_root() {
        let dir = tempfile::tempdir().unwrap();
        let depfile = dir.path().join("main.d");
        fs::write(&depfile, "main.o: main.c \\\n  /opt/sdk/include/sdk.h\n").unwrap();

        let deps = read_extra_deps(&depfile, Path::new("/src")).unwrap();
        assert_eq!(
            deps,
            vec![
                PathBuf::from("/src/main.c"),
                PathBuf::from("/opt/sdk/include/sdk.h"),
            ]
        );
    }

    #[test]
    fn test_missing_depfile_has_no_deps() {
        let dir = tempfile::tempdir().unwrap();
        let deps = read_extra_deps(&dir.path().join("never.d"), dir.path()).unwrap();
        assert!(deps.is_empty());
    }
}
