//! Path helpers shared by command rendering and staleness checks.

use filetime::FileTime;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Express `path` relative to `base`, walking up with `..` when `path` is not
/// below `base`. Mixed absolute/relative inputs are returned unchanged.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() != base.is_absolute() {
        return path.to_path_buf();
    }

    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // Different roots (e.g. two Windows drives) cannot be bridged.
    if common == 0 && path.is_absolute() {
        return path.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for part in &base_parts[common..] {
        if !matches!(part, Component::CurDir) {
            relative.push("..");
        }
    }
    for part in &path_parts[common..] {
        relative.push(part.as_os_str());
    }

    if relative.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        relative
    }
}

/// Modification time in nanoseconds since the Unix epoch. Directories report
/// 0 so that writing into a directory never makes an invocation stale.
/// `None` when the path does not exist.
pub fn mtime_ns(path: &Path) -> Option<u64> {
    let meta = fs::metadata(path).ok()?;
    if meta.is_dir() {
        return Some(0);
    }
    Some(filetime_ns(FileTime::from_last_modification_time(&meta)))
}

pub(crate) fn filetime_ns(time: FileTime) -> u64 {
    let seconds = time.unix_seconds().max(0) as u64;
    seconds
        .saturating_mul(1_000_000_000)
        .saturating_add(u64::from(time.nanoseconds()))
}

/// Join `path` onto `root` unless it is already absolute.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_below_base() {
        assert_eq!(
            relative_to(Path::new("/src/py/gen.py"), Path::new("/src")),
            PathBuf::from("py/gen.py")
        );
    }

    #[test]
    fn test_relative_walks_up() {
        assert_eq!(
            relative_to(Path::new("/build/genhdr/a.h"), Path::new("/src/ports/zephyr")),
            PathBuf::from("../../../build/genhdr/a.h")
        );
    }

    #[test]
    fn test_relative_same_dir() {
        assert_eq!(
            relative_to(Path::new("/src"), Path::new("/src")),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_relative_mixed_kinds_untouched() {
        assert_eq!(
            relative_to(Path::new("a/b.c"), Path::new("/src")),
            PathBuf::from("a/b.c")
        );
    }

    #[test]
    fn test_mtime_of_directory_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(mtime_ns(dir.path()), Some(0));
        assert_eq!(mtime_ns(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_mtime_matches_filetime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.c");
        fs::write(&file, "int x;").unwrap();
        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 250)).unwrap();
        assert_eq!(mtime_ns(&file), Some(1_700_000_000_000_000_250));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve(Path::new("/src"), Path::new("a.c")),
            PathBuf::from("/src/a.c")
        );
        assert_eq!(
            resolve(Path::new("/src"), Path::new("/abs/a.c")),
            PathBuf::from("/abs/a.c")
        );
    }
}
