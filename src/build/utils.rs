use crate::config::{CinderConfig, Project};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const CONFIG_FILE: &str = "cinder.toml";

// --- Helper: Load Config ---
/// Load `cinder.toml` from `path`, or from the current directory when `None`.
pub fn load_config(path: Option<&Path>) -> Result<Project> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(CONFIG_FILE),
    };
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "{} not found.\n\n\
            💡 Tip: Run cinder from the project root or pass --config <path>.",
            path.display()
        ));
    }
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {} - check file permissions", path.display()))?;
    let config: CinderConfig = toml::from_str(&config_str).with_context(|| {
        format!(
            "Failed to parse {} - check for syntax errors (missing quotes, brackets)",
            path.display()
        )
    })?;

    let path = fs::canonicalize(&path).with_context(|| format!("Failed to resolve {}", path.display()))?;
    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(Project::new(root, config))
}

// --- Helper: Collect Sources ---
/// Expand library sources: files are kept, directories are walked for C and
/// assembly sources. The result is sorted so object order is stable.
pub fn collect_sources(project: &Project, sources: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for source in sources {
        let source = project.path(source);
        if !source.is_dir() {
            files.push(source);
            continue;
        }
        for entry in WalkDir::new(&source).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if let Some(ext) = path.extension() {
                let s = ext.to_string_lossy();
                if ["c", "s", "S"].contains(&s.as_ref()) {
                    files.push(path.to_owned());
                }
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Where the object for `source` goes: below `<build>/obj/<library stem>/`,
/// mirroring the source's place under the source root. Sources outside the
/// root are mirrored by their full path under `ext/`. The object name keeps
/// the source extension (`a.c` -> `a.c.o`) so `a.c` and `a.S` never share one.
pub fn object_path(project: &Project, library: &Path, source: &Path) -> PathBuf {
    let source_root = project.source_root();
    let below_root = match source.strip_prefix(&source_root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => Path::new("ext").join(
            source
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect::<PathBuf>(),
        ),
    };
    let stem = library
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "lib".to_string());

    let mut object = project
        .build_dir()
        .join("obj")
        .join(stem)
        .join(below_root)
        .into_os_string();
    object.push(".o");
    PathBuf::from(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(root: &Path) -> Project {
        Project::new(root, toml::from_str("").unwrap())
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join(CONFIG_FILE))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_config_roots_project_at_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "jobs = 2\n").unwrap();
        let project = load_config(Some(&path)).unwrap();
        assert_eq!(project.root, fs::canonicalize(dir.path()).unwrap());
        assert_eq!(project.config.jobs, Some(2));
    }

    #[test]
    fn test_collect_sources_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("hal")).unwrap();
        fs::write(src.join("main.c"), "").unwrap();
        fs::write(src.join("hal/start.S"), "").unwrap();
        fs::write(src.join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("extra.c"), "").unwrap();

        let files = collect_sources(
            &project(dir.path()),
            &[PathBuf::from("src"), PathBuf::from("extra.c")],
        );
        assert_eq!(
            files,
            vec![
                dir.path().join("extra.c"),
                src.join("hal/start.S"),
                src.join("main.c"),
            ]
        );
    }

    #[test]
    fn test_object_path_mirrors_source_tree() {
        let project = project(Path::new("/proj"));
        let object = object_path(
            &project,
            Path::new("build/libapp.a"),
            &project.source_root().join("src/hal/start.S"),
        );
        assert_eq!(object, PathBuf::from("/proj/build/obj/libapp/src/hal/start.S.o"));
    }

    #[test]
    fn test_object_path_keeps_sources_apart() {
        let project = project(Path::new("/proj"));
        let library = Path::new("build/libapp.a");
        let c = object_path(&project, library, Path::new("/proj/src/a.c"));
        let asm = object_path(&project, library, Path::new("/proj/src/a.S"));
        assert_ne!(c, asm);
        assert_eq!(c, PathBuf::from("/proj/build/obj/libapp/src/a.c.o"));

        // Same file name in two directories outside the source root.
        let one = object_path(&project, library, Path::new("/vendor/one/util.c"));
        let two = object_path(&project, library, Path::new("/vendor/two/util.c"));
        assert_ne!(one, two);
        assert_eq!(one, PathBuf::from("/proj/build/obj/libapp/ext/vendor/one/util.c.o"));
    }
}
