//! Dependency Pipeline: preprocess, compile and archive requests turned into
//! command invocations.
//!
//! Every operation builds exactly one [`InvocationSpec`] and submits it to the
//! session. The compiler's own dependency files feed the staleness check of
//! the next build through the spec's extra dependencies.

use crate::depfile;
use crate::error::{BuildError, Result};
use crate::executor::Outcome;
use crate::invocation::InvocationSpec;
use crate::paths::{relative_to, resolve};
use crate::session::Session;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// C toolchain used for every invocation of a [`Compiler`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub cc: String,
    pub ar: String,
    pub cflags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            cc: "cc".to_string(),
            ar: "ar".to_string(),
            cflags: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Compiler {
    session: Arc<Session>,
    toolchain: Toolchain,
    source_root: PathBuf,
    build_dir: PathBuf,
}

impl Compiler {
    pub fn new(
        session: Arc<Session>,
        toolchain: Toolchain,
        source_root: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            toolchain,
            source_root: source_root.into(),
            build_dir: build_dir.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub async fn preprocess(&self, source: &Path, output: &Path, flags: &[String]) -> Result<Outcome> {
        let spec = self.preprocess_spec(source, output, flags)?;
        self.session.run_command(&spec).await
    }

    pub async fn compile(&self, source: &Path, output: &Path, flags: &[String]) -> Result<Outcome> {
        let spec = self.compile_spec(source, output, flags)?;
        self.session.run_command(&spec).await
    }

    pub async fn archive(&self, objects: &[PathBuf], output: &Path) -> Result<Outcome> {
        let spec = self.archive_spec(objects, output)?;
        self.session.run_command(&spec).await
    }

    /// `cc -E` with a depfile next to the output. The output is hash-checked
    /// since preprocessing often reproduces identical text.
    pub fn preprocess_spec(&self, source: &Path, output: &Path, flags: &[String]) -> Result<InvocationSpec> {
        let (source, output) = self.locate(source, output)?;
        let mut depfile_name = output.file_name().unwrap_or_default().to_os_string();
        depfile_name.push(".d");
        let depfile = output.with_file_name(depfile_name);
        let extra_deps = depfile::read_extra_deps(&depfile, &self.source_root)?;
        let (src_label, out_label) = self.describe(&source, &output);

        Ok(InvocationSpec::builder(&self.source_root)
            .arg(self.toolchain.cc.as_str())
            .args(["-E", "-MMD", "-MF"])
            .arg(depfile)
            .arg("-c")
            .arg(source)
            .args(self.toolchain.cflags.iter().map(String::as_str))
            .args(flags.iter().map(String::as_str))
            .arg("-o")
            .arg(output.clone())
            .description(format!("Preprocess {} -> {}", src_label, out_label))
            .check_hash(output)
            .extra_deps(extra_deps)
            .build())
    }

    /// `cc -MMD -c`. Headers listed in the previous run's depfile become
    /// extra dependencies.
    pub fn compile_spec(&self, source: &Path, output: &Path, flags: &[String]) -> Result<InvocationSpec> {
        let (source, output) = self.locate(source, output)?;
        let extra_deps = depfile::read_extra_deps(&output.with_extension("d"), &self.source_root)?;
        let (src_label, out_label) = self.describe(&source, &output);

        Ok(InvocationSpec::builder(&self.source_root)
            .arg(self.toolchain.cc.as_str())
            .args(self.toolchain.cflags.iter().map(String::as_str))
            .args(["-MMD", "-c"])
            .arg(source)
            .args(flags.iter().map(String::as_str))
            .arg("-o")
            .arg(output)
            .description(format!("Compile {} -> {}", src_label, out_label))
            .extra_deps(extra_deps)
            .build())
    }

    /// `ar rvs` reading the object list from a file, so long object lists
    /// never hit command-line limits. Any changed object forces a re-archive.
    pub fn archive_spec(&self, objects: &[PathBuf], output: &Path) -> Result<InvocationSpec> {
        let output = resolve(&self.build_dir, output);
        create_parent(&output)?;
        let objects: Vec<PathBuf> = objects.iter().map(|o| resolve(&self.build_dir, o)).collect();

        let mut list_name = output.file_name().unwrap_or_default().to_os_string();
        list_name.push(".input_files");
        let list = output.with_file_name(list_name);
        let content = objects
            .iter()
            .map(|o| o.to_string_lossy().replace('\\', "/"))
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&list, content).map_err(|e| BuildError::io(&list, "write", e))?;

        Ok(InvocationSpec::builder(&self.source_root)
            .arg(self.toolchain.ar.as_str())
            .arg("rvs")
            .arg(output.clone())
            .arg(format!("@{}", list.display()))
            .description(format!(
                "Create archive {}",
                relative_to(&output, &self.source_root).display()
            ))
            .extra_deps(objects)
            .build())
    }

    fn locate(&self, source: &Path, output: &Path) -> Result<(PathBuf, PathBuf)> {
        let source = resolve(&self.source_root, source);
        let output = resolve(&self.build_dir, output);
        create_parent(&output)?;
        Ok((source, output))
    }

    fn describe(&self, source: &Path, output: &Path) -> (String, String) {
        (
            relative_to(source, &self.source_root).display().to_string(),
            relative_to(output, &self.build_dir).display().to_string(),
        )
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, "create directory", e))
        }
        _ => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    // Field order matters: the session flushes into `_dir` when dropped.
    struct Fixture {
        compiler: Compiler,
        root: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("src");
        fs::create_dir_all(&root).unwrap();
        let session = Arc::new(Session::open(SessionConfig::new(dir.path().join("state"))).unwrap());
        let toolchain = Toolchain {
            cc: "arm-none-eabi-gcc".into(),
            ar: "arm-none-eabi-ar".into(),
            cflags: vec!["-Os".into()],
        };
        let compiler = Compiler::new(session, toolchain, &root, dir.path().join("build"));
        Fixture {
            compiler,
            root,
            _dir: dir,
        }
    }

    #[test]
    fn test_compile_command_and_description() {
        let fx = fixture();
        let spec = fx
            .compiler
            .compile_spec(Path::new("main.c"), Path::new("obj/main.o"), &["-Iinclude".into()])
            .unwrap();
        assert_eq!(
            spec.command(),
            "arm-none-eabi-gcc -Os -MMD -c main.c -Iinclude -o ../build/obj/main.o"
        );
        assert_eq!(spec.description(), Some("Compile main.c -> obj/main.o"));
        assert!(fx.compiler.build_dir().join("obj").is_dir());
        assert!(spec.extra_deps().is_empty());
    }

    #[test]
    fn test_compile_reads_previous_depfile() {
        let fx = fixture();
        let obj_dir = fx.compiler.build_dir().join("obj");
        fs::create_dir_all(&obj_dir).unwrap();
        fs::write(obj_dir.join("main.d"), "obj/main.o: main.c include/board.h \\\n /usr/include/stdio.h\n").unwrap();

        let spec = fx
            .compiler
            .compile_spec(Path::new("main.c"), Path::new("obj/main.o"), &[])
            .unwrap();
        assert_eq!(
            spec.extra_deps(),
            &[
                fx.root.join("main.c"),
                fx.root.join("include/board.h"),
                PathBuf::from("/usr/include/stdio.h"),
            ]
        );
    }

    #[test]
    fn test_preprocess_hash_checks_output() {
        let fx = fixture();
        let spec = fx
            .compiler
            .preprocess_spec(Path::new("qstr.c"), Path::new("genhdr/qstr.i"), &[])
            .unwrap();
        let output = fx.compiler.build_dir().join("genhdr/qstr.i");
        assert_eq!(spec.check_hash(), &[output]);
        assert!(spec.command().contains("-E -MMD -MF ../build/genhdr/qstr.i.d -c qstr.c -Os"));
        assert_eq!(spec.description(), Some("Preprocess qstr.c -> genhdr/qstr.i"));
    }

    #[test]
    fn test_archive_writes_object_list() {
        let fx = fixture();
        let objects = vec![PathBuf::from("obj/a.o"), PathBuf::from("obj/b.o")];
        let spec = fx
            .compiler
            .archive_spec(&objects, Path::new("libapp.a"))
            .unwrap();

        let build = fx.compiler.build_dir();
        let list = fs::read_to_string(build.join("libapp.a.input_files")).unwrap();
        assert_eq!(
            list,
            format!("{}\n{}", build.join("obj/a.o").display(), build.join("obj/b.o").display())
        );
        assert_eq!(spec.extra_deps(), &[build.join("obj/a.o"), build.join("obj/b.o")]);
        assert!(spec.command().starts_with("arm-none-eabi-ar rvs ../build/libapp.a @"));
        assert_eq!(spec.description(), Some("Create archive ../build/libapp.a"));
    }
}
