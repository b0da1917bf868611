//! Skip-or-run decision for a command invocation.
//!
//! An invocation is up to date when it has a build record, every input still
//! exists, the newest input is no newer than the record, and no extra
//! dependency is newer than the record either.

use crate::invocation::InvocationSpec;
use crate::paths::mtime_ns;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    Stale {
        reason: RunReason,
        /// Newest input mtime before running; 0 without a usable record.
        newest: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReason {
    NoPreviousBuild,
    InputMissing(String),
    Newer(String),
    /// Several inputs share the newest mtime.
    SeveralNewer(usize),
    ExtraDependencyMissing(String),
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunReason::NoPreviousBuild => write!(f, "no previous build time"),
            RunReason::InputMissing(path) => write!(f, "{} is missing", path),
            RunReason::Newer(path) => write!(f, "{} is newer", path),
            RunReason::SeveralNewer(count) => write!(f, "{} inputs are newer", count),
            RunReason::ExtraDependencyMissing(path) => write!(f, "{} is missing", path),
        }
    }
}

/// Newest mtime over `paths`, ignoring paths that do not exist.
pub fn newest_mtime<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> u64 {
    paths
        .into_iter()
        .filter_map(|p| mtime_ns(p))
        .max()
        .unwrap_or(0)
}

pub fn evaluate(spec: &InvocationSpec, recorded: Option<u64>) -> Staleness {
    let Some(recorded) = recorded else {
        return stale(RunReason::NoPreviousBuild, 0);
    };

    let mut mtimes = Vec::with_capacity(spec.inputs().len());
    for path in spec.inputs() {
        match mtime_ns(path) {
            Some(mtime) => mtimes.push((path, mtime)),
            None => return stale(RunReason::InputMissing(spec.display_path(path)), 0),
        }
    }

    let newest = mtimes.iter().map(|(_, mtime)| *mtime).max().unwrap_or(0);
    if newest > recorded {
        let at_newest: Vec<&PathBuf> = mtimes
            .iter()
            .filter(|(_, mtime)| *mtime == newest)
            .map(|(path, _)| *path)
            .collect();
        let reason = match at_newest.as_slice() {
            [only] => RunReason::Newer(spec.display_path(only)),
            several => RunReason::SeveralNewer(several.len()),
        };
        return stale(reason, newest);
    }

    for dep in spec.extra_deps() {
        match mtime_ns(dep) {
            Some(mtime) if mtime > recorded => {
                return stale(RunReason::Newer(spec.display_path(dep)), newest);
            }
            Some(_) => {}
            None => {
                return stale(
                    RunReason::ExtraDependencyMissing(spec.display_path(dep)),
                    newest,
                );
            }
        }
    }

    Staleness::UpToDate
}

fn stale(reason: RunReason, newest: u64) -> Staleness {
    Staleness::Stale { reason, newest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;
    use std::path::Path;

    const T0: i64 = 1_600_000_000;
    const NS: u64 = 1_000_000_000;

    fn file_at(dir: &Path, name: &str, seconds: i64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(seconds, 0)).unwrap();
        path
    }

    fn spec(dir: &Path, inputs: &[&PathBuf], deps: &[&PathBuf]) -> InvocationSpec {
        InvocationSpec::builder(dir)
            .arg("cc")
            .args(inputs.iter().map(|p| p.to_path_buf()))
            .extra_deps(deps.iter().map(|p| p.to_path_buf()))
            .build()
    }

    #[test]
    fn test_no_record_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0);
        assert_eq!(
            evaluate(&spec(dir.path(), &[&a], &[]), None),
            Staleness::Stale {
                reason: RunReason::NoPreviousBuild,
                newest: 0
            }
        );
    }

    #[test]
    fn test_unchanged_inputs_are_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0);
        let o = file_at(dir.path(), "a.o", T0 + 1);
        let recorded = (T0 as u64 + 1) * NS;
        assert_eq!(
            evaluate(&spec(dir.path(), &[&a, &o], &[]), Some(recorded)),
            Staleness::UpToDate
        );
    }

    #[test]
    fn test_newer_input_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0 + 5);
        let o = file_at(dir.path(), "a.o", T0);
        let verdict = evaluate(&spec(dir.path(), &[&a, &o], &[]), Some(T0 as u64 * NS));
        assert_eq!(
            verdict,
            Staleness::Stale {
                reason: RunReason::Newer("a.c".into()),
                newest: (T0 as u64 + 5) * NS
            }
        );
    }

    #[test]
    fn test_tied_newest_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0 + 5);
        let b = file_at(dir.path(), "b.c", T0 + 5);
        match evaluate(&spec(dir.path(), &[&a, &b], &[]), Some(T0 as u64 * NS)) {
            Staleness::Stale { reason, .. } => assert_eq!(reason, RunReason::SeveralNewer(2)),
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_input_forces_run() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0);
        let gone = dir.path().join("gone.o");
        match evaluate(&spec(dir.path(), &[&a, &gone], &[]), Some(u64::MAX)) {
            Staleness::Stale { reason, newest } => {
                assert_eq!(reason, RunReason::InputMissing("gone.o".into()));
                assert_eq!(newest, 0);
            }
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_dependency_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_at(dir.path(), "a.c", T0);
        let h = file_at(dir.path(), "a.h", T0 + 10);
        let recorded = T0 as u64 * NS;
        assert_eq!(
            evaluate(&spec(dir.path(), &[&a], &[&h]), Some(recorded)),
            Staleness::Stale {
                reason: RunReason::Newer("a.h".into()),
                newest: recorded
            }
        );
    }

    #[test]
    fn test_directories_count_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("genhdr");
        fs::create_dir(&sub).unwrap();
        assert_eq!(
            evaluate(&spec(dir.path(), &[&sub], &[]), Some(0)),
            Staleness::UpToDate
        );
    }
}
