//! # cinder - Incremental Build Orchestrator
//!
//! cinder runs the commands of a large native build (generators, preprocess,
//! compile, archive) and only re-runs what changed. It cooperates with an
//! enclosing `make -jN` through the jobserver FIFO.
//!
//! ## Features
//!
//! - **Deduplication**: identical commands submitted concurrently run once
//! - **Staleness**: per-command build records keyed by command text, plus
//!   compiler depfiles for headers
//! - **Hash Stability**: regenerated files with identical content keep their
//!   old timestamps
//! - **Bounded Parallelism**: local job slots or GNU make jobserver tokens
//! - **Tracing**: a Chrome trace of every executed command
//!
//! ## Module Organization
//!
//! - [`session`] - Process-scoped state with an open/close lifecycle
//! - [`executor`] - Running command and function invocations
//! - [`compiler`] - Preprocess/compile/archive façade
//! - [`gate`] - Job tokens
//! - [`build`] - The `cinder.toml` driver

/// `cinder.toml` driver used by the CLI.
pub mod build;

/// Preprocess, compile and archive invocations.
pub mod compiler;

/// Configuration file parsing (`cinder.toml`).
pub mod config;

/// In-memory deduplication of identical invocations.
pub mod dedup;

/// Make-style dependency file parsing.
pub mod depfile;

/// Error taxonomy.
pub mod error;

/// Invocation execution and bookkeeping.
pub mod executor;

/// Concurrency gate: local slots or jobserver tokens.
pub mod gate;

/// Task groups with cooperative cancellation.
pub mod group;

/// Invocation descriptions.
pub mod invocation;

/// Invocation identity.
pub mod key;

/// Path rendering and mtimes.
pub mod paths;

/// Process-scoped orchestrator state.
pub mod session;

/// Hash-stability snapshots.
pub mod snapshot;

/// Skip-or-run decisions.
pub mod staleness;

/// Persisted build times.
pub mod store;

/// Chrome trace recording.
pub mod trace;

pub use compiler::{Compiler, Toolchain};
pub use error::{BuildError, Result};
pub use executor::Outcome;
pub use group::{CancelToken, TaskGroup};
pub use invocation::{CommandPart, InvocationSpec};
pub use key::InvocationKey;
pub use session::{Session, SessionConfig};
