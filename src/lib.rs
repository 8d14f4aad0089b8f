#![forbid(unsafe_code)]
//! rct: toolchain test runner
//!
//! Drives every registered test through compile → assemble → link → execute with external tools, compares the
//! program's output with its golden value, and reports one outcome per test. The pure model and the outcome
//! classifier live in `rct_core`; this crate adds everything that touches processes, files and the terminal.
//!
//! ## Modules
//!
//! - `config` - run configuration, tool locations, suite layout
//! - `registry` - persisted test definitions
//! - `artifacts` - per-test artifact namespaces
//! - `process` - child processes with timeouts, process-group kill and cancellation
//! - `backend` - the interpreter and virtual machine execution strategies
//! - `pipeline` - the per-test stage driver
//! - `runner` - bounded worker pool and result aggregation
//! - `reporter` - console output
//! - `cli` - command-line surface
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **External tools**: A crashing, hanging or missing tool is a test result, never a panic in the runner.

pub mod artifacts;
pub mod backend;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod reporter;
pub mod runner;
pub mod version;

pub use backend::{Backend, BfBackend, RvmBackend, Toolchain, backend_for};
pub use config::{BackendKind, RunConfig, SuiteLayout, ToolPaths};
pub use pipeline::Pipeline;
pub use registry::Registry;
pub use runner::{Plan, Runner, Selection};
