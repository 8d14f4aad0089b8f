//! Provide the pure verification model shared by the rct engine and its tests.
//!
//! This crate is intentionally small and dependency-free. It describes *what* a toolchain test is and *how* a
//! finished pipeline run is judged, without knowing how stages are launched:
//! - the test data model (`TestCase`, `TestId`, `Category`),
//! - the stage results a pipeline produces (`Stage`, `ExecutionResult`, `PipelineResult`),
//! - the outcome classifier (`classify`), and
//! - run aggregation and exit-code policy (`RunSummary`, `ExitPolicy`).
//!
//! ## Notes
//!
//! - **No IO**: no filesystem, process, or clock access. Durations are supplied by the caller.
//! - **No global state**: every run-scoped counter lives in a `RunSummary` value owned by the caller.

pub mod case;
pub mod execution;
pub mod messages;
pub mod outcome;
pub mod stage;
pub mod summary;

pub use case::{Category, Group, TestCase, TestId, bare_name};
pub use execution::{ExecutionResult, PipelineResult, StageFailure, decode_lossy, has_provenance_warning};
pub use outcome::{FailureKind, Outcome, OutcomeKind, Verdict, classify};
pub use stage::Stage;
pub use summary::{ExitPolicy, FinishedRun, RunRecord, RunSummary};
