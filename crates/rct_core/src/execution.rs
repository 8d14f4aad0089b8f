//! Raw results produced by the pipeline, before classification.

use std::path::PathBuf;

use crate::messages::PROVENANCE_SENTINEL;
use crate::stage::Stage;

/// Captured result of the Execute stage.
///
/// `stdout` is the exact program output, replacement-decoded when it is not valid UTF-8. It is never trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    /// `None` when the process was killed (timeout, cancellation) or terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Carried over unchanged from the compile stage.
    pub provenance_warning: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// A stage that exited non-zero or ran past its budget. Later stages were not invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub provenance_warning: bool,
}

/// Everything a pipeline run can end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// The test's source file does not exist; nothing was invoked.
    SourceMissing { path: PathBuf },
    StageFailed(StageFailure),
    /// Compile-only run (known failures) finished successfully.
    Compiled { provenance_warning: bool },
    Executed(ExecutionResult),
    /// The run was cancelled before or during this test.
    Cancelled,
}

impl PipelineResult {
    pub fn provenance_warning(&self) -> bool {
        match self {
            PipelineResult::StageFailed(failure) => failure.provenance_warning,
            PipelineResult::Compiled { provenance_warning } => *provenance_warning,
            PipelineResult::Executed(result) => result.provenance_warning,
            PipelineResult::SourceMissing { .. } | PipelineResult::Cancelled => false,
        }
    }
}

/// Decode captured bytes as UTF-8, replacing invalid sequences with U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Whether compiler output contains the pointer-provenance sentinel line.
pub fn has_provenance_warning(text: &str) -> bool {
    text.contains(PROVENANCE_SENTINEL)
}
