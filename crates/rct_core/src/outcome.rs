//! Outcome classification.
//!
//! [`classify`] is the single place that decides what a finished pipeline run means. It is a pure function of the
//! test definition and the raw [`PipelineResult`], so the same inputs always yield the same [`Verdict`].

use std::fmt;

use crate::case::{Category, TestCase};
use crate::execution::{ExecutionResult, PipelineResult, StageFailure};
use crate::messages;
use crate::stage::Stage;

/// Why a regular test failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The stage exited non-zero.
    Stage(Stage),
    /// The stage ran past its wall-clock budget and was killed.
    Timeout(Stage),
    /// The program ran cleanly but printed something other than the expected output.
    OutputMismatch,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Stage(stage) => write!(f, "{stage}"),
            FailureKind::Timeout(stage) => write!(f, "timeout ({stage})"),
            FailureKind::OutputMismatch => f.write_str("output mismatch"),
        }
    }
}

/// The definitive result of one test. Never mutated once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Passed,
    /// Output matched, but the compiler could not prove a pointer's storage class.
    PassedWithWarning,
    Failed(FailureKind),
    /// Output mismatch with the provenance warning raised; the warning is the likely cause.
    FailedWithWarningAnnotation,
    ExpectedFailure,
    UnexpectedPass,
    Skipped,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Passed => OutcomeKind::Passed,
            Outcome::PassedWithWarning => OutcomeKind::PassedWithWarning,
            Outcome::Failed(_) => OutcomeKind::Failed,
            Outcome::FailedWithWarningAnnotation => OutcomeKind::FailedWithWarningAnnotation,
            Outcome::ExpectedFailure => OutcomeKind::ExpectedFailure,
            Outcome::UnexpectedPass => OutcomeKind::UnexpectedPass,
            Outcome::Skipped => OutcomeKind::Skipped,
        }
    }

    /// Failed or FailedWithWarningAnnotation.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::FailedWithWarningAnnotation)
    }
}

/// Fieldless mirror of [`Outcome`] used as a counting key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeKind {
    Passed,
    PassedWithWarning,
    Failed,
    FailedWithWarningAnnotation,
    ExpectedFailure,
    UnexpectedPass,
    Skipped,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 7] = [
        OutcomeKind::Passed,
        OutcomeKind::PassedWithWarning,
        OutcomeKind::Failed,
        OutcomeKind::FailedWithWarningAnnotation,
        OutcomeKind::ExpectedFailure,
        OutcomeKind::UnexpectedPass,
        OutcomeKind::Skipped,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Passed => "passed",
            OutcomeKind::PassedWithWarning => "passed with warning",
            OutcomeKind::Failed => "failed",
            OutcomeKind::FailedWithWarningAnnotation => "failed with warning",
            OutcomeKind::ExpectedFailure => "expected failure",
            OutcomeKind::UnexpectedPass => "unexpected pass",
            OutcomeKind::Skipped => "skipped",
        }
    }
}

/// Classifier output: the outcome plus whatever the reporter needs to explain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub message: String,
    /// Raw stage diagnostics (usually stderr) for failures, uncleaned.
    pub detail: Option<String>,
    /// Captured program output, including partial output after a timeout.
    pub actual_output: Option<String>,
    /// Golden output, attached only for mismatches.
    pub expected_output: Option<String>,
}

impl Verdict {
    fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            detail: None,
            actual_output: None,
            expected_output: None,
        }
    }

    fn with_detail(mut self, detail: &str) -> Self {
        if !detail.trim().is_empty() {
            self.detail = Some(detail.to_string());
        }
        self
    }

    fn with_actual(mut self, actual: &str) -> Self {
        self.actual_output = Some(actual.to_string());
        self
    }
}

/// Map a test definition and its raw pipeline result to a verdict.
///
/// ## Notes
///
/// - Known failures never consult `expected`; only whether compilation failed or raised the provenance warning.
/// - Output comparison is exact. No trimming, no newline normalization.
/// - A non-zero exit from Execute and an Execute timeout are distinct failures.
pub fn classify(case: &TestCase, result: &PipelineResult) -> Verdict {
    match result {
        PipelineResult::SourceMissing { path } => Verdict::new(
            Outcome::Skipped,
            format!("{}: {}", messages::SOURCE_NOT_FOUND_MSG, path.display()),
        ),
        PipelineResult::Cancelled => Verdict::new(Outcome::Skipped, messages::CANCELLED_MSG),
        _ => match case.category {
            Category::KnownFailure => classify_known_failure(result),
            Category::Regular => classify_regular(case, result),
        },
    }
}

fn classify_known_failure(result: &PipelineResult) -> Verdict {
    match result {
        PipelineResult::StageFailed(failure) => {
            let message = if failure.timed_out {
                format!("Timed out during {} as expected", failure.stage)
            } else {
                messages::EXPECTED_COMPILE_FAILURE_MSG.to_string()
            };
            Verdict::new(Outcome::ExpectedFailure, message).with_detail(&failure.stderr)
        }
        other if other.provenance_warning() => {
            Verdict::new(Outcome::ExpectedFailure, messages::COMPILES_WITH_WARNING_MSG)
        }
        _ => Verdict::new(Outcome::UnexpectedPass, messages::UNEXPECTED_PASS_MSG),
    }
}

fn classify_regular(case: &TestCase, result: &PipelineResult) -> Verdict {
    match result {
        PipelineResult::StageFailed(failure) => stage_failure_verdict(failure),
        PipelineResult::Executed(execution) => execution_verdict(case, execution),
        // A compile-only run for a regular test means execution never happened.
        PipelineResult::Compiled { .. } => Verdict::new(
            Outcome::Failed(FailureKind::Stage(Stage::Execute)),
            messages::NOT_EXECUTED_MSG,
        ),
        PipelineResult::SourceMissing { .. } | PipelineResult::Cancelled => {
            Verdict::new(Outcome::Skipped, messages::CANCELLED_MSG)
        }
    }
}

fn stage_failure_verdict(failure: &StageFailure) -> Verdict {
    if failure.timed_out {
        return Verdict::new(
            Outcome::Failed(FailureKind::Timeout(failure.stage)),
            format!("Timeout during {}", failure.stage),
        )
        .with_detail(&failure.stderr)
        .with_actual(&failure.stdout);
    }

    let message = match failure.exit_code {
        Some(code) => format!("{} (exit code {code})", failure.stage.failure_label()),
        None => format!("{} (terminated by signal)", failure.stage.failure_label()),
    };
    let detail = if failure.stderr.trim().is_empty() { &failure.stdout } else { &failure.stderr };
    Verdict::new(Outcome::Failed(FailureKind::Stage(failure.stage)), message).with_detail(detail)
}

fn execution_verdict(case: &TestCase, execution: &ExecutionResult) -> Verdict {
    if execution.timed_out {
        return Verdict::new(
            Outcome::Failed(FailureKind::Timeout(Stage::Execute)),
            format!("Timeout during {}", Stage::Execute),
        )
        .with_detail(&execution.stderr)
        .with_actual(&execution.stdout);
    }

    if execution.exit_code != Some(0) {
        let message = match execution.exit_code {
            Some(code) => format!("{} (exit code {code})", Stage::Execute.failure_label()),
            None => format!("{} (terminated by signal)", Stage::Execute.failure_label()),
        };
        return Verdict::new(Outcome::Failed(FailureKind::Stage(Stage::Execute)), message)
            .with_detail(&execution.stderr)
            .with_actual(&execution.stdout);
    }

    let Some(expected) = case.expected.as_deref() else {
        return Verdict::new(Outcome::Passed, execution.stdout.clone()).with_actual(&execution.stdout);
    };

    if execution.stdout == expected {
        let verdict = if execution.provenance_warning {
            Verdict::new(Outcome::PassedWithWarning, messages::PROVENANCE_UNKNOWN_MSG)
        } else {
            Verdict::new(Outcome::Passed, "")
        };
        return verdict.with_actual(&execution.stdout);
    }

    let (outcome, message) = if execution.provenance_warning {
        (Outcome::FailedWithWarningAnnotation, messages::OUTPUT_MISMATCH_PROVENANCE_MSG)
    } else {
        (Outcome::Failed(FailureKind::OutputMismatch), messages::OUTPUT_MISMATCH_MSG)
    };
    let mut verdict = Verdict::new(outcome, message).with_actual(&execution.stdout);
    verdict.expected_output = Some(expected.to_string());
    verdict
}
