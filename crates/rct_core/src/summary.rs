//! Run aggregation and exit-code policy.
//!
//! A [`RunSummary`] is owned by exactly one consumer for the duration of a run. Workers never touch it; they send
//! finished [`RunRecord`]s to that consumer, which keeps the engine reentrant.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::case::{Category, TestCase};
use crate::outcome::{Outcome, OutcomeKind, Verdict};

/// One evaluated test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub case: TestCase,
    pub verdict: Verdict,
    pub duration: Duration,
}

impl RunRecord {
    pub fn outcome(&self) -> Outcome {
        self.verdict.outcome
    }
}

/// Whether known-failure regressions-in-reverse should fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitPolicy {
    /// Treat `UnexpectedPass` as a failing result.
    pub strict_known_failures: bool,
}

/// Incrementally built results of a run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    counts: BTreeMap<OutcomeKind, usize>,
    records: Vec<RunRecord>,
    not_found: Vec<String>,
    cancelled: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: RunRecord) {
        *self.counts.entry(record.outcome().kind()).or_insert(0) += 1;
        self.records.push(record);
    }

    /// Remember a requested name that resolved to no test.
    pub fn note_not_found(&mut self, name: impl Into<String>) {
        self.not_found.push(name.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Freeze the summary: order records for display and compute the exit code.
    pub fn finish(self, policy: ExitPolicy, elapsed: Duration) -> FinishedRun {
        let mut records = self.records;
        records.sort_by(|a, b| {
            (a.case.group(), &a.case.name, &a.case.id).cmp(&(b.case.group(), &b.case.name, &b.case.id))
        });

        let regular_failure = records
            .iter()
            .any(|r| r.case.category == Category::Regular && r.outcome().is_failure());
        let unexpected_pass = records.iter().any(|r| r.outcome() == Outcome::UnexpectedPass);
        let failed = regular_failure || self.cancelled || (policy.strict_known_failures && unexpected_pass);

        FinishedRun {
            counts: self.counts,
            records,
            not_found: self.not_found,
            cancelled: self.cancelled,
            elapsed,
            exit_code: if failed { 1 } else { 0 },
        }
    }
}

/// A finalized run, ordered by group then name.
#[derive(Debug, Clone)]
pub struct FinishedRun {
    counts: BTreeMap<OutcomeKind, usize>,
    pub records: Vec<RunRecord>,
    pub not_found: Vec<String>,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub exit_code: i32,
}

impl FinishedRun {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(|r| r.outcome().is_failure())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::outcome::FailureKind;

    fn record(case: TestCase, outcome: Outcome) -> RunRecord {
        RunRecord {
            case,
            verdict: Verdict {
                outcome,
                message: String::new(),
                detail: None,
                actual_output: None,
                expected_output: None,
            },
            duration: Duration::from_millis(5),
        }
    }

    fn regular(name: &str, runtime: bool) -> TestCase {
        TestCase::regular(format!("tests/{name}.c"), Some("x".to_string()), runtime)
    }

    #[test]
    fn test_counts_per_outcome() {
        let mut summary = RunSummary::new();
        summary.record(record(regular("a", true), Outcome::Passed));
        summary.record(record(regular("b", true), Outcome::Passed));
        summary.record(record(regular("c", false), Outcome::Skipped));
        assert_eq!(summary.count(OutcomeKind::Passed), 2);
        assert_eq!(summary.count(OutcomeKind::Skipped), 1);
        assert_eq!(summary.count(OutcomeKind::Failed), 0);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_all_passing_exits_zero() {
        let mut summary = RunSummary::new();
        summary.record(record(regular("a", true), Outcome::Passed));
        summary.record(record(regular("b", true), Outcome::PassedWithWarning));
        summary.record(record(TestCase::known_failure("tests-known-failures/k.c"), Outcome::ExpectedFailure));
        assert_eq!(summary.finish(ExitPolicy::default(), Duration::ZERO).exit_code, 0);
    }

    #[test]
    fn test_regular_failure_exits_one() {
        let mut summary = RunSummary::new();
        summary.record(record(regular("a", true), Outcome::Passed));
        summary.record(record(regular("b", true), Outcome::Failed(FailureKind::OutputMismatch)));
        assert_eq!(summary.finish(ExitPolicy::default(), Duration::ZERO).exit_code, 1);
    }

    #[test]
    fn test_annotated_failure_exits_one() {
        let mut summary = RunSummary::new();
        summary.record(record(regular("ptr", true), Outcome::FailedWithWarningAnnotation));
        assert_eq!(summary.finish(ExitPolicy::default(), Duration::ZERO).exit_code, 1);
    }

    #[test]
    fn test_unexpected_pass_respects_policy() {
        let build = || {
            let mut summary = RunSummary::new();
            summary.record(record(TestCase::known_failure("tests-known-failures/k.c"), Outcome::UnexpectedPass));
            summary
        };
        assert_eq!(build().finish(ExitPolicy::default(), Duration::ZERO).exit_code, 0);
        let strict = ExitPolicy {
            strict_known_failures: true,
        };
        assert_eq!(build().finish(strict, Duration::ZERO).exit_code, 1);
    }

    #[test]
    fn test_cancelled_run_exits_one() {
        let mut summary = RunSummary::new();
        summary.record(record(regular("a", true), Outcome::Passed));
        summary.mark_cancelled();
        let finished = summary.finish(ExitPolicy::default(), Duration::ZERO);
        assert!(finished.cancelled);
        assert_eq!(finished.exit_code, 1);
    }

    #[test]
    fn test_finish_orders_by_group_then_name() {
        let mut summary = RunSummary::new();
        summary.record(record(TestCase::known_failure("tests-known-failures/a.c"), Outcome::ExpectedFailure));
        summary.record(record(regular("zeta", true), Outcome::Passed));
        summary.record(record(regular("beta", false), Outcome::Passed));
        summary.record(record(regular("alpha", true), Outcome::Passed));
        let finished = summary.finish(ExitPolicy::default(), Duration::ZERO);
        let names: Vec<&str> = finished.records.iter().map(|r| r.case.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha", "zeta", "a"]);
    }

    #[test]
    fn test_not_found_is_kept_and_does_not_fail_run() {
        let mut summary = RunSummary::new();
        summary.note_not_found("ghost");
        let finished = summary.finish(ExitPolicy::default(), Duration::ZERO);
        assert_eq!(finished.not_found, vec!["ghost".to_string()]);
        assert_eq!(finished.exit_code, 0);
    }
}
