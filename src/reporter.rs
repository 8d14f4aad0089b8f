//! Console reporting.
//!
//! ## TestReporter Trait
//!
//! The runner talks to a [`TestReporter`] from a single consumer task, so implementations never see concurrent
//! calls. Progress is a single glyph per finished test, written to stderr; the grouped result table is rendered once
//! the run is finished and written to stdout.
//!
//! [`render_run`] produces the table as a plain string so it can be snapshot-tested without a terminal.

use std::fmt::Write as _;
use std::io::{IsTerminal, Write as _};

use colored::Colorize;
use difference::{Changeset, Difference};
use rct_core::{FailureKind, FinishedRun, Group, Outcome, OutcomeKind, RunRecord, Stage};

/// Width of the separator rules.
const RULE_WIDTH: usize = 60;

/// Maximum number of diff lines shown for an output mismatch.
const MAX_DIFF_LINES: usize = 20;

/// Maximum number of partial-output lines shown after a timeout.
const MAX_PARTIAL_LINES: usize = 20;

// ============================================================================
// Test Reporter Trait
// ============================================================================

/// Receives run events. Called from one task only.
pub trait TestReporter: Send {
    /// Called once the set of tests to run is known
    fn on_collection_complete(&mut self, test_count: usize);

    /// Called for requested names that resolved to no test
    fn on_not_found(&mut self, _names: &[String]) {}

    /// Called when a test has been classified
    fn on_test_complete(&mut self, record: &RunRecord);

    /// Called when the run is finalized
    fn on_run_complete(&mut self, run: &FinishedRun);
}

/// Default console reporter
pub struct ConsoleReporter {
    pub verbose: bool,
    color: bool,
    completed: usize,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            color: std::io::stdout().is_terminal(),
            completed: 0,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

impl TestReporter for ConsoleReporter {
    fn on_collection_complete(&mut self, test_count: usize) {
        if test_count == 0 {
            eprintln!("No tests collected");
        } else {
            eprintln!("Running {test_count} test(s)");
        }
    }

    fn on_not_found(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        eprintln!("{}", paint("ERROR: The following tests were not found:", Tone::RedBold, self.color));
        for name in names {
            eprintln!("  {} {}", paint("✗", Tone::Red, self.color), name);
        }
        eprintln!();
    }

    fn on_test_complete(&mut self, record: &RunRecord) {
        self.completed += 1;
        let mut stderr = std::io::stderr().lock();
        if self.verbose {
            let _ = writeln!(
                stderr,
                "{} {} ({}ms)",
                glyph(record.outcome(), self.color),
                record.case.name,
                record.duration.as_millis()
            );
        } else {
            let _ = write!(stderr, "{}", glyph(record.outcome(), self.color));
            if self.completed % RULE_WIDTH == 0 {
                let _ = writeln!(stderr);
            }
        }
        let _ = stderr.flush();
    }

    fn on_run_complete(&mut self, run: &FinishedRun) {
        if !self.verbose && self.completed % RULE_WIDTH != 0 {
            eprintln!();
        }
        print!("{}", render_run(run, self.verbose, self.color));
    }
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Tone {
    Green,
    Yellow,
    Red,
    RedBold,
    GreenBold,
    YellowBold,
    Dim,
}

fn paint(text: &str, tone: Tone, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    match tone {
        Tone::Green => text.green().to_string(),
        Tone::Yellow => text.yellow().to_string(),
        Tone::Red => text.red().to_string(),
        Tone::RedBold => text.red().bold().to_string(),
        Tone::GreenBold => text.green().bold().to_string(),
        Tone::YellowBold => text.yellow().bold().to_string(),
        Tone::Dim => text.dimmed().to_string(),
    }
}

fn tone_for(outcome: Outcome) -> Tone {
    match outcome {
        Outcome::Passed => Tone::Green,
        Outcome::PassedWithWarning | Outcome::ExpectedFailure => Tone::Yellow,
        Outcome::Failed(_) | Outcome::FailedWithWarningAnnotation | Outcome::UnexpectedPass => Tone::Red,
        Outcome::Skipped => Tone::Dim,
    }
}

/// Single-character progress marker.
pub fn glyph(outcome: Outcome, color: bool) -> String {
    let symbol = match outcome {
        Outcome::Passed | Outcome::PassedWithWarning | Outcome::ExpectedFailure => "✓",
        Outcome::Failed(FailureKind::Timeout(_)) => "⏱",
        Outcome::Failed(_) | Outcome::FailedWithWarningAnnotation | Outcome::UnexpectedPass => "✗",
        Outcome::Skipped => "⊘",
    };
    paint(symbol, tone_for(outcome), color)
}

/// Status word shown in the result table.
pub fn status_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASSED",
        Outcome::PassedWithWarning => "PASSED WITH WARNINGS",
        Outcome::Failed(FailureKind::Timeout(_)) => "TIMEOUT",
        Outcome::Failed(FailureKind::Stage(Stage::Compile)) => "COMPILATION ERROR",
        Outcome::Failed(_) => "FAILED",
        Outcome::FailedWithWarningAnnotation => "FAILED (pointer provenance warning)",
        Outcome::ExpectedFailure => "EXPECTED FAIL",
        Outcome::UnexpectedPass => "UNEXPECTED PASS",
        Outcome::Skipped => "SKIPPED",
    }
}

fn is_quiet_success(outcome: Outcome) -> bool {
    matches!(outcome, Outcome::Passed | Outcome::ExpectedFailure)
}

/// Render the grouped result table and totals.
pub fn render_run(run: &FinishedRun, verbose: bool, color: bool) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);
    let thin_rule = "-".repeat(RULE_WIDTH);

    let mut current_group: Option<Group> = None;
    for record in &run.records {
        let group = record.case.group();
        if current_group != Some(group) {
            current_group = Some(group);
            let _ = writeln!(out, "\n{}", paint(group.title(), Tone::YellowBold, color));
            let _ = writeln!(out, "{thin_rule}");
        }
        render_record(&mut out, record, verbose, color);
    }

    if !run.not_found.is_empty() {
        let _ = writeln!(out, "\n{}", paint("Not found", Tone::RedBold, color));
        let _ = writeln!(out, "{thin_rule}");
        for name in &run.not_found {
            let _ = writeln!(out, "{} {}", paint("✗", Tone::Red, color), name);
        }
    }

    let _ = writeln!(out, "\n{rule}");
    let title = "Test Results";
    let _ = writeln!(out, "{}{title}", " ".repeat(RULE_WIDTH.saturating_sub(title.len()) / 2));
    let _ = writeln!(out, "{rule}");

    let passed = run.count(OutcomeKind::Passed) + run.count(OutcomeKind::PassedWithWarning);
    let failed = run.count(OutcomeKind::Failed) + run.count(OutcomeKind::FailedWithWarningAnnotation);
    let count_line = |out: &mut String, label: &str, value: usize, tone: Tone, always: bool| {
        if always || value > 0 {
            let _ = writeln!(out, "{:<20}{}", label, paint(&value.to_string(), tone, color));
        }
    };
    count_line(&mut out, "Total:", run.total(), Tone::Dim, true);
    count_line(&mut out, "Passed:", passed, Tone::Green, true);
    count_line(&mut out, "Failed:", failed, Tone::Red, false);
    count_line(&mut out, "Warnings:", run.count(OutcomeKind::PassedWithWarning), Tone::Yellow, false);
    count_line(&mut out, "Expected failures:", run.count(OutcomeKind::ExpectedFailure), Tone::Yellow, false);
    count_line(&mut out, "Unexpected passes:", run.count(OutcomeKind::UnexpectedPass), Tone::Red, false);
    count_line(&mut out, "Skipped:", run.count(OutcomeKind::Skipped), Tone::Dim, false);
    count_line(&mut out, "Not found:", run.not_found.len(), Tone::RedBold, false);
    let _ = writeln!(out, "{:<20}{:.2}s", "Duration:", run.elapsed.as_secs_f64());
    let _ = writeln!(out, "{rule}");

    let _ = writeln!(out, "\n{}", closing_line(run, failed, color));
    out
}

fn closing_line(run: &FinishedRun, failed: usize, color: bool) -> String {
    if run.cancelled {
        return paint("Run cancelled", Tone::RedBold, color);
    }
    if run.exit_code != 0 {
        let mut issues = Vec::new();
        if failed > 0 {
            issues.push(format!("{failed} failed"));
        }
        let unexpected = run.count(OutcomeKind::UnexpectedPass);
        if unexpected > 0 {
            issues.push(format!("{unexpected} unexpected pass"));
        }
        return paint(&format!("Run failed ({})", issues.join(", ")), Tone::RedBold, color);
    }
    if run.total() == 0 {
        return paint("No tests were run!", Tone::YellowBold, color);
    }
    let unexpected = run.count(OutcomeKind::UnexpectedPass);
    if unexpected > 0 {
        return paint(
            &format!("All tests passed! ({unexpected} known failure(s) now compile cleanly)"),
            Tone::YellowBold,
            color,
        );
    }
    paint("All tests passed!", Tone::GreenBold, color)
}

fn render_record(out: &mut String, record: &RunRecord, verbose: bool, color: bool) {
    let outcome = record.outcome();
    let verdict = &record.verdict;
    let _ = writeln!(
        out,
        "{} {}: {}",
        glyph(outcome, color),
        record.case.name,
        paint(status_label(outcome), tone_for(outcome), color)
    );

    let show_details = verbose || !is_quiet_success(outcome);

    // For a pass without golden output the message is the program output itself, shown below.
    let message_is_output = outcome == Outcome::Passed && verdict.expected_output.is_none();
    if show_details && !message_is_output && !verdict.message.is_empty() {
        let _ = writeln!(out, "  {}", paint(&verdict.message, Tone::Dim, color));
    }
    if show_details && outcome == Outcome::ExpectedFailure {
        if let Some(description) = &record.case.description {
            let _ = writeln!(out, "  {}", paint(description, Tone::Dim, color));
        }
    }

    if let (Some(detail), true) = (&verdict.detail, outcome.is_failure()) {
        let _ = writeln!(out, "  {}", clean_stage_error(detail));
    }

    match outcome {
        Outcome::Failed(FailureKind::Timeout(_)) => {
            if let Some(partial) = verdict.actual_output.as_deref().filter(|p| !p.is_empty()) {
                let _ = writeln!(out, "  Partial output before timeout:");
                let _ = writeln!(out, "{}", indent_lines(partial, 4, MAX_PARTIAL_LINES));
            }
        }
        Outcome::Failed(FailureKind::OutputMismatch) | Outcome::FailedWithWarningAnnotation => {
            if let (Some(expected), Some(actual)) = (&verdict.expected_output, &verdict.actual_output) {
                render_mismatch(out, expected, actual, color);
            }
        }
        _ => {
            if verbose {
                if let Some(output) = verdict.actual_output.as_deref().filter(|o| !o.is_empty()) {
                    let _ = writeln!(out, "  Output:");
                    let _ = writeln!(out, "{}", indent_lines(output, 4, usize::MAX));
                }
            }
        }
    }
}

/// First differing line, line-count difference, a bounded line diff, and both raw strings.
pub fn render_mismatch(out: &mut String, expected: &str, actual: &str, color: bool) {
    let expected_lines: Vec<&str> = expected.lines().collect();
    let actual_lines: Vec<&str> = actual.lines().collect();

    if let Some((index, (exp, act))) = expected_lines
        .iter()
        .zip(actual_lines.iter())
        .enumerate()
        .find(|(_, (exp, act))| exp != act)
    {
        let _ = writeln!(out, "  First difference at line {}:", index + 1);
        let _ = writeln!(out, "    Expected: {}", paint(&format!("{exp:?}"), Tone::Green, color));
        let _ = writeln!(out, "    Got:      {}", paint(&format!("{act:?}"), Tone::Red, color));
    }
    if expected_lines.len() != actual_lines.len() {
        let _ = writeln!(
            out,
            "  Different number of lines: expected {}, got {}",
            expected_lines.len(),
            actual_lines.len()
        );
    }

    let _ = writeln!(out, "  Diff:");
    let changeset = Changeset::new(expected, actual, "\n");
    let mut shown = 0;
    'diff: for diff in &changeset.diffs {
        let (sign, text, tone) = match diff {
            Difference::Same(text) => (" ", text, Tone::Dim),
            Difference::Rem(text) => ("-", text, Tone::Red),
            Difference::Add(text) => ("+", text, Tone::Green),
        };
        for line in text.split('\n') {
            // Trailing newlines surface as empty unchanged lines.
            if line.is_empty() && matches!(diff, Difference::Same(_)) {
                continue;
            }
            if shown == MAX_DIFF_LINES {
                let _ = writeln!(out, "    ...");
                break 'diff;
            }
            let _ = writeln!(out, "   {}", paint(&format!("{sign}{line}"), tone, color));
            shown += 1;
        }
    }

    let _ = writeln!(out, "  Raw comparison:");
    let _ = writeln!(out, "    Expected: {expected:?}");
    let _ = writeln!(out, "    Got:      {actual:?}");
}

/// Condense tool diagnostics for the table: no ANSI escapes or backtraces, a `COMPILER BUG:` line if there is one,
/// otherwise at most three meaningful lines.
pub fn clean_stage_error(stderr: &str) -> String {
    let stripped = strip_ansi(stderr);

    if let Some(line) = stripped.lines().find(|line| line.contains("COMPILER BUG:")) {
        return line.trim().to_string();
    }

    let mut kept: Vec<String> = Vec::new();
    for line in stripped.lines() {
        if line.contains("stack backtrace:") || line.contains("note: run with") {
            break;
        }
        if line.starts_with("thread '") {
            if let Some(start) = line.find("panicked at ") {
                let location = &line[start + "panicked at ".len()..];
                let location = location.split(", ").next().unwrap_or(location);
                kept.push(format!("panicked at {}", location.trim_end_matches(':')));
            }
            continue;
        }
        if !line.trim().is_empty() && kept.len() < 3 {
            kept.push(line.trim().to_string());
        }
    }

    if kept.is_empty() {
        stripped
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string())
    } else {
        kept.join(" ")
    }
}

/// Remove ANSI CSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\x1b' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
        }
        for next in chars.by_ref() {
            if next.is_ascii_alphabetic() {
                break;
            }
        }
    }
    out
}

fn indent_lines(text: &str, spaces: usize, max_lines: usize) -> String {
    let indent = " ".repeat(spaces);
    let lines: Vec<&str> = text.lines().collect();
    let mut rendered: Vec<String> = lines.iter().take(max_lines).map(|line| format!("{indent}{line}")).collect();
    if lines.len() > max_lines {
        rendered.push(format!("{indent}... ({} more lines)", lines.len() - max_lines));
    }
    rendered.join("\n")
}
