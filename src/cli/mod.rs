//! CLI module for the rct test runner
//!
//! ## Commands
//!
//! - `rct [TEST...]` - Run the whole suite, or only the named tests
//! - `run [TEST...] [--filter S]` - Same, with an optional path filter
//! - `add <file> [expected]` - Register a test or update its expected output
//! - `clean` - Remove generated artifacts only
//! - `list` - List registered tests
//! - `stats` - Show suite statistics
//! - `rename <old> <new>` - Rename a test's source file and registry entry
//! - `debug <test>` - Build a test and hand it to the VM's interactive tracer
//! - `build-runtime` - Rebuild the runtime library
//!
//! ## Design
//!
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::BackendKind;
use crate::version::RCT_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::new(message, ExitCode(code))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Toolchain test runner: compile, assemble, link and execute each test, then compare its output
#[derive(Parser, Debug)]
#[command(name = "rct")]
#[command(version = RCT_VERSION)]
#[command(about = "Toolchain test runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Tests to run (default: the whole suite)
    #[arg(value_name = "TEST")]
    pub tests: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Execution backend
    #[arg(short, long, value_enum, global = true, default_value_t = BackendArg::Rvm)]
    pub backend: BackendArg,

    /// Per-stage timeout in seconds
    #[arg(short, long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Memory bank size passed to the assembler and linker
    #[arg(long, global = true, value_name = "N")]
    pub bank_size: Option<u32>,

    /// Echo every test's output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Keep generated artifacts after the run
    #[arg(long, global = true)]
    pub no_cleanup: bool,

    /// Run tests one at a time
    #[arg(long, global = true, conflicts_with = "jobs")]
    pub no_parallel: bool,

    /// Maximum number of tests in flight
    #[arg(short, long, global = true, value_name = "N")]
    pub jobs: Option<usize>,

    /// Hand the named test to the VM's interactive tracer instead of comparing output
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Registry file (default: c-test/tests.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub tests_file: Option<PathBuf>,

    /// Artifact directory (default: c-test/build)
    #[arg(long, global = true, value_name = "DIR")]
    pub build_dir: Option<PathBuf>,

    /// Project root (default: $RCT_PROJECT_ROOT, else the nearest ancestor with a c-test directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Fail the run when a known failure unexpectedly passes
    #[arg(long, global = true)]
    pub strict_known_failures: bool,

    /// Rebuild the runtime library before running
    #[arg(long, global = true)]
    pub build_runtime: bool,
}

/// Backend names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendArg {
    /// Macro expander + tape interpreter
    Bf,
    /// Virtual machine
    #[default]
    Rvm,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Bf => BackendKind::Bf,
            BackendArg::Rvm => BackendKind::Rvm,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run tests (default when no subcommand is given)
    Run {
        /// Tests to run (default: the whole suite)
        #[arg(value_name = "TEST")]
        tests: Vec<String>,
        /// Only run registered tests whose path contains this text
        #[arg(long, value_name = "TEXT", conflicts_with = "tests")]
        filter: Option<String>,
    },

    /// Register a test, or update its expected output
    Add {
        /// Source file (bare names are placed under tests/)
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Expected output; escapes like \n are interpreted. Omit to add a known failure
        #[arg(value_name = "EXPECTED")]
        expected: Option<String>,
        /// Link against crt0 only
        #[arg(long)]
        no_runtime: bool,
        /// Description stored alongside the entry
        #[arg(short = 'D', long, value_name = "TEXT")]
        description: Option<String>,
    },

    /// Remove generated artifacts
    Clean,

    /// List registered tests
    List {
        /// Print only test names
        #[arg(long)]
        names_only: bool,
        /// Include known failures
        #[arg(long)]
        include_failures: bool,
    },

    /// Build a test and run it under the VM's interactive tracer
    Debug {
        #[arg(value_name = "TEST")]
        test: String,
    },

    /// Rebuild the runtime library
    BuildRuntime,

    /// Show suite statistics
    Stats,

    /// Rename a test's source file and registry entry
    Rename {
        #[arg(value_name = "OLD")]
        old_name: String,
        #[arg(value_name = "NEW")]
        new_name: String,
    },
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub async fn run() {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
pub async fn execute(cli: Cli) -> CliResult<ExitCode> {
    let ctx = commands::Context::from_options(&cli.options);

    match cli.command {
        Some(Command::Run { tests, filter }) => commands::run_tests(&ctx, &cli.options, tests, filter).await,
        Some(Command::Add {
            file,
            expected,
            no_runtime,
            description,
        }) => commands::add_test(&ctx, &file, expected.as_deref(), !no_runtime, description),
        Some(Command::Clean) => commands::clean(&ctx),
        Some(Command::List {
            names_only,
            include_failures,
        }) => commands::list_tests(&ctx, names_only, include_failures),
        Some(Command::Debug { test }) => commands::debug_test(&ctx, &test).await,
        Some(Command::BuildRuntime) => commands::build_runtime(&ctx).await,
        Some(Command::Stats) => commands::stats(&ctx),
        Some(Command::Rename { old_name, new_name }) => commands::rename_test(&ctx, &old_name, &new_name),
        None if cli.options.debug => match cli.tests.as_slice() {
            [test] => commands::debug_test(&ctx, test).await,
            _ => Err(CliError::failure("Error: --debug requires exactly one test name")),
        },
        None => commands::run_tests(&ctx, &cli.options, cli.tests, None).await,
    }
}

// ============================================================================
// Tests
// ============================================================================
