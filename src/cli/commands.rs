//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use rct_core::{ExitPolicy, TestCase, classify, decode_lossy};

use super::{CliError, CliResult, ExitCode, RunOptions};
use crate::artifacts::ArtifactManager;
use crate::backend::{Backend, RvmBackend, Toolchain, backend_for};
use crate::config::{BackendKind, RunConfig, SuiteLayout, ToolPaths, resolve_project_root};
use crate::pipeline::Pipeline;
use crate::process::{CancelToken, ProcessRunner, StageCommand, cancellation};
use crate::registry::{Lookup, Registry, RegistryError, Upsert, normalize_add_path, unescape};
use crate::reporter::{ConsoleReporter, clean_stage_error};
use crate::runner::{self, Runner, Selection};

/// Wall-clock budget for a full runtime rebuild.
const RUNTIME_BUILD_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Command context
// ============================================================================

/// Everything a command needs to know about where the suite lives and how to run it.
#[derive(Debug, Clone)]
pub struct Context {
    pub layout: SuiteLayout,
    pub tools: ToolPaths,
    pub config: RunConfig,
}

impl Context {
    pub fn new(layout: SuiteLayout, tools: ToolPaths, config: RunConfig) -> Self {
        Self { layout, tools, config }
    }

    /// Resolve the project root and apply command-line overrides on top of the defaults.
    pub fn from_options(options: &RunOptions) -> Self {
        let root = resolve_project_root(options.project_root.clone());

        let mut layout = SuiteLayout::new(&root);
        if let Some(file) = &options.tests_file {
            layout = layout.with_registry_file(file);
        }
        if let Some(dir) = &options.build_dir {
            layout = layout.with_build_dir(dir);
        }

        let mut config = RunConfig::new()
            .with_backend(options.backend.into())
            .with_verbose(options.verbose)
            .with_cleanup(!options.no_cleanup)
            .with_strict_known_failures(options.strict_known_failures);
        if let Some(secs) = options.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(bank_size) = options.bank_size {
            config = config.with_bank_size(bank_size);
        }
        if options.no_parallel {
            config = config.with_jobs(1);
        } else if let Some(jobs) = options.jobs {
            config = config.with_jobs(jobs);
        }

        let tools = ToolPaths::for_project(&root).with_env_overrides();
        tracing::debug!(root = %root.display(), backend = %config.backend, jobs = config.jobs, "resolved context");
        Self::new(layout, tools, config)
    }

    fn pipeline(&self, backend: Arc<dyn Backend>, cancel: CancelToken) -> Pipeline {
        Pipeline::new(
            Toolchain::new(self.tools.clone(), &self.config),
            backend,
            ArtifactManager::new(&self.layout.build_dir),
            self.layout.clone(),
            ProcessRunner::new(self.config.kill_grace, cancel),
            self.config.timeout,
        )
    }
}

/// Render a registry failure with its diagnostic code and help text.
fn registry_failure(err: RegistryError) -> CliError {
    CliError::failure(format!("{:?}", miette::Report::new(err)))
}

// ============================================================================
// Running tests
// ============================================================================

/// Run the whole suite, the registered tests matching `filter`, or the named `tests`.
pub async fn run_tests(
    ctx: &Context,
    options: &RunOptions,
    tests: Vec<String>,
    filter: Option<String>,
) -> CliResult<ExitCode> {
    if options.build_runtime {
        build_runtime(ctx).await?;
    }

    let registry = Registry::load(&ctx.layout.registry_file);
    let selection = if tests.is_empty() {
        Selection::Suite { filter }
    } else {
        Selection::Named(tests)
    };
    let plan = runner::plan(&registry, &ctx.layout, &selection);

    let (source, token) = cancellation();
    let interrupt = runner::cancel_on_interrupt(source);

    let backend = backend_for(&ctx.config, &ctx.tools);
    let pipeline = ctx.pipeline(backend, token).keep_artifacts(!ctx.config.cleanup);
    let policy = ExitPolicy {
        strict_known_failures: ctx.config.strict_known_failures,
    };
    let mut reporter = ConsoleReporter::new(ctx.config.verbose);

    let run = Runner::new(pipeline, ctx.config.jobs, policy).run(plan, &mut reporter).await;
    interrupt.abort();

    if !ctx.config.cleanup {
        println!("Artifacts kept in {}", ctx.layout.build_dir.display());
    }
    Ok(ExitCode(run.exit_code))
}

/// Build one test and hand the terminal to the VM's trace mode. Output is not compared.
pub async fn debug_test(ctx: &Context, name: &str) -> CliResult<ExitCode> {
    let registry = Registry::load(&ctx.layout.registry_file);
    let case = match registry.lookup(name, &ctx.layout) {
        Lookup::Registered(case) | Lookup::Unregistered(case) => case,
        Lookup::NotFound => return Err(CliError::failure(format!("Error: test '{name}' not found"))),
    };

    if ctx.config.backend != BackendKind::Rvm {
        eprintln!("{}", "Interactive mode always uses the rvm backend".yellow());
    }
    let pipeline = ctx
        .pipeline(Arc::new(RvmBackend::new(&ctx.tools, &ctx.config)), CancelToken::never())
        .keep_artifacts(true);

    println!("Compiling: {}", ctx.layout.source_path(&case.source).display());
    let artifacts = pipeline
        .build(&case)
        .await
        .map_err(|result| build_failure(&case, &result))?;
    println!("{} {}", "Successfully built".green(), artifacts.image.display());

    let Some(command) = pipeline.backend().interactive(&artifacts) else {
        return Err(CliError::failure("Error: backend has no interactive mode"));
    };
    println!("Running: {command}");
    println!("Starting debugger...");
    let code = pipeline
        .processes()
        .run_interactive(&command)
        .await
        .map_err(|err| CliError::failure(format!("Error: {err}")))?;
    Ok(ExitCode(code.unwrap_or(ExitCode::FAILURE.0)))
}

fn build_failure(case: &TestCase, result: &rct_core::PipelineResult) -> CliError {
    let verdict = classify(case, result);
    match verdict.detail {
        Some(detail) => CliError::failure(format!("{}: {}", verdict.message, clean_stage_error(&detail))),
        None => CliError::failure(verdict.message),
    }
}

/// `make clean && make all BANK_SIZE=N`, then `make crt0.pobj BANK_SIZE=N`, in the runtime directory.
pub async fn build_runtime(ctx: &Context) -> CliResult<ExitCode> {
    let dir = &ctx.tools.runtime_dir;
    let bank = format!("BANK_SIZE={}", ctx.config.bank_size);
    let make = || StageCommand::new("make").current_dir(dir);
    let steps = [
        make().arg("clean"),
        make().arg("all").arg(&bank),
        make().arg("crt0.pobj").arg(&bank),
    ];

    println!("Building runtime in {} (bank size {})", dir.display(), ctx.config.bank_size);
    let processes = ProcessRunner::new(ctx.config.kill_grace, CancelToken::never());
    let started = Instant::now();
    for step in &steps {
        let remaining = RUNTIME_BUILD_TIMEOUT.saturating_sub(started.elapsed());
        let output = processes
            .run(step, remaining)
            .await
            .map_err(|err| CliError::failure(format!("Failed to build runtime: {err}")))?;
        if output.timed_out {
            return Err(CliError::failure(format!(
                "Failed to build runtime: `{step}` did not finish within {}s",
                RUNTIME_BUILD_TIMEOUT.as_secs()
            )));
        }
        if !output.success() {
            return Err(CliError::failure(format!(
                "Failed to build runtime: {}",
                decode_lossy(&output.stderr).trim()
            )));
        }
    }
    println!("{}", "Runtime built".green());
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Registry maintenance
// ============================================================================

/// Register `file`, or update its expected output. No expected output (or a known-failure path) files it as a
/// known failure.
pub fn add_test(
    ctx: &Context,
    file: &Path,
    expected: Option<&str>,
    use_runtime: bool,
    description: Option<String>,
) -> CliResult<ExitCode> {
    let (relative, known_failure_path) = normalize_add_path(file);
    let source = ctx.layout.source_path(&relative);
    if !source.is_file() {
        eprintln!("{} {} does not exist yet", "Warning:".yellow(), source.display());
    }

    let expected = expected.map(unescape);
    let as_known_failure = known_failure_path || expected.is_none();
    let upsert = Registry::update(&ctx.layout.registry_file, |registry| {
        Ok(if as_known_failure {
            registry.upsert_known_failure(&relative, description)
        } else {
            registry.upsert(&relative, expected.clone(), use_runtime, description)
        })
    })
    .map_err(registry_failure)?;

    let verb = match (upsert, as_known_failure) {
        (Upsert::Added, false) => "Added new test",
        (Upsert::Updated, false) => "Updated existing test",
        (Upsert::Added, true) => "Added known failure",
        (Upsert::Updated, true) => "Updated known failure",
    };
    println!("{}: {}", verb.green(), relative.display());
    if let (false, Some(expected)) = (as_known_failure, &expected) {
        println!("Expected output: {expected:?}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Rename a test's source file and its registry entry.
pub fn rename_test(ctx: &Context, old_name: &str, new_name: &str) -> CliResult<ExitCode> {
    let mut registry = Registry::load_strict(&ctx.layout.registry_file).map_err(registry_failure)?;
    let (from, to) = registry
        .rename_and_save(old_name, new_name, &ctx.layout)
        .map_err(registry_failure)?;
    println!("{} {} -> {}", "Renamed".green(), from.display(), to.display());
    Ok(ExitCode::SUCCESS)
}

/// Remove generated artifacts only. Sources and the registry are never touched.
pub fn clean(ctx: &Context) -> CliResult<ExitCode> {
    let artifacts = ArtifactManager::new(&ctx.layout.build_dir);
    let removed = artifacts
        .clean_all()
        .map_err(|err| CliError::failure(format!("Error: failed to clean {}: {err}", ctx.layout.build_dir.display())))?;
    println!("Cleaned {removed} generated file(s) from {}", ctx.layout.build_dir.display());
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Suite inspection
// ============================================================================

pub fn list_tests(ctx: &Context, names_only: bool, include_failures: bool) -> CliResult<ExitCode> {
    let registry = Registry::load(&ctx.layout.registry_file);
    print!("{}", render_list(&registry, names_only, include_failures));
    Ok(ExitCode::SUCCESS)
}

fn render_list(registry: &Registry, names_only: bool, include_failures: bool) -> String {
    let mut out = String::new();
    let regular = registry.regular_cases();
    let known = if include_failures {
        registry.known_failure_cases()
    } else {
        Vec::new()
    };

    if names_only {
        for case in regular.iter().chain(&known) {
            out.push_str(&case.name);
            out.push('\n');
        }
        return out;
    }

    out.push_str("Available tests:\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for case in &regular {
        out.push_str(&format!(
            "  {} (runtime: {}, expected: {})\n",
            case.source.display(),
            if case.uses_runtime { "yes" } else { "no" },
            if case.expected.is_some() { "defined" } else { "none" },
        ));
        if let Some(description) = &case.description {
            out.push_str(&format!("    {}\n", description.dimmed()));
        }
    }
    if !known.is_empty() {
        out.push_str("\nKnown failures:\n");
        for case in &known {
            out.push_str(&format!("  {}\n", case.source.display()));
            if let Some(description) = &case.description {
                out.push_str(&format!("    {}\n", description.dimmed()));
            }
        }
    }
    out
}

pub fn stats(ctx: &Context) -> CliResult<ExitCode> {
    let registry = Registry::load(&ctx.layout.registry_file);
    print!("{}", render_stats(&registry));
    Ok(ExitCode::SUCCESS)
}

fn render_stats(registry: &Registry) -> String {
    let tests = registry.tests();
    let with_runtime = tests.iter().filter(|t| t.use_runtime).count();
    let with_expected = tests.iter().filter(|t| t.expected.is_some()).count();
    let expected_lines: usize = tests.iter().filter_map(|t| t.expected.as_deref()).map(|e| e.lines().count()).sum();

    let mut out = String::new();
    out.push_str("Test Suite Statistics\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!("Total tests:            {}\n", tests.len()));
    out.push_str(&format!("With runtime:           {with_runtime}\n"));
    out.push_str(&format!("Without runtime:        {}\n", tests.len() - with_runtime));
    out.push_str(&format!("With expected output:   {with_expected}\n"));
    out.push_str(&format!("Known failures:         {}\n", registry.known_failures().len()));
    out.push_str(&format!("Total expected lines:   {expected_lines}\n"));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context(root: &Path) -> Context {
        let layout = SuiteLayout::new(root);
        std::fs::create_dir_all(layout.suite_dir.join("tests")).unwrap();
        Context::new(layout, ToolPaths::for_project(root), RunConfig::default())
    }

    #[test]
    fn test_add_then_update_keeps_one_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        add_test(&ctx, Path::new("hello.c"), Some("Hello\\n"), true, None).unwrap();
        add_test(&ctx, Path::new("hello.c"), Some("Hi\\n"), true, None).unwrap();

        let registry = Registry::load_strict(&ctx.layout.registry_file).unwrap();
        assert_eq!(registry.tests().len(), 1);
        assert_eq!(registry.tests()[0].file, Path::new("tests/hello.c"));
        assert_eq!(registry.tests()[0].expected.as_deref(), Some("Hi\n"));
    }

    #[test]
    fn test_add_without_expected_is_known_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        add_test(&ctx, Path::new("tests-known-failures/vla.c"), None, true, Some("VLAs".into())).unwrap();

        let registry = Registry::load_strict(&ctx.layout.registry_file).unwrap();
        assert!(registry.tests().is_empty());
        assert_eq!(registry.known_failures().len(), 1);
        assert_eq!(registry.known_failures()[0].description.as_deref(), Some("VLAs"));
    }

    #[test]
    fn test_add_refuses_malformed_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        std::fs::write(&ctx.layout.registry_file, "{ not json").unwrap();

        let err = add_test(&ctx, Path::new("hello.c"), Some("x"), true, None).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::FAILURE);
        assert!(err.message.contains("malformed"));
        assert_eq!(std::fs::read_to_string(&ctx.layout.registry_file).unwrap(), "{ not json");
    }

    #[test]
    fn test_rename_moves_source_and_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        std::fs::write(ctx.layout.suite_dir.join("tests/old.c"), "int main(void) { return 0; }").unwrap();
        add_test(&ctx, Path::new("old.c"), Some("x"), true, None).unwrap();

        rename_test(&ctx, "old", "new").unwrap();

        assert!(ctx.layout.suite_dir.join("tests/new.c").is_file());
        let registry = Registry::load_strict(&ctx.layout.registry_file).unwrap();
        assert_eq!(registry.tests()[0].file, Path::new("tests/new.c"));
    }

    #[test]
    fn test_rename_unknown_test_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let err = rename_test(&ctx, "ghost", "spirit").unwrap_err();
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn test_clean_removes_only_build_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let source = ctx.layout.suite_dir.join("tests/keep.c");
        std::fs::write(&source, "").unwrap();
        let stale = ctx.layout.build_dir.join("tests__keep");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("tests__keep.asm"), "").unwrap();
        std::fs::write(stale.join("tests__keep.bin"), "").unwrap();

        clean(&ctx).unwrap();

        assert!(source.is_file());
        assert!(!stale.exists());
    }

    #[test]
    fn test_list_and_stats_rendering() {
        colored::control::set_override(false);
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = Registry::empty(tmp.path().join("tests.json"));
        registry.upsert("tests/a.c", Some("1\n2\n".into()), false, Some("adds".into()));
        registry.upsert("tests/b.c", None, true, None);
        registry.upsert_known_failure("tests-known-failures/kf.c", None);

        assert_eq!(render_list(&registry, true, false), "a\nb\n");
        assert_eq!(render_list(&registry, true, true), "a\nb\nkf\n");

        let listing = render_list(&registry, false, true);
        assert!(listing.contains("tests/a.c (runtime: no, expected: defined)"));
        assert!(listing.contains("tests/b.c (runtime: yes, expected: none)"));
        assert!(listing.contains("Known failures:\n  tests-known-failures/kf.c"));

        let stats = render_stats(&registry);
        assert!(stats.contains("Total tests:            2"));
        assert!(stats.contains("With runtime:           1"));
        assert!(stats.contains("Known failures:         1"));
        assert!(stats.contains("Total expected lines:   2"));
    }

    #[tokio::test]
    async fn test_debug_unknown_test_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let err = debug_test(&ctx, "ghost").await.unwrap_err();
        assert!(err.message.contains("ghost"));
    }

    #[tokio::test]
    async fn test_build_runtime_reports_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let err = build_runtime(&ctx).await.unwrap_err();
        assert!(err.message.starts_with("Failed to build runtime"));
    }
}
