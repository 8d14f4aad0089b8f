//! End-to-end pipeline tests against shell-script stand-ins for the toolchain.
//!
//! Each stand-in appends its stage name to a shared log so tests can see exactly which stages ran. The compiler
//! copies the source through as "assembly", so the executing stand-ins read directives straight from the test source:
//!
//! - `// OUTPUT: <line>` prints `<line>`
//! - `COMPILE_ERROR` makes the compiler fail
//! - `PROVENANCE` makes the compiler emit the provenance sentinel into its IR
//! - `SPIN` prints a line, leaves a sleeping grandchild behind, and never exits
#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rct::artifacts::ArtifactManager;
use rct::pipeline::Pipeline;
use rct::process::{CancelToken, ProcessRunner};
use rct::registry::Registry;
use rct::reporter::TestReporter;
use rct::runner::{self, Runner, Selection};
use rct::{BackendKind, RunConfig, SuiteLayout, ToolPaths, Toolchain, backend_for};
use rct_core::{
    ExitPolicy, FailureKind, FinishedRun, Outcome, OutcomeKind, PipelineResult, RunRecord, Stage, TestCase, classify,
};

struct FakeProject {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    layout: SuiteLayout,
    tools: ToolPaths,
}

impl FakeProject {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let layout = SuiteLayout::new(&root);
        fs::create_dir_all(layout.suite_dir.join("tests")).unwrap();
        fs::create_dir_all(layout.suite_dir.join("tests-known-failures")).unwrap();

        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let log = root.join("stages.log");
        let log = log.display();
        let pid_file = root.join("grandchild.pid");
        let pid_file = pid_file.display();

        let rcc = format!(
            r#"echo compile >> "{log}"
src="$2"; asm="$4"; ir="$7"
if grep -q COMPILE_ERROR "$src"; then
  echo "error: unsupported construct" >&2
  exit 1
fi
cp "$src" "$asm"
: > "$ir"
if grep -q PROVENANCE "$src"; then
  echo "WARNING: Assuming unknown pointer points to global memory" >> "$ir"
fi
"#
        );
        let rasm = format!(
            r#"echo "$1" >> "{log}"
cp "$2" "$4"
"#
        );
        let rlink = format!(
            r#"echo link >> "{log}"
prev=""; obj=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -f) obj="$prev"; shift 2; continue ;;
    -o) out="$2"; shift 2; continue ;;
  esac
  prev="$1"; shift
done
cp "$obj" "$out"
"#
        );
        let bfm = format!(
            r#"echo expand >> "{log}"
cp "$2" "$4"
"#
        );
        let execute = format!(
            r#"echo execute >> "{log}"
if grep -q SPIN "$1"; then
  sleep 30 &
  echo $! > "{pid_file}"
  echo tick
  wait
  exit 0
fi
sed -n 's|^// OUTPUT: ||p' "$1"
"#
        );

        let tools = ToolPaths {
            rcc: write_script(&bin, "rcc", &rcc),
            rasm: write_script(&bin, "rasm", &rasm),
            rlink: write_script(&bin, "rlink", &rlink),
            rvm: write_script(&bin, "rvm", &execute),
            bfm: write_script(&bin, "bfm", &bfm),
            bf: write_script(&bin, "bf", &execute),
            runtime_dir: root.join("runtime"),
        };

        Self {
            _tmp: tmp,
            root,
            layout,
            tools,
        }
    }

    fn source(&self, relative: &str, body: &str) {
        fs::write(self.layout.suite_dir.join(relative), body).unwrap();
    }

    fn stages(&self) -> Vec<String> {
        fs::read_to_string(self.root.join("stages.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn pipeline(&self, config: &RunConfig) -> Pipeline {
        Pipeline::new(
            Toolchain::new(self.tools.clone(), config),
            backend_for(config, &self.tools),
            ArtifactManager::new(&self.layout.build_dir),
            self.layout.clone(),
            ProcessRunner::new(config.kill_grace, CancelToken::never()),
            config.timeout,
        )
    }

    async fn run(&self, config: &RunConfig, case: &TestCase) -> (PipelineResult, Outcome) {
        let result = self.pipeline(config).run(case).await;
        let outcome = classify(case, &result).outcome;
        (result, outcome)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(backend: BackendKind) -> RunConfig {
    RunConfig::default()
        .with_backend(backend)
        .with_timeout(Duration::from_secs(1))
        .with_kill_grace(Duration::from_millis(500))
}

#[tokio::test]
async fn hello_passes_on_interpreter_backend() {
    let project = FakeProject::new();
    project.source("tests/hello.c", "// OUTPUT: Hello\nint main(void) { return 0; }\n");
    let case = TestCase::regular("tests/hello.c", Some("Hello\n".into()), true);

    let (_, outcome) = project.run(&config(BackendKind::Bf), &case).await;

    assert_eq!(outcome, Outcome::Passed);
    assert_eq!(project.stages(), ["compile", "assemble", "link", "expand", "execute"]);
}

#[tokio::test]
async fn hello_passes_on_vm_backend_and_disassembles() {
    let project = FakeProject::new();
    project.source("tests/hello.c", "// OUTPUT: Hello\n");
    let case = TestCase::regular("tests/hello.c", Some("Hello\n".into()), false);

    let (_, outcome) = project.run(&config(BackendKind::Rvm), &case).await;

    assert_eq!(outcome, Outcome::Passed);
    assert_eq!(project.stages(), ["compile", "assemble", "link", "execute", "disassemble"]);
}

#[tokio::test]
async fn output_comparison_is_exact() {
    let project = FakeProject::new();
    project.source("tests/hello.c", "// OUTPUT: Hello\n");
    let case = TestCase::regular("tests/hello.c", Some("Hello".into()), true);

    let (_, outcome) = project.run(&config(BackendKind::Rvm), &case).await;

    assert_eq!(outcome, Outcome::Failed(FailureKind::OutputMismatch));
}

#[tokio::test]
async fn provenance_warning_annotates_mismatch() {
    let project = FakeProject::new();
    project.source("tests/ptr.c", "// PROVENANCE\n// OUTPUT: GSSS\n");
    let case = TestCase::regular("tests/ptr.c", Some("GSSSS\n".into()), true);

    let (result, outcome) = project.run(&config(BackendKind::Bf), &case).await;

    assert!(result.provenance_warning());
    assert_eq!(outcome, Outcome::FailedWithWarningAnnotation);
    assert_ne!(outcome, Outcome::Failed(FailureKind::OutputMismatch));
}

#[tokio::test]
async fn compile_failure_stops_the_pipeline() {
    let project = FakeProject::new();
    project.source("tests/broken.c", "COMPILE_ERROR\n// OUTPUT: never\n");
    let case = TestCase::regular("tests/broken.c", Some("never\n".into()), true);

    let (result, outcome) = project.run(&config(BackendKind::Rvm), &case).await;

    assert_eq!(outcome, Outcome::Failed(FailureKind::Stage(Stage::Compile)));
    assert_eq!(project.stages(), ["compile"]);
    match result {
        PipelineResult::StageFailed(failure) => assert!(failure.stderr.contains("unsupported construct")),
        other => panic!("expected a compile failure, got {other:?}"),
    }
}

#[tokio::test]
async fn known_failure_that_compiles_is_unexpected_pass() {
    let project = FakeProject::new();
    project.source("tests-known-failures/fixed.c", "int main(void) { return 0; }\n");
    project.source("tests-known-failures/still_broken.c", "COMPILE_ERROR\n");
    project.source("tests-known-failures/warns.c", "PROVENANCE\n");
    let config = config(BackendKind::Rvm);

    let fixed = TestCase::known_failure("tests-known-failures/fixed.c");
    assert_eq!(project.run(&config, &fixed).await.1, Outcome::UnexpectedPass);
    assert_eq!(project.stages(), ["compile"]);

    let broken = TestCase::known_failure("tests-known-failures/still_broken.c");
    assert_eq!(project.run(&config, &broken).await.1, Outcome::ExpectedFailure);

    let warns = TestCase::known_failure("tests-known-failures/warns.c");
    assert_eq!(project.run(&config, &warns).await.1, Outcome::ExpectedFailure);
}

#[tokio::test]
async fn timeout_kills_process_tree_and_keeps_partial_output() {
    let project = FakeProject::new();
    project.source("tests/spin.c", "SPIN\n");
    let case = TestCase::regular("tests/spin.c", Some("done\n".into()), true);
    let config = config(BackendKind::Rvm);

    let started = Instant::now();
    let (result, outcome) = project.run(&config, &case).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, Outcome::Failed(FailureKind::Timeout(Stage::Execute)));
    assert!(elapsed < config.timeout + config.kill_grace * 2 + Duration::from_secs(2), "took {elapsed:?}");
    match result {
        PipelineResult::Executed(execution) => {
            assert!(execution.timed_out);
            assert_eq!(execution.stdout, "tick\n");
        }
        other => panic!("expected a timed out execution, got {other:?}"),
    }
    // A timed out run never reaches the post-execute step.
    assert!(!project.stages().iter().any(|s| s == "disassemble"));

    #[cfg(target_os = "linux")]
    {
        let pid = fs::read_to_string(project.root.join("grandchild.pid")).unwrap();
        let stat = PathBuf::from(format!("/proc/{}/stat", pid.trim()));
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let alive = match fs::read_to_string(&stat) {
                Ok(text) => text.rsplit(')').next().map(|rest| rest.trim_start().starts_with('Z')) == Some(false),
                Err(_) => false,
            };
            if !alive {
                break;
            }
            assert!(Instant::now() < deadline, "grandchild {} outlived its test", pid.trim());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[tokio::test]
async fn rerun_is_deterministic_and_starts_clean() {
    let project = FakeProject::new();
    project.source("tests/hello.c", "// OUTPUT: Hello\n");
    let case = TestCase::regular("tests/hello.c", Some("Hello\n".into()), true);
    let config = config(BackendKind::Rvm);
    let pipeline = project.pipeline(&config).keep_artifacts(true);
    let image = ArtifactManager::new(&project.layout.build_dir).layout_for(&case.id).image;

    let first = classify(&case, &pipeline.run(&case).await);
    let first_image = fs::read(&image).unwrap();
    let stale = image.with_file_name("stale.txt");
    fs::write(&stale, "left over").unwrap();

    let second = classify(&case, &pipeline.run(&case).await);
    assert_eq!(first, second);
    assert_eq!(fs::read(&image).unwrap(), first_image);
    assert!(!stale.exists());
}

#[derive(Default)]
struct Collect(Vec<RunRecord>);

impl TestReporter for Collect {
    fn on_collection_complete(&mut self, _test_count: usize) {}

    fn on_test_complete(&mut self, record: &RunRecord) {
        self.0.push(record.clone());
    }

    fn on_run_complete(&mut self, _run: &FinishedRun) {}
}

#[tokio::test]
async fn concurrent_tests_do_not_share_artifacts() {
    let project = FakeProject::new();
    let mut registry = Registry::empty(&project.layout.registry_file);
    for i in 0..8 {
        project.source(&format!("tests/t{i}.c"), &format!("// OUTPUT: line {i}\n// OUTPUT: done {i}\n"));
        registry.upsert(format!("tests/t{i}.c"), Some(format!("line {i}\ndone {i}\n")), i % 2 == 0, None);
    }
    registry.save().unwrap();

    let registry = Registry::load(&project.layout.registry_file);
    let plan = runner::plan(&registry, &project.layout, &Selection::Suite { filter: None });
    let runner = Runner::new(project.pipeline(&config(BackendKind::Bf)), 4, ExitPolicy::default());
    let mut reporter = Collect::default();

    let run = runner.run(plan, &mut reporter).await;

    assert_eq!(run.total(), 8);
    assert_eq!(run.count(OutcomeKind::Passed), 8, "{:#?}", run.failures().collect::<Vec<_>>());
    assert_eq!(run.exit_code, 0);
    assert_eq!(reporter.0.len(), 8);
    // Artifacts are purged after each test by default.
    assert_eq!(fs::read_dir(&project.layout.build_dir).map(|d| d.count()).unwrap_or(0), 0);
}

#[tokio::test]
async fn named_run_reports_unknown_and_missing_sources() {
    let project = FakeProject::new();
    project.source("tests/hello.c", "// OUTPUT: Hello\n");
    let mut registry = Registry::empty(&project.layout.registry_file);
    registry.upsert("tests/hello.c", Some("Hello\n".into()), true, None);
    registry.upsert("tests/gone.c", Some("x\n".into()), true, None);

    let names = vec!["hello".to_string(), "gone".to_string(), "ghost".to_string()];
    let plan = runner::plan(&registry, &project.layout, &Selection::Named(names));
    let runner = Runner::new(project.pipeline(&config(BackendKind::Rvm)), 2, ExitPolicy::default());

    let run = runner.run(plan, &mut Collect::default()).await;

    assert_eq!(run.count(OutcomeKind::Passed), 1);
    assert_eq!(run.count(OutcomeKind::Skipped), 1);
    assert_eq!(run.not_found, ["ghost"]);
    assert_eq!(run.exit_code, 0);
}

#[tokio::test]
async fn strict_policy_fails_on_unexpected_pass() {
    let project = FakeProject::new();
    project.source("tests-known-failures/fixed.c", "int main(void) { return 0; }\n");
    let mut registry = Registry::empty(&project.layout.registry_file);
    registry.upsert_known_failure("tests-known-failures/fixed.c", None);
    let plan = || runner::plan(&registry, &project.layout, &Selection::Suite { filter: None });
    let config = config(BackendKind::Rvm);

    let lenient = Runner::new(project.pipeline(&config), 1, ExitPolicy::default())
        .run(plan(), &mut Collect::default())
        .await;
    assert_eq!(lenient.count(OutcomeKind::UnexpectedPass), 1);
    assert_eq!(lenient.exit_code, 0);

    let strict = Runner::new(project.pipeline(&config), 1, ExitPolicy {
        strict_known_failures: true,
    })
    .run(plan(), &mut Collect::default())
    .await;
    assert_eq!(strict.exit_code, 1);
}

#[test]
fn registry_upsert_updates_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tests.json");

    Registry::update(&path, |r| Ok(r.upsert("tests/hello.c", Some("Hello\n".into()), true, None))).unwrap();
    Registry::update(&path, |r| Ok(r.upsert("tests/hello.c", Some("Hi\n".into()), true, None))).unwrap();

    let registry = Registry::load_strict(&path).unwrap();
    assert_eq!(registry.tests().len(), 1);
    assert_eq!(registry.tests()[0].expected.as_deref(), Some("Hi\n"));
}
