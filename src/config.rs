//! Run configuration, tool locations and suite layout.
//!
//! Defaults follow the toolchain's conventions: a 2 second stage budget, 16 KiB memory banks, and tools built into
//! the usual `target/release` locations under the project root.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the project root when `--project-root` is absent.
pub const PROJECT_ROOT_ENV: &str = "RCT_PROJECT_ROOT";

/// Directory (relative to the project root) that holds the test suite.
pub const SUITE_DIR: &str = "c-test";

/// Upper bound on concurrently running pipelines.
pub const MAX_JOBS: usize = 1024;

/// Source directories scanned, in order, for tests that are not in the registry.
pub const SEARCH_DIRS: [&str; 4] = ["tests", "examples", "tests-known-failures", "known-failures"];

/// Which execution backend runs the linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Macro-expanded program run on a tape interpreter.
    Bf,
    /// Flat binary image run on the virtual machine.
    #[default]
    Rvm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Bf => "bf",
            BackendKind::Rvm => "rvm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs for a verification run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub backend: BackendKind,
    /// Wall-clock budget for each stage invocation
    pub timeout: Duration,
    /// Assembler and linker memory bank size
    pub bank_size: u32,
    /// Largest immediate the assembler may encode
    pub max_immediate: u32,
    /// Virtual machine memory size in bytes
    pub vm_memory: u64,
    /// Interpreter cell width in bits
    pub cell_size: u32,
    /// Interpreter tape length in cells
    pub tape_size: u64,
    /// Echo program output for every test
    pub verbose: bool,
    /// Purge per-test artifacts after a run
    pub cleanup: bool,
    /// Maximum number of tests in flight
    pub jobs: usize,
    /// Fail the run when a known failure unexpectedly passes
    pub strict_known_failures: bool,
    /// How long to wait for a killed process group to be reaped
    pub kill_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Rvm,
            timeout: Duration::from_secs(2),
            bank_size: 16384,
            max_immediate: 65535,
            vm_memory: 4_294_967_296,
            cell_size: 16,
            tape_size: 150_000_000,
            verbose: false,
            cleanup: true,
            jobs: default_jobs(),
            strict_known_failures: false,
            kill_grace: Duration::from_secs(2),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bank_size(mut self, bank_size: u32) -> Self {
        self.bank_size = bank_size;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Clamped to `1..=MAX_JOBS`.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.clamp(1, MAX_JOBS);
        self
    }

    pub fn with_strict_known_failures(mut self, strict: bool) -> Self {
        self.strict_known_failures = strict;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(MAX_JOBS)
}

// ============================================================================
// Tool locations
// ============================================================================

/// Locations of the external toolchain binaries and runtime objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub rcc: PathBuf,
    pub rasm: PathBuf,
    pub rlink: PathBuf,
    pub rvm: PathBuf,
    pub bfm: PathBuf,
    pub bf: PathBuf,
    pub runtime_dir: PathBuf,
}

impl ToolPaths {
    /// Conventional locations under `root`. The macro expander and interpreter are looked up on `PATH`.
    pub fn for_project(root: &Path) -> Self {
        Self {
            rcc: root.join("target/release/rcc"),
            rasm: root.join("src/ripple-asm/target/release/rasm"),
            rlink: root.join("src/ripple-asm/target/release/rlink"),
            rvm: root.join("target/release/rvm"),
            bfm: PathBuf::from("bfm"),
            bf: PathBuf::from("bf"),
            runtime_dir: root.join("runtime"),
        }
    }

    /// Apply `RCT_RCC`, `RCT_RASM`, `RCT_RLINK`, `RCT_RVM`, `RCT_BFM` and `RCT_BF` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var_os(key))
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let slots: [(&str, &mut PathBuf); 6] = [
            ("RCT_RCC", &mut self.rcc),
            ("RCT_RASM", &mut self.rasm),
            ("RCT_RLINK", &mut self.rlink),
            ("RCT_RVM", &mut self.rvm),
            ("RCT_BFM", &mut self.bfm),
            ("RCT_BF", &mut self.bf),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
        self
    }

    /// Startup object linked into every program.
    pub fn crt0(&self) -> PathBuf {
        self.runtime_dir.join("crt0.pobj")
    }

    /// Full runtime archive, linked when a test uses the runtime.
    pub fn libruntime(&self) -> PathBuf {
        self.runtime_dir.join("libruntime.par")
    }
}

// ============================================================================
// Suite layout
// ============================================================================

/// Where the suite's sources, registry and build outputs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteLayout {
    pub project_root: PathBuf,
    /// Registry `file` entries are relative to this directory.
    pub suite_dir: PathBuf,
    pub registry_file: PathBuf,
    pub build_dir: PathBuf,
}

impl SuiteLayout {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let suite_dir = project_root.join(SUITE_DIR);
        Self {
            registry_file: suite_dir.join("tests.json"),
            build_dir: suite_dir.join("build"),
            suite_dir,
            project_root,
        }
    }

    pub fn with_registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_file = path.into();
        self
    }

    pub fn with_build_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_dir = path.into();
        self
    }

    /// Absolute location of a suite-relative source path.
    pub fn source_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.suite_dir.join(relative)
        }
    }

    pub fn search_dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        SEARCH_DIRS.iter().map(|dir| self.suite_dir.join(dir))
    }
}

/// Resolve the project root: explicit flag, then `RCT_PROJECT_ROOT`, then auto-detection from the working directory.
pub fn resolve_project_root(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(root) = explicit {
        return root;
    }
    if let Some(root) = env::var_os(PROJECT_ROOT_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(root);
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    detect_project_root(&cwd).unwrap_or(cwd)
}

/// First ancestor of `start` (inclusive) that contains the suite directory.
pub fn detect_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(SUITE_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.backend, BackendKind::Rvm);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.bank_size, 16384);
        assert_eq!(config.max_immediate, 65535);
        assert_eq!(config.vm_memory, 4_294_967_296);
        assert_eq!(config.cell_size, 16);
        assert_eq!(config.tape_size, 150_000_000);
        assert!(config.cleanup);
        assert!(!config.strict_known_failures);
        assert!(config.jobs >= 1);
    }

    #[test]
    fn test_builder_pattern() {
        let config = RunConfig::new()
            .with_backend(BackendKind::Bf)
            .with_timeout(Duration::from_secs(10))
            .with_bank_size(4096)
            .with_verbose(true)
            .with_cleanup(false)
            .with_strict_known_failures(true);

        assert_eq!(config.backend, BackendKind::Bf);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.bank_size, 4096);
        assert!(config.verbose);
        assert!(!config.cleanup);
        assert!(config.strict_known_failures);
    }

    #[test]
    fn test_jobs_never_zero() {
        assert_eq!(RunConfig::new().with_jobs(0).jobs, 1);
        assert_eq!(RunConfig::new().with_jobs(8).jobs, 8);
        assert_eq!(RunConfig::new().with_jobs(usize::MAX).jobs, MAX_JOBS);
    }

    #[test]
    fn test_tool_paths_defaults() {
        let tools = ToolPaths::for_project(Path::new("/proj"));
        assert_eq!(tools.rcc, PathBuf::from("/proj/target/release/rcc"));
        assert_eq!(tools.rlink, PathBuf::from("/proj/src/ripple-asm/target/release/rlink"));
        assert_eq!(tools.crt0(), PathBuf::from("/proj/runtime/crt0.pobj"));
        assert_eq!(tools.libruntime(), PathBuf::from("/proj/runtime/libruntime.par"));
    }

    #[test]
    fn test_tool_path_overrides() {
        let tools = ToolPaths::for_project(Path::new("/proj")).with_overrides(|key| match key {
            "RCT_RCC" => Some(OsString::from("/opt/rcc")),
            "RCT_BF" => Some(OsString::new()),
            _ => None,
        });
        assert_eq!(tools.rcc, PathBuf::from("/opt/rcc"));
        assert_eq!(tools.bf, PathBuf::from("bf"));
        assert_eq!(tools.rasm, PathBuf::from("/proj/src/ripple-asm/target/release/rasm"));
    }

    #[test]
    fn test_suite_layout() {
        let layout = SuiteLayout::new("/proj");
        assert_eq!(layout.registry_file, PathBuf::from("/proj/c-test/tests.json"));
        assert_eq!(layout.build_dir, PathBuf::from("/proj/c-test/build"));
        assert_eq!(layout.source_path(Path::new("tests/a.c")), PathBuf::from("/proj/c-test/tests/a.c"));
        let dirs: Vec<PathBuf> = layout.search_dirs().collect();
        assert_eq!(dirs[0], PathBuf::from("/proj/c-test/tests"));
        assert_eq!(dirs.len(), 4);
    }

    #[test]
    fn test_detect_project_root_walks_up() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(tmp.path().join(SUITE_DIR)).unwrap();
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(detect_project_root(&nested).unwrap(), tmp.path());
    }

    #[test]
    fn test_explicit_project_root_wins() {
        let root = resolve_project_root(Some(PathBuf::from("/explicit")));
        assert_eq!(root, PathBuf::from("/explicit"));
    }
}
