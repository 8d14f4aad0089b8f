//! Pipeline driver.
//!
//! Runs Compile → Assemble → Link → (backend preparation) → Execute for one test. The first stage that exits
//! non-zero, times out, or cannot be started ends the pipeline; later stages are never invoked and artifacts of the
//! failed stage are never read.
//!
//! The provenance warning is detected once, right after a successful compile, and carried unchanged into every
//! later result.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rct_core::{ExecutionResult, PipelineResult, Stage, StageFailure, TestCase, decode_lossy, has_provenance_warning};

use crate::artifacts::{ArtifactManager, PipelineArtifacts};
use crate::backend::{Backend, Toolchain};
use crate::config::SuiteLayout;
use crate::process::{ProcessError, ProcessOutput, ProcessRunner, StageCommand};

/// Early exit from the pipeline, already shaped as the final result.
type Stop = PipelineResult;

/// Drives single-test pipelines. Shared by every worker in a run.
pub struct Pipeline {
    toolchain: Toolchain,
    backend: Arc<dyn Backend>,
    artifacts: ArtifactManager,
    layout: SuiteLayout,
    processes: ProcessRunner,
    timeout: Duration,
    keep_artifacts: bool,
}

impl Pipeline {
    pub fn new(
        toolchain: Toolchain,
        backend: Arc<dyn Backend>,
        artifacts: ArtifactManager,
        layout: SuiteLayout,
        processes: ProcessRunner,
        timeout: Duration,
    ) -> Self {
        Self {
            toolchain,
            backend,
            artifacts,
            layout,
            processes,
            timeout,
            keep_artifacts: false,
        }
    }

    /// Leave each test's artifact directory in place after it finishes.
    pub fn keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn processes(&self) -> &ProcessRunner {
        &self.processes
    }

    /// Run the full pipeline for `case`.
    ///
    /// Known failures stop after Compile: only whether they compile (and whether the provenance warning fired)
    /// matters for them.
    #[tracing::instrument(name = "pipeline", skip_all, fields(test = %case.id, backend = %self.backend.kind()))]
    pub async fn run(&self, case: &TestCase) -> PipelineResult {
        let source = self.layout.source_path(&case.source);
        if !source.is_file() {
            tracing::debug!(path = %source.display(), "source missing");
            return PipelineResult::SourceMissing { path: case.source.clone() };
        }
        if self.processes.cancel_token().is_cancelled() {
            return PipelineResult::Cancelled;
        }

        let artifacts = match self.artifacts.allocate(&case.id).await {
            Ok(artifacts) => artifacts,
            Err(err) => return setup_failure(format!("failed to prepare artifact directory: {err}")),
        };

        let result = self.drive(case, &source, &artifacts).await.unwrap_or_else(|stop| stop);

        if let Err(err) = self.artifacts.release(artifacts, self.keep_artifacts).await {
            tracing::warn!(error = %err, "failed to remove artifacts");
        }
        result
    }

    /// Build `case` through every stage before Execute and keep its artifacts.
    ///
    /// Used to hand a built program to an interactive session.
    pub async fn build(&self, case: &TestCase) -> Result<PipelineArtifacts, PipelineResult> {
        let source = self.layout.source_path(&case.source);
        if !source.is_file() {
            return Err(PipelineResult::SourceMissing { path: case.source.clone() });
        }
        let artifacts = self
            .artifacts
            .allocate(&case.id)
            .await
            .map_err(|err| setup_failure(format!("failed to prepare artifact directory: {err}")))?;

        let warning = self.compile(&source, &artifacts).await?;
        self.assemble_and_link(case, &artifacts, warning).await?;
        Ok(artifacts)
    }

    async fn drive(
        &self,
        case: &TestCase,
        source: &Path,
        artifacts: &PipelineArtifacts,
    ) -> Result<PipelineResult, Stop> {
        let warning = self.compile(source, artifacts).await?;
        if case.is_known_failure() {
            return Ok(PipelineResult::Compiled {
                provenance_warning: warning,
            });
        }

        self.assemble_and_link(case, artifacts, warning).await?;

        let command = self.backend.execute(artifacts);
        let output = match self.processes.run(&command, self.timeout).await {
            Ok(output) => output,
            Err(err) => return Err(process_failure(Stage::Execute, err, warning)),
        };
        tracing::debug!(exit_code = ?output.exit_code, timed_out = output.timed_out, elapsed = ?output.elapsed, "executed");

        if !output.timed_out {
            self.after_execute(artifacts).await;
        }

        Ok(PipelineResult::Executed(ExecutionResult {
            exit_code: output.exit_code,
            stdout: decode_lossy(&output.stdout),
            stderr: decode_lossy(&output.stderr),
            timed_out: output.timed_out,
            provenance_warning: warning,
        }))
    }

    /// Compile and report whether the provenance warning fired.
    async fn compile(&self, source: &Path, artifacts: &PipelineArtifacts) -> Result<bool, Stop> {
        let command = self.toolchain.compile(source, artifacts);
        let output = self.stage(Stage::Compile, &command, false).await?;
        Ok(scan_provenance(artifacts, &output).await)
    }

    async fn assemble_and_link(
        &self,
        case: &TestCase,
        artifacts: &PipelineArtifacts,
        warning: bool,
    ) -> Result<(), Stop> {
        self.stage(Stage::Assemble, &self.toolchain.assemble(artifacts), warning).await?;

        let link = self.toolchain.link(artifacts, case.uses_runtime, self.backend.as_ref());
        self.stage(Stage::Link, &link, warning).await?;

        for (stage, command) in self.backend.prepare(artifacts) {
            self.stage(stage, &command, warning).await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(stage = %stage))]
    async fn stage(&self, stage: Stage, command: &StageCommand, warning: bool) -> Result<ProcessOutput, Stop> {
        match self.processes.run(command, self.timeout).await {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => {
                tracing::debug!(exit_code = ?output.exit_code, timed_out = output.timed_out, "stage failed");
                Err(PipelineResult::StageFailed(StageFailure {
                    stage,
                    exit_code: output.exit_code,
                    stdout: decode_lossy(&output.stdout),
                    stderr: decode_lossy(&output.stderr),
                    timed_out: output.timed_out,
                    provenance_warning: warning,
                }))
            }
            Err(err) => Err(process_failure(stage, err, warning)),
        }
    }

    /// Best effort; never changes the test's result.
    async fn after_execute(&self, artifacts: &PipelineArtifacts) {
        let Some(command) = self.backend.after_execute(artifacts) else {
            return;
        };
        match self.processes.run(&command, self.timeout).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::debug!(exit_code = ?output.exit_code, "post-execute step failed"),
            Err(err) => tracing::debug!(error = %err, "post-execute step did not run"),
        }
    }
}

/// The compiler may emit the sentinel into its assembly, its IR dump, or its diagnostics.
async fn scan_provenance(artifacts: &PipelineArtifacts, output: &ProcessOutput) -> bool {
    for path in [&artifacts.assembly, &artifacts.ir] {
        if let Ok(bytes) = tokio::fs::read(path).await {
            if has_provenance_warning(&decode_lossy(&bytes)) {
                return true;
            }
        }
    }
    has_provenance_warning(&decode_lossy(&output.stdout)) || has_provenance_warning(&decode_lossy(&output.stderr))
}

fn process_failure(stage: Stage, err: ProcessError, warning: bool) -> PipelineResult {
    match err {
        ProcessError::Cancelled => PipelineResult::Cancelled,
        other => PipelineResult::StageFailed(StageFailure {
            stage,
            exit_code: None,
            stdout: String::new(),
            stderr: other.to_string(),
            timed_out: false,
            provenance_warning: warning,
        }),
    }
}

fn setup_failure(message: String) -> PipelineResult {
    PipelineResult::StageFailed(StageFailure {
        stage: Stage::Compile,
        exit_code: None,
        stdout: String::new(),
        stderr: message,
        timed_out: false,
        provenance_warning: false,
    })
}
