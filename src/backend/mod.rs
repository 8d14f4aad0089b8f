//! Execution backends.
//!
//! Both backends share compile → assemble → link and diverge at the link output format and at how the linked
//! program is run. A backend never launches anything itself: it describes the commands it needs as
//! [`StageCommand`]s and the pipeline driver executes them under its timeout and cancellation rules.
//!
//! ## Backends
//!
//! - [`BfBackend`]: link to a macro program, expand it to a flat tape program, run it on the interpreter.
//! - [`RvmBackend`]: link to a flat binary image and run it on the virtual machine.

mod bf;
mod rvm;

use std::path::Path;
use std::sync::Arc;

pub use bf::BfBackend;
use rct_core::Stage;
pub use rvm::RvmBackend;

use crate::artifacts::PipelineArtifacts;
use crate::config::{BackendKind, RunConfig, ToolPaths};
use crate::process::StageCommand;

/// Output format requested from the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormat {
    /// Flat binary image
    Binary,
    /// Self-contained macro program text
    Macro,
}

impl LinkFormat {
    fn args(&self) -> &'static [&'static str] {
        match self {
            LinkFormat::Binary => &["-f", "binary"],
            LinkFormat::Macro => &["-f", "macro", "--standalone"],
        }
    }
}

/// Strategy for turning an assembled object into captured program output.
///
/// Implementations are pure command planners so they can be shared across concurrent pipelines.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn link_format(&self) -> LinkFormat;

    /// Where the linker should write its output.
    fn linked_artifact<'a>(&self, artifacts: &'a PipelineArtifacts) -> &'a Path;

    /// Stages that must run between link and execute.
    fn prepare(&self, _artifacts: &PipelineArtifacts) -> Vec<(Stage, StageCommand)> {
        Vec::new()
    }

    /// The Execute stage invocation.
    fn execute(&self, artifacts: &PipelineArtifacts) -> StageCommand;

    /// Best-effort follow-up after a successful Execute. Its result never affects classification.
    fn after_execute(&self, _artifacts: &PipelineArtifacts) -> Option<StageCommand> {
        None
    }

    /// Invocation that hands the terminal to the backend's own trace facility, if it has one.
    fn interactive(&self, _artifacts: &PipelineArtifacts) -> Option<StageCommand> {
        None
    }
}

/// Commands for the stages both backends share.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub tools: ToolPaths,
    pub bank_size: u32,
    pub max_immediate: u32,
}

impl Toolchain {
    pub fn new(tools: ToolPaths, config: &RunConfig) -> Self {
        Self {
            tools,
            bank_size: config.bank_size,
            max_immediate: config.max_immediate,
        }
    }

    /// `rcc compile <src> -o <asm> --save-ir --ir-output <ir>`
    pub fn compile(&self, source: &Path, artifacts: &PipelineArtifacts) -> StageCommand {
        StageCommand::new(&self.tools.rcc)
            .arg("compile")
            .arg(source)
            .arg("-o")
            .arg(&artifacts.assembly)
            .arg("--save-ir")
            .arg("--ir-output")
            .arg(&artifacts.ir)
    }

    /// `rasm assemble <asm> -o <obj> --bank-size N --max-immediate M`
    pub fn assemble(&self, artifacts: &PipelineArtifacts) -> StageCommand {
        StageCommand::new(&self.tools.rasm)
            .arg("assemble")
            .arg(&artifacts.assembly)
            .arg("-o")
            .arg(&artifacts.object)
            .arg("--bank-size")
            .arg(self.bank_size.to_string())
            .arg("--max-immediate")
            .arg(self.max_immediate.to_string())
    }

    /// `rlink <crt0> [libruntime] <obj> <format> --bank-size N -o <out>`
    pub fn link(&self, artifacts: &PipelineArtifacts, uses_runtime: bool, backend: &dyn Backend) -> StageCommand {
        let mut command = StageCommand::new(&self.tools.rlink).arg(self.tools.crt0());
        if uses_runtime {
            command = command.arg(self.tools.libruntime());
        }
        command
            .arg(&artifacts.object)
            .args(backend.link_format().args())
            .arg("--bank-size")
            .arg(self.bank_size.to_string())
            .arg("-o")
            .arg(backend.linked_artifact(artifacts))
    }
}

/// Build the backend selected by `config`.
pub fn backend_for(config: &RunConfig, tools: &ToolPaths) -> Arc<dyn Backend> {
    match config.backend {
        BackendKind::Bf => Arc::new(BfBackend::new(tools, config)),
        BackendKind::Rvm => Arc::new(RvmBackend::new(tools, config)),
    }
}
