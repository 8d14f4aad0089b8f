//! Virtual machine backend: binary link, direct execution.

use std::path::{Path, PathBuf};

use super::{Backend, LinkFormat};
use crate::artifacts::PipelineArtifacts;
use crate::config::{BackendKind, RunConfig, ToolPaths};
use crate::process::StageCommand;

#[derive(Debug, Clone)]
pub struct RvmBackend {
    vm: PathBuf,
    disassembler: PathBuf,
    memory: u64,
}

impl RvmBackend {
    pub fn new(tools: &ToolPaths, config: &RunConfig) -> Self {
        Self {
            vm: tools.rvm.clone(),
            disassembler: tools.rasm.clone(),
            memory: config.vm_memory,
        }
    }

    fn vm_command(&self, artifacts: &PipelineArtifacts) -> StageCommand {
        StageCommand::new(&self.vm)
            .arg(&artifacts.image)
            .arg("--memory")
            .arg(self.memory.to_string())
    }
}

impl Backend for RvmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Rvm
    }

    fn link_format(&self) -> LinkFormat {
        LinkFormat::Binary
    }

    fn linked_artifact<'a>(&self, artifacts: &'a PipelineArtifacts) -> &'a Path {
        &artifacts.image
    }

    /// `rvm <bin> --memory N`
    fn execute(&self, artifacts: &PipelineArtifacts) -> StageCommand {
        self.vm_command(artifacts)
    }

    /// `rasm disassemble <bin> -o <id>.disassembly.asm`
    fn after_execute(&self, artifacts: &PipelineArtifacts) -> Option<StageCommand> {
        Some(
            StageCommand::new(&self.disassembler)
                .arg("disassemble")
                .arg(&artifacts.image)
                .arg("-o")
                .arg(&artifacts.disassembly),
        )
    }

    /// `rvm <bin> --memory N -t`
    fn interactive(&self, artifacts: &PipelineArtifacts) -> Option<StageCommand> {
        Some(self.vm_command(artifacts).arg("-t"))
    }
}
