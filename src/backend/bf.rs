//! Interpreter backend: macro link, expansion, tape interpreter.

use std::path::{Path, PathBuf};

use rct_core::Stage;

use super::{Backend, LinkFormat};
use crate::artifacts::PipelineArtifacts;
use crate::config::{BackendKind, RunConfig, ToolPaths};
use crate::process::StageCommand;

#[derive(Debug, Clone)]
pub struct BfBackend {
    expander: PathBuf,
    interpreter: PathBuf,
    cell_size: u32,
    tape_size: u64,
}

impl BfBackend {
    pub fn new(tools: &ToolPaths, config: &RunConfig) -> Self {
        Self {
            expander: tools.bfm.clone(),
            interpreter: tools.bf.clone(),
            cell_size: config.cell_size,
            tape_size: config.tape_size,
        }
    }
}

impl Backend for BfBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Bf
    }

    fn link_format(&self) -> LinkFormat {
        LinkFormat::Macro
    }

    fn linked_artifact<'a>(&self, artifacts: &'a PipelineArtifacts) -> &'a Path {
        &artifacts.macro_program
    }

    /// `bfm expand <bfm> -o <expanded>`
    fn prepare(&self, artifacts: &PipelineArtifacts) -> Vec<(Stage, StageCommand)> {
        let expand = StageCommand::new(&self.expander)
            .arg("expand")
            .arg(&artifacts.macro_program)
            .arg("-o")
            .arg(&artifacts.expanded);
        vec![(Stage::Expand, expand)]
    }

    /// `bf <expanded> --cell-size N --tape-size M`
    fn execute(&self, artifacts: &PipelineArtifacts) -> StageCommand {
        StageCommand::new(&self.interpreter)
            .arg(&artifacts.expanded)
            .arg("--cell-size")
            .arg(self.cell_size.to_string())
            .arg("--tape-size")
            .arg(self.tape_size.to_string())
    }
}
