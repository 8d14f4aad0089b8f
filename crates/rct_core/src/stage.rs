//! Pipeline stages.

use std::fmt;

/// One phase of the compile → assemble → link → execute pipeline.
///
/// `Expand` only exists for the interpreter backend, which must turn the linked macro program into a flat one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Compile,
    Assemble,
    Link,
    Expand,
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Assemble => "assemble",
            Stage::Link => "link",
            Stage::Expand => "expand",
            Stage::Execute => "execute",
        }
    }

    /// Prefix used when reporting a non-zero exit of this stage.
    pub fn failure_label(&self) -> &'static str {
        match self {
            Stage::Compile => "Compilation failed",
            Stage::Assemble => "Assembly failed",
            Stage::Link => "Linking failed",
            Stage::Expand => "Macro expansion failed",
            Stage::Execute => "Execution failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
