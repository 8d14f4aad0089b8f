//! Shared sentinel and user-facing message text.
//!
//! The engine, the classifier and the reporter all refer to these constants so wording stays aligned.

/// Diagnostic line the compiler writes into its output when it cannot prove a pointer's storage class.
pub const PROVENANCE_SENTINEL: &str = "WARNING: Assuming unknown pointer points to global memory";

pub const PROVENANCE_UNKNOWN_MSG: &str = "pointer provenance unknown";
pub const OUTPUT_MISMATCH_MSG: &str = "Output mismatch";
pub const OUTPUT_MISMATCH_PROVENANCE_MSG: &str = "Output mismatch (likely due to pointer provenance issue)";
pub const UNEXPECTED_PASS_MSG: &str = "Expected to fail but compiled cleanly";
pub const COMPILES_WITH_WARNING_MSG: &str = "Compiles with warnings (pointer provenance issue)";
pub const EXPECTED_COMPILE_FAILURE_MSG: &str = "Compilation failed as expected";
pub const SOURCE_NOT_FOUND_MSG: &str = "Source file not found";
pub const CANCELLED_MSG: &str = "Cancelled before completion";
pub const NOT_EXECUTED_MSG: &str = "Pipeline stopped before execution";
