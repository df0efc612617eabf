//! Error type for analysis.

use miette::Diagnostic;
use thiserror::Error;

/// Error type for analysis.
#[derive(Error, Debug, Diagnostic)]
pub enum AnalysisError {
    /// A fixpoint iteration ran past its cap.
    #[error("{analysis} did not converge after {iterations} iterations")]
    #[diagnostic(code(jsflow::fixpoint_diverged), help("the block graph is probably malformed"))]
    FixpointDiverged {
        /// Which analysis.
        analysis: &'static str,
        /// Iterations run.
        iterations: usize,
    },

    /// Internal bookkeeping went wrong.
    #[error("analysis invariant violated: {message}")]
    #[diagnostic(code(jsflow::analysis_invariant))]
    InvariantViolation {
        /// What went wrong.
        message: String,
    },
}
