//! Error type for graph construction.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Error type for graph construction.
#[derive(Error, Debug, Diagnostic)]
pub enum BuildError {
    /// break statement outside of a loop or switch
    #[error("break statement not within a loop or switch")]
    #[diagnostic(code(jsflow::break_outside))]
    BreakOutside {
        /// Source range.
        #[label("nothing to break out of")]
        span: SourceSpan,
    },

    /// continue statement outside of a loop
    #[error("continue statement not within a loop")]
    #[diagnostic(code(jsflow::continue_outside))]
    ContinueOutside {
        /// Source range.
        #[label("no enclosing loop")]
        span: SourceSpan,
    },

    /// jump to an unknown label
    #[error("label `{label}` not found")]
    #[diagnostic(code(jsflow::label_not_found))]
    LabelNotFound {
        /// Label name.
        label: String,
        /// Source range.
        #[label("undefined label")]
        span: SourceSpan,
    },

    /// continue to a label that does not name a loop
    #[error("label `{label}` does not denote a loop")]
    #[diagnostic(code(jsflow::continue_to_non_loop))]
    ContinueToNonLoop {
        /// Label name.
        label: String,
        /// Source range.
        #[label("cannot continue here")]
        span: SourceSpan,
    },

    /// node that cannot appear where it was found
    #[error("unexpected {node_type} in statement position")]
    #[diagnostic(code(jsflow::unexpected_node))]
    UnexpectedNode {
        /// Type name of the offending node.
        node_type: String,
        /// Source range.
        #[label("unexpected here")]
        span: SourceSpan,
    },

    /// unit passed to the builder is not a function or program
    #[error("{node_type} is not a function or program")]
    #[diagnostic(code(jsflow::not_a_function))]
    NotAFunction {
        /// Type name of the offending node.
        node_type: String,
        /// Source range.
        #[label("expected a function")]
        span: SourceSpan,
    },

    /// edge looked up but absent
    #[error("no edge from block {from} to block {to}")]
    #[diagnostic(code(jsflow::missing_edge))]
    MissingEdge {
        /// Source block.
        from: usize,
        /// Target block.
        to: usize,
    },

    /// broken structural invariant of a graph
    #[error("graph invariant violated: {message}")]
    #[diagnostic(code(jsflow::invariant))]
    InvariantViolation {
        /// What was violated.
        message: String,
    },

    /// cleanup kept changing the graph
    #[error("cleanup did not settle after {passes} passes")]
    #[diagnostic(code(jsflow::cleanup_diverged))]
    CleanupDiverged {
        /// Passes run.
        passes: usize,
    },
}
