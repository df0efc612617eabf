//! Error type for scope analysis.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Error type for scope analysis.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum ScopeError {
    /// identifier declared twice in one scope
    #[error("identifier `{name}` has already been declared")]
    #[diagnostic(code(jsflow::duplicate_declaration))]
    DuplicateDeclaration {
        /// Declared name.
        name: String,
        /// Source range.
        #[label("redeclared here")]
        span: SourceSpan,
        /// Source range.
        #[label("first declared here")]
        previous: SourceSpan,
    },
}
