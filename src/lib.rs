//! Control flow graphs, dominators, liveness and SSA for JavaScript function
//! bodies.
//!
//! A front end hands over an ESTree-shaped [`ast::Ast`]. Each function is
//! lowered into a [`cfg::BlockGraph`], simplified, and analysed on its own;
//! see [`analyze_program`].
#![deny(missing_docs)]

#[macro_use]
#[doc(hidden)]
pub mod logger_setup {
    #[macro_export]
    #[cfg(feature = "trace")]
    macro_rules! color {
        ( [trace] ) => {
            "\x1B[34m"
        };
        ( [debug] ) => {
            "\x1B[36m"
        };
        ( [info]  ) => {
            "\x1B[32m"
        };
        ( [warn]  ) => {
            "\x1B[33m"
        };
        ( [error] ) => {
            "\x1B[31m"
        };
        ( [crit]  ) => {
            "\x1B[35m"
        };
        ( [sep]   ) => {
            "\x1B[1m\x1B[2m"
        }; // +bold +dim
        ( [msg]   ) => {
            ""
        }; // default term font color
        ( [from]  ) => {
            "\x1B[90m\x1B[3m"
        }; // `[src/main.rs 101:5]` in `location_style_classic`
        ( [sep2]  ) => {
            "\x1B[90m\x1B[2m"
        }; // sep2 in default style
        ( [sep3]  ) => {
            "\x1B[90m\x1B[2m"
        }; // sep3 in default style
        ( [line]  ) => {
            "\x1B[38;5;67m\x1B[1m\x1B[2m"
        }; // line number in default style
        ( [key]   ) => {
            "\x1B[3m\x1B[1m"
        }; // +italic +bold
        ( [value] ) => {
            ""
        }; // default term font color
        ( [rm]    ) => {
            "\x1B[0m"
        }; // remove previous colors
    }
}

pub mod analysis;
pub mod ast;
pub mod cfg;
pub mod options;
pub mod scope;

pub use analysis::dominators::{DominatorAlgorithm, Dominators};
pub use analysis::liveliness::Liveliness;
pub use analysis::ssa::SsaForm;
pub use analysis::{analyze_program, Analyzer, FunctionAnalysis, ProgramAnalysis};
pub use options::AnalysisOptions;
