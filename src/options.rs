//! Analysis options.

use crate::analysis::dominators::DominatorAlgorithm;

/// What to run for each function, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Simplify graphs before analyzing them.
    pub cleanup: bool,
    /// Only place phis where their variable is live.
    pub prune_phis: bool,
    /// Algorithm for immediate dominators.
    pub dominators: DominatorAlgorithm,
    /// Also compute post-dominators.
    pub post_dominators: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            cleanup: true,
            prune_phis: true,
            dominators: DominatorAlgorithm::Iterative,
            post_dominators: true,
        }
    }
}
