//! Program analysis.
//!
//! Every function, arrow function and the top-level program is a unit of its
//! own. Units are analyzed independently: a unit that fails to build is
//! reported and skipped while the others go on.

use std::collections::HashMap;
use std::rc::Rc;

use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use crate::analysis::dominators::Dominators;
use crate::analysis::liveliness::Liveliness;
use crate::analysis::ssa::SsaForm;
use crate::ast::{Ast, NodeId};
use crate::cfg::cleanup::cleanup;
use crate::cfg::{BlockGraph, CfgBuilder};
use crate::options::AnalysisOptions;
use crate::scope::ScopeTree;

pub mod dominators;
pub mod error;
pub mod liveliness;
pub mod ssa;

#[cfg(test)]
mod properties;

/// Everything computed for one unit.
#[derive(Debug)]
pub struct FunctionAnalysis {
    /// Function or program node.
    pub function: NodeId,
    /// Block graph with versioned accesses.
    pub cfg: BlockGraph,
    /// Dominator tree.
    pub dominators: Rc<Dominators>,
    /// Post-dominator tree, when asked for.
    pub post_dominators: Option<Rc<Dominators>>,
    /// Liveliness sets.
    pub liveliness: Rc<Liveliness>,
    /// Phis and versions.
    pub ssa: SsaForm,
}

/// Program analyser.
pub struct Analyzer<'a> {
    ast: &'a Ast,
    scopes: ScopeTree,
    options: AnalysisOptions,
    cfg_cache: HashMap<NodeId, Rc<BlockGraph>>,
    dominators_cache: HashMap<NodeId, Rc<Dominators>>,
    post_dominators_cache: HashMap<NodeId, Rc<Dominators>>,
    liveliness_cache: HashMap<NodeId, Rc<Liveliness>>,
    analysis_cache: HashMap<NodeId, Rc<FunctionAnalysis>>,
}

impl<'a> Analyzer<'a> {
    /// Create a new program analyser.
    pub fn new(ast: &'a Ast, options: AnalysisOptions) -> Self {
        Self {
            ast,
            scopes: ScopeTree::analyze(ast),
            options,
            cfg_cache: HashMap::new(),
            dominators_cache: HashMap::new(),
            post_dominators_cache: HashMap::new(),
            liveliness_cache: HashMap::new(),
            analysis_cache: HashMap::new(),
        }
    }

    /// Get the tree being analysed.
    pub fn ast(&self) -> &Ast { self.ast }

    /// Scopes of the tree.
    pub fn scopes(&self) -> &ScopeTree { &self.scopes }

    /// Options in effect.
    pub fn options(&self) -> &AnalysisOptions { &self.options }

    /// Analysis units: the program first, then functions in tree order.
    pub fn functions(&self) -> Vec<NodeId> { self.ast.root().into_iter().chain(self.ast.functions()).collect() }

    /// Build the block graph of a unit, cleaned up if the options say so,
    /// with classified edges.
    pub fn analyze_cfg(&mut self, func: NodeId) -> Result<Rc<BlockGraph>> {
        if let Some(cfg) = self.cfg_cache.get(&func) {
            return Ok(cfg.clone());
        }
        let mut cfg = CfgBuilder::build(self.ast, &self.scopes, func)?;
        if self.options.cleanup {
            let passes = cleanup(&mut cfg)?;
            trace!("CFG " => "{} cleaned in {} passes", func, passes);
        }
        cfg.classify_edges();
        let cfg = Rc::new(cfg);
        self.cfg_cache.insert(func, cfg.clone());
        Ok(cfg)
    }

    /// Analyse dominators tree of a unit.
    pub fn analyze_dominators(&mut self, func: NodeId) -> Result<Rc<Dominators>> {
        if let Some(dominators) = self.dominators_cache.get(&func) {
            return Ok(dominators.clone());
        }
        let cfg = self.analyze_cfg(func)?;
        let dominators = Rc::new(Dominators::analyze(cfg.as_ref(), self.options.dominators)?);
        self.dominators_cache.insert(func, dominators.clone());
        Ok(dominators)
    }

    /// Analyse post-dominators tree of a unit.
    pub fn analyze_post_dominators(&mut self, func: NodeId) -> Result<Rc<Dominators>> {
        if let Some(dominators) = self.post_dominators_cache.get(&func) {
            return Ok(dominators.clone());
        }
        let cfg = self.analyze_cfg(func)?;
        let dominators = Rc::new(Dominators::analyze_post(cfg.as_ref(), self.options.dominators)?);
        self.post_dominators_cache.insert(func, dominators.clone());
        Ok(dominators)
    }

    /// Analyse variable liveliness of a unit.
    pub fn analyze_liveliness(&mut self, func: NodeId) -> Result<Rc<Liveliness>> {
        if let Some(liveliness) = self.liveliness_cache.get(&func) {
            return Ok(liveliness.clone());
        }
        let cfg = self.analyze_cfg(func)?;
        let liveliness = Rc::new(Liveliness::analyze(cfg.as_ref())?);
        self.liveliness_cache.insert(func, liveliness.clone());
        Ok(liveliness)
    }

    /// Run every analysis on a unit, ending with SSA renaming on a copy of
    /// its block graph.
    pub fn analyze(&mut self, func: NodeId) -> Result<Rc<FunctionAnalysis>> {
        if let Some(analysis) = self.analysis_cache.get(&func) {
            return Ok(analysis.clone());
        }
        let cfg = self.analyze_cfg(func)?;
        let dominators = self.analyze_dominators(func)?;
        let post_dominators = match self.options.post_dominators {
            true => Some(self.analyze_post_dominators(func)?),
            false => None,
        };
        let liveliness = self.analyze_liveliness(func)?;

        let mut cfg = cfg.as_ref().clone();
        let pruning = self.options.prune_phis.then_some(liveliness.as_ref());
        let ssa = SsaForm::build(&mut cfg, dominators.as_ref(), pruning)?;
        trace!("SSA " => "{} has {} phis", func, ssa.phi_count());

        let analysis = Rc::new(FunctionAnalysis {
            function: func,
            cfg,
            dominators,
            post_dominators,
            liveliness,
            ssa,
        });
        self.analysis_cache.insert(func, analysis.clone());
        Ok(analysis)
    }
}

/// Result of one unit.
#[derive(Debug)]
pub struct UnitAnalysis {
    /// Function or program node.
    pub function: NodeId,
    /// The analysis, or why the unit was skipped.
    pub result: Result<Rc<FunctionAnalysis>>,
}

/// Results of every unit of a program.
#[derive(Debug, Default)]
pub struct ProgramAnalysis {
    /// One entry per unit, in [`Analyzer::functions`] order.
    pub units: Vec<UnitAnalysis>,
}

impl ProgramAnalysis {
    /// Result of a unit.
    pub fn get(&self, function: NodeId) -> Option<&Result<Rc<FunctionAnalysis>>> {
        self.units
            .iter()
            .find(|unit| unit.function == function)
            .map(|unit| &unit.result)
    }

    /// Units that analysed cleanly.
    pub fn succeeded(&self) -> impl Iterator<Item = &FunctionAnalysis> + '_ {
        self.units.iter().filter_map(|unit| unit.result.as_deref().ok())
    }

    /// Units that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (NodeId, &miette::Report)> + '_ {
        self.units
            .iter()
            .filter_map(|unit| unit.result.as_ref().err().map(|err| (unit.function, err)))
    }

    /// Write SSA versions of every successful unit back into the tree.
    pub fn apply(&self, ast: &mut Ast) {
        for analysis in self.succeeded() {
            analysis.ssa.apply(ast);
        }
    }
}

/// Analyse every unit of a program independently.
pub fn analyze_program(ast: &Ast, options: &AnalysisOptions) -> ProgramAnalysis {
    let mut analyzer = Analyzer::new(ast, *options);
    let units = analyzer
        .functions()
        .into_iter()
        .map(|function| UnitAnalysis {
            function,
            result: analyzer.analyze(function),
        })
        .collect();
    ProgramAnalysis { units }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dominators::DominatorAlgorithm;
    use crate::ast::AstBuilder;

    /// `function ok(a) { return a; } function bad() { let x; let x; }`
    fn two_functions() -> (Ast, NodeId, NodeId) {
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let ret = b.return_stmt(Some(a));
        let ok = b.function_decl("ok", &["a"], vec![ret]);
        let first = b.let_decl("x", None);
        let second = b.let_decl("x", None);
        let bad = b.function_decl("bad", &[], vec![first, second]);
        (b.program(vec![ok, bad]), ok, bad)
    }

    #[test]
    fn failures_stay_local() {
        let (ast, ok, bad) = two_functions();
        let result = analyze_program(&ast, &AnalysisOptions::default());
        assert_eq!(result.units.len(), 3);
        assert!(result.get(ok).unwrap().is_ok());
        assert!(result.get(bad).unwrap().is_err());
        assert!(result.get(ast.root().unwrap()).unwrap().is_ok());
        let failed: Vec<_> = result.failures().map(|(function, _)| function).collect();
        assert_eq!(failed, [bad]);
        assert_eq!(result.succeeded().count(), 2);
    }

    #[test]
    fn analyses_are_cached() {
        let (ast, ok, _) = two_functions();
        let mut analyzer = Analyzer::new(&ast, AnalysisOptions::default());
        let first = analyzer.analyze(ok).unwrap();
        let second = analyzer.analyze(ok).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(Rc::ptr_eq(&first.dominators, &analyzer.analyze_dominators(ok).unwrap()));
        assert!(first.post_dominators.is_some());
    }

    #[test]
    fn options_are_honoured() {
        let (ast, ok, _) = two_functions();
        let options = AnalysisOptions {
            cleanup: false,
            prune_phis: false,
            dominators: DominatorAlgorithm::LengauerTarjan,
            post_dominators: false,
        };
        let mut analyzer = Analyzer::new(&ast, options);
        let analysis = analyzer.analyze(ok).unwrap();
        assert!(analysis.post_dominators.is_none());
        // Cleanup never adds blocks.
        let cleaned = Analyzer::new(&ast, AnalysisOptions::default()).analyze_cfg(ok).unwrap();
        assert!(analysis.cfg.blocks().count() >= cleaned.blocks().count());
    }

    #[test]
    fn renaming_writes_back() {
        let (ast, ok, _) = two_functions();
        let result = analyze_program(&ast, &AnalysisOptions::default());
        let mut renamed = ast.clone();
        result.apply(&mut renamed);
        let ok_analysis = result.get(ok).unwrap().as_ref().unwrap();
        let (node, version) = &ok_analysis.ssa.renames()[0];
        assert_eq!(renamed.ident_name(*node), Some(version.as_str()));
        assert_eq!(version, "a_0");
    }
}
