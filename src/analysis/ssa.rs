//! Static single assignment form.
//!
//! Phi functions go to the iterated dominance frontier of each variable's
//! definition blocks, optionally only where the variable is live. Renaming
//! walks the dominator tree with one version stack per scoped name; a block
//! pops exactly what it pushed before control returns to its dominator.
//!
//! Only accesses marked as rename targets take part. Free names keep their
//! source spelling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use crate::analysis::dominators::{Direction, Dominators};
use crate::analysis::error::AnalysisError;
use crate::analysis::liveliness::Liveliness;
use crate::ast::{Ast, NodeId};
use crate::cfg::{AccessKind, BlockGraph, BlockId};

/// A phi function at the head of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// Scoped name of the merged variable.
    pub name: String,
    /// Blocks defining the variable when the phi was placed.
    pub def_blocks: Vec<BlockId>,
    /// Version the phi defines, once renamed.
    pub target: Option<String>,
    /// Predecessors of the block, in argument order.
    pub preds: Vec<BlockId>,
    /// Version arriving from each predecessor; `None` where no definition
    /// reaches.
    pub args: Vec<Option<String>>,
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = phi(", self.target.as_deref().unwrap_or(&self.name))?;
        for (i, (pred, arg)) in self.preds.iter().zip(&self.args).enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", pred, arg.as_deref().unwrap_or("?"))?;
        }
        write!(f, ")")
    }
}

/// SSA form of one function.
#[derive(Debug, Clone, Default)]
pub struct SsaForm {
    phis: Vec<BTreeMap<String, Phi>>,
    versions: BTreeMap<String, usize>,
    renames: Vec<(NodeId, String)>,
}

enum Visit {
    Enter(BlockId),
    Leave(Vec<String>),
}

fn fresh(versions: &mut BTreeMap<String, usize>, name: &str) -> String {
    let counter = versions.entry(name.to_string()).or_default();
    let version = format!("{}_{}", name, counter);
    *counter += 1;
    version
}

impl SsaForm {
    /// Place phis and rename every access of the graph.
    ///
    /// With `liveliness`, a phi is only placed where its variable is live on
    /// entry.
    pub fn build(graph: &mut BlockGraph, dominators: &Dominators, liveliness: Option<&Liveliness>) -> Result<Self> {
        if dominators.direction() != Direction::Forward {
            return Err(AnalysisError::InvariantViolation {
                message: "SSA needs forward dominators".to_string(),
            }
            .into());
        }
        let mut ssa = Self {
            phis: vec![BTreeMap::new(); graph.len()],
            ..Self::default()
        };
        ssa.place_phis(graph, dominators, liveliness)?;
        ssa.rename(graph, dominators)?;
        Ok(ssa)
    }

    fn place_phis(&mut self, graph: &BlockGraph, dominators: &Dominators, liveliness: Option<&Liveliness>) -> Result<()> {
        let mut defs: BTreeMap<&str, BTreeSet<BlockId>> = BTreeMap::new();
        for block in graph.blocks() {
            for access in block.accesses.iter().filter(|a| a.rename_target && a.is_def()) {
                defs.entry(access.scoped_name.as_str()).or_default().insert(block.id);
            }
        }

        for (name, def_blocks) in defs {
            if def_blocks.len() < 2 {
                continue;
            }
            for bb in dominators.iterated_dominance_frontier(def_blocks.iter().copied()) {
                if liveliness.is_some_and(|live| !live.live_in(bb).contains(name)) {
                    trace!(->[0] "SSA " => "pruned phi for {} at {}", name, bb);
                    continue;
                }
                let phis = &mut self.phis[bb.index()];
                if phis.contains_key(name) {
                    return Err(AnalysisError::InvariantViolation {
                        message: format!("second phi for {} at {}", name, bb),
                    }
                    .into());
                }
                trace!(->[0] "SSA " => "phi for {} at {}", name, bb);
                let preds = graph.preds(bb).to_vec();
                phis.insert(
                    name.to_string(),
                    Phi {
                        name: name.to_string(),
                        def_blocks: def_blocks.iter().copied().collect(),
                        target: None,
                        args: vec![None; preds.len()],
                        preds,
                    },
                );
            }
        }
        Ok(())
    }

    fn rename(&mut self, graph: &mut BlockGraph, dominators: &Dominators) -> Result<()> {
        let mut stacks: HashMap<String, Vec<String>> = HashMap::new();
        let mut work = vec![Visit::Enter(dominators.root())];

        while let Some(visit) = work.pop() {
            let bb = match visit {
                Visit::Enter(bb) => bb,
                Visit::Leave(pushed) => {
                    for name in pushed {
                        if stacks.get_mut(&name).and_then(Vec::pop).is_none() {
                            return Err(AnalysisError::InvariantViolation {
                                message: format!("version stack of {} underflowed", name),
                            }
                            .into());
                        }
                    }
                    continue;
                }
            };
            trace!(->[0] "SSA " => "rename {}", bb);
            let mut pushed = vec![];

            for phi in self.phis[bb.index()].values_mut() {
                let version = fresh(&mut self.versions, &phi.name);
                phi.target = Some(version.clone());
                stacks.entry(phi.name.clone()).or_default().push(version);
                pushed.push(phi.name.clone());
            }

            for access in graph.block_mut(bb).accesses.iter_mut().filter(|a| a.rename_target) {
                match access.kind {
                    AccessKind::Use => {
                        access.ssa_name = stacks.get(&access.scoped_name).and_then(|stack| stack.last()).cloned();
                    }
                    AccessKind::Def => {
                        let version = fresh(&mut self.versions, &access.scoped_name);
                        access.ssa_name = Some(version.clone());
                        stacks.entry(access.scoped_name.clone()).or_default().push(version);
                        pushed.push(access.scoped_name.clone());
                    }
                }
                if let Some(version) = &access.ssa_name {
                    trace!(->[1] "SSA " => "{} -> {}", access.scoped_name, version);
                    self.renames.push((access.node, version.clone()));
                }
            }

            for &succ in graph.succs(bb) {
                for phi in self.phis[succ.index()].values_mut() {
                    let current = stacks.get(&phi.name).and_then(|stack| stack.last()).cloned();
                    for (slot, &pred) in phi.preds.iter().enumerate() {
                        if pred == bb {
                            phi.args[slot] = current.clone();
                        }
                    }
                }
            }

            work.push(Visit::Leave(pushed));
            work.extend(dominators.children(bb).iter().rev().map(|&child| Visit::Enter(child)));
        }

        if let Some((name, _)) = stacks.iter().find(|(_, stack)| !stack.is_empty()) {
            return Err(AnalysisError::InvariantViolation {
                message: format!("version stack of {} not empty after renaming", name),
            }
            .into());
        }
        Ok(())
    }

    /// Phis at the head of a block, by name.
    pub fn phis(&self, bb: BlockId) -> impl Iterator<Item = &Phi> + '_ {
        self.phis.get(bb.index()).into_iter().flat_map(|phis| phis.values())
    }

    /// The phi for a name at a block.
    pub fn phi(&self, bb: BlockId, name: &str) -> Option<&Phi> { self.phis.get(bb.index())?.get(name) }

    /// Number of phis in the function.
    pub fn phi_count(&self) -> usize { self.phis.iter().map(BTreeMap::len).sum() }

    /// Number of versions created for a scoped name.
    pub fn versions(&self, name: &str) -> usize { self.versions.get(name).copied().unwrap_or(0) }

    /// Renamed identifiers with their versions.
    pub fn renames(&self) -> &[(NodeId, String)] { &self.renames }

    /// Write the versions back into the identifiers of a tree.
    pub fn apply(&self, ast: &mut Ast) {
        for (node, version) in &self.renames {
            ast.rename(*node, version.clone());
        }
    }
}
