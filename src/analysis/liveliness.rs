//! Variable liveliness analysis.
//!
//! # Rules
//! The rules of variable liveliness analysis are:
//!
//! ```text
//! (B -> S) in CFG |- LiveIn[S] subset LiveOut[B]
//! |- LiveIn[B] = UEVar[B] | (LiveOut[B] & NotVarKill[B])
//! ```
//!
//! Names are scoped names, so shadowing bindings are tracked apart.

use std::collections::VecDeque;

use imbl::OrdSet;
use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use crate::analysis::error::AnalysisError;
use crate::cfg::{AccessKind, BlockGraph, BlockId};

/// Set of variable names.
pub type NameSet = OrdSet<String>;

/// Variable liveliness analysis result.
#[derive(Debug, Clone)]
pub struct Liveliness {
    names: NameSet,
    /// Names read before any write in each block.
    ue_var: Vec<NameSet>,
    /// Names written in each block.
    var_kill: Vec<NameSet>,
    /// Tracked names not written in each block.
    not_var_kill: Vec<NameSet>,
    /// Names live at the beginning of each block.
    live_in: Vec<NameSet>,
    /// Names live at the end of each block.
    live_out: Vec<NameSet>,
    iterations: usize,
}

impl Liveliness {
    /// Analyze the liveliness of a function.
    pub fn analyze(graph: &BlockGraph) -> Result<Self> {
        let mut liveliness = Self::local(graph);
        liveliness.solve(graph)?;
        Ok(liveliness)
    }

    /// Per-block sets, before any propagation.
    fn local(graph: &BlockGraph) -> Self {
        let n = graph.len();
        let mut names = NameSet::new();
        let mut ue_var = vec![NameSet::new(); n];
        let mut var_kill = vec![NameSet::new(); n];

        for block in graph.blocks() {
            let (used, defined) = (&mut ue_var[block.id.index()], &mut var_kill[block.id.index()]);
            for access in &block.accesses {
                names.insert(access.scoped_name.clone());
                match access.kind {
                    AccessKind::Use => {
                        if !defined.contains(&access.scoped_name) {
                            used.insert(access.scoped_name.clone());
                        }
                    }
                    AccessKind::Def => {
                        defined.insert(access.scoped_name.clone());
                    }
                }
            }
        }
        let not_var_kill = var_kill
            .iter()
            .map(|killed| names.clone().relative_complement(killed.clone()))
            .collect();

        Self {
            names,
            ue_var,
            var_kill,
            not_var_kill,
            live_in: vec![NameSet::new(); n],
            live_out: vec![NameSet::new(); n],
            iterations: 0,
        }
    }

    /// Fixpoint over a work list seeded with every block, sinks first.
    /// Blocks unreachable from START follow the reachable ones.
    fn solve(&mut self, graph: &BlockGraph) -> Result<()> {
        let mut work_list: VecDeque<BlockId> = graph.postorder().into_iter().collect();
        let mut queued = vec![false; graph.len()];
        for &bb in &work_list {
            queued[bb.index()] = true;
        }
        for bb in graph.block_ids() {
            if !std::mem::replace(&mut queued[bb.index()], true) {
                work_list.push_back(bb);
            }
        }
        // Each live-in set grows at most once per name; each growth queues
        // the predecessors.
        let edges = graph.edges().len();
        let cap = (self.names.len() + 1) * (edges + graph.len()) + graph.len() + 1;

        while let Some(bb) = work_list.pop_front() {
            queued[bb.index()] = false;
            self.iterations += 1;
            if self.iterations > cap {
                return Err(AnalysisError::FixpointDiverged {
                    analysis: "liveliness",
                    iterations: self.iterations,
                }
                .into());
            }

            let before = self.transfer(bb);
            if self.live_in[bb.index()] != before {
                trace!(->[0] "VLA " => "live in {}: {:?}", bb, before);
                self.live_in[bb.index()] = before.clone();
                for &pred in graph.preds(bb) {
                    self.live_out[pred.index()].extend(before.clone());
                    if !std::mem::replace(&mut queued[pred.index()], true) {
                        work_list.push_back(pred);
                    }
                }
            }
        }
        trace!("VLA " => "converged after {} evaluations", self.iterations);
        Ok(())
    }

    /// `UEVar[B] | (LiveOut[B] & NotVarKill[B])`.
    fn transfer(&self, bb: BlockId) -> NameSet {
        let i = bb.index();
        self.live_out[i]
            .clone()
            .intersection(self.not_var_kill[i].clone())
            .union(self.ue_var[i].clone())
    }

    /// Whether one more round of the equations changes nothing.
    pub fn is_stable(&self, graph: &BlockGraph) -> bool {
        graph.block_ids().all(|bb| {
            let out = graph
                .succs(bb)
                .iter()
                .fold(NameSet::new(), |out, succ| out.union(self.transfer(*succ)));
            out == self.live_out[bb.index()] && self.transfer(bb) == self.live_in[bb.index()]
        })
    }

    /// Every name the function accesses.
    pub fn names(&self) -> &NameSet { &self.names }

    /// Names read in a block before any write there.
    pub fn ue_var(&self, bb: BlockId) -> &NameSet { &self.ue_var[bb.index()] }

    /// Names written in a block.
    pub fn var_kill(&self, bb: BlockId) -> &NameSet { &self.var_kill[bb.index()] }

    /// Names not written in a block.
    pub fn not_var_kill(&self, bb: BlockId) -> &NameSet { &self.not_var_kill[bb.index()] }

    /// Names live on entry to a block.
    pub fn live_in(&self, bb: BlockId) -> &NameSet { &self.live_in[bb.index()] }

    /// Names live on exit from a block.
    pub fn live_out(&self, bb: BlockId) -> &NameSet { &self.live_out[bb.index()] }

    /// Blocks evaluated until the fixpoint.
    pub fn iterations(&self) -> usize { self.iterations }
}
