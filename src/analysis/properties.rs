//! Properties every generated function must satisfy.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::dominators::simple_fast;
use petgraph::graph::{DiGraph, NodeIndex};
use proptest::prelude::*;

use crate::analysis::dominators::{DominatorAlgorithm, Dominators};
use crate::analysis::liveliness::Liveliness;
use crate::analysis::ssa::SsaForm;
use crate::ast::arbitrary::arb_function;
use crate::ast::{Ast, NodeId};
use crate::cfg::cleanup::cleanup;
use crate::cfg::{BlockGraph, BlockId, CfgBuilder};
use crate::scope::ScopeTree;

fn build(ast: &Ast, func: NodeId) -> BlockGraph {
    let scopes = ScopeTree::analyze(ast);
    CfgBuilder::build(ast, &scopes, func).unwrap()
}

fn cleaned(ast: &Ast, func: NodeId) -> BlockGraph {
    let mut graph = build(ast, func);
    cleanup(&mut graph).unwrap();
    graph
}

fn edges_are_unique(graph: &BlockGraph) {
    let mut seen = BTreeSet::new();
    for edge in graph.edges().iter() {
        assert!(seen.insert((edge.from, edge.to)), "duplicate edge {} -> {}", edge.from, edge.to);
    }
    for bb in graph.block_ids() {
        let succs: BTreeSet<_> = graph.succs(bb).iter().collect();
        assert_eq!(succs.len(), graph.succs(bb).len());
        let preds: BTreeSet<_> = graph.preds(bb).iter().collect();
        assert_eq!(preds.len(), graph.preds(bb).len());
    }
}

/// Where each version is defined: block, and position among the block's
/// accesses. Phis sit before every access.
fn definitions(graph: &BlockGraph, ssa: &SsaForm) -> HashMap<String, (BlockId, isize)> {
    let mut defs = HashMap::new();
    for block in graph.blocks() {
        for phi in ssa.phis(block.id) {
            let target = phi.target.clone().unwrap();
            assert!(defs.insert(target, (block.id, -1)).is_none());
        }
        for (i, access) in block.accesses.iter().enumerate() {
            if let (true, Some(version)) = (access.is_def(), &access.ssa_name) {
                assert!(defs.insert(version.clone(), (block.id, i as isize)).is_none(), "{} defined twice", version);
            }
        }
    }
    defs
}

proptest! {
    #[test]
    fn edges_stay_unique((ast, func) in arb_function()) {
        edges_are_unique(&build(&ast, func));
        let graph = cleaned(&ast, func);
        edges_are_unique(&graph);
        prop_assert!(graph.check_invariants().is_ok());
    }

    #[test]
    fn cleanup_never_grows((ast, func) in arb_function()) {
        let raw = build(&ast, func);
        let graph = cleaned(&ast, func);
        prop_assert!(graph.blocks().count() <= raw.blocks().count());
        prop_assert!(graph.blocks().all(|block| !block.is_deleted()));
        let again = {
            let mut again = graph.clone();
            cleanup(&mut again).unwrap();
            again
        };
        prop_assert_eq!(again.blocks().count(), graph.blocks().count());
    }

    #[test]
    fn dominator_algorithms_agree((ast, func) in arb_function()) {
        let graph = cleaned(&ast, func);
        let iterative = Dominators::analyze(&graph, DominatorAlgorithm::Iterative).unwrap();
        let lengauer_tarjan = Dominators::analyze(&graph, DominatorAlgorithm::LengauerTarjan).unwrap();

        let mut pg = DiGraph::<(), ()>::new();
        for _ in 0..graph.len() {
            pg.add_node(());
        }
        for edge in graph.edges().iter() {
            pg.add_edge(NodeIndex::new(edge.from.index()), NodeIndex::new(edge.to.index()), ());
        }
        let oracle = simple_fast(&pg, NodeIndex::new(graph.start().index()));

        for bb in graph.block_ids() {
            let expected = oracle.immediate_dominator(NodeIndex::new(bb.index())).map(|n| BlockId::new(n.index()));
            prop_assert_eq!(iterative.idom(bb), expected);
            prop_assert_eq!(lengauer_tarjan.idom(bb), expected);
            prop_assert_eq!(iterative.dominance_frontier(bb), lengauer_tarjan.dominance_frontier(bb));
            if iterative.is_reachable(bb) {
                prop_assert!(iterative.dominates(graph.start(), bb));
            }
        }
    }

    #[test]
    fn frontier_is_where_dominance_ends((ast, func) in arb_function()) {
        let graph = cleaned(&ast, func);
        let dom = Dominators::analyze(&graph, DominatorAlgorithm::Iterative).unwrap();
        for a in graph.block_ids().filter(|&a| dom.is_reachable(a)) {
            for &b in dom.dominance_frontier(a) {
                prop_assert!(!dom.strictly_dominates(a, b));
                prop_assert!(graph.preds(b).iter().any(|&p| dom.dominates(a, p)));
            }
        }
        // Post-dominators exist for the same graphs.
        Dominators::analyze_post(&graph, DominatorAlgorithm::LengauerTarjan).unwrap();
    }

    #[test]
    fn liveliness_is_a_fixpoint((ast, func) in arb_function()) {
        let graph = cleaned(&ast, func);
        let live = Liveliness::analyze(&graph).unwrap();
        prop_assert!(live.is_stable(&graph));
        for bb in graph.block_ids() {
            prop_assert!(live.ue_var(bb).is_subset(live.live_in(bb)));
        }
    }

    #[test]
    fn versions_are_dominated_by_their_definition((ast, func) in arb_function(), prune in any::<bool>()) {
        let mut graph = cleaned(&ast, func);
        let dom = Dominators::analyze(&graph, DominatorAlgorithm::Iterative).unwrap();
        let live = Liveliness::analyze(&graph).unwrap();
        let ssa = SsaForm::build(&mut graph, &dom, prune.then_some(&live)).unwrap();
        let defs = definitions(&graph, &ssa);

        for block in graph.blocks() {
            for (i, access) in block.accesses.iter().enumerate() {
                let Some(version) = access.ssa_name.as_ref().filter(|_| access.is_use()) else {
                    continue;
                };
                let &(def_block, position) = defs.get(version).unwrap();
                prop_assert!(dom.dominates(def_block, block.id), "{} used outside its definition", version);
                if def_block == block.id {
                    prop_assert!(position < i as isize);
                }
            }
            for phi in ssa.phis(block.id) {
                for (pred, arg) in phi.preds.iter().zip(&phi.args) {
                    if let Some(arg) = arg {
                        let &(def_block, _) = defs.get(arg).unwrap();
                        prop_assert!(dom.dominates(def_block, *pred));
                    }
                }
            }
        }
    }
}
