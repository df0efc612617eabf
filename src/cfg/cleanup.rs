//! Block graph cleanup.
//!
//! Runs simplification rules until a full pass changes nothing, packing the
//! block store after every pass that did change something:
//!
//! 1. Blocks unreachable from `START` (disconnected ones included) go away.
//! 2. A test whose outcomes lead to the same block becomes plain code.
//! 3. A block with a single successor absorbs that successor when it is the
//!    successor's only predecessor and both sit in the same scope, or when
//!    the successor is an empty test.
//! 4. Empty plain or loop blocks with one successor are spliced out.
//!
//! Join blocks (`CONVERGE`) and handler entries are never spliced out.

use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use super::{BlockFlags, BlockGraph, BlockId, BlockShape, BuildError, EdgeKind};

/// Simplify a graph in place. Returns the number of passes run.
pub fn cleanup(graph: &mut BlockGraph) -> Result<usize> {
    // Every changing pass removes a block or demotes a test.
    let cap = 2 * graph.len() + 8;
    let mut passes = 0;
    loop {
        passes += 1;
        if passes > cap {
            return Err(BuildError::CleanupDiverged { passes }.into());
        }
        trace!("CLN " => "pass {} over {} blocks", passes, graph.len());

        let mut changed = remove_unreachable(graph);
        changed |= collapse_degenerate_tests(graph);
        changed |= merge_chains(graph);
        changed |= eliminate_empty(graph);
        if !changed {
            break;
        }
        graph.pack();
    }
    graph.check_invariants()?;
    Ok(passes)
}

fn live_ids(graph: &BlockGraph) -> Vec<BlockId> { graph.block_ids().collect() }

fn remove_unreachable(graph: &mut BlockGraph) -> bool {
    let reachable = graph.reachable();
    let mut changed = false;
    for id in live_ids(graph) {
        if !reachable[id.index()] && !graph.block(id).is_terminal() {
            trace!(->[0] "CLN " => "unreachable {} ({})", id, graph.block(id).label);
            graph.delete(id);
            changed = true;
        }
    }
    changed
}

fn collapse_degenerate_tests(graph: &mut BlockGraph) -> bool {
    let mut changed = false;
    for id in live_ids(graph) {
        let block = graph.block(id);
        if !block.is(BlockShape::Test) {
            continue;
        }
        let target = match (block.when_true, block.when_false, graph.succs(id)) {
            (Some(t), Some(f), _) if t == f => t,
            (_, _, [only]) => *only,
            _ => continue,
        };
        trace!(->[0] "CLN " => "degenerate test {} -> {}", id, target);
        let kind = graph
            .edges()
            .get(id, target)
            .map_or(EdgeKind::NORMAL, |edge| edge.kind - (EdgeKind::TRUE | EdgeKind::FALSE));
        graph
            .edges_mut()
            .set_kind(id, target, if kind.is_empty() { EdgeKind::NORMAL } else { kind });
        graph.mark(id, BlockShape::Normal);
        let block = graph.block_mut(id);
        block.when_true = None;
        block.when_false = None;
        changed = true;
    }
    changed
}

/// Successor that `id` may absorb, if any.
fn mergeable(graph: &BlockGraph, id: BlockId) -> Option<BlockId> {
    let block = graph.block(id);
    if block.is_deleted()
        || block.is_terminal()
        || block.is(BlockShape::Test)
        || block.is(BlockFlags::THROW)
    {
        return None;
    }
    let &[succ] = graph.succs(id) else {
        return None;
    };
    let target = graph.block(succ);
    if succ == id || target.is_terminal() || graph.preds(succ) != [id] || !target.flags().is_empty() {
        return None;
    }
    if graph
        .edges()
        .get(id, succ)
        .map_or(true, |edge| edge.kind.contains(EdgeKind::EXCEPTION))
    {
        return None;
    }
    let same_scope = block.scope == target.scope;
    let empty_test = target.is_empty() && target.is(BlockShape::Test);
    (same_scope || empty_test).then_some(succ)
}

/// Move the contents and outgoing edges of `succ` into `id`.
fn absorb(graph: &mut BlockGraph, id: BlockId, succ: BlockId) {
    trace!(->[0] "CLN " => "merge {} into {}", succ, id);
    let taken = graph.block_mut(succ);
    let nodes = std::mem::take(&mut taken.nodes);
    let accesses = std::mem::take(&mut taken.accesses);
    let (shape, when_true, when_false) = (taken.shape(), taken.when_true, taken.when_false);
    let outgoing: Vec<_> = graph
        .succs(succ)
        .iter()
        .filter_map(|&to| graph.edges().get(succ, to).map(|edge| (to, edge.kind)))
        .collect();

    let block = graph.block_mut(id);
    block.nodes.extend(nodes);
    block.accesses.extend(accesses);
    if shape == BlockShape::Test {
        block.when_true = when_true;
        block.when_false = when_false;
        graph.mark(id, BlockShape::Test);
    }

    graph.edges_mut().remove(id, succ);
    for (to, kind) in outgoing {
        graph.edges_mut().link(id, to, kind);
    }
    graph.delete(succ);
}

fn merge_chains(graph: &mut BlockGraph) -> bool {
    let mut changed = false;
    for id in live_ids(graph) {
        while let Some(succ) = mergeable(graph, id) {
            absorb(graph, id, succ);
            changed = true;
        }
    }
    changed
}

fn eliminate_empty(graph: &mut BlockGraph) -> bool {
    let mut changed = false;
    for id in live_ids(graph) {
        let block = graph.block(id);
        let candidate = matches!(block.shape(), BlockShape::Normal | BlockShape::Loop)
            && block.flags().is_empty()
            && block.is_empty()
            && graph.succs(id).len() == 1;
        if candidate && graph.eliminate(id) {
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, AstBuilder, NodeId};
    use crate::cfg::CfgBuilder;
    use crate::scope::ScopeTree;

    fn cleaned(ast: &Ast, function: NodeId) -> BlockGraph {
        let scopes = ScopeTree::analyze(ast);
        let mut graph = CfgBuilder::build(ast, &scopes, function).unwrap();
        cleanup(&mut graph).unwrap();
        graph
    }

    fn shapes(graph: &BlockGraph) -> Vec<BlockShape> { graph.blocks().map(|block| block.shape()).collect() }

    #[test]
    fn infinite_empty_loop() {
        // for (;;);
        let mut b = AstBuilder::new();
        let body = b.empty();
        let stmt = b.for_stmt(None, None, None, body);
        let func = b.function_decl("f", &[], vec![stmt]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        assert_eq!(shapes(&g), [BlockShape::Start, BlockShape::Exit, BlockShape::Loop]);
        let body = BlockId::new(2);
        assert_eq!(g.succs(g.start()), &[body]);
        assert_eq!(g.succs(body), &[body]);
        // The loop end was only reachable through a break; nothing reaches EXIT.
        assert!(g.preds(g.exit()).is_empty());
    }

    #[test]
    fn if_else_keeps_its_join() {
        // if (a) { b(); } else { c(); }
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let call_b = b.call_stmt("b", vec![]);
        let then = b.block(vec![call_b]);
        let call_c = b.call_stmt("c", vec![]);
        let other = b.block(vec![call_c]);
        let stmt = b.if_stmt(a, then, Some(other));
        let func = b.function_decl("f", &["a"], vec![stmt]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        let tests: Vec<_> = g.blocks().filter(|block| block.is(BlockShape::Test)).collect();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].nodes, [a]);
        let joins: Vec<_> = g.blocks().filter(|block| block.is(BlockShape::Converge)).collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(g.preds(joins[0].id).len(), 2);
        assert_eq!(g.blocks().count(), 6);
    }

    #[test]
    fn empty_if_collapses() {
        // if (a) {}
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let then = b.block(vec![]);
        let stmt = b.if_stmt(a, then, None);
        let func = b.function_decl("f", &["a"], vec![stmt]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        assert_eq!(shapes(&g), [BlockShape::Start, BlockShape::Exit, BlockShape::Normal]);
        let entry = BlockId::new(2);
        assert_eq!(g.block(entry).nodes, [a]);
        assert_eq!(g.block(entry).when_true, None);
        assert_eq!(g.edges().get(entry, g.exit()).unwrap().kind, EdgeKind::NORMAL);
    }

    #[test]
    fn chains_merge_within_a_scope() {
        // done: { a(); } b();
        let mut b = AstBuilder::new();
        let call_a = b.call_stmt("a", vec![]);
        let block = b.block(vec![call_a]);
        let labeled = b.labeled("done", block);
        let call_b = b.call_stmt("b", vec![]);
        let func = b.function_decl("f", &[], vec![labeled, call_b]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        assert_eq!(g.blocks().count(), 3);
        assert_eq!(g.block(BlockId::new(2)).nodes, [call_a, call_b]);
    }

    #[test]
    fn chains_do_not_merge_across_scopes() {
        // switch (a) { default: b(); }
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let call_b = b.call_stmt("b", vec![]);
        let default = b.case(None, vec![call_b]);
        let stmt = b.switch(a, vec![default]);
        let func = b.function_decl("f", &["a"], vec![stmt]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        let labels: Vec<_> = g.blocks().map(|block| block.label.as_str()).collect();
        assert_eq!(labels, ["start", "exit", "entry", "switch.default"]);
        assert_eq!(g.block(BlockId::new(2)).nodes, [a]);
    }

    #[test]
    fn dead_code_is_removed() {
        let mut b = AstBuilder::new();
        let ret = b.return_stmt(None);
        let call = b.call_stmt("dead", vec![]);
        let func = b.function_decl("f", &[], vec![ret, call]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        assert!(g.blocks().all(|block| block.label != "unreachable"));
        assert_eq!(g.blocks().count(), 3);
        assert!(g.check_invariants().is_ok());
    }

    #[test]
    fn handlers_survive() {
        // try { a(); } catch (e) {} b();
        let mut b = AstBuilder::new();
        let call_a = b.call_stmt("a", vec![]);
        let block = b.block(vec![call_a]);
        let body = b.block(vec![]);
        let handler = b.catch_clause(Some("e"), body);
        let stmt = b.try_stmt(block, Some(handler), None);
        let call_b = b.call_stmt("b", vec![]);
        let func = b.function_decl("f", &[], vec![stmt, call_b]);
        let ast = b.program(vec![func]);

        let g = cleaned(&ast, func);
        let catch = g.blocks().find(|block| block.is(BlockFlags::CATCH)).unwrap();
        assert_eq!(g.preds(catch.id).len(), 1);
        let try_bb = g.preds(catch.id)[0];
        assert!(g.edges().get(try_bb, catch.id).unwrap().kind.contains(EdgeKind::EXCEPTION));
    }
}
