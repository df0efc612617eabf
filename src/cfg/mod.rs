//! Control flow graph of a function body.
//!
//! A [`BlockGraph`] owns its blocks in a flat store indexed by [`BlockId`]
//! and its edges in an [`EdgeStore`]. `START` and `EXIT` are created with the
//! graph and never removed. Blocks are only ever marked deleted; [`pack`]
//! compacts the store and renumbers survivors.
//!
//! [`pack`]: BlockGraph::pack

use std::fmt;

use bitflags::bitflags;
use miette::Result;
#[allow(unused_imports)]
use nolog::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, Control, DfsEvent};

use crate::ast::NodeId;
use crate::scope::ScopeId;

pub mod access;
pub mod builder;
pub mod cleanup;
pub mod display;
pub mod edge;
pub mod error;

pub use access::{AccessKind, VarAccess};
pub use builder::CfgBuilder;
pub use edge::{Edge, EdgeClass, EdgeKind, EdgeStore};
pub use error::BuildError;

/// Index of a block inside a [`BlockGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Block id from a raw index.
    pub fn new(index: usize) -> Self { Self(index as u32) }

    /// Raw index of the block.
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "B{}", self.0) }
}

/// Structural role of a block. Exactly one applies at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockShape {
    /// Function entry, always empty.
    Start,
    /// Function exit, always empty.
    Exit,
    /// Straight-line code.
    #[default]
    Normal,
    /// Ends in a test with a true and a false successor.
    Test,
    /// First block of a loop body.
    Loop,
    /// Join point of several paths.
    Converge,
    /// Scratch block awaiting a role.
    Temporary,
    /// Removed; dropped by the next pack.
    Deleted,
}

bitflags! {
    /// Orthogonal markers of a block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Entry of a `catch` handler.
        const CATCH = 1 << 0;
        /// Ends in a `throw`.
        const THROW = 1 << 1;
        /// Entry of a `finally` handler.
        const FINALLY = 1 << 2;
    }
}

/// Either a shape or a set of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Structural role.
    Shape(BlockShape),
    /// Markers.
    Flags(BlockFlags),
}

impl From<BlockShape> for BlockTag {
    fn from(shape: BlockShape) -> Self { BlockTag::Shape(shape) }
}

impl From<BlockFlags> for BlockTag {
    fn from(flags: BlockFlags) -> Self { BlockTag::Flags(flags) }
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    /// Current id; changes on pack.
    pub id: BlockId,
    /// Leaf statements and expressions, in evaluation order.
    pub nodes: Vec<NodeId>,
    shape: BlockShape,
    flags: BlockFlags,
    /// Where the block came from, for display.
    pub label: String,
    /// Innermost lexical scope of the block.
    pub scope: Option<ScopeId>,
    /// Successor taken when the test holds.
    pub when_true: Option<BlockId>,
    /// Successor taken when the test fails.
    pub when_false: Option<BlockId>,
    /// Variable uses and definitions, in evaluation order.
    pub accesses: Vec<VarAccess>,
}

impl Block {
    fn new(id: BlockId, shape: BlockShape, label: impl Into<String>, scope: Option<ScopeId>) -> Self {
        Self {
            id,
            nodes: vec![],
            shape,
            flags: BlockFlags::empty(),
            label: label.into(),
            scope,
            when_true: None,
            when_false: None,
            accesses: vec![],
        }
    }

    /// Structural role.
    pub fn shape(&self) -> BlockShape { self.shape }

    /// Markers.
    pub fn flags(&self) -> BlockFlags { self.flags }

    /// Whether the block carries a tag.
    pub fn is(&self, tag: impl Into<BlockTag>) -> bool {
        match tag.into() {
            BlockTag::Shape(shape) => self.shape == shape,
            BlockTag::Flags(flags) => self.flags.contains(flags),
        }
    }

    /// Whether the block holds no code.
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Whether the block is `START` or `EXIT`.
    pub fn is_terminal(&self) -> bool { matches!(self.shape, BlockShape::Start | BlockShape::Exit) }

    /// Whether the block was deleted.
    pub fn is_deleted(&self) -> bool { self.shape == BlockShape::Deleted }
}

/// Blocks and edges of one function.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    blocks: Vec<Block>,
    edges: EdgeStore,
    start: BlockId,
    exit: BlockId,
    function: NodeId,
}

impl BlockGraph {
    /// Create a graph with only `START` and `EXIT`.
    pub fn new(function: NodeId, scope: Option<ScopeId>) -> Self {
        let start = BlockId::new(0);
        let exit = BlockId::new(1);
        Self {
            blocks: vec![
                Block::new(start, BlockShape::Start, "start", scope),
                Block::new(exit, BlockShape::Exit, "exit", scope),
            ],
            edges: EdgeStore::new(),
            start,
            exit,
            function,
        }
    }

    /// Function or program node the graph was built for.
    pub fn function(&self) -> NodeId { self.function }

    /// The `START` block.
    pub fn start(&self) -> BlockId { self.start }

    /// The `EXIT` block.
    pub fn exit(&self) -> BlockId { self.exit }

    /// Number of block slots, deleted ones included.
    pub fn len(&self) -> usize { self.blocks.len() }

    /// Whether the store is empty. Never true for a constructed graph.
    pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    /// Block by id.
    pub fn block(&self, id: BlockId) -> &Block { &self.blocks[id.index()] }

    /// Mutable block by id.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block { &mut self.blocks[id.index()] }

    /// Live blocks, in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter().filter(|block| !block.is_deleted())
    }

    /// Ids of live blocks, in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ { self.blocks().map(|block| block.id) }

    /// The edge store.
    pub fn edges(&self) -> &EdgeStore { &self.edges }

    /// Mutable edge store.
    pub fn edges_mut(&mut self) -> &mut EdgeStore { &mut self.edges }

    /// Successors of a block.
    pub fn succs(&self, id: BlockId) -> &[BlockId] { self.edges.successors(id) }

    /// Predecessors of a block, ordered by id.
    pub fn preds(&self, id: BlockId) -> &[BlockId] { self.edges.predecessors(id) }

    /// Allocate a `NORMAL` block fed by `preds` through plain edges.
    pub fn new_block(
        &mut self,
        label: impl Into<String>,
        scope: Option<ScopeId>,
        preds: &[BlockId],
    ) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        let block = Block::new(id, BlockShape::Normal, label, scope);
        trace!(->[0] "CFG " => "new block {} ({})", id, block.label);
        self.blocks.push(block);
        for &pred in preds {
            self.edges.link(pred, id, EdgeKind::NORMAL);
        }
        id
    }

    /// Add a tag. A shape replaces the current one; flags accumulate.
    pub fn mark(&mut self, id: BlockId, tag: impl Into<BlockTag>) {
        let block = self.block_mut(id);
        match tag.into() {
            BlockTag::Shape(shape) => block.shape = shape,
            BlockTag::Flags(flags) => block.flags |= flags,
        }
    }

    /// Remove a tag. Dropping the current shape falls back to `NORMAL`.
    pub fn unmark(&mut self, id: BlockId, tag: impl Into<BlockTag>) {
        let block = self.block_mut(id);
        match tag.into() {
            BlockTag::Shape(shape) => {
                if block.shape == shape {
                    block.shape = BlockShape::Normal;
                }
            }
            BlockTag::Flags(flags) => block.flags.remove(flags),
        }
    }

    /// Delete a block together with all its edges.
    pub fn delete(&mut self, id: BlockId) {
        trace!(->[0] "CFG " => "delete {}", id);
        self.edges.detach(id);
        let block = self.block_mut(id);
        block.shape = BlockShape::Deleted;
        block.when_true = None;
        block.when_false = None;
    }

    /// Splice out an empty block, routing each predecessor straight to its
    /// successors.
    ///
    /// Refuses, returning `false`, for `START`, `EXIT`, deleted or non-empty
    /// blocks and for blocks on a self-loop.
    pub fn eliminate(&mut self, id: BlockId) -> bool {
        let block = self.block(id);
        if block.is_terminal() || block.is_deleted() || !block.is_empty() || self.succs(id).contains(&id) {
            return false;
        }

        let succs = self.succs(id).to_vec();
        let replacement = match succs.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        for pred in self.preds(id).to_vec() {
            let pred = self.block_mut(pred);
            if pred.when_true == Some(id) {
                pred.when_true = replacement;
            }
            if pred.when_false == Some(id) {
                pred.when_false = replacement;
            }
        }

        trace!(->[0] "CFG " => "eliminate {}", id);
        self.edges.retarget_multiple(id);
        self.delete(id);
        true
    }

    /// Drop deleted blocks and renumber the survivors in order.
    ///
    /// Returns the offset table: `offsets[old]` is the new id of a surviving
    /// block, `None` for a dropped one.
    pub fn pack(&mut self) -> Vec<Option<BlockId>> {
        let mut offsets = vec![None; self.blocks.len()];
        let mut next = 0;
        for block in &self.blocks {
            if !block.is_deleted() {
                offsets[block.id.index()] = Some(BlockId::new(next));
                next += 1;
            }
        }
        let remap = |id: Option<BlockId>| id.and_then(|id| offsets[id.index()]);

        self.blocks.retain(|block| !block.is_deleted());
        for block in &mut self.blocks {
            if let Some(id) = offsets[block.id.index()] {
                block.id = id;
            }
            block.when_true = remap(block.when_true);
            block.when_false = remap(block.when_false);
        }
        self.edges.renumber(&offsets);
        if let Some(start) = remap(Some(self.start)) {
            self.start = start;
        }
        if let Some(exit) = remap(Some(self.exit)) {
            self.exit = exit;
        }
        trace!("CFG " => "packed to {} blocks", self.blocks.len());
        offsets
    }

    /// Reachability from `START`, indexed by block id.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.start];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            stack.extend(self.succs(id).iter().filter(|succ| !seen[succ.index()]));
        }
        seen
    }

    /// Depth-first postorder from `START`.
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.start, 0)];
        seen[self.start.index()] = true;
        while let Some((id, next)) = stack.last_mut() {
            let id = *id;
            match self.succs(id).get(*next) {
                Some(&succ) => {
                    *next += 1;
                    if !seen[succ.index()] {
                        seen[succ.index()] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    order.push(id);
                    stack.pop();
                }
            }
        }
        order
    }

    /// Label every edge reachable from `START` as tree, forward, back or
    /// cross, by depth-first discovery order.
    pub fn classify_edges(&mut self) {
        let mut graph = DiGraph::<(), ()>::with_capacity(self.blocks.len(), self.edges.len());
        for _ in &self.blocks {
            graph.add_node(());
        }
        for edge in self.edges.iter() {
            graph.add_edge(NodeIndex::new(edge.from.index()), NodeIndex::new(edge.to.index()), ());
        }

        let mut discovered = vec![usize::MAX; self.blocks.len()];
        let mut classes = Vec::with_capacity(self.edges.len());
        depth_first_search(&graph, Some(NodeIndex::new(self.start.index())), |event| {
            match event {
                DfsEvent::Discover(node, time) => discovered[node.index()] = time.0,
                DfsEvent::TreeEdge(u, v) => classes.push((u, v, EdgeClass::Tree)),
                DfsEvent::BackEdge(u, v) => classes.push((u, v, EdgeClass::Back)),
                DfsEvent::CrossForwardEdge(u, v) => {
                    // The target is finished; it is a descendant only if it
                    // was discovered after the source.
                    let class = if discovered[u.index()] < discovered[v.index()] {
                        EdgeClass::Forward
                    } else {
                        EdgeClass::Cross
                    };
                    classes.push((u, v, class));
                }
                DfsEvent::Finish(..) => {}
            }
            Control::<()>::Continue
        });

        for (u, v, class) in classes {
            trace!(->[1] "CFG " => "{} -> {} is {:?}", u.index(), v.index(), class);
            self.edges
                .set_class(BlockId::new(u.index()), BlockId::new(v.index()), class);
        }
    }

    /// Check the structural invariants of a cleaned graph.
    ///
    /// `START` has no predecessors, `EXIT` no successors, every edge joins
    /// live blocks, test targets are successors, and every live block other
    /// than `EXIT` is reachable from `START`.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |message: String| -> Result<()> { Err(BuildError::InvariantViolation { message }.into()) };

        if !self.preds(self.start).is_empty() {
            return fail(format!("{} has predecessors", self.start));
        }
        if !self.succs(self.exit).is_empty() {
            return fail(format!("{} has successors", self.exit));
        }
        for edge in self.edges.iter() {
            for end in [edge.from, edge.to] {
                if end.index() >= self.blocks.len() || self.block(end).is_deleted() {
                    return fail(format!("edge {} -> {} touches a dead block", edge.from, edge.to));
                }
            }
        }
        let reachable = self.reachable();
        for block in self.blocks() {
            if block.id != self.exit && !reachable[block.id.index()] {
                return fail(format!("{} is unreachable", block.id));
            }
            for target in [block.when_true, block.when_false].into_iter().flatten() {
                if !self.edges.contains(block.id, target) {
                    return fail(format!("{} tests into {} without an edge", block.id, target));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> BlockGraph { BlockGraph::new(NodeId::new(0), None) }

    #[test]
    fn start_and_exit_exist() {
        let g = graph();
        assert_eq!(g.len(), 2);
        assert!(g.block(g.start()).is(BlockShape::Start));
        assert!(g.block(g.exit()).is(BlockShape::Exit));
    }

    #[test]
    fn shapes_are_exclusive_flags_are_not() {
        let mut g = graph();
        let b = g.new_block("b", None, &[g.start()]);
        g.mark(b, BlockShape::Test);
        g.mark(b, BlockShape::Loop);
        assert!(g.block(b).is(BlockShape::Loop));
        assert!(!g.block(b).is(BlockShape::Test));

        g.mark(b, BlockFlags::CATCH);
        g.mark(b, BlockFlags::THROW);
        assert!(g.block(b).is(BlockFlags::CATCH | BlockFlags::THROW));
        g.unmark(b, BlockFlags::CATCH);
        assert_eq!(g.block(b).flags(), BlockFlags::THROW);

        g.unmark(b, BlockShape::Loop);
        assert_eq!(g.block(b).shape(), BlockShape::Normal);
    }

    #[test]
    fn eliminate_splices_and_fixes_tests() {
        let mut g = graph();
        let (start, exit) = (g.start(), g.exit());
        let test = g.new_block("test", None, &[start]);
        g.block_mut(test).nodes.push(NodeId::new(1));
        let empty = g.new_block("empty", None, &[]);
        let other = g.new_block("other", None, &[]);
        g.edges_mut().add(test, empty, EdgeKind::TRUE);
        g.edges_mut().add(test, other, EdgeKind::FALSE);
        g.mark(test, BlockShape::Test);
        g.block_mut(test).when_true = Some(empty);
        g.block_mut(test).when_false = Some(other);
        g.edges_mut().add(empty, exit, EdgeKind::NORMAL);
        g.edges_mut().add(other, exit, EdgeKind::NORMAL);

        assert!(!g.eliminate(test), "non-empty blocks stay");
        assert!(!g.eliminate(start));
        assert!(g.eliminate(empty));
        assert!(g.block(empty).is_deleted());
        assert_eq!(g.block(test).when_true, Some(exit));
        assert_eq!(g.edges().get(test, exit).unwrap().kind, EdgeKind::TRUE);
        assert_eq!(g.preds(exit), &[test, other]);
    }

    #[test]
    fn self_loops_are_not_eliminated() {
        let mut g = graph();
        let b = g.new_block("loop", None, &[g.start()]);
        g.edges_mut().add(b, b, EdgeKind::LOOP);
        assert!(!g.eliminate(b));
    }

    #[test]
    fn pack_renumbers() {
        let mut g = graph();
        let (start, exit) = (g.start(), g.exit());
        let a = g.new_block("a", None, &[start]);
        let b = g.new_block("b", None, &[a]);
        let c = g.new_block("c", None, &[b]);
        g.edges_mut().add(c, exit, EdgeKind::NORMAL);
        g.block_mut(a).nodes.push(NodeId::new(3));
        g.block_mut(c).nodes.push(NodeId::new(4));
        assert!(g.eliminate(b));

        let offsets = g.pack();
        assert_eq!(offsets[b.index()], None);
        assert_eq!(g.len(), 4);
        let new_c = offsets[c.index()].unwrap();
        assert_eq!(new_c, BlockId::new(3));
        assert_eq!(g.block(new_c).label, "c");
        assert_eq!(g.succs(BlockId::new(2)), &[new_c]);
        assert!(g.check_invariants().is_ok());
    }

    #[test]
    fn edges_are_classified() {
        // start -> a -> b -> a (back), a -> c, b -> c, c -> exit
        let mut g = graph();
        let (start, exit) = (g.start(), g.exit());
        let a = g.new_block("a", None, &[start]);
        let b = g.new_block("b", None, &[a]);
        let c = g.new_block("c", None, &[a, b]);
        g.edges_mut().add(b, a, EdgeKind::LOOP);
        g.edges_mut().add(c, exit, EdgeKind::NORMAL);
        g.classify_edges();

        let class = |from, to| g.edges().get(from, to).unwrap().class;
        assert_eq!(class(start, a), Some(EdgeClass::Tree));
        assert_eq!(class(b, a), Some(EdgeClass::Back));
        assert_eq!(class(c, exit), Some(EdgeClass::Tree));
        // c is reached first from one of a, b; the other edge is not a tree edge.
        let others = [class(a, c), class(b, c)];
        assert_eq!(others.iter().filter(|&&c| c == Some(EdgeClass::Tree)).count(), 1);
        assert!(others
            .iter()
            .all(|c| matches!(c, Some(EdgeClass::Tree | EdgeClass::Forward | EdgeClass::Cross))));
    }

    #[test]
    fn unreachable_blocks_break_invariants() {
        let mut g = graph();
        let (start, exit) = (g.start(), g.exit());
        let a = g.new_block("a", None, &[start]);
        g.edges_mut().add(a, exit, EdgeKind::NORMAL);
        let orphan = g.new_block("orphan", None, &[]);
        g.edges_mut().add(orphan, exit, EdgeKind::NORMAL);
        assert!(g.check_invariants().is_err());
        g.delete(orphan);
        assert!(g.check_invariants().is_ok());
        assert!(g.reachable()[a.index()]);
    }
}
