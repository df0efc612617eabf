//! Edge store of a block graph.
//!
//! Edges are unique per `(from, to)` pair. Successors keep insertion order;
//! predecessors are derived on demand, ordered by block id, and cached until
//! the next mutation.

use std::cell::OnceCell;
use std::collections::HashMap;

use bitflags::bitflags;
use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use super::error::BuildError;
use super::BlockId;

bitflags! {
    /// Semantic kind of an edge. A merged edge carries the union of kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EdgeKind: u8 {
        /// Plain fall-through.
        const NORMAL = 1 << 0;
        /// Taken when a test holds.
        const TRUE = 1 << 1;
        /// Taken when a test fails.
        const FALSE = 1 << 2;
        /// Raised exception.
        const EXCEPTION = 1 << 3;
        /// `break` jump.
        const BREAK = 1 << 4;
        /// `continue` jump.
        const CONTINUE = 1 << 5;
        /// Back to a loop head.
        const LOOP = 1 << 6;
    }
}

/// Depth-first classification of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeClass {
    /// Edge of the spanning tree.
    Tree,
    /// To a proper descendant already visited.
    Forward,
    /// To an ancestor still on the stack, self-loops included.
    Back,
    /// Between unrelated subtrees.
    Cross,
}

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Source block.
    pub from: BlockId,
    /// Target block.
    pub to: BlockId,
    /// Semantic kind.
    pub kind: EdgeKind,
    /// Structural class, set by depth-first classification.
    pub class: Option<EdgeClass>,
}

/// Edges keyed by `(from, to)`.
#[derive(Debug, Clone, Default)]
pub struct EdgeStore {
    edges: HashMap<(BlockId, BlockId), Edge>,
    succs: Vec<Vec<BlockId>>,
    preds: OnceCell<Vec<Vec<BlockId>>>,
}

impl EdgeStore {
    /// Create an empty store.
    pub fn new() -> Self { Self::default() }

    /// Number of edges.
    pub fn len(&self) -> usize { self.edges.len() }

    /// Whether the store has no edges.
    pub fn is_empty(&self) -> bool { self.edges.is_empty() }

    fn touch(&mut self, upto: BlockId) {
        if self.succs.len() <= upto.index() {
            self.succs.resize_with(upto.index() + 1, Vec::new);
        }
        self.preds.take();
    }

    /// Add an edge. Adding an existing pair leaves the store unchanged and
    /// returns the existing edge.
    pub fn add(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) -> &Edge {
        if !self.edges.contains_key(&(from, to)) {
            trace!(->[1] "CFG " => "add edge {} -> {} {:?}", from, to, kind);
            self.touch(from.max(to));
            self.succs[from.index()].push(to);
            self.edges.insert(
                (from, to),
                Edge {
                    from,
                    to,
                    kind,
                    class: None,
                },
            );
        }
        &self.edges[&(from, to)]
    }

    /// Add `kind` to an existing edge.
    pub fn classify(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) -> Result<()> {
        match self.edges.get_mut(&(from, to)) {
            Some(edge) => {
                edge.kind |= kind;
                Ok(())
            }
            None => Err(BuildError::MissingEdge {
                from: from.index(),
                to: to.index(),
            }
            .into()),
        }
    }

    /// Add an edge, or merge `kind` into the existing one.
    pub fn link(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        if let Some(edge) = self.edges.get_mut(&(from, to)) {
            edge.kind |= kind;
        } else {
            self.add(from, to, kind);
        }
    }

    /// Replace the kind of an existing edge.
    pub fn set_kind(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        if let Some(edge) = self.edges.get_mut(&(from, to)) {
            edge.kind = kind;
        }
    }

    /// Set the structural class of an existing edge.
    pub fn set_class(&mut self, from: BlockId, to: BlockId, class: EdgeClass) {
        if let Some(edge) = self.edges.get_mut(&(from, to)) {
            edge.class = Some(class);
        }
    }

    /// Remove an edge, returning it if it existed.
    pub fn remove(&mut self, from: BlockId, to: BlockId) -> Option<Edge> {
        let edge = self.edges.remove(&(from, to))?;
        trace!(->[1] "CFG " => "remove edge {} -> {}", from, to);
        self.succs[from.index()].retain(|&succ| succ != to);
        self.preds.take();
        Some(edge)
    }

    /// Remove every edge entering or leaving a block.
    pub fn detach(&mut self, block: BlockId) {
        for succ in self.successors(block).to_vec() {
            self.remove(block, succ);
        }
        for pred in self.predecessors(block).to_vec() {
            self.remove(pred, block);
        }
    }

    /// Edge between two blocks.
    pub fn get(&self, from: BlockId, to: BlockId) -> Option<&Edge> { self.edges.get(&(from, to)) }

    /// Whether the pair is connected.
    pub fn contains(&self, from: BlockId, to: BlockId) -> bool { self.edges.contains_key(&(from, to)) }

    /// Successors of a block, in insertion order.
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(block.index()).map_or(&[], Vec::as_slice)
    }

    /// Predecessors of a block, ordered by block id.
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        let preds = self.preds.get_or_init(|| {
            let mut preds = vec![Vec::new(); self.succs.len()];
            for (from, succs) in self.succs.iter().enumerate() {
                for to in succs {
                    preds[to.index()].push(BlockId::new(from));
                }
            }
            preds
        });
        preds.get(block.index()).map_or(&[], Vec::as_slice)
    }

    /// All edges, grouped by source block in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.succs
            .iter()
            .enumerate()
            .flat_map(move |(from, succs)| succs.iter().map(move |&to| &self.edges[&(BlockId::new(from), to)]))
    }

    /// Reroute every edge entering `block` to each successor of `block`,
    /// then drop the edges leaving it.
    ///
    /// A rerouted edge keeps the kind of the incoming edge it replaces and is
    /// merged into any edge already present between the same pair.
    pub fn retarget_multiple(&mut self, block: BlockId) {
        let succs: Vec<_> = self.successors(block).iter().copied().filter(|&s| s != block).collect();
        let preds: Vec<_> = self.predecessors(block).iter().copied().filter(|&p| p != block).collect();
        for pred in preds {
            let Some(incoming) = self.remove(pred, block) else {
                continue;
            };
            for &succ in &succs {
                self.link(pred, succ, incoming.kind);
            }
        }
        for succ in self.successors(block).to_vec() {
            self.remove(block, succ);
        }
    }

    /// Renumber blocks after packing. `offsets[old]` is the new id of a
    /// surviving block; edges touching a dropped block are dropped too.
    pub fn renumber(&mut self, offsets: &[Option<BlockId>]) {
        let remap = |id: BlockId| offsets.get(id.index()).copied().flatten();
        let count = offsets.iter().flatten().count();

        // Rebuild through a staging map so old and new keys never mix.
        let mut staging = HashMap::with_capacity(self.edges.len());
        let mut succs = vec![Vec::new(); count];
        for (from, targets) in self.succs.iter().enumerate() {
            let Some(new_from) = remap(BlockId::new(from)) else {
                continue;
            };
            for &to in targets {
                let Some(new_to) = remap(to) else {
                    continue;
                };
                let Some(edge) = self.edges.get(&(BlockId::new(from), to)) else {
                    continue;
                };
                succs[new_from.index()].push(new_to);
                staging.insert(
                    (new_from, new_to),
                    Edge {
                        from: new_from,
                        to: new_to,
                        kind: edge.kind,
                        class: edge.class,
                    },
                );
            }
        }
        self.edges = staging;
        self.succs = succs;
        self.preds.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(n: usize) -> BlockId { BlockId::new(n) }

    #[test]
    fn add_is_idempotent() {
        let mut edges = EdgeStore::new();
        edges.add(b(0), b(1), EdgeKind::TRUE);
        let again = edges.add(b(0), b(1), EdgeKind::FALSE);
        assert_eq!(again.kind, EdgeKind::TRUE);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges.successors(b(0)), &[b(1)]);
    }

    #[test]
    fn classify_unions_kinds() {
        let mut edges = EdgeStore::new();
        edges.add(b(0), b(1), EdgeKind::TRUE);
        edges.classify(b(0), b(1), EdgeKind::LOOP).unwrap();
        assert_eq!(edges.get(b(0), b(1)).unwrap().kind, EdgeKind::TRUE | EdgeKind::LOOP);
        assert!(edges.classify(b(1), b(0), EdgeKind::NORMAL).is_err());
    }

    #[test]
    fn predecessors_follow_mutation() {
        let mut edges = EdgeStore::new();
        edges.add(b(2), b(1), EdgeKind::NORMAL);
        edges.add(b(0), b(1), EdgeKind::NORMAL);
        assert_eq!(edges.predecessors(b(1)), &[b(0), b(2)]);
        edges.remove(b(0), b(1));
        assert_eq!(edges.predecessors(b(1)), &[b(2)]);
        assert!(edges.predecessors(b(7)).is_empty());
    }

    #[test]
    fn retarget_keeps_incoming_kinds() {
        // 0 -T-> 2, 1 -> 2, 0 -F-> 3, 2 -> 3
        let mut edges = EdgeStore::new();
        edges.add(b(0), b(2), EdgeKind::TRUE);
        edges.add(b(1), b(2), EdgeKind::NORMAL);
        edges.add(b(0), b(3), EdgeKind::FALSE);
        edges.add(b(2), b(3), EdgeKind::NORMAL);
        edges.retarget_multiple(b(2));

        assert!(edges.predecessors(b(2)).is_empty());
        assert!(edges.successors(b(2)).is_empty());
        assert_eq!(edges.get(b(0), b(3)).unwrap().kind, EdgeKind::TRUE | EdgeKind::FALSE);
        assert_eq!(edges.get(b(1), b(3)).unwrap().kind, EdgeKind::NORMAL);
        assert_eq!(edges.predecessors(b(3)), &[b(0), b(1)]);
    }

    #[test]
    fn renumber_compacts_ids() {
        let mut edges = EdgeStore::new();
        edges.add(b(0), b(2), EdgeKind::NORMAL);
        edges.add(b(2), b(3), EdgeKind::BREAK);
        edges.set_class(b(2), b(3), EdgeClass::Tree);
        let offsets = [Some(b(0)), None, Some(b(1)), Some(b(2))];
        edges.renumber(&offsets);

        let all: Vec<_> = edges.iter().map(|e| (e.from, e.to, e.kind)).collect();
        assert_eq!(
            all,
            [(b(0), b(1), EdgeKind::NORMAL), (b(1), b(2), EdgeKind::BREAK)]
        );
        assert_eq!(edges.get(b(1), b(2)).unwrap().class, Some(EdgeClass::Tree));
        assert_eq!(edges.predecessors(b(2)), &[b(1)]);
    }
}
