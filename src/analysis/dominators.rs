//! Dominator tree of a block graph.
//!
//! Immediate dominators come from either the iterative algorithm of Cooper,
//! Harvey and Kennedy or from Lengauer-Tarjan; both give the same tree.
//! Post-dominators run the same code over the reversed graph rooted at
//! `EXIT`. Blocks the root cannot reach have no dominator and dominate
//! nothing.

use std::collections::{BTreeSet, HashSet};

use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use crate::analysis::error::AnalysisError;
use crate::cfg::{BlockGraph, BlockId};

/// How immediate dominators are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DominatorAlgorithm {
    /// Reverse-postorder fixpoint.
    #[default]
    Iterative,
    /// Semidominators with path compression.
    LengauerTarjan,
}

/// Which way edges are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dominance, rooted at `START`.
    Forward,
    /// Post-dominance, rooted at `EXIT`.
    Reverse,
}

/// Dominator tree with dominance frontiers.
#[derive(Debug, Clone)]
pub struct Dominators {
    root: BlockId,
    direction: Direction,
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    pre: Vec<usize>,
    post: Vec<usize>,
    frontier: Vec<Vec<BlockId>>,
}

/// Adjacency of the graph in the direction being analyzed.
struct Flow {
    root: usize,
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

impl Flow {
    fn new(graph: &BlockGraph, direction: Direction) -> Self {
        let n = graph.len();
        let mut succs = vec![vec![]; n];
        let mut preds = vec![vec![]; n];
        for id in graph.block_ids() {
            for &succ in graph.succs(id) {
                let (from, to) = match direction {
                    Direction::Forward => (id.index(), succ.index()),
                    Direction::Reverse => (succ.index(), id.index()),
                };
                succs[from].push(to);
                preds[to].push(from);
            }
        }
        let root = match direction {
            Direction::Forward => graph.start(),
            Direction::Reverse => graph.exit(),
        };
        Self {
            root: root.index(),
            succs,
            preds,
        }
    }

    fn len(&self) -> usize { self.succs.len() }

    /// Depth-first postorder of the nodes reachable from the root.
    fn postorder(&self) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut order = vec![];
        let mut stack = vec![(self.root, 0)];
        seen[self.root] = true;
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match self.succs[node].get(*next) {
                Some(&succ) => {
                    *next += 1;
                    if !seen[succ] {
                        seen[succ] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    order.push(node);
                    stack.pop();
                }
            }
        }
        order
    }
}

impl Dominators {
    /// Dominators of a graph, rooted at `START`.
    pub fn analyze(graph: &BlockGraph, algorithm: DominatorAlgorithm) -> Result<Self> {
        Self::analyze_in(graph, algorithm, Direction::Forward)
    }

    /// Post-dominators of a graph, rooted at `EXIT`.
    pub fn analyze_post(graph: &BlockGraph, algorithm: DominatorAlgorithm) -> Result<Self> {
        Self::analyze_in(graph, algorithm, Direction::Reverse)
    }

    /// Dominators in either direction.
    pub fn analyze_in(graph: &BlockGraph, algorithm: DominatorAlgorithm, direction: Direction) -> Result<Self> {
        let flow = Flow::new(graph, direction);
        let idom = match algorithm {
            DominatorAlgorithm::Iterative => iterative(&flow)?,
            DominatorAlgorithm::LengauerTarjan => LengauerTarjan::new(&flow).compute(),
        };
        let idom: Vec<_> = idom.into_iter().map(|idom| idom.map(BlockId::new)).collect();

        let n = flow.len();
        let mut children = vec![vec![]; n];
        for (node, idom) in idom.iter().enumerate() {
            if let Some(idom) = idom {
                trace!(->[0] "DOM " => "{:?} idom of B{} is {}", direction, node, idom);
                children[idom.index()].push(BlockId::new(node));
            }
        }

        let mut dominators = Self {
            root: BlockId::new(flow.root),
            direction,
            idom,
            children,
            pre: vec![usize::MAX; n],
            post: vec![usize::MAX; n],
            frontier: vec![vec![]; n],
        };
        dominators.number();
        dominators.frontiers(&flow);
        Ok(dominators)
    }

    /// Pre and post numbers of one depth-first walk of the tree.
    fn number(&mut self) {
        let mut clock = 0;
        let mut stack = vec![(self.root, 0)];
        self.pre[self.root.index()] = clock;
        clock += 1;
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match self.children[node.index()].get(*next) {
                Some(&child) => {
                    *next += 1;
                    self.pre[child.index()] = clock;
                    clock += 1;
                    stack.push((child, 0));
                }
                None => {
                    self.post[node.index()] = clock;
                    clock += 1;
                    stack.pop();
                }
            }
        }
    }

    /// The frontier of `b` collects the successors of `b`'s dominator
    /// subtree that `b` does not strictly dominate.
    fn frontiers(&mut self, flow: &Flow) {
        let mut frontier = vec![vec![]; flow.len()];
        for b in self.iter() {
            let mut found = BTreeSet::new();
            let mut stack = vec![b];
            while let Some(x) = stack.pop() {
                for &succ in &flow.succs[x.index()] {
                    let succ = BlockId::new(succ);
                    if !self.strictly_dominates(b, succ) {
                        found.insert(succ);
                    }
                }
                stack.extend(self.children(x).iter().copied());
            }
            trace!(->[0] "DOM " => "frontier of {}: {:?}", b, found);
            frontier[b.index()] = found.into_iter().collect();
        }
        self.frontier = frontier;
    }

    /// Root of the tree.
    pub fn root(&self) -> BlockId { self.root }

    /// Direction the tree was built in.
    pub fn direction(&self) -> Direction { self.direction }

    /// Immediate dominator; `None` for the root and unreached blocks.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> { self.idom.get(b.index()).copied().flatten() }

    /// Whether the root reaches the block.
    pub fn is_reachable(&self, b: BlockId) -> bool { self.pre.get(b.index()).is_some_and(|&pre| pre != usize::MAX) }

    /// Children in the dominator tree, in id order.
    pub fn children(&self, b: BlockId) -> &[BlockId] { &self.children[b.index()] }

    /// Preorder number in the tree.
    pub fn pre(&self, b: BlockId) -> usize { self.pre[b.index()] }

    /// Postorder number in the tree; always above `pre`.
    pub fn post(&self, b: BlockId) -> usize { self.post[b.index()] }

    /// Whether every path from the root to `b` passes through `a`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.is_reachable(a)
            && self.is_reachable(b)
            && self.pre(a) <= self.pre(b)
            && self.post(b) <= self.post(a)
    }

    /// Dominance without `a == b`.
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool { a != b && self.dominates(a, b) }

    /// Dominance frontier of a block, in id order.
    pub fn dominance_frontier(&self, b: BlockId) -> &[BlockId] { &self.frontier[b.index()] }

    /// Closure of a block set under the dominance frontier, in id order.
    pub fn iterated_dominance_frontier(&self, blocks: impl IntoIterator<Item = BlockId>) -> Vec<BlockId> {
        let mut result = BTreeSet::new();
        let mut work: Vec<BlockId> = blocks.into_iter().collect();
        while let Some(b) = work.pop() {
            for &f in self.dominance_frontier(b) {
                if result.insert(f) {
                    work.push(f);
                }
            }
        }
        result.into_iter().collect()
    }

    /// DFS traversal of the dominator tree.
    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        let mut visited = HashSet::new();
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            while let Some(bb) = stack.pop() {
                if visited.insert(bb) {
                    stack.extend(self.children(bb).iter().rev().copied());
                    return Some(bb);
                }
            }
            None
        })
    }
}

/// Intersect two dominator chains, walking up by postorder number.
fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], order: &[usize], root: usize) -> usize {
    while a != b {
        while order[a] < order[b] {
            a = idom[a].unwrap_or(root);
        }
        while order[b] < order[a] {
            b = idom[b].unwrap_or(root);
        }
    }
    a
}

fn iterative(flow: &Flow) -> Result<Vec<Option<usize>>> {
    let n = flow.len();
    let postorder = flow.postorder();
    let mut order = vec![usize::MAX; n];
    for (i, &node) in postorder.iter().enumerate() {
        order[node] = i;
    }

    let mut idom = vec![None; n];
    idom[flow.root] = Some(flow.root);
    let cap = 2 * n + 3;
    let mut iterations = 0;
    let mut changed = true;
    while changed {
        iterations += 1;
        if iterations > cap {
            return Err(AnalysisError::FixpointDiverged {
                analysis: "dominators",
                iterations,
            }
            .into());
        }
        changed = false;
        for &b in postorder.iter().rev() {
            if b == flow.root {
                continue;
            }
            let mut new_idom = None;
            for &p in &flow.preds[b] {
                if idom[p].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(current) => intersect(p, current, &idom, &order, flow.root),
                });
            }
            if new_idom != idom[b] {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }
    trace!("DOM " => "iterative fixpoint after {} passes", iterations);
    idom[flow.root] = None;
    Ok(idom)
}

struct LengauerTarjan<'a> {
    flow: &'a Flow,
    /// Depth-first number, 0 for unvisited.
    dfnum: Vec<usize>,
    /// Node by depth-first number minus one.
    vertex: Vec<usize>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<Option<usize>>,
    best: Vec<usize>,
    bucket: Vec<Vec<usize>>,
}

impl<'a> LengauerTarjan<'a> {
    fn new(flow: &'a Flow) -> Self {
        let n = flow.len();
        Self {
            flow,
            dfnum: vec![0; n],
            vertex: Vec::with_capacity(n),
            parent: (0..n).collect(),
            semi: (0..n).collect(),
            idom: (0..n).collect(),
            ancestor: vec![None; n],
            best: (0..n).collect(),
            bucket: vec![vec![]; n],
        }
    }

    fn compute(mut self) -> Vec<Option<usize>> {
        let flow = self.flow;
        self.dfs();
        for i in (1..self.vertex.len()).rev() {
            let w = self.vertex[i];
            let parent = self.parent[w];

            for &v in &flow.preds[w] {
                if self.dfnum[v] == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u]] < self.dfnum[self.semi[w]] {
                    self.semi[w] = self.semi[u];
                }
            }
            self.bucket[self.semi[w]].push(w);
            self.ancestor[w] = Some(parent);

            for v in std::mem::take(&mut self.bucket[parent]) {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] == self.semi[v] { parent } else { u };
            }
        }
        for i in 1..self.vertex.len() {
            let w = self.vertex[i];
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }

        let mut idom = vec![None; flow.len()];
        for &w in self.vertex.iter().skip(1) {
            idom[w] = Some(self.idom[w]);
        }
        idom
    }

    fn dfs(&mut self) {
        let flow = self.flow;
        self.visit(flow.root);
        let mut stack = vec![(flow.root, 0)];
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match flow.succs[node].get(*next) {
                Some(&succ) => {
                    *next += 1;
                    if self.dfnum[succ] == 0 {
                        self.parent[succ] = node;
                        self.visit(succ);
                        stack.push((succ, 0));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
    }

    fn visit(&mut self, node: usize) {
        self.vertex.push(node);
        self.dfnum[node] = self.vertex.len();
    }

    /// Node with the smallest semidominator on the forest path above `v`.
    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v].is_none() {
            return v;
        }
        self.compress(v);
        self.best[v]
    }

    fn compress(&mut self, v: usize) {
        let mut path = vec![];
        let mut x = v;
        while let Some(a) = self.ancestor[x] {
            if self.ancestor[a].is_none() {
                break;
            }
            path.push(x);
            x = a;
        }
        for &x in path.iter().rev() {
            let Some(a) = self.ancestor[x] else {
                continue;
            };
            if self.dfnum[self.semi[self.best[a]]] < self.dfnum[self.semi[self.best[x]]] {
                self.best[x] = self.best[a];
            }
            self.ancestor[x] = self.ancestor[a];
        }
    }
}

#[cfg(test)]
mod tests {
    use petgraph::algo::dominators::simple_fast;
    use petgraph::graph::{DiGraph, NodeIndex};

    use super::*;
    use crate::cfg::EdgeKind;

    /// Graph over `START`, `EXIT` and `n` extra blocks; edges by index.
    fn graph(n: usize, edges: &[(usize, usize)]) -> BlockGraph {
        let mut g = BlockGraph::new(crate::ast::NodeId::new(0), None);
        for i in 0..n {
            g.new_block(format!("b{}", i + 2), None, &[]);
        }
        for &(from, to) in edges {
            g.edges_mut().add(BlockId::new(from), BlockId::new(to), EdgeKind::NORMAL);
        }
        g
    }

    fn b(i: usize) -> BlockId { BlockId::new(i) }

    fn both(g: &BlockGraph) -> [Dominators; 2] {
        [
            Dominators::analyze(g, DominatorAlgorithm::Iterative).unwrap(),
            Dominators::analyze(g, DominatorAlgorithm::LengauerTarjan).unwrap(),
        ]
    }

    #[test]
    fn diamond() {
        // 0 -> 2 -> {3, 4} -> 5 -> 1
        let g = graph(4, &[(0, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 1)]);
        for dom in both(&g) {
            assert_eq!(dom.idom(b(0)), None);
            assert_eq!(dom.idom(b(3)), Some(b(2)));
            assert_eq!(dom.idom(b(4)), Some(b(2)));
            assert_eq!(dom.idom(b(5)), Some(b(2)));
            assert_eq!(dom.idom(b(1)), Some(b(5)));
            assert!(dom.dominates(b(0), b(1)));
            assert!(dom.dominates(b(2), b(2)));
            assert!(!dom.strictly_dominates(b(2), b(2)));
            assert!(!dom.dominates(b(3), b(5)));
            assert_eq!(dom.dominance_frontier(b(3)), &[b(5)]);
            assert_eq!(dom.dominance_frontier(b(4)), &[b(5)]);
            assert!(dom.dominance_frontier(b(2)).is_empty());
            assert_eq!(dom.iterated_dominance_frontier([b(3), b(4)]), [b(5)]);
        }
    }

    #[test]
    fn loop_head_is_in_its_own_frontier() {
        // 0 -> 2 -> 3 -> 2, 2 -> 1
        let g = graph(2, &[(0, 2), (2, 3), (3, 2), (2, 1)]);
        for dom in both(&g) {
            assert_eq!(dom.idom(b(3)), Some(b(2)));
            assert_eq!(dom.dominance_frontier(b(3)), &[b(2)]);
            assert_eq!(dom.dominance_frontier(b(2)), &[b(2)]);
            assert_eq!(dom.iterated_dominance_frontier([b(3)]), [b(2)]);
        }
    }

    #[test]
    fn tree_numbering_nests() {
        let g = graph(4, &[(0, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 1)]);
        let dom = Dominators::analyze(&g, DominatorAlgorithm::Iterative).unwrap();
        let order: Vec<_> = dom.iter().collect();
        assert_eq!(order[0], b(0));
        assert_eq!(order.len(), 6);
        for id in g.block_ids() {
            assert!(dom.pre(id) < dom.post(id));
            if let Some(idom) = dom.idom(id) {
                assert!(dom.pre(idom) < dom.pre(id) && dom.post(id) < dom.post(idom));
            }
        }
    }

    #[test]
    fn unreachable_blocks_have_no_dominator() {
        let g = graph(2, &[(0, 2), (2, 1), (3, 1)]);
        for dom in both(&g) {
            assert!(!dom.is_reachable(b(3)));
            assert_eq!(dom.idom(b(3)), None);
            assert!(!dom.dominates(b(0), b(3)));
            assert_eq!(dom.idom(b(1)), Some(b(2)));
        }
    }

    #[test]
    fn post_dominators() {
        // 0 -> 2 -> {3, 4} -> 5 -> 1
        let g = graph(4, &[(0, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 1)]);
        for algorithm in [DominatorAlgorithm::Iterative, DominatorAlgorithm::LengauerTarjan] {
            let pdom = Dominators::analyze_post(&g, algorithm).unwrap();
            assert_eq!(pdom.root(), g.exit());
            assert_eq!(pdom.direction(), Direction::Reverse);
            assert_eq!(pdom.idom(b(2)), Some(b(5)));
            assert_eq!(pdom.idom(b(3)), Some(b(5)));
            assert!(pdom.dominates(b(1), b(0)));
            // 3 and 4 are control dependent on 2.
            assert_eq!(pdom.dominance_frontier(b(3)), &[b(2)]);
        }
    }

    #[test]
    fn matches_petgraph() {
        // An irreducible tangle: 2 and 3 both enter the cycle 4 <-> 5.
        let edges = [(0, 2), (0, 3), (2, 4), (3, 5), (4, 5), (5, 4), (4, 6), (5, 6), (6, 7), (7, 2), (6, 1)];
        let g = graph(6, &edges);
        let mut pg = DiGraph::<(), ()>::new();
        for _ in 0..g.len() {
            pg.add_node(());
        }
        for &(from, to) in &edges {
            pg.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
        }
        let oracle = simple_fast(&pg, NodeIndex::new(0));
        for dom in both(&g) {
            for id in g.block_ids() {
                let expected = oracle.immediate_dominator(NodeIndex::new(id.index())).map(|n| b(n.index()));
                assert_eq!(dom.idom(id), expected, "idom of {}", id);
            }
        }
    }

    #[test]
    fn frontier_agrees_with_the_join_point_walk() {
        let edges = [(0, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 2), (5, 6), (6, 1), (3, 6)];
        let g = graph(5, &edges);
        let dom = Dominators::analyze(&g, DominatorAlgorithm::Iterative).unwrap();

        let mut expected = vec![BTreeSet::new(); g.len()];
        for node in g.block_ids() {
            let preds = g.preds(node);
            if preds.len() < 2 {
                continue;
            }
            for &pred in preds {
                let mut runner = Some(pred);
                while let Some(r) = runner.filter(|&r| Some(r) != dom.idom(node)) {
                    expected[r.index()].insert(node);
                    runner = dom.idom(r);
                }
            }
        }
        for id in g.block_ids() {
            let expected: Vec<_> = expected[id.index()].iter().copied().collect();
            assert_eq!(dom.dominance_frontier(id), expected.as_slice(), "frontier of {}", id);
        }
    }
}
