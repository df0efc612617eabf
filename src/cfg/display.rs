//! Text listing of a block graph.
//!
//! ```text
//! B2 entry: test
//!     a
//!     ; use a
//!     -> B3 true, B4 false
//! ```

use std::fmt::{self, Display, Write};

use indenter::indented;

use super::{BlockGraph, BlockId, BlockShape, EdgeKind};
use crate::ast::Ast;

/// Listing of a graph, borrowed from the graph and its tree.
pub struct DisplayGraph<'a> {
    graph: &'a BlockGraph,
    ast: &'a Ast,
}

impl BlockGraph {
    /// List the graph, rendering block contents from `ast`.
    pub fn display<'a>(&'a self, ast: &'a Ast) -> DisplayGraph<'a> { DisplayGraph { graph: self, ast } }
}

fn kind_names(kind: EdgeKind) -> String {
    kind.iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

fn shape_name(shape: BlockShape) -> &'static str {
    match shape {
        BlockShape::Start => "start",
        BlockShape::Exit => "exit",
        BlockShape::Normal => "normal",
        BlockShape::Test => "test",
        BlockShape::Loop => "loop",
        BlockShape::Converge => "converge",
        BlockShape::Temporary => "temporary",
        BlockShape::Deleted => "deleted",
    }
}

impl DisplayGraph<'_> {
    fn block(&self, f: &mut fmt::Formatter<'_>, id: BlockId) -> fmt::Result {
        let block = self.graph.block(id);
        write!(f, "{} {}: {}", id, block.label, shape_name(block.shape()))?;
        for (name, _) in block.flags().iter_names() {
            write!(f, " {}", name.to_lowercase())?;
        }
        writeln!(f)?;

        let mut f = indented(f).with_str("    ");
        for &node in &block.nodes {
            writeln!(f, "{}", self.ast.display(node))?;
        }
        if !block.accesses.is_empty() {
            let accesses: Vec<_> = block.accesses.iter().map(ToString::to_string).collect();
            writeln!(f, "; {}", accesses.join(", "))?;
        }
        let succs = self.graph.succs(id);
        if !succs.is_empty() {
            write!(f, "->")?;
            for (i, &succ) in succs.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                match self.graph.edges().get(id, succ) {
                    Some(edge) => write!(f, "{}{} {}", sep, succ, kind_names(edge.kind))?,
                    None => write!(f, "{}{}", sep, succ)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Display for DisplayGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.graph.block_ids() {
            self.block(f, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::cfg::CfgBuilder;
    use crate::scope::ScopeTree;

    #[test]
    fn lists_blocks_with_edges() {
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let call = b.call_stmt("g", vec![]);
        let then = b.block(vec![call]);
        let stmt = b.if_stmt(a, then, None);
        let func = b.function_decl("f", &["a"], vec![stmt]);
        let ast = b.program(vec![func]);
        let scopes = ScopeTree::analyze(&ast);
        let graph = CfgBuilder::build(&ast, &scopes, func).unwrap();

        let text = graph.display(&ast).to_string();
        assert!(text.starts_with("B0 start: start\n"));
        assert!(text.contains("B2 entry: test\n    a\n    ; use a\n"));
        assert!(text.contains("-> B3 true, B4 false"));
        assert!(text.contains("g()"));
    }
}
