//! Variable uses and definitions of leaf nodes.
//!
//! Accesses are recorded in evaluation order: the right-hand side of an
//! assignment before its target, a compound assignment or update reads its
//! target before writing it. Member chains contribute only their base
//! object; as the base of an assignment target it is marked `implied`.

use std::fmt;

#[allow(unused_imports)]
use nolog::*;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::scope::{ScopeId, ScopeTree};

/// Whether an access reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Read of the current value.
    Use,
    /// Write of a new value.
    Def,
}

/// One variable access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarAccess {
    /// Source name.
    pub name: String,
    /// Name with a scope suffix when the binding shadows another one in the
    /// same function.
    pub scoped_name: String,
    /// Read or write.
    pub kind: AccessKind,
    /// Identifier node.
    pub node: NodeId,
    /// The write is a declaration.
    pub is_decl: bool,
    /// Base of a member chain that is itself being written.
    pub implied: bool,
    /// The name binds inside the function and may be renamed.
    pub rename_target: bool,
    /// Versioned name, once SSA renaming ran.
    pub ssa_name: Option<String>,
}

impl VarAccess {
    /// Whether the access reads.
    pub fn is_use(&self) -> bool { self.kind == AccessKind::Use }

    /// Whether the access writes.
    pub fn is_def(&self) -> bool { self.kind == AccessKind::Def }
}

impl fmt::Display for VarAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AccessKind::Use => "use",
            AccessKind::Def => "def",
        };
        write!(f, "{} {}", kind, self.scoped_name)?;
        if let Some(ssa) = &self.ssa_name {
            write!(f, " -> {}", ssa)?;
        }
        if self.is_decl {
            write!(f, " (decl)")?;
        }
        if self.implied {
            write!(f, " (implied)")?;
        }
        Ok(())
    }
}

/// Collects accesses of leaf nodes for one function.
pub struct AccessCollector<'a> {
    ast: &'a Ast,
    scopes: &'a ScopeTree,
    function: ScopeId,
    out: Vec<VarAccess>,
}

impl<'a> AccessCollector<'a> {
    /// Collector for the function whose scope is `function`.
    pub fn new(ast: &'a Ast, scopes: &'a ScopeTree, function: ScopeId) -> Self {
        Self {
            ast,
            scopes,
            function,
            out: vec![],
        }
    }

    /// Take the accesses collected so far.
    pub fn take(&mut self) -> Vec<VarAccess> { std::mem::take(&mut self.out) }

    /// Collect a leaf: a simple statement or a bare expression.
    pub fn leaf(&mut self, node: NodeId) {
        match self.ast.kind(node) {
            NodeKind::ExpressionStatement { expression } => self.expression(*expression),
            NodeKind::VariableDeclaration { kind, declarations } => {
                let lexical = kind.is_lexical();
                for &decl in declarations {
                    if let NodeKind::VariableDeclarator { id, init } = self.ast.kind(decl) {
                        match init {
                            Some(init) => {
                                self.expression(*init);
                                self.define(*id, true);
                            }
                            // `let x;` binds `undefined`, `var x;` does nothing.
                            None if lexical => self.define(*id, true),
                            None => {}
                        }
                    }
                }
            }
            NodeKind::FunctionDeclaration { id, .. } => {
                // Declarations of the function scope itself are defined in START.
                let hoisted = self
                    .scopes
                    .resolve_ident(self.ast, *id)
                    .is_some_and(|decl| decl.node == *id && decl.scope == self.function);
                if !hoisted {
                    self.define(*id, true);
                }
            }
            NodeKind::ReturnStatement { argument } => {
                if let Some(argument) = argument {
                    self.expression(*argument);
                }
            }
            NodeKind::ThrowStatement { argument } => self.expression(*argument),
            NodeKind::BreakStatement { .. }
            | NodeKind::ContinueStatement { .. }
            | NodeKind::EmptyStatement => {}
            _ => self.expression(node),
        }
    }

    /// Collect the binding side of a `for-in`/`for-of` head, which is
    /// assigned once per iteration.
    pub fn binding(&mut self, node: NodeId) {
        match self.ast.kind(node) {
            NodeKind::VariableDeclaration { declarations, .. } => {
                for &decl in declarations {
                    if let NodeKind::VariableDeclarator { id, .. } = self.ast.kind(decl) {
                        self.define(*id, true);
                    }
                }
            }
            _ => self.target(node),
        }
    }

    /// Record the declaration of a parameter or catch binding.
    pub fn declare(&mut self, ident: NodeId) { self.define(ident, true); }

    fn expression(&mut self, node: NodeId) {
        match self.ast.kind(node) {
            NodeKind::Identifier { .. } => self.record(node, AccessKind::Use, false, false),
            NodeKind::Literal { .. } | NodeKind::ThisExpression => {}
            // Nested functions are analyzed on their own.
            NodeKind::FunctionExpression { .. } | NodeKind::ArrowFunction { .. } => {}
            NodeKind::AssignmentExpression {
                operator,
                left,
                right,
            } => {
                if let NodeKind::Identifier { .. } = self.ast.kind(*left) {
                    if operator.is_compound() {
                        self.record(*left, AccessKind::Use, false, false);
                    }
                    self.expression(*right);
                    self.define(*left, false);
                } else {
                    self.target(*left);
                    self.expression(*right);
                }
            }
            NodeKind::UpdateExpression { argument, .. } => match self.ast.kind(*argument) {
                NodeKind::Identifier { .. } => {
                    self.record(*argument, AccessKind::Use, false, false);
                    self.define(*argument, false);
                }
                _ => self.target(*argument),
            },
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                self.expression(*object);
                if *computed {
                    self.expression(*property);
                }
            }
            NodeKind::Property {
                key,
                value,
                computed,
            } => {
                if *computed {
                    self.expression(*key);
                }
                self.expression(*value);
            }
            kind => {
                for (_, child) in kind.fields() {
                    self.expression(child);
                }
            }
        }
    }

    /// Assignment target other than a plain identifier.
    fn target(&mut self, node: NodeId) {
        match self.ast.kind(node) {
            NodeKind::Identifier { .. } => self.define(node, false),
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                match self.ast.kind(*object) {
                    NodeKind::Identifier { .. } => self.record(*object, AccessKind::Use, false, true),
                    NodeKind::MemberExpression { .. } => self.target(*object),
                    _ => self.expression(*object),
                }
                if *computed {
                    self.expression(*property);
                }
            }
            _ => self.expression(node),
        }
    }

    fn define(&mut self, ident: NodeId, is_decl: bool) {
        self.record(ident, AccessKind::Def, is_decl, false);
    }

    fn record(&mut self, ident: NodeId, kind: AccessKind, is_decl: bool, implied: bool) {
        let Some(name) = self.ast.ident_name(ident) else {
            return;
        };
        let (scoped_name, rename_target) = match self.scopes.resolve_ident(self.ast, ident) {
            Some(decl) if self.scopes.is_within(decl.scope, self.function) => (self.scopes.scoped_name(decl), true),
            _ => (name.to_string(), false),
        };
        trace!(->[1] "CFG " => "{:?} {} at {}", kind, scoped_name, ident);
        self.out.push(VarAccess {
            name: name.to_string(),
            scoped_name,
            kind,
            node: ident,
            is_decl,
            implied,
            rename_target,
            ssa_name: None,
        });
    }
}
