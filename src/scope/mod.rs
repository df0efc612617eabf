//! Lexical scopes.
//!
//! Scope analysis records, for every scope of a source unit, the names it
//! declares and the identifiers that reference names from inside it.
//! Lookups walk parent links, innermost scope first.

use std::collections::HashMap;

use miette::Result;
#[allow(unused_imports)]
use nolog::*;

use crate::ast::{Ast, DeclKind, NodeId, NodeKind};

pub mod error;

pub use error::ScopeError;

/// Index of a scope inside a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    /// Raw index of the scope.
    pub fn index(self) -> usize { self.0 as usize }
}

/// What introduced a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Top-level program.
    Module,
    /// Function or arrow function body.
    Function,
    /// Block statement.
    Block,
    /// `catch` clause, holding its parameter.
    Catch,
    /// Body of a `switch`.
    Switch,
    /// Head of a `for`, `for-in` or `for-of` loop.
    Loop,
    /// Body of a `with` statement.
    With,
}

impl ScopeKind {
    /// Whether `var` declarations stop here.
    pub fn is_function_like(self) -> bool { matches!(self, ScopeKind::Module | ScopeKind::Function) }
}

/// How a name was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
    /// Function parameter.
    Param,
    /// Function declaration.
    Function,
    /// `catch` parameter.
    CatchParam,
}

impl BindingKind {
    /// Whether the binding forbids redeclaration in its scope.
    pub fn is_lexical(self) -> bool { matches!(self, BindingKind::Let | BindingKind::Const) }
}

impl From<DeclKind> for BindingKind {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Var => BindingKind::Var,
            DeclKind::Let => BindingKind::Let,
            DeclKind::Const => BindingKind::Const,
        }
    }
}

/// A declared name.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Declared name.
    pub name: String,
    /// Binding identifier node.
    pub node: NodeId,
    /// How the name was bound.
    pub kind: BindingKind,
    /// Scope holding the binding.
    pub scope: ScopeId,
}

/// A lexical scope.
#[derive(Debug, Clone)]
pub struct Scope {
    /// What introduced the scope.
    pub kind: ScopeKind,
    /// Node that introduced the scope.
    pub node: NodeId,
    /// Enclosing scope.
    pub parent: Option<ScopeId>,
    /// Directly nested scopes.
    pub children: Vec<ScopeId>,
    /// Nearest function or module scope, possibly this one.
    pub function: ScopeId,
    declarations: HashMap<String, Declaration>,
    references: HashMap<String, Vec<NodeId>>,
    /// `var`s hoisted out through this scope, by name.
    hoisted: HashMap<String, NodeId>,
}

impl Scope {
    /// Declaration of a name in this very scope.
    pub fn declaration(&self, name: &str) -> Option<&Declaration> { self.declarations.get(name) }

    /// All declarations of this scope.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> { self.declarations.values() }

    /// Identifiers referencing `name` from inside this scope.
    pub fn references(&self, name: &str) -> &[NodeId] {
        self.references.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Scopes of a whole source unit.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    /// Scope introduced by a node.
    node_scopes: HashMap<NodeId, ScopeId>,
    /// Scope an identifier occurs in.
    ident_scopes: HashMap<NodeId, ScopeId>,
    /// Internal name of every declaration, by binding node.
    scoped_names: HashMap<NodeId, String>,
    errors: Vec<(ScopeId, ScopeError)>,
}

impl ScopeTree {
    /// Analyze the scopes of a tree rooted at a `Program`.
    ///
    /// Redeclarations do not stop the walk; they are kept per function and
    /// reported by [`ScopeTree::check`], so one faulty function does not
    /// poison its siblings.
    pub fn analyze(ast: &Ast) -> Self {
        let mut tree = Self::default();
        if let Some(root) = ast.root() {
            let module = tree.new_scope(ScopeKind::Module, root, None);
            ScopeWalker { ast, tree: &mut tree }.statements(root, module);
        }
        tree.scoped_names = tree
            .scopes
            .iter()
            .flat_map(|scope| scope.declarations())
            .map(|decl| (decl.node, tree.internal_name(decl)))
            .collect();
        tree
    }

    /// Fail with the first error raised inside the given function scope.
    pub fn check(&self, function: ScopeId) -> Result<()> {
        match self
            .errors
            .iter()
            .find(|(scope, _)| self.scope(*scope).function == function)
        {
            Some((_, err)) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    /// All errors found, with the scope they were raised in.
    pub fn errors(&self) -> &[(ScopeId, ScopeError)] { &self.errors }

    /// Scope by id.
    pub fn scope(&self, id: ScopeId) -> &Scope { &self.scopes[id.index()] }

    /// Number of scopes.
    pub fn len(&self) -> usize { self.scopes.len() }

    /// Whether the tree has no scopes.
    pub fn is_empty(&self) -> bool { self.scopes.is_empty() }

    /// Scope introduced by a node, if any.
    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> { self.node_scopes.get(&node).copied() }

    /// Scope an identifier occurs in.
    pub fn ident_scope(&self, ident: NodeId) -> Option<ScopeId> { self.ident_scopes.get(&ident).copied() }

    /// Look a name up starting at `scope` and walking outwards.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<&Declaration> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = self.scope(id);
            if let Some(decl) = scope.declaration(name) {
                return Some(decl);
            }
            current = scope.parent;
        }
        None
    }

    /// Resolve an identifier node to its declaration.
    pub fn resolve_ident(&self, ast: &Ast, ident: NodeId) -> Option<&Declaration> {
        let scope = self.ident_scope(ident)?;
        self.resolve(scope, ast.ident_name(ident)?)
    }

    /// Whether `inner` is `outer` or nested inside it.
    pub fn is_within(&self, inner: ScopeId, outer: ScopeId) -> bool {
        let mut current = Some(inner);
        while let Some(id) = current {
            if id == outer {
                return true;
            }
            current = self.scope(id).parent;
        }
        false
    }

    /// Internal name of a declaration.
    ///
    /// Bindings of the function scope keep their plain name. A binding of a
    /// nested scope is suffixed with its scope id when anything else in the
    /// function goes by the same name: another binding anywhere in the
    /// function, or a reference resolving elsewhere, free names included.
    pub fn scoped_name(&self, decl: &Declaration) -> String {
        self.scoped_names
            .get(&decl.node)
            .cloned()
            .unwrap_or_else(|| self.internal_name(decl))
    }

    fn internal_name(&self, decl: &Declaration) -> String {
        let function = self.scope(decl.scope).function;
        if decl.scope == function {
            return decl.name.clone();
        }
        let collides = self
            .scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| scope.function == function)
            .any(|(i, scope)| {
                let id = ScopeId(i as u32);
                let other_binding = id != decl.scope && scope.declaration(&decl.name).is_some();
                let other_reference = !scope.references(&decl.name).is_empty()
                    && self.resolve(id, &decl.name).map_or(true, |found| found.node != decl.node);
                other_binding || other_reference
            });
        match collides {
            true => format!("{}#{}", decl.name, decl.scope.0),
            false => decl.name.clone(),
        }
    }

    fn new_scope(&mut self, kind: ScopeKind, node: NodeId, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let function = match parent {
            Some(parent) if !kind.is_function_like() => self.scope(parent).function,
            _ => id,
        };
        self.scopes.push(Scope {
            kind,
            node,
            parent,
            children: vec![],
            function,
            declarations: HashMap::new(),
            references: HashMap::new(),
            hoisted: HashMap::new(),
        });
        if let Some(parent) = parent {
            self.scopes[parent.index()].children.push(id);
        }
        self.node_scopes.insert(node, id);
        trace!(->[0] "SCP " => "scope {} {:?} at {}", id.0, kind, node);
        id
    }
}

struct ScopeWalker<'a> {
    ast: &'a Ast,
    tree: &'a mut ScopeTree,
}

impl ScopeWalker<'_> {
    /// Walk the statement list of a `Program`, block or function body in `scope`.
    fn statements(&mut self, node: NodeId, scope: ScopeId) {
        match self.ast.kind(node) {
            NodeKind::Program { body } | NodeKind::BlockStatement { body } => {
                for &stmt in body {
                    self.statement(stmt, scope);
                }
            }
            _ => self.statement(node, scope),
        }
    }

    fn statement(&mut self, node: NodeId, scope: ScopeId) {
        match self.ast.kind(node) {
            NodeKind::FunctionDeclaration { id, .. } => {
                self.declare(*id, BindingKind::Function, scope);
                self.function(node, scope);
            }
            NodeKind::BlockStatement { .. } => {
                let inner = self.tree.new_scope(ScopeKind::Block, node, Some(scope));
                self.statements(node, inner);
            }
            NodeKind::VariableDeclaration { kind, declarations } => {
                for &decl in declarations {
                    if let NodeKind::VariableDeclarator { id, init } = self.ast.kind(decl) {
                        self.declare(*id, (*kind).into(), scope);
                        if let Some(init) = init {
                            self.expression(*init, scope);
                        }
                    }
                }
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                let inner = self.tree.new_scope(ScopeKind::Loop, node, Some(scope));
                if let Some(init) = init {
                    self.statement_or_expression(*init, inner);
                }
                for part in [test, update].into_iter().flatten() {
                    self.expression(*part, inner);
                }
                self.statement(*body, inner);
            }
            NodeKind::ForInStatement { left, right, body }
            | NodeKind::ForOfStatement { left, right, body } => {
                let inner = self.tree.new_scope(ScopeKind::Loop, node, Some(scope));
                self.statement_or_expression(*left, inner);
                self.expression(*right, inner);
                self.statement(*body, inner);
            }
            NodeKind::SwitchStatement {
                discriminant,
                cases,
            } => {
                self.expression(*discriminant, scope);
                let inner = self.tree.new_scope(ScopeKind::Switch, node, Some(scope));
                for &case in cases {
                    if let NodeKind::SwitchCase { test, consequent } = self.ast.kind(case) {
                        if let Some(test) = test {
                            self.expression(*test, inner);
                        }
                        for &stmt in consequent {
                            self.statement(stmt, inner);
                        }
                    }
                }
            }
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                self.statement(*block, scope);
                if let Some(handler) = handler {
                    if let NodeKind::CatchClause { param, body } = self.ast.kind(*handler) {
                        let inner = self.tree.new_scope(ScopeKind::Catch, *handler, Some(scope));
                        if let Some(param) = param {
                            self.declare(*param, BindingKind::CatchParam, inner);
                        }
                        self.statements(*body, inner);
                    }
                }
                if let Some(finalizer) = finalizer {
                    self.statement(*finalizer, scope);
                }
            }
            NodeKind::WithStatement { object, body } => {
                self.expression(*object, scope);
                let inner = self.tree.new_scope(ScopeKind::With, node, Some(scope));
                self.statement(*body, inner);
            }
            NodeKind::LabeledStatement { body, .. } => self.statement(*body, scope),
            NodeKind::BreakStatement { .. }
            | NodeKind::ContinueStatement { .. }
            | NodeKind::EmptyStatement => {}
            kind => {
                // Remaining statements only hold expressions and sub-statements.
                for (_, child) in kind.fields() {
                    self.statement_or_expression(child, scope);
                }
            }
        }
    }

    fn statement_or_expression(&mut self, node: NodeId, scope: ScopeId) {
        if self.ast.node_type(node).is_statement() {
            self.statement(node, scope)
        } else {
            self.expression(node, scope)
        }
    }

    fn expression(&mut self, node: NodeId, scope: ScopeId) {
        match self.ast.kind(node) {
            NodeKind::Identifier { name } => {
                self.tree.ident_scopes.insert(node, scope);
                self.tree.scopes[scope.index()]
                    .references
                    .entry(name.clone())
                    .or_default()
                    .push(node);
            }
            NodeKind::FunctionExpression { .. } | NodeKind::ArrowFunction { .. } => {
                self.function(node, scope)
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                self.expression(*object, scope);
                if *computed {
                    self.expression(*property, scope);
                }
            }
            NodeKind::Property {
                key,
                value,
                computed,
            } => {
                if *computed {
                    self.expression(*key, scope);
                }
                self.expression(*value, scope);
            }
            kind => {
                for (_, child) in kind.fields() {
                    self.expression(child, scope);
                }
            }
        }
    }

    fn function(&mut self, node: NodeId, scope: ScopeId) {
        let inner = self.tree.new_scope(ScopeKind::Function, node, Some(scope));
        let (params, body) = match self.ast.kind(node) {
            NodeKind::FunctionExpression { id, params, body } => {
                if let Some(id) = id {
                    self.declare(*id, BindingKind::Function, inner);
                }
                (params, *body)
            }
            NodeKind::FunctionDeclaration { params, body, .. }
            | NodeKind::ArrowFunction { params, body } => (params, *body),
            _ => return,
        };
        for &param in params {
            self.declare(param, BindingKind::Param, inner);
        }
        match self.ast.kind(body) {
            NodeKind::BlockStatement { .. } => self.statements(body, inner),
            _ => self.expression(body, inner),
        }
    }

    /// Bind an identifier, hoisting `var`s to the function scope.
    ///
    /// A conflicting declaration is recorded and otherwise ignored; the first
    /// binding of a name wins.
    fn declare(&mut self, ident: NodeId, kind: BindingKind, scope: ScopeId) {
        let name = self.ast.ident_name(ident).unwrap_or_default().to_string();
        self.tree.ident_scopes.insert(ident, scope);

        let target = if kind == BindingKind::Var {
            // Every scope the declaration hoists through must not hold a
            // lexical binding of the same name, now or later.
            let function = self.tree.scope(scope).function;
            let mut current = scope;
            let mut passed = vec![];
            let target = loop {
                if let Err(err) = self.check_redeclaration(&name, ident, kind, current) {
                    self.tree.errors.push((scope, err));
                    return;
                }
                if current == function {
                    break current;
                }
                passed.push(current);
                match self.tree.scope(current).parent {
                    Some(parent) => current = parent,
                    None => break current,
                }
            };
            for id in passed {
                self.tree.scopes[id.index()].hoisted.entry(name.clone()).or_insert(ident);
            }
            target
        } else {
            if let Err(err) = self.check_redeclaration(&name, ident, kind, scope) {
                self.tree.errors.push((scope, err));
                return;
            }
            scope
        };

        let declarations = &mut self.tree.scopes[target.index()].declarations;
        if !declarations.contains_key(&name) {
            trace!(->[1] "SCP " => "declare {} ({:?}) in {}", name, kind, target.0);
            declarations.insert(
                name.clone(),
                Declaration {
                    name,
                    node: ident,
                    kind,
                    scope: target,
                },
            );
        }
    }

    fn check_redeclaration(
        &self,
        name: &str,
        ident: NodeId,
        kind: BindingKind,
        scope: ScopeId,
    ) -> Result<(), ScopeError> {
        let scope = self.tree.scope(scope);
        let previous = match scope.declaration(name) {
            Some(previous) if kind.is_lexical() || previous.kind.is_lexical() => Some(previous.node),
            _ if kind.is_lexical() => scope.hoisted.get(name).copied(),
            _ => None,
        };
        match previous {
            Some(previous) => Err(ScopeError::DuplicateDeclaration {
                name: name.to_string(),
                span: self.ast.span(ident).into(),
                previous: self.ast.span(previous).into(),
            }),
            None => Ok(()),
        }
    }
}
