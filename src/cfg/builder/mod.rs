//! Build a block graph from a function body.
//!
//! Statements are lowered one at a time into the current block. Every
//! compound statement returns the blocks control may fall out of ("live"
//! blocks); the next statement starts in their join. Jumps (`break`,
//! `continue`, `return`, `throw`) link straight to their target and leave
//! nothing live, so code after them lands in a block without predecessors
//! that cleanup later removes.

pub mod context;

use miette::{Result, SourceSpan};
#[allow(unused_imports)]
use nolog::*;

use crate::ast::{Ast, NodeId, NodeKind, NodeType};
use crate::cfg::access::AccessCollector;
use crate::cfg::{BlockFlags, BlockGraph, BlockId, BlockShape, BuildError, EdgeKind};
use crate::scope::{BindingKind, ScopeId, ScopeTree};

use self::context::{Context, JumpTarget};

/// Blocks whose control falls through to whatever comes next.
type Live = Vec<BlockId>;

enum Body<'a> {
    Statements(&'a [NodeId]),
    Expression(NodeId),
}

/// Block graph builder for one function.
pub struct CfgBuilder<'a> {
    ast: &'a Ast,
    scopes: &'a ScopeTree,
    graph: BlockGraph,
    context: Context,
    collector: AccessCollector<'a>,
    scope: ScopeId,
}

impl<'a> CfgBuilder<'a> {
    /// Build the graph of a function, arrow function or whole program.
    ///
    /// Nested functions are not entered; they form graphs of their own.
    pub fn build(ast: &'a Ast, scopes: &'a ScopeTree, function: NodeId) -> Result<BlockGraph> {
        let not_a_function = || BuildError::NotAFunction {
            node_type: ast.node_type(function).to_string(),
            span: ast.span(function).into(),
        };
        let (params, body): (&[NodeId], NodeId) = match ast.kind(function) {
            NodeKind::Program { .. } => (&[], function),
            NodeKind::FunctionDeclaration { params, body, .. }
            | NodeKind::FunctionExpression { params, body, .. }
            | NodeKind::ArrowFunction { params, body } => (params.as_slice(), *body),
            _ => return Err(not_a_function().into()),
        };
        let body = match ast.kind(body) {
            NodeKind::Program { body } | NodeKind::BlockStatement { body } => Body::Statements(body),
            _ => Body::Expression(body),
        };
        let scope = scopes.scope_of(function).ok_or_else(not_a_function)?;
        scopes.check(scope)?;

        trace!("CFG " => "build {} at {}", ast.node_type(function), function);
        let mut builder = Self {
            ast,
            scopes,
            graph: BlockGraph::new(function, Some(scope)),
            context: Context::new(),
            collector: AccessCollector::new(ast, scopes, scope),
            scope,
        };
        builder.function(params, body)?;
        Ok(builder.graph)
    }

    fn function(&mut self, params: &[NodeId], body: Body<'a>) -> Result<()> {
        let start = self.graph.start();
        let exit = self.graph.exit();
        for &param in params {
            self.collector.declare(param);
        }
        // Function declarations are bound before the body runs.
        let mut hoisted: Vec<_> = self
            .scopes
            .scope(self.scope)
            .declarations()
            .filter(|decl| decl.kind == BindingKind::Function)
            .map(|decl| decl.node)
            .collect();
        hoisted.sort();
        for ident in hoisted {
            self.collector.declare(ident);
        }
        self.graph.block_mut(start).accesses = self.collector.take();

        let entry = self.new_block("entry", &[start]);
        let live = match body {
            Body::Statements(stmts) => self.statements(stmts, vec![entry])?,
            Body::Expression(expr) => {
                self.append(entry, expr);
                self.link(entry, exit, EdgeKind::NORMAL);
                vec![]
            }
        };
        for block in live {
            self.link(block, exit, EdgeKind::NORMAL);
        }
        Ok(())
    }

    fn statements(&mut self, stmts: &[NodeId], mut live: Live) -> Result<Live> {
        for &stmt in stmts {
            let current = self.join(live);
            live = self.statement(stmt, current, vec![])?;
        }
        Ok(live)
    }

    /// Lower one statement starting in `current`. `labels` name the
    /// statement when it sits under labeled statements.
    fn statement(&mut self, node: NodeId, current: BlockId, labels: Vec<String>) -> Result<Live> {
        let ast = self.ast;
        trace!(->[0] "CFG " => "{} {} in {}", ast.node_type(node), node, current);
        match ast.kind(node) {
            NodeKind::EmptyStatement => Ok(vec![current]),
            NodeKind::ExpressionStatement { .. }
            | NodeKind::VariableDeclaration { .. }
            | NodeKind::FunctionDeclaration { .. } => {
                self.append(current, node);
                Ok(vec![current])
            }
            NodeKind::BlockStatement { body } => {
                self.with_scope(node, |this| this.statements(body, vec![current]))
            }
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => self.if_stmt(current, *test, *consequent, *alternate),
            NodeKind::WhileStatement { test, body } => self.while_stmt(current, *test, *body, labels),
            NodeKind::DoWhileStatement { body, test } => self.do_while(current, *body, *test, labels),
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => self.with_scope(node, |this| {
                this.for_stmt(current, *init, *test, *update, *body, labels)
            }),
            NodeKind::ForInStatement { left, right, body } => self.with_scope(node, |this| {
                this.for_each("for-in", current, *left, *right, *body, labels)
            }),
            NodeKind::ForOfStatement { left, right, body } => self.with_scope(node, |this| {
                this.for_each("for-of", current, *left, *right, *body, labels)
            }),
            NodeKind::SwitchStatement {
                discriminant,
                cases,
            } => self.switch(node, current, *discriminant, cases, labels),
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => self.try_stmt(current, *block, *handler, *finalizer),
            NodeKind::BreakStatement { label } => self.jump(node, current, *label, false),
            NodeKind::ContinueStatement { label } => self.jump(node, current, *label, true),
            NodeKind::LabeledStatement { .. } => self.labeled(node, current, labels),
            NodeKind::ReturnStatement { .. } => {
                self.append(current, node);
                let exit = self.graph.exit();
                self.link(current, exit, EdgeKind::NORMAL);
                Ok(vec![])
            }
            NodeKind::ThrowStatement { .. } => {
                self.append(current, node);
                self.graph.mark(current, BlockFlags::THROW);
                // Innermost handler wins; an uncaught throw leaves the function.
                let target = self.context.current_handler().unwrap_or(self.graph.exit());
                self.link(current, target, EdgeKind::EXCEPTION);
                Ok(vec![])
            }
            NodeKind::WithStatement { object, body } => {
                self.append(current, *object);
                self.with_scope(node, |this| this.statement(*body, current, vec![]))
            }
            kind => Err(BuildError::UnexpectedNode {
                node_type: kind.node_type().to_string(),
                span: ast.span(node).into(),
            }
            .into()),
        }
    }

    fn if_stmt(
        &mut self,
        current: BlockId,
        test: NodeId,
        consequent: NodeId,
        alternate: Option<NodeId>,
    ) -> Result<Live> {
        let head = self.test_block(current);
        self.append(head, test);
        let then_bb = self.new_block("if.then", &[]);
        self.branch(head, then_bb, true);
        let converge = self.new_block("if.end", &[]);
        self.graph.mark(converge, BlockShape::Converge);

        let mut live = self.statement(consequent, then_bb, vec![])?;
        match alternate {
            Some(alternate) => {
                let else_bb = self.new_block("if.else", &[]);
                self.branch(head, else_bb, false);
                live.extend(self.statement(alternate, else_bb, vec![])?);
            }
            None => self.branch(head, converge, false),
        }
        for block in live {
            self.link(block, converge, EdgeKind::NORMAL);
        }
        Ok(vec![converge])
    }

    fn while_stmt(&mut self, current: BlockId, test: NodeId, body: NodeId, labels: Vec<String>) -> Result<Live> {
        let head = self.new_block("while.test", &[current]);
        self.graph.mark(head, BlockShape::Test);
        self.append(head, test);
        let body_bb = self.new_block("while.body", &[]);
        self.graph.mark(body_bb, BlockShape::Loop);
        self.branch(head, body_bb, true);
        let exit_bb = self.new_block("while.end", &[]);
        self.graph.mark(exit_bb, BlockShape::Converge);
        self.branch(head, exit_bb, false);

        let live = self.in_loop(labels, exit_bb, head, |this| this.statement(body, body_bb, vec![]))?;
        for block in live {
            self.link(block, head, EdgeKind::LOOP);
        }
        Ok(vec![exit_bb])
    }

    fn do_while(&mut self, current: BlockId, body: NodeId, test: NodeId, labels: Vec<String>) -> Result<Live> {
        let body_bb = self.new_block("do.body", &[current]);
        self.graph.mark(body_bb, BlockShape::Loop);
        let test_bb = self.new_block("do.test", &[]);
        self.graph.mark(test_bb, BlockShape::Test);
        let exit_bb = self.new_block("do.end", &[]);
        self.graph.mark(exit_bb, BlockShape::Converge);

        let live = self.in_loop(labels, exit_bb, test_bb, |this| this.statement(body, body_bb, vec![]))?;
        for block in live {
            self.link(block, test_bb, EdgeKind::NORMAL);
        }
        self.append(test_bb, test);
        self.branch(test_bb, body_bb, true);
        self.link(test_bb, body_bb, EdgeKind::LOOP);
        self.branch(test_bb, exit_bb, false);
        Ok(vec![exit_bb])
    }

    fn for_stmt(
        &mut self,
        current: BlockId,
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
        labels: Vec<String>,
    ) -> Result<Live> {
        if let Some(init) = init {
            self.append(current, init);
        }
        let body_bb = self.new_block("for.body", &[]);
        let exit_bb = self.new_block("for.end", &[]);
        self.graph.mark(exit_bb, BlockShape::Converge);
        // Without a test the body itself heads the loop.
        let head = match test {
            Some(test) => {
                let head = self.new_block("for.test", &[current]);
                self.graph.mark(head, BlockShape::Test);
                self.append(head, test);
                self.branch(head, body_bb, true);
                self.branch(head, exit_bb, false);
                head
            }
            None => {
                self.link(current, body_bb, EdgeKind::NORMAL);
                body_bb
            }
        };
        self.graph.mark(body_bb, BlockShape::Loop);
        let update_bb = match update {
            Some(update) => {
                let block = self.new_block("for.update", &[]);
                self.append(block, update);
                Some(block)
            }
            None => None,
        };

        let continue_to = update_bb.unwrap_or(head);
        let live = self.in_loop(labels, exit_bb, continue_to, |this| this.statement(body, body_bb, vec![]))?;
        match update_bb {
            Some(update_bb) => {
                for block in live {
                    self.link(block, update_bb, EdgeKind::NORMAL);
                }
                self.link(update_bb, head, EdgeKind::LOOP);
            }
            None => {
                for block in live {
                    self.link(block, head, EdgeKind::LOOP);
                }
            }
        }
        Ok(vec![exit_bb])
    }

    /// `for-in` and `for-of`: the head binds the next element or exits.
    fn for_each(
        &mut self,
        name: &str,
        current: BlockId,
        left: NodeId,
        right: NodeId,
        body: NodeId,
        labels: Vec<String>,
    ) -> Result<Live> {
        self.append(current, right);
        let head = self.new_block(format!("{}.next", name), &[current]);
        self.graph.mark(head, BlockShape::Test);
        self.collector.binding(left);
        let accesses = self.collector.take();
        let block = self.graph.block_mut(head);
        block.nodes.push(left);
        block.accesses.extend(accesses);

        let body_bb = self.new_block(format!("{}.body", name), &[]);
        self.graph.mark(body_bb, BlockShape::Loop);
        self.branch(head, body_bb, true);
        let exit_bb = self.new_block(format!("{}.end", name), &[]);
        self.graph.mark(exit_bb, BlockShape::Converge);
        self.branch(head, exit_bb, false);

        let live = self.in_loop(labels, exit_bb, head, |this| this.statement(body, body_bb, vec![]))?;
        for block in live {
            self.link(block, head, EdgeKind::LOOP);
        }
        Ok(vec![exit_bb])
    }

    /// Tests run in source order down a chain of false edges; the last one
    /// falls to `default` wherever it sits, or past the switch. Bodies fall
    /// through into the next body.
    fn switch(
        &mut self,
        node: NodeId,
        current: BlockId,
        discriminant: NodeId,
        cases: &'a [NodeId],
        labels: Vec<String>,
    ) -> Result<Live> {
        self.append(current, discriminant);
        self.with_scope(node, |this| {
            let mut parts = Vec::with_capacity(cases.len());
            for &case in cases {
                parts.push(this.case_parts(case)?);
            }
            let exit_bb = this.new_block("switch.end", &[]);
            this.graph.mark(exit_bb, BlockShape::Converge);
            let bodies: Vec<BlockId> = parts
                .iter()
                .map(|(test, _)| this.new_block(if test.is_some() { "switch.case" } else { "switch.default" }, &[]))
                .collect();

            let mut last_test: Option<BlockId> = None;
            let mut default = None;
            for (&(test, _), &body_bb) in parts.iter().zip(&bodies) {
                let Some(test) = test else {
                    default = Some(body_bb);
                    continue;
                };
                let test_bb = this.new_block("switch.test", &[]);
                this.graph.mark(test_bb, BlockShape::Test);
                this.append(test_bb, test);
                match last_test {
                    Some(prev) => this.branch(prev, test_bb, false),
                    None => this.link(current, test_bb, EdgeKind::NORMAL),
                }
                this.branch(test_bb, body_bb, true);
                last_test = Some(test_bb);
            }
            let fallback = default.unwrap_or(exit_bb);
            match last_test {
                Some(prev) => this.branch(prev, fallback, false),
                None => this.link(current, fallback, EdgeKind::NORMAL),
            }

            let target = JumpTarget {
                labels,
                break_to: exit_bb,
                continue_to: None,
                breakable: true,
            };
            let fall = this.in_target(target, |this| {
                let mut fall: Live = vec![];
                for (&(_, consequent), &body_bb) in parts.iter().zip(&bodies) {
                    for block in fall.drain(..) {
                        this.link(block, body_bb, EdgeKind::NORMAL);
                    }
                    fall = this.statements(consequent, vec![body_bb])?;
                }
                Ok(fall)
            })?;
            for block in fall {
                this.link(block, exit_bb, EdgeKind::NORMAL);
            }
            Ok(vec![exit_bb])
        })
    }

    fn case_parts(&self, case: NodeId) -> Result<(Option<NodeId>, &'a [NodeId])> {
        let ast = self.ast;
        match ast.kind(case) {
            NodeKind::SwitchCase { test, consequent } => Ok((*test, consequent.as_slice())),
            kind => Err(BuildError::UnexpectedNode {
                node_type: kind.node_type().to_string(),
                span: ast.span(case).into(),
            }
            .into()),
        }
    }

    /// The try body starts a fresh block with an exception edge to the
    /// handler; throws inside it link to the handler as well. A `finally`
    /// block follows every live end of the body and handler.
    fn try_stmt(
        &mut self,
        current: BlockId,
        block: NodeId,
        handler: Option<NodeId>,
        finalizer: Option<NodeId>,
    ) -> Result<Live> {
        let try_bb = self.new_block("try", &[current]);
        let catch_bb = match handler {
            Some(handler) => {
                let catch_bb = self.with_scope(handler, |this| Ok(this.new_block("catch", &[])))?;
                self.graph.mark(catch_bb, BlockFlags::CATCH);
                Some(catch_bb)
            }
            None => None,
        };
        let finally_bb = match finalizer {
            Some(_) => {
                let finally_bb = self.new_block("finally", &[]);
                self.graph.mark(finally_bb, BlockFlags::FINALLY);
                Some(finally_bb)
            }
            None => None,
        };

        let protected_by = catch_bb.or(finally_bb);
        if let Some(target) = protected_by {
            self.link(try_bb, target, EdgeKind::EXCEPTION);
        }
        let mut live = self.protected(protected_by, |this| this.statement(block, try_bb, vec![]))?;

        if let (Some(handler), Some(catch_bb)) = (handler, catch_bb) {
            // Throws inside the handler go to the finalizer if there is one.
            live.extend(self.protected(finally_bb, |this| this.catch_clause(handler, catch_bb))?);
        }

        if let (Some(finalizer), Some(finally_bb)) = (finalizer, finally_bb) {
            for block in live {
                self.link(block, finally_bb, EdgeKind::NORMAL);
            }
            live = self.statement(finalizer, finally_bb, vec![])?;
        }
        Ok(live)
    }

    fn catch_clause(&mut self, handler: NodeId, catch_bb: BlockId) -> Result<Live> {
        let ast = self.ast;
        let NodeKind::CatchClause { param, body } = ast.kind(handler) else {
            return Err(BuildError::UnexpectedNode {
                node_type: ast.node_type(handler).to_string(),
                span: ast.span(handler).into(),
            }
            .into());
        };
        self.with_scope(handler, |this| {
            if let Some(param) = param {
                this.collector.declare(*param);
                let accesses = this.collector.take();
                let block = this.graph.block_mut(catch_bb);
                block.nodes.push(*param);
                block.accesses.extend(accesses);
            }
            match ast.kind(*body) {
                NodeKind::BlockStatement { body } => this.statements(body, vec![catch_bb]),
                _ => this.statement(*body, catch_bb, vec![]),
            }
        })
    }

    /// `break` and `continue`, labeled or not, link straight to their target
    /// however many loops they leave.
    fn jump(&mut self, node: NodeId, current: BlockId, label: Option<NodeId>, is_continue: bool) -> Result<Live> {
        self.append(current, node);
        let ast = self.ast;
        let span: SourceSpan = ast.span(node).into();
        let target = match label.and_then(|label| ast.ident_name(label)) {
            Some(name) => {
                let target = self.context.labeled(name).ok_or_else(|| BuildError::LabelNotFound {
                    label: name.to_string(),
                    span,
                })?;
                if is_continue {
                    target.continue_to.ok_or_else(|| BuildError::ContinueToNonLoop {
                        label: name.to_string(),
                        span,
                    })?
                } else {
                    target.break_to
                }
            }
            None if is_continue => self
                .context
                .innermost_continue()
                .ok_or(BuildError::ContinueOutside { span })?,
            None => self
                .context
                .innermost_break()
                .ok_or(BuildError::BreakOutside { span })?,
        };
        let kind = if is_continue { EdgeKind::CONTINUE } else { EdgeKind::BREAK };
        self.link(current, target, kind);
        Ok(vec![])
    }

    /// Loops and switches take their labels along; any other labeled
    /// statement gets an exit block that only a labeled `break` reaches.
    fn labeled(&mut self, node: NodeId, current: BlockId, mut labels: Vec<String>) -> Result<Live> {
        let ast = self.ast;
        let mut body = node;
        while let NodeKind::LabeledStatement { label, body: inner } = ast.kind(body) {
            if let Some(name) = ast.ident_name(*label) {
                labels.push(name.to_string());
            }
            body = *inner;
        }
        let node_type = ast.node_type(body);
        if node_type.is_loop() || node_type == NodeType::SwitchStatement {
            return self.statement(body, current, labels);
        }

        let exit_bb = self.new_block("label.end", &[]);
        self.graph.mark(exit_bb, BlockShape::Converge);
        let target = JumpTarget {
            labels,
            break_to: exit_bb,
            continue_to: None,
            breakable: false,
        };
        let live = self.in_target(target, |this| this.statement(body, current, vec![]))?;
        for block in live {
            self.link(block, exit_bb, EdgeKind::NORMAL);
        }
        Ok(vec![exit_bb])
    }

    // Helpers.

    fn new_block(&mut self, label: impl Into<String>, preds: &[BlockId]) -> BlockId {
        self.graph.new_block(label, Some(self.scope), preds)
    }

    fn link(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) { self.graph.edges_mut().link(from, to, kind); }

    /// Link a test outcome and record it on the test block.
    fn branch(&mut self, test: BlockId, to: BlockId, outcome: bool) {
        let kind = if outcome { EdgeKind::TRUE } else { EdgeKind::FALSE };
        self.link(test, to, kind);
        let block = self.graph.block_mut(test);
        if outcome {
            block.when_true = Some(to);
        } else {
            block.when_false = Some(to);
        }
    }

    /// Block to hold a test: `current` itself when it is plain code,
    /// otherwise a fresh block after it so loop heads and joins keep their
    /// shape.
    fn test_block(&mut self, current: BlockId) -> BlockId {
        let block = if self.graph.block(current).shape() == BlockShape::Normal {
            current
        } else {
            self.new_block("if.test", &[current])
        };
        self.graph.mark(block, BlockShape::Test);
        block
    }

    /// One block to continue in: the single live block, a join of several,
    /// or an unreachable block when nothing is live.
    fn join(&mut self, live: Live) -> BlockId {
        match live.as_slice() {
            [] => self.new_block("unreachable", &[]),
            [only] => *only,
            _ => {
                let block = self.new_block("join", &live);
                self.graph.mark(block, BlockShape::Converge);
                block
            }
        }
    }

    /// Append a leaf to a block and record its variable accesses.
    fn append(&mut self, block: BlockId, node: NodeId) {
        self.collector.leaf(node);
        let accesses = self.collector.take();
        let block = self.graph.block_mut(block);
        block.nodes.push(node);
        block.accesses.extend(accesses);
    }

    /// Run `f` with the scope introduced by `node`, if any, as current.
    fn with_scope<T>(&mut self, node: NodeId, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let Some(scope) = self.scopes.scope_of(node) else {
            return f(self);
        };
        let old = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = old;
        result
    }

    fn in_target<T>(&mut self, target: JumpTarget, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.context.push_target(target);
        let result = f(self);
        self.context.pop_target();
        result
    }

    fn in_loop<T>(
        &mut self,
        labels: Vec<String>,
        break_to: BlockId,
        continue_to: BlockId,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let target = JumpTarget {
            labels,
            break_to,
            continue_to: Some(continue_to),
            breakable: true,
        };
        self.in_target(target, f)
    }

    fn protected<T>(&mut self, handler: Option<BlockId>, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let Some(handler) = handler else {
            return f(self);
        };
        self.context.push_handler(handler);
        let result = f(self);
        self.context.pop_handler();
        result
    }
}
