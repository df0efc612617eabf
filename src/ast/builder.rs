//! Tree construction helpers for front ends and tests.

use super::*;

/// Builds an [`Ast`] bottom-up: children are created before their parent.
#[derive(Debug, Default)]
pub struct AstBuilder {
    ast: Ast,
    span: Option<Span>,
}

impl AstBuilder {
    /// Create a new builder.
    pub fn new() -> Self { Self::default() }

    /// Set the span of the next node pushed.
    pub fn at(&mut self, start: usize, end: usize) -> &mut Self {
        self.span = Some(Span::new(start, end));
        self
    }

    /// Push a node of any kind.
    pub fn push(&mut self, kind: NodeKind) -> NodeId {
        let span = self.span.take().unwrap_or_default();
        self.ast.push(kind, span)
    }

    /// Read access to the tree built so far.
    pub fn ast(&self) -> &Ast { &self.ast }

    /// Finish with a `Program` wrapping the given top-level statements.
    pub fn program(mut self, body: Vec<NodeId>) -> Ast {
        self.push(NodeKind::Program { body });
        self.ast
    }

    /// Finish without adding a root.
    pub fn finish(self) -> Ast { self.ast }

    // Expressions.

    /// Identifier.
    pub fn ident(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Identifier {
            name: name.to_string(),
        })
    }

    /// Number literal.
    pub fn num(&mut self, value: f64) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::Number(value),
        })
    }

    /// String literal.
    pub fn str_lit(&mut self, value: &str) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::String(value.to_string()),
        })
    }

    /// Boolean literal.
    pub fn bool_lit(&mut self, value: bool) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::Boolean(value),
        })
    }

    /// `null`.
    pub fn null(&mut self) -> NodeId {
        self.push(NodeKind::Literal {
            value: Literal::Null,
        })
    }

    /// `this`.
    pub fn this(&mut self) -> NodeId { self.push(NodeKind::ThisExpression) }

    /// Array literal.
    pub fn array(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::ArrayExpression { elements })
    }

    /// Object literal from `(key, value)` pairs with plain identifier keys.
    pub fn object(&mut self, properties: Vec<(&str, NodeId)>) -> NodeId {
        let properties = properties
            .into_iter()
            .map(|(key, value)| {
                let key = self.ident(key);
                self.push(NodeKind::Property {
                    key,
                    value,
                    computed: false,
                })
            })
            .collect();
        self.push(NodeKind::ObjectExpression { properties })
    }

    /// `object.property`
    pub fn member(&mut self, object: NodeId, property: &str) -> NodeId {
        let property = self.ident(property);
        self.push(NodeKind::MemberExpression {
            object,
            property,
            computed: false,
        })
    }

    /// `object[property]`
    pub fn index(&mut self, object: NodeId, property: NodeId) -> NodeId {
        self.push(NodeKind::MemberExpression {
            object,
            property,
            computed: true,
        })
    }

    /// Call expression.
    pub fn call(&mut self, callee: NodeId, arguments: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::CallExpression { callee, arguments })
    }

    /// Call of a plain identifier, `name(arguments...)`.
    pub fn call_named(&mut self, name: &str, arguments: Vec<NodeId>) -> NodeId {
        let callee = self.ident(name);
        self.call(callee, arguments)
    }

    /// `new` expression.
    pub fn new_expr(&mut self, callee: NodeId, arguments: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::NewExpression { callee, arguments })
    }

    /// Unary expression.
    pub fn unary(&mut self, operator: UnaryOp, argument: NodeId) -> NodeId {
        self.push(NodeKind::UnaryExpression { operator, argument })
    }

    /// `++` or `--`.
    pub fn update(&mut self, operator: UpdateOp, prefix: bool, argument: NodeId) -> NodeId {
        self.push(NodeKind::UpdateExpression {
            operator,
            prefix,
            argument,
        })
    }

    /// Binary expression.
    pub fn binary(&mut self, operator: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(NodeKind::BinaryExpression {
            operator,
            left,
            right,
        })
    }

    /// Short-circuit expression.
    pub fn logical(&mut self, operator: LogicalOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(NodeKind::LogicalExpression {
            operator,
            left,
            right,
        })
    }

    /// Assignment expression.
    pub fn assign(&mut self, operator: AssignOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(NodeKind::AssignmentExpression {
            operator,
            left,
            right,
        })
    }

    /// `test ? consequent : alternate`.
    pub fn conditional(&mut self, test: NodeId, consequent: NodeId, alternate: NodeId) -> NodeId {
        self.push(NodeKind::ConditionalExpression {
            test,
            consequent,
            alternate,
        })
    }

    /// Comma expression.
    pub fn sequence(&mut self, expressions: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::SequenceExpression { expressions })
    }

    // Statements.

    /// Expression statement.
    pub fn expr_stmt(&mut self, expression: NodeId) -> NodeId {
        self.push(NodeKind::ExpressionStatement { expression })
    }

    /// `name = value;`
    pub fn assign_stmt(&mut self, name: &str, value: NodeId) -> NodeId {
        let target = self.ident(name);
        let assign = self.assign(AssignOp::Assign, target, value);
        self.expr_stmt(assign)
    }

    /// `name(arguments...);`
    pub fn call_stmt(&mut self, name: &str, arguments: Vec<NodeId>) -> NodeId {
        let call = self.call_named(name, arguments);
        self.expr_stmt(call)
    }

    /// One declarator of a declaration.
    pub fn declarator(&mut self, name: &str, init: Option<NodeId>) -> NodeId {
        let id = self.ident(name);
        self.push(NodeKind::VariableDeclarator { id, init })
    }

    /// Declaration with several declarators.
    pub fn var_decl(&mut self, kind: DeclKind, decls: Vec<(&str, Option<NodeId>)>) -> NodeId {
        let declarations = decls
            .into_iter()
            .map(|(name, init)| self.declarator(name, init))
            .collect();
        self.push(NodeKind::VariableDeclaration { kind, declarations })
    }

    /// `let name [= init];`
    pub fn let_decl(&mut self, name: &str, init: Option<NodeId>) -> NodeId {
        self.var_decl(DeclKind::Let, vec![(name, init)])
    }

    /// `var name [= init];`
    pub fn var(&mut self, name: &str, init: Option<NodeId>) -> NodeId {
        self.var_decl(DeclKind::Var, vec![(name, init)])
    }

    /// Block statement.
    pub fn block(&mut self, body: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::BlockStatement { body })
    }

    /// `;`.
    pub fn empty(&mut self) -> NodeId { self.push(NodeKind::EmptyStatement) }

    /// `if` statement.
    pub fn if_stmt(&mut self, test: NodeId, consequent: NodeId, alternate: Option<NodeId>) -> NodeId {
        self.push(NodeKind::IfStatement {
            test,
            consequent,
            alternate,
        })
    }

    /// `while` loop.
    pub fn while_stmt(&mut self, test: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::WhileStatement { test, body })
    }

    /// `do ... while` loop.
    pub fn do_while(&mut self, body: NodeId, test: NodeId) -> NodeId {
        self.push(NodeKind::DoWhileStatement { body, test })
    }

    /// Three-clause `for` loop.
    pub fn for_stmt(
        &mut self,
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    ) -> NodeId {
        self.push(NodeKind::ForStatement {
            init,
            test,
            update,
            body,
        })
    }

    /// `for ... in` loop.
    pub fn for_in(&mut self, left: NodeId, right: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::ForInStatement { left, right, body })
    }

    /// `for ... of` loop.
    pub fn for_of(&mut self, left: NodeId, right: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::ForOfStatement { left, right, body })
    }

    /// `switch` statement over cases built with [`Self::case`].
    pub fn switch(&mut self, discriminant: NodeId, cases: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::SwitchStatement {
            discriminant,
            cases,
        })
    }

    /// `case test:` with `Some(test)`, `default:` with `None`.
    pub fn case(&mut self, test: Option<NodeId>, consequent: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::SwitchCase { test, consequent })
    }

    /// `try` statement.
    pub fn try_stmt(
        &mut self,
        block: NodeId,
        handler: Option<NodeId>,
        finalizer: Option<NodeId>,
    ) -> NodeId {
        self.push(NodeKind::TryStatement {
            block,
            handler,
            finalizer,
        })
    }

    /// `catch` clause.
    pub fn catch_clause(&mut self, param: Option<&str>, body: NodeId) -> NodeId {
        let param = param.map(|name| self.ident(name));
        self.push(NodeKind::CatchClause { param, body })
    }

    /// `break`, optionally labeled.
    pub fn break_stmt(&mut self, label: Option<&str>) -> NodeId {
        let label = label.map(|name| self.ident(name));
        self.push(NodeKind::BreakStatement { label })
    }

    /// `continue`, optionally labeled.
    pub fn continue_stmt(&mut self, label: Option<&str>) -> NodeId {
        let label = label.map(|name| self.ident(name));
        self.push(NodeKind::ContinueStatement { label })
    }

    /// Labeled statement.
    pub fn labeled(&mut self, label: &str, body: NodeId) -> NodeId {
        let label = self.ident(label);
        self.push(NodeKind::LabeledStatement { label, body })
    }

    /// `return` statement.
    pub fn return_stmt(&mut self, argument: Option<NodeId>) -> NodeId {
        self.push(NodeKind::ReturnStatement { argument })
    }

    /// `throw` statement.
    pub fn throw_stmt(&mut self, argument: NodeId) -> NodeId {
        self.push(NodeKind::ThrowStatement { argument })
    }

    /// `with` statement.
    pub fn with_stmt(&mut self, object: NodeId, body: NodeId) -> NodeId {
        self.push(NodeKind::WithStatement { object, body })
    }

    // Functions.

    /// `function name(params...) { body... }`
    pub fn function_decl(&mut self, name: &str, params: &[&str], body: Vec<NodeId>) -> NodeId {
        let id = self.ident(name);
        let params = params.iter().map(|param| self.ident(param)).collect();
        let body = self.block(body);
        self.push(NodeKind::FunctionDeclaration { id, params, body })
    }

    /// `function [name](params...) { body... }`
    pub fn function_expr(&mut self, name: Option<&str>, params: &[&str], body: Vec<NodeId>) -> NodeId {
        let id = name.map(|name| self.ident(name));
        let params = params.iter().map(|param| self.ident(param)).collect();
        let body = self.block(body);
        self.push(NodeKind::FunctionExpression { id, params, body })
    }

    /// `(params...) => body`, where `body` is a block or an expression.
    pub fn arrow(&mut self, params: &[&str], body: NodeId) -> NodeId {
        let params = params.iter().map(|param| self.ident(param)).collect();
        self.push(NodeKind::ArrowFunction { params, body })
    }
}
