//! Abstract Syntax Tree.
//!
//! The tree is produced by an external front end. Nodes live in an arena
//! ([`Ast`]) and refer to each other through [`NodeId`]s; every node knows
//! its parent, its source span and the ordered, named fields of its kind.
#![allow(missing_docs)]

use std::fmt;

use miette::SourceSpan;

#[cfg(test)]
pub(crate) mod arbitrary;
pub mod builder;
pub(crate) mod display;

pub use builder::AstBuilder;
pub use display::DisplayNode;

/// Stable index of a node inside an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a node id from a raw index.
    pub fn new(index: usize) -> Self { Self(index as u32) }

    /// Raw index of the node.
    pub fn index(self) -> usize { self.0 as usize }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// Byte range of a node in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Start position of the syntax unit.
    pub start: usize,
    /// End position of the syntax unit.
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self { Self { start, end } }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan::new(span.start.into(), span.end.saturating_sub(span.start).into())
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Kind of the node, including its child fields.
    pub kind: NodeKind,
    /// Source range.
    pub span: Span,
    /// Parent node, `None` only for the root.
    pub parent: Option<NodeId>,
}

/// Declaration keyword of a `VariableDeclaration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

impl DeclKind {
    /// Whether the declaration is block scoped.
    pub fn is_lexical(self) -> bool { !matches!(self, DeclKind::Var) }

    /// Keyword of the declaration.
    pub fn as_str(self) -> &'static str {
        match self {
            DeclKind::Var => "var",
            DeclKind::Let => "let",
            DeclKind::Const => "const",
        }
    }
}

/// Literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// Unary operator
///
/// ```text
/// UnaryOp ::= "-" | "+" | "!" | "~" | "typeof" | "void" | "delete"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    BitNot,
    Typeof,
    Void,
    Delete,
}

/// Update operator, `++` or `--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

/// Binary Operator
///
/// ```text
/// BinaryOp ::= "+" | "-" | "*" | "/" | "%" | "==" | "!=" | "===" | "!=="
///            | "<" | "<=" | ">" | ">=" | "&" | "|" | "^" | "<<" | ">>" | ">>>"
///            | "in" | "instanceof"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

/// Short-circuit operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// Assignment operator. Everything but `Assign` reads the target first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    /// Whether the operator reads the old value of its target.
    pub fn is_compound(self) -> bool { !matches!(self, AssignOp::Assign) }
}

/// Node kinds with their child fields.
///
/// The field layout follows ESTree; [`NodeKind::fields`] exposes it
/// generically in schema order.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Program {
        body: Vec<NodeId>,
    },
    FunctionDeclaration {
        id: NodeId,
        params: Vec<NodeId>,
        body: NodeId,
    },
    FunctionExpression {
        id: Option<NodeId>,
        params: Vec<NodeId>,
        body: NodeId,
    },
    /// Arrow function, `body` is either a block or an expression.
    ArrowFunction {
        params: Vec<NodeId>,
        body: NodeId,
    },
    BlockStatement {
        body: Vec<NodeId>,
    },
    EmptyStatement,
    ExpressionStatement {
        expression: NodeId,
    },
    VariableDeclaration {
        kind: DeclKind,
        declarations: Vec<NodeId>,
    },
    VariableDeclarator {
        id: NodeId,
        init: Option<NodeId>,
    },
    IfStatement {
        test: NodeId,
        consequent: NodeId,
        alternate: Option<NodeId>,
    },
    WhileStatement {
        test: NodeId,
        body: NodeId,
    },
    DoWhileStatement {
        body: NodeId,
        test: NodeId,
    },
    ForStatement {
        init: Option<NodeId>,
        test: Option<NodeId>,
        update: Option<NodeId>,
        body: NodeId,
    },
    ForInStatement {
        left: NodeId,
        right: NodeId,
        body: NodeId,
    },
    ForOfStatement {
        left: NodeId,
        right: NodeId,
        body: NodeId,
    },
    SwitchStatement {
        discriminant: NodeId,
        cases: Vec<NodeId>,
    },
    /// `case test:` or, without a test, `default:`.
    SwitchCase {
        test: Option<NodeId>,
        consequent: Vec<NodeId>,
    },
    TryStatement {
        block: NodeId,
        handler: Option<NodeId>,
        finalizer: Option<NodeId>,
    },
    CatchClause {
        param: Option<NodeId>,
        body: NodeId,
    },
    BreakStatement {
        label: Option<NodeId>,
    },
    ContinueStatement {
        label: Option<NodeId>,
    },
    LabeledStatement {
        label: NodeId,
        body: NodeId,
    },
    ReturnStatement {
        argument: Option<NodeId>,
    },
    ThrowStatement {
        argument: NodeId,
    },
    WithStatement {
        object: NodeId,
        body: NodeId,
    },
    Identifier {
        name: String,
    },
    Literal {
        value: Literal,
    },
    ThisExpression,
    ArrayExpression {
        elements: Vec<NodeId>,
    },
    ObjectExpression {
        properties: Vec<NodeId>,
    },
    Property {
        key: NodeId,
        value: NodeId,
        computed: bool,
    },
    UnaryExpression {
        operator: UnaryOp,
        argument: NodeId,
    },
    UpdateExpression {
        operator: UpdateOp,
        prefix: bool,
        argument: NodeId,
    },
    BinaryExpression {
        operator: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    LogicalExpression {
        operator: LogicalOp,
        left: NodeId,
        right: NodeId,
    },
    AssignmentExpression {
        operator: AssignOp,
        left: NodeId,
        right: NodeId,
    },
    ConditionalExpression {
        test: NodeId,
        consequent: NodeId,
        alternate: NodeId,
    },
    CallExpression {
        callee: NodeId,
        arguments: Vec<NodeId>,
    },
    NewExpression {
        callee: NodeId,
        arguments: Vec<NodeId>,
    },
    MemberExpression {
        object: NodeId,
        property: NodeId,
        computed: bool,
    },
    SequenceExpression {
        expressions: Vec<NodeId>,
    },
}

/// Type tag of a node, without its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Program,
    FunctionDeclaration,
    FunctionExpression,
    ArrowFunction,
    BlockStatement,
    EmptyStatement,
    ExpressionStatement,
    VariableDeclaration,
    VariableDeclarator,
    IfStatement,
    WhileStatement,
    DoWhileStatement,
    ForStatement,
    ForInStatement,
    ForOfStatement,
    SwitchStatement,
    SwitchCase,
    TryStatement,
    CatchClause,
    BreakStatement,
    ContinueStatement,
    LabeledStatement,
    ReturnStatement,
    ThrowStatement,
    WithStatement,
    Identifier,
    Literal,
    ThisExpression,
    ArrayExpression,
    ObjectExpression,
    Property,
    UnaryExpression,
    UpdateExpression,
    BinaryExpression,
    LogicalExpression,
    AssignmentExpression,
    ConditionalExpression,
    CallExpression,
    NewExpression,
    MemberExpression,
    SequenceExpression,
}

impl NodeType {
    /// Whether nodes of this type may appear in a statement list.
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            NodeType::FunctionDeclaration
                | NodeType::BlockStatement
                | NodeType::EmptyStatement
                | NodeType::ExpressionStatement
                | NodeType::VariableDeclaration
                | NodeType::IfStatement
                | NodeType::WhileStatement
                | NodeType::DoWhileStatement
                | NodeType::ForStatement
                | NodeType::ForInStatement
                | NodeType::ForOfStatement
                | NodeType::SwitchStatement
                | NodeType::TryStatement
                | NodeType::BreakStatement
                | NodeType::ContinueStatement
                | NodeType::LabeledStatement
                | NodeType::ReturnStatement
                | NodeType::ThrowStatement
                | NodeType::WithStatement
        )
    }

    /// Whether the node starts a new function body.
    pub fn is_function(self) -> bool {
        matches!(
            self,
            NodeType::FunctionDeclaration | NodeType::FunctionExpression | NodeType::ArrowFunction
        )
    }

    /// Whether the node is a loop statement.
    pub fn is_loop(self) -> bool {
        matches!(
            self,
            NodeType::WhileStatement
                | NodeType::DoWhileStatement
                | NodeType::ForStatement
                | NodeType::ForInStatement
                | NodeType::ForOfStatement
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
}

impl NodeKind {
    /// Type tag of the node.
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Program { .. } => NodeType::Program,
            NodeKind::FunctionDeclaration { .. } => NodeType::FunctionDeclaration,
            NodeKind::FunctionExpression { .. } => NodeType::FunctionExpression,
            NodeKind::ArrowFunction { .. } => NodeType::ArrowFunction,
            NodeKind::BlockStatement { .. } => NodeType::BlockStatement,
            NodeKind::EmptyStatement => NodeType::EmptyStatement,
            NodeKind::ExpressionStatement { .. } => NodeType::ExpressionStatement,
            NodeKind::VariableDeclaration { .. } => NodeType::VariableDeclaration,
            NodeKind::VariableDeclarator { .. } => NodeType::VariableDeclarator,
            NodeKind::IfStatement { .. } => NodeType::IfStatement,
            NodeKind::WhileStatement { .. } => NodeType::WhileStatement,
            NodeKind::DoWhileStatement { .. } => NodeType::DoWhileStatement,
            NodeKind::ForStatement { .. } => NodeType::ForStatement,
            NodeKind::ForInStatement { .. } => NodeType::ForInStatement,
            NodeKind::ForOfStatement { .. } => NodeType::ForOfStatement,
            NodeKind::SwitchStatement { .. } => NodeType::SwitchStatement,
            NodeKind::SwitchCase { .. } => NodeType::SwitchCase,
            NodeKind::TryStatement { .. } => NodeType::TryStatement,
            NodeKind::CatchClause { .. } => NodeType::CatchClause,
            NodeKind::BreakStatement { .. } => NodeType::BreakStatement,
            NodeKind::ContinueStatement { .. } => NodeType::ContinueStatement,
            NodeKind::LabeledStatement { .. } => NodeType::LabeledStatement,
            NodeKind::ReturnStatement { .. } => NodeType::ReturnStatement,
            NodeKind::ThrowStatement { .. } => NodeType::ThrowStatement,
            NodeKind::WithStatement { .. } => NodeType::WithStatement,
            NodeKind::Identifier { .. } => NodeType::Identifier,
            NodeKind::Literal { .. } => NodeType::Literal,
            NodeKind::ThisExpression => NodeType::ThisExpression,
            NodeKind::ArrayExpression { .. } => NodeType::ArrayExpression,
            NodeKind::ObjectExpression { .. } => NodeType::ObjectExpression,
            NodeKind::Property { .. } => NodeType::Property,
            NodeKind::UnaryExpression { .. } => NodeType::UnaryExpression,
            NodeKind::UpdateExpression { .. } => NodeType::UpdateExpression,
            NodeKind::BinaryExpression { .. } => NodeType::BinaryExpression,
            NodeKind::LogicalExpression { .. } => NodeType::LogicalExpression,
            NodeKind::AssignmentExpression { .. } => NodeType::AssignmentExpression,
            NodeKind::ConditionalExpression { .. } => NodeType::ConditionalExpression,
            NodeKind::CallExpression { .. } => NodeType::CallExpression,
            NodeKind::NewExpression { .. } => NodeType::NewExpression,
            NodeKind::MemberExpression { .. } => NodeType::MemberExpression,
            NodeKind::SequenceExpression { .. } => NodeType::SequenceExpression,
        }
    }

    /// Ordered, named child fields. List fields repeat their name once per
    /// element; absent optional fields are skipped.
    pub fn fields(&self) -> Vec<(&'static str, NodeId)> {
        fn one(out: &mut Vec<(&'static str, NodeId)>, name: &'static str, id: NodeId) {
            out.push((name, id));
        }
        fn opt(out: &mut Vec<(&'static str, NodeId)>, name: &'static str, id: Option<NodeId>) {
            if let Some(id) = id {
                out.push((name, id));
            }
        }
        fn many(out: &mut Vec<(&'static str, NodeId)>, name: &'static str, ids: &[NodeId]) {
            out.extend(ids.iter().map(|&id| (name, id)));
        }

        let mut out = Vec::new();
        match self {
            NodeKind::Program { body } | NodeKind::BlockStatement { body } => {
                many(&mut out, "body", body)
            }
            NodeKind::FunctionDeclaration { id, params, body } => {
                one(&mut out, "id", *id);
                many(&mut out, "params", params);
                one(&mut out, "body", *body);
            }
            NodeKind::FunctionExpression { id, params, body } => {
                opt(&mut out, "id", *id);
                many(&mut out, "params", params);
                one(&mut out, "body", *body);
            }
            NodeKind::ArrowFunction { params, body } => {
                many(&mut out, "params", params);
                one(&mut out, "body", *body);
            }
            NodeKind::EmptyStatement
            | NodeKind::Identifier { .. }
            | NodeKind::Literal { .. }
            | NodeKind::ThisExpression => {}
            NodeKind::ExpressionStatement { expression } => one(&mut out, "expression", *expression),
            NodeKind::VariableDeclaration { declarations, .. } => {
                many(&mut out, "declarations", declarations)
            }
            NodeKind::VariableDeclarator { id, init } => {
                one(&mut out, "id", *id);
                opt(&mut out, "init", *init);
            }
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                one(&mut out, "test", *test);
                one(&mut out, "consequent", *consequent);
                opt(&mut out, "alternate", *alternate);
            }
            NodeKind::WhileStatement { test, body } => {
                one(&mut out, "test", *test);
                one(&mut out, "body", *body);
            }
            NodeKind::DoWhileStatement { body, test } => {
                one(&mut out, "body", *body);
                one(&mut out, "test", *test);
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                opt(&mut out, "init", *init);
                opt(&mut out, "test", *test);
                opt(&mut out, "update", *update);
                one(&mut out, "body", *body);
            }
            NodeKind::ForInStatement { left, right, body }
            | NodeKind::ForOfStatement { left, right, body } => {
                one(&mut out, "left", *left);
                one(&mut out, "right", *right);
                one(&mut out, "body", *body);
            }
            NodeKind::SwitchStatement {
                discriminant,
                cases,
            } => {
                one(&mut out, "discriminant", *discriminant);
                many(&mut out, "cases", cases);
            }
            NodeKind::SwitchCase { test, consequent } => {
                opt(&mut out, "test", *test);
                many(&mut out, "consequent", consequent);
            }
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                one(&mut out, "block", *block);
                opt(&mut out, "handler", *handler);
                opt(&mut out, "finalizer", *finalizer);
            }
            NodeKind::CatchClause { param, body } => {
                opt(&mut out, "param", *param);
                one(&mut out, "body", *body);
            }
            NodeKind::BreakStatement { label } | NodeKind::ContinueStatement { label } => {
                opt(&mut out, "label", *label)
            }
            NodeKind::LabeledStatement { label, body } => {
                one(&mut out, "label", *label);
                one(&mut out, "body", *body);
            }
            NodeKind::ReturnStatement { argument } => opt(&mut out, "argument", *argument),
            NodeKind::ThrowStatement { argument } => one(&mut out, "argument", *argument),
            NodeKind::WithStatement { object, body } => {
                one(&mut out, "object", *object);
                one(&mut out, "body", *body);
            }
            NodeKind::ArrayExpression { elements } => many(&mut out, "elements", elements),
            NodeKind::ObjectExpression { properties } => many(&mut out, "properties", properties),
            NodeKind::Property { key, value, .. } => {
                one(&mut out, "key", *key);
                one(&mut out, "value", *value);
            }
            NodeKind::UnaryExpression { argument, .. }
            | NodeKind::UpdateExpression { argument, .. } => one(&mut out, "argument", *argument),
            NodeKind::BinaryExpression { left, right, .. }
            | NodeKind::LogicalExpression { left, right, .. }
            | NodeKind::AssignmentExpression { left, right, .. } => {
                one(&mut out, "left", *left);
                one(&mut out, "right", *right);
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                one(&mut out, "test", *test);
                one(&mut out, "consequent", *consequent);
                one(&mut out, "alternate", *alternate);
            }
            NodeKind::CallExpression { callee, arguments }
            | NodeKind::NewExpression { callee, arguments } => {
                one(&mut out, "callee", *callee);
                many(&mut out, "arguments", arguments);
            }
            NodeKind::MemberExpression {
                object, property, ..
            } => {
                one(&mut out, "object", *object);
                one(&mut out, "property", *property);
            }
            NodeKind::SequenceExpression { expressions } => many(&mut out, "expressions", expressions),
        }
        out
    }
}

/// Arena holding every node of a parsed source unit.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<NodeData>,
    root: Option<NodeId>,
}

impl Ast {
    /// Create an empty tree.
    pub fn new() -> Self { Self::default() }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Push a node, making it the parent of all its children.
    ///
    /// A pushed `Program` becomes the root.
    pub fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        for (_, child) in kind.fields() {
            self.nodes[child.index()].parent = Some(id);
        }
        if kind.node_type() == NodeType::Program {
            self.root = Some(id);
        }
        self.nodes.push(NodeData {
            kind,
            span,
            parent: None,
        });
        id
    }

    /// The `Program` node, if one was pushed.
    pub fn root(&self) -> Option<NodeId> { self.root }

    /// Node data.
    pub fn node(&self, id: NodeId) -> &NodeData { &self.nodes[id.index()] }

    /// Node kind.
    pub fn kind(&self, id: NodeId) -> &NodeKind { &self.nodes[id.index()].kind }

    /// Node type tag.
    pub fn node_type(&self, id: NodeId) -> NodeType { self.kind(id).node_type() }

    /// Node source range.
    pub fn span(&self, id: NodeId) -> Span { self.nodes[id.index()].span }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> { self.nodes[id.index()].parent }

    /// Iterate over the strict ancestors of a node, innermost first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&node| self.parent(node))
    }

    /// Name of an identifier node.
    pub fn ident_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Identifier { name } => Some(name),
            _ => None,
        }
    }

    /// Rewrite the name of an identifier. Other nodes are left untouched.
    pub fn rename(&mut self, id: NodeId, new_name: impl Into<String>) {
        if let NodeKind::Identifier { name } = &mut self.nodes[id.index()].kind {
            *name = new_name.into();
        }
    }

    /// All node ids in allocation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> { (0..self.nodes.len()).map(NodeId::new) }

    /// Function-like nodes, in allocation order (inner functions first).
    pub fn functions(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids()
            .filter(move |&id| self.node_type(id).is_function())
    }

    /// Preorder walk of the subtree rooted at `id`.
    pub fn walk(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![id];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            let fields = self.kind(node).fields();
            stack.extend(fields.iter().rev().map(|&(_, child)| child));
            Some(node)
        })
    }

    /// Display a node as source text.
    pub fn display(&self, id: NodeId) -> DisplayNode<'_> { DisplayNode::new(self, id) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_wires_parents() {
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let one = b.num(1.0);
        let assign = b.assign(AssignOp::Assign, a, one);
        let stmt = b.expr_stmt(assign);
        let ast = b.program(vec![stmt]);

        assert_eq!(ast.parent(a), Some(assign));
        assert_eq!(ast.parent(one), Some(assign));
        assert_eq!(ast.parent(assign), Some(stmt));
        assert_eq!(ast.parent(stmt), ast.root());
        assert_eq!(ast.ancestors(a).count(), 3);
    }

    #[test]
    fn fields_follow_schema_order() {
        let mut b = AstBuilder::new();
        let init = b.let_decl("i", None);
        let test = b.ident("t");
        let update = b.ident("u");
        let body = b.empty();
        let stmt = b.for_stmt(Some(init), Some(test), Some(update), body);
        let ast = b.program(vec![stmt]);

        let names: Vec<_> = ast.kind(stmt).fields().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["init", "test", "update", "body"]);

        let walked: Vec<_> = ast.walk(stmt).collect();
        assert_eq!(walked[0], stmt);
        assert_eq!(walked[1], init);
        assert_eq!(*walked.last().unwrap(), body);
    }

    #[test]
    fn rename_only_touches_identifiers() {
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let lit = b.num(3.0);
        let mut ast = b.finish();
        ast.rename(x, "x_0");
        ast.rename(lit, "nope");
        assert_eq!(ast.ident_name(x), Some("x_0"));
        assert!(matches!(ast.kind(lit), NodeKind::Literal { .. }));
    }
}
