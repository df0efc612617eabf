use std::fmt::{self, Display, Write};

use indenter::indented;

use super::*;

/// Source rendering of a node, borrowed from its tree.
pub struct DisplayNode<'a> {
    ast: &'a Ast,
    node: NodeId,
}

impl<'a> DisplayNode<'a> {
    pub(crate) fn new(ast: &'a Ast, node: NodeId) -> Self { Self { ast, node } }

    fn of(&self, node: NodeId) -> DisplayNode<'a> { DisplayNode::new(self.ast, node) }

    fn list(&self, f: &mut fmt::Formatter<'_>, nodes: &[NodeId], sep: &str) -> fmt::Result {
        for (i, &node) in nodes.iter().enumerate() {
            if i != 0 {
                write!(f, "{}", sep)?;
            }
            write!(f, "{}", self.of(node))?;
        }
        Ok(())
    }

    fn block(&self, f: &mut fmt::Formatter<'_>, body: &[NodeId]) -> fmt::Result {
        writeln!(f, "{{")?;
        for &stmt in body {
            let mut f = indented(f).with_str("    ");
            writeln!(f, "{}", self.of(stmt))?;
        }
        write!(f, "}}")
    }

    fn function(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: Option<NodeId>,
        params: &[NodeId],
        body: NodeId,
    ) -> fmt::Result {
        write!(f, "function")?;
        if let Some(id) = id {
            write!(f, " {}", self.of(id))?;
        }
        write!(f, "(")?;
        self.list(f, params, ", ")?;
        write!(f, ") {}", self.of(body))
    }

    /// Binding strength, lower binds tighter.
    fn precedence(&self, node: NodeId) -> u32 {
        match self.ast.kind(node) {
            NodeKind::UnaryExpression { .. } | NodeKind::UpdateExpression { .. } => 1,
            NodeKind::BinaryExpression { operator, .. } => match operator {
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 2,
                BinaryOp::Add | BinaryOp::Sub => 3,
                BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => 4,
                BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::In
                | BinaryOp::InstanceOf => 5,
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq | BinaryOp::StrictNe => 6,
                BinaryOp::BitAnd => 7,
                BinaryOp::BitXor => 8,
                BinaryOp::BitOr => 9,
            },
            NodeKind::LogicalExpression { operator, .. } => match operator {
                LogicalOp::And => 10,
                LogicalOp::Or | LogicalOp::Nullish => 11,
            },
            NodeKind::ConditionalExpression { .. } => 12,
            NodeKind::AssignmentExpression { .. } | NodeKind::ArrowFunction { .. } => 13,
            NodeKind::SequenceExpression { .. } => 14,
            _ => 0,
        }
    }

    fn operand(&self, f: &mut fmt::Formatter<'_>, node: NodeId, outer: u32) -> fmt::Result {
        if self.precedence(node) > outer {
            write!(f, "({})", self.of(node))
        } else {
            write!(f, "{}", self.of(node))
        }
    }
}

impl Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = self.precedence(self.node);
        match self.ast.kind(self.node) {
            NodeKind::Program { body } => {
                for &stmt in body {
                    writeln!(f, "{}", self.of(stmt))?;
                }
                Ok(())
            }
            NodeKind::FunctionDeclaration { id, params, body } => {
                self.function(f, Some(*id), params, *body)
            }
            NodeKind::FunctionExpression { id, params, body } => {
                self.function(f, *id, params, *body)
            }
            NodeKind::ArrowFunction { params, body } => {
                write!(f, "(")?;
                self.list(f, params, ", ")?;
                write!(f, ") => {}", self.of(*body))
            }
            NodeKind::BlockStatement { body } => self.block(f, body),
            NodeKind::EmptyStatement => write!(f, ";"),
            NodeKind::ExpressionStatement { expression } => write!(f, "{};", self.of(*expression)),
            NodeKind::VariableDeclaration { kind, declarations } => {
                write!(f, "{} ", kind.as_str())?;
                self.list(f, declarations, ", ")?;
                write!(f, ";")
            }
            NodeKind::VariableDeclarator { id, init } => {
                write!(f, "{}", self.of(*id))?;
                if let Some(init) = init {
                    write!(f, " = {}", self.of(*init))?;
                }
                Ok(())
            }
            NodeKind::IfStatement {
                test,
                consequent,
                alternate,
            } => {
                write!(f, "if ({}) {}", self.of(*test), self.of(*consequent))?;
                if let Some(alternate) = alternate {
                    write!(f, " else {}", self.of(*alternate))?;
                }
                Ok(())
            }
            NodeKind::WhileStatement { test, body } => {
                write!(f, "while ({}) {}", self.of(*test), self.of(*body))
            }
            NodeKind::DoWhileStatement { body, test } => {
                write!(f, "do {} while ({});", self.of(*body), self.of(*test))
            }
            NodeKind::ForStatement {
                init,
                test,
                update,
                body,
            } => {
                write!(f, "for (")?;
                match init {
                    // Declarations print their own semicolon.
                    Some(init) if self.ast.node_type(*init) == NodeType::VariableDeclaration => {
                        write!(f, "{}", self.of(*init))?
                    }
                    Some(init) => write!(f, "{};", self.of(*init))?,
                    None => write!(f, ";")?,
                }
                if let Some(test) = test {
                    write!(f, " {}", self.of(*test))?;
                }
                write!(f, ";")?;
                if let Some(update) = update {
                    write!(f, " {}", self.of(*update))?;
                }
                write!(f, ") {}", self.of(*body))
            }
            NodeKind::ForInStatement { left, right, body } => {
                let left = self.of(*left).to_string();
                write!(
                    f,
                    "for ({} in {}) {}",
                    left.trim_end_matches(';'),
                    self.of(*right),
                    self.of(*body)
                )
            }
            NodeKind::ForOfStatement { left, right, body } => {
                let left = self.of(*left).to_string();
                write!(
                    f,
                    "for ({} of {}) {}",
                    left.trim_end_matches(';'),
                    self.of(*right),
                    self.of(*body)
                )
            }
            NodeKind::SwitchStatement {
                discriminant,
                cases,
            } => {
                writeln!(f, "switch ({}) {{", self.of(*discriminant))?;
                for &case in cases {
                    let mut f = indented(f).with_str("    ");
                    writeln!(f, "{}", self.of(case))?;
                }
                write!(f, "}}")
            }
            NodeKind::SwitchCase { test, consequent } => {
                match test {
                    Some(test) => write!(f, "case {}:", self.of(*test))?,
                    None => write!(f, "default:")?,
                }
                for &stmt in consequent {
                    let mut f = indented(f).with_str("    ");
                    write!(f, "\n{}", self.of(stmt))?;
                }
                Ok(())
            }
            NodeKind::TryStatement {
                block,
                handler,
                finalizer,
            } => {
                write!(f, "try {}", self.of(*block))?;
                if let Some(handler) = handler {
                    write!(f, " {}", self.of(*handler))?;
                }
                if let Some(finalizer) = finalizer {
                    write!(f, " finally {}", self.of(*finalizer))?;
                }
                Ok(())
            }
            NodeKind::CatchClause { param, body } => match param {
                Some(param) => write!(f, "catch ({}) {}", self.of(*param), self.of(*body)),
                None => write!(f, "catch {}", self.of(*body)),
            },
            NodeKind::BreakStatement { label } => match label {
                Some(label) => write!(f, "break {};", self.of(*label)),
                None => write!(f, "break;"),
            },
            NodeKind::ContinueStatement { label } => match label {
                Some(label) => write!(f, "continue {};", self.of(*label)),
                None => write!(f, "continue;"),
            },
            NodeKind::LabeledStatement { label, body } => {
                write!(f, "{}: {}", self.of(*label), self.of(*body))
            }
            NodeKind::ReturnStatement { argument } => match argument {
                Some(argument) => write!(f, "return {};", self.of(*argument)),
                None => write!(f, "return;"),
            },
            NodeKind::ThrowStatement { argument } => write!(f, "throw {};", self.of(*argument)),
            NodeKind::WithStatement { object, body } => {
                write!(f, "with ({}) {}", self.of(*object), self.of(*body))
            }
            NodeKind::Identifier { name } => write!(f, "{}", name),
            NodeKind::Literal { value } => write!(f, "{}", value),
            NodeKind::ThisExpression => write!(f, "this"),
            NodeKind::ArrayExpression { elements } => {
                write!(f, "[")?;
                self.list(f, elements, ", ")?;
                write!(f, "]")
            }
            NodeKind::ObjectExpression { properties } => {
                if properties.is_empty() {
                    return write!(f, "{{}}");
                }
                write!(f, "{{ ")?;
                self.list(f, properties, ", ")?;
                write!(f, " }}")
            }
            NodeKind::Property {
                key,
                value,
                computed,
            } => {
                if *computed {
                    write!(f, "[{}]: {}", self.of(*key), self.of(*value))
                } else {
                    write!(f, "{}: {}", self.of(*key), self.of(*value))
                }
            }
            NodeKind::UnaryExpression { operator, argument } => {
                write!(f, "{}", operator)?;
                if matches!(operator, UnaryOp::Typeof | UnaryOp::Void | UnaryOp::Delete) {
                    write!(f, " ")?;
                }
                self.operand(f, *argument, prec)
            }
            NodeKind::UpdateExpression {
                operator,
                prefix,
                argument,
            } => {
                if *prefix {
                    write!(f, "{}", operator)?;
                    self.operand(f, *argument, prec)
                } else {
                    self.operand(f, *argument, prec)?;
                    write!(f, "{}", operator)
                }
            }
            NodeKind::BinaryExpression {
                operator,
                left,
                right,
            } => {
                self.operand(f, *left, prec)?;
                write!(f, " {} ", operator)?;
                self.operand(f, *right, prec - 1)
            }
            NodeKind::LogicalExpression {
                operator,
                left,
                right,
            } => {
                self.operand(f, *left, prec)?;
                write!(f, " {} ", operator)?;
                self.operand(f, *right, prec - 1)
            }
            NodeKind::AssignmentExpression {
                operator,
                left,
                right,
            } => {
                write!(f, "{} {} ", self.of(*left), operator)?;
                self.operand(f, *right, prec)
            }
            NodeKind::ConditionalExpression {
                test,
                consequent,
                alternate,
            } => {
                self.operand(f, *test, prec - 1)?;
                write!(f, " ? ")?;
                self.operand(f, *consequent, prec)?;
                write!(f, " : ")?;
                self.operand(f, *alternate, prec)
            }
            NodeKind::CallExpression { callee, arguments } => {
                self.operand(f, *callee, 0)?;
                write!(f, "(")?;
                self.list(f, arguments, ", ")?;
                write!(f, ")")
            }
            NodeKind::NewExpression { callee, arguments } => {
                write!(f, "new ")?;
                self.operand(f, *callee, 0)?;
                write!(f, "(")?;
                self.list(f, arguments, ", ")?;
                write!(f, ")")
            }
            NodeKind::MemberExpression {
                object,
                property,
                computed,
            } => {
                self.operand(f, *object, 0)?;
                if *computed {
                    write!(f, "[{}]", self.of(*property))
                } else {
                    write!(f, ".{}", self.of(*property))
                }
            }
            NodeKind::SequenceExpression { expressions } => self.list(f, expressions, ", "),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Typeof => "typeof",
            UnaryOp::Void => "void",
            UnaryOp::Delete => "delete",
        })
    }
}

impl Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateOp::Increment => "++",
            UpdateOp::Decrement => "--",
        })
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::In => "in",
            BinaryOp::InstanceOf => "instanceof",
        })
    }
}

impl Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
            LogicalOp::Nullish => "??",
        })
    }
}

impl Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
            AssignOp::Shl => "<<=",
            AssignOp::Shr => ">>=",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_parenthesizes_by_precedence() {
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let c = b.ident("c");
        let d = b.ident("d");
        let sum = b.binary(BinaryOp::Add, c, d);
        let product = b.binary(BinaryOp::Mul, a, sum);
        let ast = b.finish();
        assert_eq!(ast.display(product).to_string(), "a * (c + d)");
    }

    #[test]
    fn statements_render_as_source() {
        let mut b = AstBuilder::new();
        let a = b.ident("a");
        let call = b.call_stmt("b", vec![]);
        let then = b.block(vec![call]);
        let stmt = b.if_stmt(a, then, None);
        let brk = b.break_stmt(Some("outer"));
        let ast = b.finish();
        assert_eq!(ast.display(stmt).to_string(), "if (a) {\n    b();\n}");
        assert_eq!(ast.display(brk).to_string(), "break outer;");
    }
}
