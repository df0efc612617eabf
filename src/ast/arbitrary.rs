//! Random function bodies for property tests.
//!
//! Statements are generated as a [`Shape`] tree first and lowered into an
//! [`Ast`] afterwards. Lowering tracks the enclosing loops, switches and
//! labels, so a `break` or `continue` with nothing to jump to becomes a
//! plain call and every generated function builds.

use proptest::prelude::*;

use crate::ast::{Ast, AstBuilder, NodeId, UpdateOp};

/// Parameters of every generated function.
pub const PARAMS: [&str; 3] = ["a", "b", "c"];

/// Statement shapes. Variables are indices into [`PARAMS`].
#[derive(Debug, Clone)]
pub enum Shape {
    Assign(usize, usize),
    Call(usize),
    Break,
    Continue,
    Return(usize),
    Throw(usize),
    If(usize, Vec<Shape>, Option<Vec<Shape>>),
    While(usize, Vec<Shape>),
    DoWhile(Vec<Shape>, usize),
    For(Option<usize>, Vec<Shape>),
    ForIn(usize, Vec<Shape>),
    /// Block, optionally opening with a `let` that shadows a parameter.
    Block(Option<usize>, Vec<Shape>),
    /// Cases are `(is_default, body)`; only the first default counts.
    Switch(usize, Vec<(bool, Vec<Shape>)>),
    Try(Vec<Shape>, Option<Vec<Shape>>, Option<Vec<Shape>>),
    Labeled(Vec<Shape>),
}

fn var() -> impl Strategy<Value = usize> { 0..PARAMS.len() }

fn arb_leaf() -> BoxedStrategy<Shape> {
    prop_oneof![
        4 => (var(), var()).prop_map(|(l, r)| Shape::Assign(l, r)),
        2 => var().prop_map(Shape::Call),
        1 => Just(Shape::Break),
        1 => Just(Shape::Continue),
        1 => var().prop_map(Shape::Return),
        1 => var().prop_map(Shape::Throw),
    ]
    .boxed()
}

/// A single statement.
pub fn arb_shape() -> BoxedStrategy<Shape> {
    arb_leaf()
        .prop_recursive(4, 48, 4, |inner| {
            let body = || prop::collection::vec(inner.clone(), 0..4);
            prop_oneof![
                3 => (var(), body(), prop::option::of(body())).prop_map(|(t, c, a)| Shape::If(t, c, a)),
                2 => (var(), body()).prop_map(|(t, b)| Shape::While(t, b)),
                1 => (body(), var()).prop_map(|(b, t)| Shape::DoWhile(b, t)),
                1 => (prop::option::of(var()), body()).prop_map(|(t, b)| Shape::For(t, b)),
                1 => (var(), body()).prop_map(|(o, b)| Shape::ForIn(o, b)),
                2 => (prop::option::of(var()), body()).prop_map(|(s, b)| Shape::Block(s, b)),
                1 => (var(), prop::collection::vec((any::<bool>(), body()), 1..4))
                    .prop_map(|(d, c)| Shape::Switch(d, c)),
                2 => (body(), prop::option::of(body()), prop::option::of(body()))
                    .prop_map(|(t, c, f)| Shape::Try(t, c, f)),
                1 => body().prop_map(Shape::Labeled),
            ]
        })
        .boxed()
}

/// A function body.
pub fn arb_body() -> BoxedStrategy<Vec<Shape>> { prop::collection::vec(arb_shape(), 0..6).boxed() }

/// A program holding one function `f(a, b, c)`, and that function.
pub fn arb_function() -> BoxedStrategy<(Ast, NodeId)> { arb_body().prop_map(|body| lower(&body)).boxed() }

/// Lower a body into `function f(a, b, c) { ... }`.
pub fn lower(body: &[Shape]) -> (Ast, NodeId) {
    let mut env = LocalEnv::default();
    let stmts = env.stmts(body);
    let func = env.b.function_decl("f", &PARAMS, stmts);
    (env.b.program(vec![func]), func)
}

#[derive(Default)]
struct LocalEnv {
    b: AstBuilder,
    loops: usize,
    breakable: usize,
    labels: Vec<String>,
    next_label: usize,
}

impl LocalEnv {
    fn ident(&mut self, v: usize) -> NodeId { self.b.ident(PARAMS[v]) }

    fn stmts(&mut self, body: &[Shape]) -> Vec<NodeId> { body.iter().map(|s| self.stmt(s)).collect() }

    fn block(&mut self, body: &[Shape]) -> NodeId {
        let stmts = self.stmts(body);
        self.b.block(stmts)
    }

    fn looped(&mut self, body: &[Shape]) -> NodeId {
        self.loops += 1;
        self.breakable += 1;
        let body = self.block(body);
        self.loops -= 1;
        self.breakable -= 1;
        body
    }

    fn stmt(&mut self, shape: &Shape) -> NodeId {
        match shape {
            Shape::Assign(l, r) => {
                let value = self.ident(*r);
                self.b.assign_stmt(PARAMS[*l], value)
            }
            Shape::Call(v) => {
                let arg = self.ident(*v);
                self.b.call_stmt("g", vec![arg])
            }
            Shape::Break => {
                if self.breakable > 0 {
                    self.b.break_stmt(None)
                } else if let Some(label) = self.labels.last().cloned() {
                    self.b.break_stmt(Some(&label))
                } else {
                    self.b.call_stmt("g", vec![])
                }
            }
            Shape::Continue => match self.loops {
                0 => self.b.call_stmt("g", vec![]),
                _ => self.b.continue_stmt(None),
            },
            Shape::Return(v) => {
                let arg = self.ident(*v);
                self.b.return_stmt(Some(arg))
            }
            Shape::Throw(v) => {
                let arg = self.ident(*v);
                self.b.throw_stmt(arg)
            }
            Shape::If(t, consequent, alternate) => {
                let test = self.ident(*t);
                let consequent = self.block(consequent);
                let alternate = alternate.as_ref().map(|a| self.block(a));
                self.b.if_stmt(test, consequent, alternate)
            }
            Shape::While(t, body) => {
                let test = self.ident(*t);
                let body = self.looped(body);
                self.b.while_stmt(test, body)
            }
            Shape::DoWhile(body, t) => {
                let body = self.looped(body);
                let test = self.ident(*t);
                self.b.do_while(body, test)
            }
            Shape::For(t, body) => {
                let (test, update) = match t {
                    Some(v) => {
                        let test = self.ident(*v);
                        let target = self.ident(*v);
                        (Some(test), Some(self.b.update(UpdateOp::Increment, false, target)))
                    }
                    None => (None, None),
                };
                let body = self.looped(body);
                self.b.for_stmt(None, test, update, body)
            }
            Shape::ForIn(o, body) => {
                let left = self.b.let_decl("k", None);
                let right = self.ident(*o);
                let body = self.looped(body);
                self.b.for_in(left, right, body)
            }
            Shape::Block(shadow, body) => {
                let mut stmts = vec![];
                if let Some(v) = shadow {
                    let init = self.ident((v + 1) % PARAMS.len());
                    stmts.push(self.b.let_decl(PARAMS[*v], Some(init)));
                }
                stmts.extend(self.stmts(body));
                self.b.block(stmts)
            }
            Shape::Switch(d, cases) => {
                let discriminant = self.ident(*d);
                self.breakable += 1;
                let mut has_default = false;
                let mut lowered = vec![];
                for (i, (is_default, body)) in cases.iter().enumerate() {
                    let test = match is_default & !has_default {
                        true => None,
                        false => Some(self.b.num(i as f64)),
                    };
                    has_default |= test.is_none();
                    let consequent = self.stmts(body);
                    lowered.push(self.b.case(test, consequent));
                }
                self.breakable -= 1;
                self.b.switch(discriminant, lowered)
            }
            Shape::Try(block, handler, finalizer) => {
                let block = self.block(block);
                let handler = match (handler, finalizer) {
                    (Some(h), _) => Some(self.block(h)),
                    (None, None) => Some(self.b.block(vec![])),
                    (None, Some(_)) => None,
                };
                let handler = handler.map(|body| self.b.catch_clause(Some("e"), body));
                let finalizer = finalizer.as_ref().map(|f| self.block(f));
                self.b.try_stmt(block, handler, finalizer)
            }
            Shape::Labeled(body) => {
                let label = format!("l{}", self.next_label);
                self.next_label += 1;
                self.labels.push(label.clone());
                let body = self.block(body);
                self.labels.pop();
                self.b.labeled(&label, body)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::{strategy::ValueTree, test_runner::TestRunner};

    use super::*;
    use crate::cfg::CfgBuilder;
    use crate::scope::ScopeTree;

    #[test]
    fn samples_always_build() {
        let mut runner = TestRunner::deterministic();
        let gen = arb_function();
        for _ in 0..64 {
            let (ast, func) = gen.new_tree(&mut runner).unwrap().current();
            let scopes = ScopeTree::analyze(&ast);
            assert!(scopes.errors().is_empty());
            CfgBuilder::build(&ast, &scopes, func).unwrap();
        }
    }

    #[test]
    fn stray_jumps_become_calls() {
        let (ast, func) = lower(&[Shape::Break, Shape::Continue]);
        let scopes = ScopeTree::analyze(&ast);
        assert!(CfgBuilder::build(&ast, &scopes, func).is_ok());
    }
}
