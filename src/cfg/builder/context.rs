//! Jump targets and try handlers in effect while building.

use crate::cfg::BlockId;

/// Where `break` and `continue` go for one enclosing statement.
#[derive(Debug, Clone)]
pub struct JumpTarget {
    /// Labels naming the statement.
    pub labels: Vec<String>,
    /// The block to jump to on `break`.
    pub break_to: BlockId,
    /// The block to jump to on `continue`; loops only.
    pub continue_to: Option<BlockId>,
    /// Whether an unlabeled `break` may stop here. False for plain labeled
    /// statements.
    pub breakable: bool,
}

/// Context.
#[derive(Debug, Default)]
pub struct Context {
    targets: Vec<JumpTarget>,
    handlers: Vec<BlockId>,
}

impl Context {
    /// Create a new context.
    pub fn new() -> Self { Self::default() }

    /// Push a new jump target.
    pub fn push_target(&mut self, target: JumpTarget) { self.targets.push(target); }

    /// Pop a jump target.
    pub fn pop_target(&mut self) -> Option<JumpTarget> { self.targets.pop() }

    /// Innermost target carrying a label.
    pub fn labeled(&self, label: &str) -> Option<&JumpTarget> {
        self.targets
            .iter()
            .rev()
            .find(|target| target.labels.iter().any(|l| l == label))
    }

    /// Innermost target of an unlabeled `break`.
    pub fn innermost_break(&self) -> Option<BlockId> {
        self.targets
            .iter()
            .rev()
            .find(|target| target.breakable)
            .map(|target| target.break_to)
    }

    /// Innermost target of an unlabeled `continue`.
    pub fn innermost_continue(&self) -> Option<BlockId> {
        self.targets.iter().rev().find_map(|target| target.continue_to)
    }

    /// Enter a protected region.
    pub fn push_handler(&mut self, handler: BlockId) { self.handlers.push(handler); }

    /// Leave a protected region.
    pub fn pop_handler(&mut self) -> Option<BlockId> { self.handlers.pop() }

    /// Where a `throw` goes, if anywhere inside the function.
    pub fn current_handler(&self) -> Option<BlockId> { self.handlers.last().copied() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labeled_statements_do_not_catch_plain_breaks() {
        let mut ctx = Context::new();
        ctx.push_target(JumpTarget {
            labels: vec![],
            break_to: BlockId::new(5),
            continue_to: Some(BlockId::new(4)),
            breakable: true,
        });
        ctx.push_target(JumpTarget {
            labels: vec!["block".into()],
            break_to: BlockId::new(7),
            continue_to: None,
            breakable: false,
        });
        assert_eq!(ctx.innermost_break(), Some(BlockId::new(5)));
        assert_eq!(ctx.innermost_continue(), Some(BlockId::new(4)));
        assert_eq!(ctx.labeled("block").map(|t| t.break_to), Some(BlockId::new(7)));
        assert!(ctx.labeled("nope").is_none());
        ctx.pop_target();
        ctx.pop_target();
        assert_eq!(ctx.innermost_break(), None);
    }
}
