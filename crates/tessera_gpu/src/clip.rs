//! Clip rect stack

use smallvec::SmallVec;
use tessera_paint::Rect;

use crate::chain::StackError;

/// Maximum clip nesting
pub const MAX_CLIP_DEPTH: usize = 64;

/// Nested clip rects. Each push is intersected with the current top, so the
/// top is always the effective clip.
#[derive(Default)]
pub struct ClipStack {
    stack: SmallVec<[Rect; 16]>,
    phantom: usize,
}

impl ClipStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rect: Rect) -> Result<(), StackError> {
        if self.phantom > 0 || self.stack.len() >= MAX_CLIP_DEPTH {
            self.phantom += 1;
            return Err(StackError::Overflow);
        }
        let effective = match self.stack.last() {
            Some(top) => top.intersection(&rect),
            None => rect,
        };
        self.stack.push(effective);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<(), StackError> {
        if self.phantom > 0 {
            self.phantom -= 1;
            return Ok(());
        }
        self.stack.pop().map(|_| ()).ok_or(StackError::Underflow)
    }

    /// Effective clip, `None` when nothing is pushed
    pub fn top(&self) -> Option<Rect> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len() + self.phantom
    }

    /// Force depth 0. Returns true if anything was still pushed.
    pub fn reset(&mut self) -> bool {
        let unbalanced = self.depth() > 0;
        self.stack.clear();
        self.phantom = 0;
        unbalanced
    }
}
