//! Compound scope bookkeeping
//!
//! Boolean groups, morph groups, mask scopes and text groups share a single
//! nesting stack. Closing a group or morph scope records a [`GroupRange`]
//! that the binner assigns atomically: the shader evaluates a compound per
//! tile, so every tile it touches must see all of its commands. Closing a
//! mask records a [`MaskRange`]; its children are binned individually.

use smallvec::SmallVec;
use tessera_paint::Rect;

use crate::bounds::Bounds;
use crate::chain::StackError;

/// Maximum compound nesting
pub const MAX_SCOPE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Group,
    Morph,
    Mask,
    Text,
}

/// A scope that has begun but not ended
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpenScope {
    pub kind: ScopeKind,
    /// Begin marker index (first glyph index for text scopes)
    pub start: u32,
    /// Chains captured at begin (text scopes)
    pub warp_head: u32,
    pub modifier_head: u32,
}

impl OpenScope {
    pub fn new(kind: ScopeKind, start: u32) -> Self {
        Self {
            kind,
            start,
            warp_head: 0,
            modifier_head: 0,
        }
    }
}

/// Closed compound, `start..=end` inclusive of both markers
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupRange {
    pub kind: ScopeKind,
    pub start: u32,
    pub end: u32,
    pub bounds: Bounds,
    /// Clip applied when `bounds` is unbounded
    pub clip: Option<Rect>,
}

impl GroupRange {
    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Closed mask scope, by marker index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaskRange {
    pub push: u32,
    pub pop: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeError {
    /// No scope open
    Underflow,
    /// Innermost open scope has a different kind
    Mismatch { open: ScopeKind },
}

pub struct GroupTracker {
    open: SmallVec<[OpenScope; MAX_SCOPE_DEPTH]>,
    phantom: usize,
    ranges: Vec<GroupRange>,
    masks: Vec<MaskRange>,
}

impl GroupTracker {
    pub fn new(max_commands: usize) -> Self {
        Self {
            open: SmallVec::new(),
            phantom: 0,
            // Every range owns at least its two markers
            ranges: Vec::with_capacity(max_commands / 2 + 1),
            masks: Vec::with_capacity(max_commands / 2 + 1),
        }
    }

    pub fn begin(&mut self, scope: OpenScope) -> Result<(), StackError> {
        if self.phantom > 0 || self.open.len() >= MAX_SCOPE_DEPTH {
            self.phantom += 1;
            return Err(StackError::Overflow);
        }
        self.open.push(scope);
        Ok(())
    }

    /// Check that an end of `kind` may close the innermost scope.
    /// `Ok(None)` means the end balances a begin ignored on overflow.
    pub fn peek_end(&self, kind: ScopeKind) -> Result<Option<OpenScope>, ScopeError> {
        if self.phantom > 0 {
            return Ok(None);
        }
        match self.open.last() {
            None => Err(ScopeError::Underflow),
            Some(top) if top.kind != kind => Err(ScopeError::Mismatch { open: top.kind }),
            Some(top) => Ok(Some(*top)),
        }
    }

    /// Close the innermost scope after a successful [`Self::peek_end`]
    pub fn end(&mut self) {
        if self.phantom > 0 {
            self.phantom -= 1;
        } else {
            self.open.pop();
        }
    }

    /// Innermost open text scope, if any
    pub fn text_scope(&self) -> Option<&OpenScope> {
        self.open.iter().rev().find(|scope| scope.kind == ScopeKind::Text)
    }

    pub fn record_range(&mut self, range: GroupRange) {
        self.ranges.push(range);
    }

    pub fn record_mask(&mut self, mask: MaskRange) {
        self.masks.push(mask);
    }

    /// Union of ranges closed strictly inside `start..end`
    pub fn nested_bounds(&self, start: u32, end: u32) -> Bounds {
        self.ranges
            .iter()
            .rev()
            .take_while(|range| range.start > start)
            .filter(|range| range.end < end)
            .fold(Bounds::Empty, |acc, range| acc.union(range.bounds))
    }

    /// Ranges in close order (inner before outer)
    pub fn ranges(&self) -> &[GroupRange] {
        &self.ranges
    }

    /// Closed masks in close order
    pub fn masks(&self) -> &[MaskRange] {
        &self.masks
    }

    pub fn depth(&self) -> usize {
        self.open.len() + self.phantom
    }

    /// Close everything. Returns true if any scope was still open.
    pub fn reset(&mut self) -> bool {
        let unbalanced = self.depth() > 0;
        self.open.clear();
        self.phantom = 0;
        self.ranges.clear();
        self.masks.clear();
        unbalanced
    }
}
