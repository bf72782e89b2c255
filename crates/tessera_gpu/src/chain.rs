//! Warp and modifier chains
//!
//! Both stacks are persistent linked lists stored in a per-frame node arena.
//! Pushing appends a node whose `prev` points at the current head, so any
//! command can capture the whole stack by copying a single head index.
//! Popping only moves the head; nodes stay in the arena until `reset`.
//!
//! Heads and `prev` links are 1-based, 0 is the empty chain.

use tessera_paint::{Point, Rect};

use crate::primitives::GpuChainNode;
use crate::stores::LatticeStore;

/// Maximum nesting of pushes on one chain
pub const MAX_CHAIN_DEPTH: usize = 256;

/// Reference radius for converting twist strength into a pixel displacement
pub const TWIST_REFERENCE_RADIUS: f32 = 50.0;

/// Stack discipline failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackError {
    /// Push ignored, depth or arena exhausted
    Overflow,
    /// Pop on an empty stack ignored
    Underflow,
}

/// Coordinate-space distortion applied before distance evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Warp {
    /// Sinusoidal displacement along both axes
    Wave {
        frequency: f32,
        amplitude: f32,
        phase: f32,
    },
    /// Rotation that grows with distance from `center`
    Twist { center: Point, strength: f32 },
    /// Radial magnification inside `radius`
    Bulge {
        center: Point,
        radius: f32,
        strength: f32,
    },
    /// Free-form deformation by a stored 4×4 lattice over `region`
    Lattice {
        lattice: u32,
        region: Rect,
        scale: f32,
    },
    /// Infinite tiling with the given cell spacing
    Repeat { spacing_x: f32, spacing_y: f32 },
}

/// Warp kinds (must match shader constants)
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarpKind {
    Wave = 1,
    Twist = 2,
    Bulge = 3,
    Lattice = 4,
    Repeat = 5,
}

impl Warp {
    pub fn kind(&self) -> WarpKind {
        match self {
            Warp::Wave { .. } => WarpKind::Wave,
            Warp::Twist { .. } => WarpKind::Twist,
            Warp::Bulge { .. } => WarpKind::Bulge,
            Warp::Lattice { .. } => WarpKind::Lattice,
            Warp::Repeat { .. } => WarpKind::Repeat,
        }
    }

    fn to_node(self, prev: u32) -> GpuChainNode {
        let mut node = GpuChainNode {
            prev,
            kind: self.kind() as u32,
            ..Default::default()
        };
        match self {
            Warp::Wave {
                frequency,
                amplitude,
                phase,
            } => node.params = [frequency, amplitude, phase, 0.0],
            Warp::Twist { center, strength } => node.params = [center.x, center.y, strength, 0.0],
            Warp::Bulge {
                center,
                radius,
                strength,
            } => node.params = [center.x, center.y, radius, strength],
            Warp::Lattice {
                lattice,
                region,
                scale,
            } => {
                node.aux = lattice;
                node.params = region.to_array();
                node.params2 = [scale, 0.0, 0.0, 0.0];
            }
            Warp::Repeat {
                spacing_x,
                spacing_y,
            } => node.params = [spacing_x, spacing_y, 0.0, 0.0],
        }
        node
    }
}

/// Pixel-space effect applied after distance evaluation
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Modifier {
    /// Grow (positive) or shrink (negative) the shape outline
    Offset { distance: f32 },
    /// Blur the outline over `radius` pixels
    Feather { radius: f32 },
}

/// Modifier kinds (must match shader constants)
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifierKind {
    Offset = 1,
    Feather = 2,
}

impl Modifier {
    pub fn kind(&self) -> ModifierKind {
        match self {
            Modifier::Offset { .. } => ModifierKind::Offset,
            Modifier::Feather { .. } => ModifierKind::Feather,
        }
    }

    fn to_node(self, prev: u32) -> GpuChainNode {
        let value = match self {
            Modifier::Offset { distance } => distance,
            Modifier::Feather { radius } => radius,
        };
        GpuChainNode {
            prev,
            kind: self.kind() as u32,
            params: [value, 0.0, 0.0, 0.0],
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node arena
// ─────────────────────────────────────────────────────────────────────────────

struct ChainArena {
    nodes: Vec<GpuChainNode>,
    node_capacity: usize,
    head: u32,
    depth: usize,
    // Pushes ignored on overflow, consumed by the matching pops
    phantom: usize,
}

impl ChainArena {
    fn new(node_capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(node_capacity),
            node_capacity,
            head: 0,
            depth: 0,
            phantom: 0,
        }
    }

    fn push(&mut self, node: impl FnOnce(u32) -> GpuChainNode) -> Result<(), StackError> {
        if self.phantom > 0 || self.depth >= MAX_CHAIN_DEPTH || self.nodes.len() >= self.node_capacity {
            self.phantom += 1;
            return Err(StackError::Overflow);
        }
        self.nodes.push(node(self.head));
        self.head = self.nodes.len() as u32;
        self.depth += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<(), StackError> {
        if self.phantom > 0 {
            self.phantom -= 1;
            return Ok(());
        }
        if self.depth == 0 {
            return Err(StackError::Underflow);
        }
        self.head = self
            .nodes
            .get(self.head as usize - 1)
            .map_or(0, |node| node.prev);
        self.depth -= 1;
        Ok(())
    }

    fn walk(&self, head: u32) -> ChainIter<'_> {
        ChainIter {
            nodes: &self.nodes,
            next: head,
            remaining: MAX_CHAIN_DEPTH,
        }
    }

    /// Clear nodes and force depth 0. Returns true if anything was still pushed.
    fn reset(&mut self) -> bool {
        let unbalanced = self.depth > 0 || self.phantom > 0;
        self.nodes.clear();
        self.head = 0;
        self.depth = 0;
        self.phantom = 0;
        unbalanced
    }
}

/// Walks a chain from its head towards the root. Bounded by
/// [`MAX_CHAIN_DEPTH`] and stops at links outside the arena.
struct ChainIter<'a> {
    nodes: &'a [GpuChainNode],
    next: u32,
    remaining: usize,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a GpuChainNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == 0 || self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.next as usize - 1)?;
        self.remaining -= 1;
        self.next = node.prev;
        Some(node)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stacks
// ─────────────────────────────────────────────────────────────────────────────

/// Stack of coordinate warps
pub struct WarpStack {
    arena: ChainArena,
}

impl WarpStack {
    pub fn new(node_capacity: usize) -> Self {
        Self {
            arena: ChainArena::new(node_capacity),
        }
    }

    pub fn push(&mut self, warp: Warp) -> Result<(), StackError> {
        self.arena.push(|prev| warp.to_node(prev))
    }

    pub fn pop(&mut self) -> Result<(), StackError> {
        self.arena.pop()
    }

    /// Head to stamp onto new commands
    pub fn head(&self) -> u32 {
        self.arena.head
    }

    /// Effective depth, including pushes ignored on overflow
    pub fn depth(&self) -> usize {
        self.arena.depth + self.arena.phantom
    }

    pub fn nodes(&self) -> &[GpuChainNode] {
        &self.arena.nodes
    }

    /// Conservative upper bound on how far the chain at `head` can move a
    /// point, in pixels. `Repeat` contributes nothing here; check
    /// [`Self::contains_repeat`] separately.
    pub fn estimate_displacement(&self, head: u32, lattices: &LatticeStore) -> f32 {
        self.arena
            .walk(head)
            .map(|node| match node.kind {
                k if k == WarpKind::Wave as u32 => node.params[1].abs(),
                k if k == WarpKind::Twist as u32 => node.params[2].abs() * TWIST_REFERENCE_RADIUS,
                k if k == WarpKind::Bulge as u32 => node.params[3].abs() * node.params[2].abs() * 0.5,
                k if k == WarpKind::Lattice as u32 => {
                    lattices.max_offset(node.aux).unwrap_or(0.0) * node.params2[0].abs()
                }
                _ => 0.0,
            })
            .sum()
    }

    /// True if any warp on the chain tiles the shape across the plane
    pub fn contains_repeat(&self, head: u32) -> bool {
        self.arena
            .walk(head)
            .any(|node| node.kind == WarpKind::Repeat as u32)
    }

    pub fn reset(&mut self) -> bool {
        self.arena.reset()
    }
}

/// Stack of pixel-space modifiers
pub struct ModifierStack {
    arena: ChainArena,
}

impl ModifierStack {
    pub fn new(node_capacity: usize) -> Self {
        Self {
            arena: ChainArena::new(node_capacity),
        }
    }

    pub fn push(&mut self, modifier: Modifier) -> Result<(), StackError> {
        self.arena.push(|prev| modifier.to_node(prev))
    }

    pub fn pop(&mut self) -> Result<(), StackError> {
        self.arena.pop()
    }

    pub fn head(&self) -> u32 {
        self.arena.head
    }

    pub fn depth(&self) -> usize {
        self.arena.depth + self.arena.phantom
    }

    pub fn nodes(&self) -> &[GpuChainNode] {
        &self.arena.nodes
    }

    /// How far the chain at `head` can grow a shape's outline, in pixels.
    /// Negative offsets never shrink the estimate.
    pub fn expansion(&self, head: u32) -> f32 {
        self.arena
            .walk(head)
            .map(|node| match node.kind {
                k if k == ModifierKind::Offset as u32 => node.params[0].max(0.0),
                k if k == ModifierKind::Feather as u32 => node.params[0].abs(),
                _ => 0.0,
            })
            .sum()
    }

    pub fn reset(&mut self) -> bool {
        self.arena.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(amplitude: f32) -> Warp {
        Warp::Wave {
            frequency: 2.0,
            amplitude,
            phase: 0.0,
        }
    }

    #[test]
    fn test_push_pop_restores_head() {
        let mut stack = WarpStack::new(64);
        stack.push(wave(1.0)).unwrap();
        let outer = stack.head();
        stack.push(wave(2.0)).unwrap();
        assert_eq!(stack.head(), 2);
        assert_eq!(stack.nodes()[1].prev, outer);

        stack.pop().unwrap();
        assert_eq!(stack.head(), outer);
        stack.pop().unwrap();
        assert_eq!(stack.head(), 0);
        assert_eq!(stack.pop(), Err(StackError::Underflow));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_displacement_sums_chain() {
        let lattices = LatticeStore::new(1);
        let mut stack = WarpStack::new(64);
        stack.push(wave(-10.0)).unwrap();
        stack
            .push(Warp::Twist {
                center: Point::ZERO,
                strength: 0.1,
            })
            .unwrap();
        stack
            .push(Warp::Bulge {
                center: Point::ZERO,
                radius: 40.0,
                strength: -0.5,
            })
            .unwrap();

        let d = stack.estimate_displacement(stack.head(), &lattices);
        assert!((d - (10.0 + 5.0 + 10.0)).abs() < 1e-4);
        assert!(!stack.contains_repeat(stack.head()));
    }

    #[test]
    fn test_lattice_displacement_uses_store() {
        let mut lattices = LatticeStore::new(1);
        let mut offsets = [[0.0; 2]; 16];
        offsets[0] = [4.0, 0.0];
        let index = lattices.push_lattice(offsets).unwrap();

        let mut stack = WarpStack::new(8);
        stack
            .push(Warp::Lattice {
                lattice: index,
                region: Rect::new(0.0, 0.0, 100.0, 100.0),
                scale: 2.5,
            })
            .unwrap();
        assert_eq!(stack.estimate_displacement(stack.head(), &lattices), 10.0);
    }

    #[test]
    fn test_repeat_detected_below_head() {
        let mut stack = WarpStack::new(8);
        stack
            .push(Warp::Repeat {
                spacing_x: 20.0,
                spacing_y: 20.0,
            })
            .unwrap();
        stack.push(wave(1.0)).unwrap();
        assert!(stack.contains_repeat(stack.head()));
        stack.pop().unwrap();
        stack.pop().unwrap();
        assert!(!stack.contains_repeat(stack.head()));
    }

    #[test]
    fn test_overflow_pops_are_consumed() {
        let mut stack = WarpStack::new(2);
        stack.push(wave(1.0)).unwrap();
        stack.push(wave(1.0)).unwrap();
        let full_head = stack.head();
        assert_eq!(stack.push(wave(1.0)), Err(StackError::Overflow));
        assert_eq!(stack.head(), full_head);
        assert_eq!(stack.depth(), 3);

        // The pop matching the ignored push leaves the real stack alone
        stack.pop().unwrap();
        assert_eq!(stack.head(), full_head);
        stack.pop().unwrap();
        stack.pop().unwrap();
        assert_eq!((stack.depth(), stack.head()), (0, 0));
    }

    #[test]
    fn test_depth_limit() {
        let mut stack = ModifierStack::new(MAX_CHAIN_DEPTH * 2);
        for _ in 0..MAX_CHAIN_DEPTH {
            stack.push(Modifier::Feather { radius: 1.0 }).unwrap();
        }
        assert_eq!(
            stack.push(Modifier::Feather { radius: 1.0 }),
            Err(StackError::Overflow)
        );
        // Walk is capped at the maximum depth
        assert_eq!(stack.expansion(stack.head()), MAX_CHAIN_DEPTH as f32);
    }

    #[test]
    fn test_modifier_expansion() {
        let mut stack = ModifierStack::new(8);
        stack.push(Modifier::Offset { distance: -4.0 }).unwrap();
        stack.push(Modifier::Offset { distance: 3.0 }).unwrap();
        stack.push(Modifier::Feather { radius: -2.0 }).unwrap();
        assert_eq!(stack.expansion(stack.head()), 5.0);
        assert!(stack.reset());
        assert_eq!(stack.expansion(stack.head()), 0.0);
        assert!(!stack.reset());
    }
}
