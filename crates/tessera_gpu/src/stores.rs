//! Gradient stop and lattice arenas
//!
//! Flat per-frame data that commands and warp nodes reference by index.

use tessera_paint::GradientStop;

use crate::primitives::{GpuGradientStop, GpuLattice, LATTICE_POINTS};

/// Contiguous run of stops in the gradient stop buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GradientRange {
    pub start: u32,
    pub count: u32,
}

/// Append-only gradient stop buffer
pub struct GradientStopStore {
    stops: Vec<GpuGradientStop>,
    capacity: usize,
}

impl GradientStopStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            stops: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append stops as one range. All or nothing: `None` when the range
    /// would not fit or `stops` is empty.
    pub fn push_stops(&mut self, stops: &[GradientStop]) -> Option<GradientRange> {
        if stops.is_empty() || self.stops.len() + stops.len() > self.capacity {
            return None;
        }
        let start = self.stops.len() as u32;
        self.stops.extend(stops.iter().map(|stop| GpuGradientStop {
            color: stop.color.to_array(),
            offset: [stop.offset.clamp(0.0, 1.0), 0.0, 0.0, 0.0],
        }));
        Some(GradientRange {
            start,
            count: stops.len() as u32,
        })
    }

    pub fn stops(&self) -> &[GpuGradientStop] {
        &self.stops
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn reset(&mut self) {
        self.stops.clear();
    }
}

/// Append-only lattice buffer for free-form deformation warps
pub struct LatticeStore {
    lattices: Vec<GpuLattice>,
    // Cached per lattice so displacement estimates stay O(1)
    max_offsets: Vec<f32>,
    capacity: usize,
}

impl LatticeStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            lattices: Vec::with_capacity(capacity),
            max_offsets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Store a 4×4 grid of control-point offsets, returning its index
    pub fn push_lattice(&mut self, offsets: [[f32; 2]; LATTICE_POINTS]) -> Option<u32> {
        if self.lattices.len() >= self.capacity {
            return None;
        }
        let lattice = GpuLattice { offsets };
        let index = self.lattices.len() as u32;
        self.max_offsets.push(lattice.max_offset());
        self.lattices.push(lattice);
        Some(index)
    }

    /// Largest control-point displacement of a lattice; unknown indices
    /// yield `None`
    pub fn max_offset(&self, index: u32) -> Option<f32> {
        self.max_offsets.get(index as usize).copied()
    }

    pub fn lattices(&self) -> &[GpuLattice] {
        &self.lattices
    }

    pub fn len(&self) -> usize {
        self.lattices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lattices.is_empty()
    }

    pub fn reset(&mut self) {
        self.lattices.clear();
        self.max_offsets.clear();
    }
}
