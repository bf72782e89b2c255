//! Per-frame fault counters
//!
//! Nothing on the recording path returns an error. Every degraded operation
//! is counted here instead, and the first occurrence of each fault per frame
//! is logged.

/// A recoverable fault observed while recording or binning a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    // Capacity exhaustion
    CommandOverflow,
    WarpOverflow,
    ModifierOverflow,
    ClipOverflow,
    ScopeOverflow,
    PointOverflow,
    PolylineOverflow,
    GradientOverflow,
    LatticeOverflow,
    TileGridOverflow,
    TileIndexOverflow,
    // Stack discipline
    WarpUnderflow,
    ModifierUnderflow,
    ClipUnderflow,
    ScopeUnderflow,
    ScopeMismatch,
    UnbalancedBuild,
    UnbalancedReset,
    // Malformed references
    MalformedReference,
}

/// Fault taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultCategory {
    CapacityExhaustion,
    StackDiscipline,
    MalformedReference,
}

impl Fault {
    pub const COUNT: usize = 19;

    pub const ALL: [Fault; Fault::COUNT] = [
        Fault::CommandOverflow,
        Fault::WarpOverflow,
        Fault::ModifierOverflow,
        Fault::ClipOverflow,
        Fault::ScopeOverflow,
        Fault::PointOverflow,
        Fault::PolylineOverflow,
        Fault::GradientOverflow,
        Fault::LatticeOverflow,
        Fault::TileGridOverflow,
        Fault::TileIndexOverflow,
        Fault::WarpUnderflow,
        Fault::ModifierUnderflow,
        Fault::ClipUnderflow,
        Fault::ScopeUnderflow,
        Fault::ScopeMismatch,
        Fault::UnbalancedBuild,
        Fault::UnbalancedReset,
        Fault::MalformedReference,
    ];

    pub fn category(self) -> FaultCategory {
        match self {
            Fault::CommandOverflow
            | Fault::WarpOverflow
            | Fault::ModifierOverflow
            | Fault::ClipOverflow
            | Fault::ScopeOverflow
            | Fault::PointOverflow
            | Fault::PolylineOverflow
            | Fault::GradientOverflow
            | Fault::LatticeOverflow
            | Fault::TileGridOverflow
            | Fault::TileIndexOverflow => FaultCategory::CapacityExhaustion,
            Fault::WarpUnderflow
            | Fault::ModifierUnderflow
            | Fault::ClipUnderflow
            | Fault::ScopeUnderflow
            | Fault::ScopeMismatch
            | Fault::UnbalancedBuild
            | Fault::UnbalancedReset => FaultCategory::StackDiscipline,
            Fault::MalformedReference => FaultCategory::MalformedReference,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Fault::CommandOverflow => "command buffer full, dropping command",
            Fault::WarpOverflow => "warp stack overflow, push ignored",
            Fault::ModifierOverflow => "modifier stack overflow, push ignored",
            Fault::ClipOverflow => "clip stack overflow, push ignored",
            Fault::ScopeOverflow => "group nesting too deep, scope ignored",
            Fault::PointOverflow => "polyline point buffer full, dropping shape",
            Fault::PolylineOverflow => "polyline header buffer full, dropping shape",
            Fault::GradientOverflow => "gradient stop buffer full, falling back to solid fill",
            Fault::LatticeOverflow => "lattice buffer full, dropping lattice",
            Fault::TileGridOverflow => "tile grid exceeds capacity, bottom rows not binned",
            Fault::TileIndexOverflow => "tile index buffer full, dropping tile assignments",
            Fault::WarpUnderflow => "pop on empty warp stack ignored",
            Fault::ModifierUnderflow => "pop on empty modifier stack ignored",
            Fault::ClipUnderflow => "pop on empty clip stack ignored",
            Fault::ScopeUnderflow => "end without matching begin ignored",
            Fault::ScopeMismatch => "call does not fit the innermost open scope, ignored",
            Fault::UnbalancedBuild => "build with non-empty stacks",
            Fault::UnbalancedReset => "reset with non-empty stacks, forcing depth 0",
            Fault::MalformedReference => "command references missing data",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Counters for one frame, zeroed by `CommandBuffer::reset`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    counts: [u32; Fault::COUNT],
    warned: u32,
    warnings_logged: u32,
    culled_commands: u32,
}

impl FrameStats {
    /// Count a fault, logging it if it is the first of its kind this frame
    pub(crate) fn record(&mut self, fault: Fault) {
        self.record_n(fault, 1);
    }

    pub(crate) fn record_n(&mut self, fault: Fault, n: u32) {
        if n == 0 {
            return;
        }
        let slot = &mut self.counts[fault as usize];
        *slot = slot.saturating_add(n);
        if self.warned & fault.bit() == 0 {
            self.warned |= fault.bit();
            self.warnings_logged += 1;
            tracing::warn!(fault = ?fault, "{}", fault.description());
        }
    }

    pub(crate) fn record_cull(&mut self) {
        self.culled_commands += 1;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self, fault: Fault) -> u32 {
        self.counts[fault as usize]
    }

    /// Warnings emitted this frame (at most one per fault)
    pub fn warnings_logged(&self) -> u32 {
        self.warnings_logged
    }

    /// Commands rejected by clip culling (not a fault)
    pub fn culled_commands(&self) -> u32 {
        self.culled_commands
    }

    pub fn category_total(&self, category: FaultCategory) -> u32 {
        Fault::ALL
            .iter()
            .filter(|fault| fault.category() == category)
            .map(|&fault| self.count(fault))
            .sum()
    }

    pub fn capacity_exhaustions(&self) -> u32 {
        self.category_total(FaultCategory::CapacityExhaustion)
    }

    pub fn discipline_violations(&self) -> u32 {
        self.category_total(FaultCategory::StackDiscipline)
    }

    pub fn malformed_references(&self) -> u32 {
        self.category_total(FaultCategory::MalformedReference)
    }

    pub fn is_clean(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }
}
