//! Arena capacities
//!
//! Every per-frame container is sized once from a [`BufferConfig`] and never
//! grows. Capacities can be raised at startup without recompiling:
//!
//! - `TESSERA_MAX_COMMANDS=32768`
//! - `TESSERA_MAX_POLYLINE_POINTS=262144`
//! - `TESSERA_MAX_POLYLINES=8192`
//! - `TESSERA_MAX_GRADIENT_STOPS=8192`
//! - `TESSERA_MAX_LATTICES=512`
//! - `TESSERA_MAX_TILES=259200`
//! - `TESSERA_MAX_TILE_INDICES=4194304`

use crate::error::{Result, TesseraError};

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

/// Capacities for every frame arena
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Maximum draw commands per frame (markers included)
    pub max_commands: usize,
    /// Maximum polyline points (shared by polylines, polygons, flattened curves)
    pub max_polyline_points: usize,
    /// Maximum polyline headers
    pub max_polylines: usize,
    /// Maximum gradient stops
    pub max_gradient_stops: usize,
    /// Maximum lattices
    pub max_lattices: usize,
    /// Maximum 8×8 tiles; larger targets lose rows at the bottom
    pub max_tiles: usize,
    /// Maximum tile → command assignments
    pub max_tile_indices: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_commands: 16_384,          // ~2.8 MB (176 B each)
            max_polyline_points: 131_072,  // ~1 MB points + 512 KB lengths
            max_polylines: 4_096,          // 128 KB
            max_gradient_stops: 4_096,     // 128 KB
            max_lattices: 256,             // 32 KB
            max_tiles: 129_600,            // 3840×2160
            max_tile_indices: 2_097_152,   // 8 MB
        }
    }
}

impl BufferConfig {
    /// Defaults with `TESSERA_MAX_*` overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_usize("TESSERA_MAX_COMMANDS") {
            self.max_commands = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_POLYLINE_POINTS") {
            self.max_polyline_points = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_POLYLINES") {
            self.max_polylines = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_GRADIENT_STOPS") {
            self.max_gradient_stops = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_LATTICES") {
            self.max_lattices = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_TILES") {
            self.max_tiles = v;
        }
        if let Some(v) = env_usize("TESSERA_MAX_TILE_INDICES") {
            self.max_tile_indices = v;
        }
        self
    }

    /// Node arena size shared by the warp and modifier chains
    pub fn chain_node_capacity(&self) -> usize {
        self.max_commands.saturating_mul(2)
    }

    /// Reject capacities the arenas cannot work with
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_commands", self.max_commands),
            ("max_polyline_points", self.max_polyline_points),
            ("max_polylines", self.max_polylines),
            ("max_gradient_stops", self.max_gradient_stops),
            ("max_lattices", self.max_lattices),
            ("max_tiles", self.max_tiles),
            ("max_tile_indices", self.max_tile_indices),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(TesseraError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        // Chain heads, tile indices and offsets are u32 on the GPU
        for (name, value) in [
            ("max_commands", self.chain_node_capacity()),
            ("max_polyline_points", self.max_polyline_points),
            ("max_tiles", self.max_tiles),
            ("max_tile_indices", self.max_tile_indices),
        ] {
            if value >= u32::MAX as usize {
                return Err(TesseraError::InvalidConfig(format!(
                    "{name} exceeds the u32 index range"
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn log_buffer_config(config: &BufferConfig) {
    tracing::info!(
        "tessera config: max_commands={}, max_polyline_points={}, max_polylines={}, max_gradient_stops={}, max_lattices={}, max_tiles={}, max_tile_indices={}",
        config.max_commands,
        config.max_polyline_points,
        config.max_polylines,
        config.max_gradient_stops,
        config.max_lattices,
        config.max_tiles,
        config.max_tile_indices
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = BufferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_node_capacity(), 32_768);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BufferConfig {
            max_tiles: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_tiles"));
    }
}
