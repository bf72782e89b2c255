//! Tessera GPU command buffer
//!
//! Records SDF vector shapes into flat, `#[repr(C)]` arrays for a compute
//! rasterizer and bins them into 8×8 pixel tiles.
//!
//! # Frame protocol
//!
//! ```text
//! reset() → record (balanced stacks and scopes) → build(w, h) → flush(frame, sink)
//! ```
//!
//! Recording never fails. Dropped commands, stack discipline violations and
//! dangling references are counted in [`FrameStats`] and logged through
//! `tracing` once per fault kind per frame.
//!
//! ```
//! use tessera_gpu::{BooleanOp, BufferConfig, CommandBuffer, Warp};
//! use tessera_paint::{Color, Rect};
//!
//! let mut buf = CommandBuffer::new(BufferConfig::default()).unwrap();
//! buf.reset();
//! buf.push_warp(Warp::Wave { frequency: 0.1, amplitude: 4.0, phase: 0.0 });
//! buf.begin_group(BooleanOp::Subtract, 0.0);
//! buf.add_rect(Rect::new(10.0, 10.0, 80.0, 40.0), Color::WHITE);
//! buf.add_circle(50.0, 30.0, 12.0, Color::WHITE);
//! buf.end_group(Color::BLUE);
//! buf.pop_warp();
//! buf.build(800, 600);
//! assert!(buf.stats().is_clean());
//! ```

pub mod binner;
pub mod bounds;
pub mod buffer;
pub mod chain;
pub mod clip;
pub mod config;
pub mod error;
pub mod frame;
pub mod group;
pub mod polyline;
pub mod primitives;
pub mod provider;
pub mod stats;
pub mod stores;
pub mod style;

pub use binner::{BinReport, TILE_SIZE};
pub use bounds::Bounds;
pub use buffer::CommandBuffer;
pub use chain::{Modifier, Warp};
pub use config::BufferConfig;
pub use error::{Result, TesseraError};
pub use frame::{BufferKind, FrameBuffers, FrameSink, FrameWriter, FRAMES_IN_FLIGHT};
pub use group::{GroupRange, MaskRange, ScopeKind};
pub use primitives::{
    AtlasPage, BooleanOp, GpuChainNode, GpuCommand, GpuGradientStop, GpuLattice, GpuPolylineHeader, ShapeType,
};
pub use provider::{AtlasGlyph, GlyphAtlas, ImageId, TextureRegistry};
pub use stats::{Fault, FaultCategory, FrameStats};
pub use stores::GradientRange;
pub use style::{GradientFill, ShapeStyle};
