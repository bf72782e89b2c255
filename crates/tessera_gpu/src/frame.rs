//! Double-buffered GPU storage
//!
//! One storage buffer per frame array per frame slot. The CPU writes slot
//! `f` while the GPU may still read the other one; fencing before a slot is
//! reused is the caller's job.

use crate::config::{log_buffer_config, BufferConfig};
use crate::error::{Result, TesseraError};
use crate::primitives::{GpuChainNode, GpuCommand, GpuGradientStop, GpuLattice, GpuPolylineHeader};

/// Frame slots in flight
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Frame arrays uploaded after a build
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Commands,
    WarpNodes,
    ModifierNodes,
    Lattices,
    PolylineHeaders,
    Points,
    Lengths,
    GradientStops,
    TileOffsets,
    TileIndices,
}

impl BufferKind {
    pub const COUNT: usize = 10;

    pub const ALL: [BufferKind; BufferKind::COUNT] = [
        BufferKind::Commands,
        BufferKind::WarpNodes,
        BufferKind::ModifierNodes,
        BufferKind::Lattices,
        BufferKind::PolylineHeaders,
        BufferKind::Points,
        BufferKind::Lengths,
        BufferKind::GradientStops,
        BufferKind::TileOffsets,
        BufferKind::TileIndices,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BufferKind::Commands => "Commands Buffer",
            BufferKind::WarpNodes => "Warp Nodes Buffer",
            BufferKind::ModifierNodes => "Modifier Nodes Buffer",
            BufferKind::Lattices => "Lattices Buffer",
            BufferKind::PolylineHeaders => "Polyline Headers Buffer",
            BufferKind::Points => "Points Buffer",
            BufferKind::Lengths => "Lengths Buffer",
            BufferKind::GradientStops => "Gradient Stops Buffer",
            BufferKind::TileOffsets => "Tile Offsets Buffer",
            BufferKind::TileIndices => "Tile Indices Buffer",
        }
    }

    /// Bytes per element
    pub fn element_size(self) -> usize {
        match self {
            BufferKind::Commands => std::mem::size_of::<GpuCommand>(),
            BufferKind::WarpNodes | BufferKind::ModifierNodes => std::mem::size_of::<GpuChainNode>(),
            BufferKind::Lattices => std::mem::size_of::<GpuLattice>(),
            BufferKind::PolylineHeaders => std::mem::size_of::<GpuPolylineHeader>(),
            BufferKind::Points => std::mem::size_of::<[f32; 2]>(),
            BufferKind::Lengths => std::mem::size_of::<f32>(),
            BufferKind::GradientStops => std::mem::size_of::<GpuGradientStop>(),
            BufferKind::TileOffsets | BufferKind::TileIndices => std::mem::size_of::<u32>(),
        }
    }

    /// Element capacity under `config`
    pub fn capacity(self, config: &BufferConfig) -> usize {
        match self {
            BufferKind::Commands => config.max_commands,
            BufferKind::WarpNodes | BufferKind::ModifierNodes => config.chain_node_capacity(),
            BufferKind::Lattices => config.max_lattices,
            BufferKind::PolylineHeaders => config.max_polylines,
            BufferKind::Points | BufferKind::Lengths => config.max_polyline_points,
            BufferKind::GradientStops => config.max_gradient_stops,
            BufferKind::TileOffsets => config.max_tiles + 1,
            BufferKind::TileIndices => config.max_tile_indices,
        }
    }
}

/// Destination for a flush
pub trait FrameSink {
    /// Receive the bytes of one non-empty frame array
    fn write(&mut self, frame_index: usize, kind: BufferKind, bytes: &[u8]);
}

/// Per-frame storage buffers on a wgpu device
pub struct FrameBuffers {
    slots: Vec<Vec<wgpu::Buffer>>,
    sizes: [u64; BufferKind::COUNT],
}

impl FrameBuffers {
    /// Allocate every buffer for every frame slot. Sizes are clamped to the
    /// device's storage binding limit.
    pub fn new(device: &wgpu::Device, config: &BufferConfig) -> Result<Self> {
        config.validate()?;
        log_buffer_config(config);

        let limit = device.limits().max_storage_buffer_binding_size as u64;
        let mut sizes = [0u64; BufferKind::COUNT];
        for (size, kind) in sizes.iter_mut().zip(BufferKind::ALL) {
            let element = kind.element_size() as u64;
            let requested = kind.capacity(config) as u64 * element;
            let max = limit / element * element;
            if max == 0 {
                return Err(TesseraError::InvalidConfig(format!(
                    "{} element exceeds the device storage binding limit",
                    kind.label()
                )));
            }
            if requested > max {
                tracing::warn!(
                    "{} clamped to {} bytes (requested {}, device limit {})",
                    kind.label(),
                    max,
                    requested,
                    limit
                );
            }
            *size = requested.min(max);
        }

        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|frame| {
                BufferKind::ALL
                    .iter()
                    .zip(sizes)
                    .map(|(kind, size)| {
                        device.create_buffer(&wgpu::BufferDescriptor {
                            label: Some(&format!("{} [frame {}]", kind.label(), frame)),
                            size,
                            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                            mapped_at_creation: false,
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(Self { slots, sizes })
    }

    /// Storage buffer for `kind` in frame slot `frame_index`
    pub fn buffer(&self, frame_index: usize, kind: BufferKind) -> Option<&wgpu::Buffer> {
        self.slots.get(frame_index)?.get(kind as usize)
    }

    /// Allocated size in bytes, after clamping
    pub fn size(&self, kind: BufferKind) -> u64 {
        self.sizes[kind as usize]
    }

    /// Sink uploading through `queue`
    pub fn writer<'a>(&'a self, queue: &'a wgpu::Queue) -> FrameWriter<'a> {
        FrameWriter {
            buffers: self,
            queue,
        }
    }
}

/// [`FrameSink`] writing into [`FrameBuffers`]
pub struct FrameWriter<'a> {
    buffers: &'a FrameBuffers,
    queue: &'a wgpu::Queue,
}

impl FrameSink for FrameWriter<'_> {
    /// Writes are truncated to the buffer size rather than overflowing it
    fn write(&mut self, frame_index: usize, kind: BufferKind, bytes: &[u8]) {
        let Some(buffer) = self.buffers.buffer(frame_index, kind) else {
            return;
        };
        let capacity = self.buffers.size(kind) as usize;
        let bytes = if bytes.len() > capacity {
            tracing::warn!(
                "{} upload of {} bytes exceeds buffer capacity {}, truncating",
                kind.label(),
                bytes.len(),
                capacity
            );
            &bytes[..capacity]
        } else {
            bytes
        };
        self.queue.write_buffer(buffer, 0, bytes);
    }
}
