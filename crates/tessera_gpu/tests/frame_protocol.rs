use std::sync::Once;

use tessera_gpu::chain::MAX_CHAIN_DEPTH;
use tessera_gpu::clip::MAX_CLIP_DEPTH;
use tessera_gpu::group::MAX_SCOPE_DEPTH;
use tessera_gpu::{
    BooleanOp, BufferConfig, BufferKind, CommandBuffer, Fault, FaultCategory, FrameSink, Modifier, TesseraError,
    Warp, FRAMES_IN_FLIGHT,
};
use tessera_paint::{Color, GradientStop, Point, Rect};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn buffer_with(max_commands: usize) -> CommandBuffer {
    init_tracing();
    let mut buf = CommandBuffer::new(BufferConfig {
        max_commands,
        max_polyline_points: 4096,
        max_polylines: 64,
        ..Default::default()
    })
    .unwrap();
    buf.reset();
    buf
}

fn wave() -> Warp {
    Warp::Wave {
        frequency: 1.0,
        amplitude: 2.0,
        phase: 0.0,
    }
}

/// Records what a flush hands over
#[derive(Default)]
struct RecordingSink {
    writes: Vec<(usize, BufferKind, usize)>,
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame_index: usize, kind: BufferKind, bytes: &[u8]) {
        self.writes.push((frame_index, kind, bytes.len()));
    }
}

impl RecordingSink {
    fn bytes_for(&self, kind: BufferKind) -> Option<usize> {
        self.writes.iter().find(|(_, k, _)| *k == kind).map(|(_, _, len)| *len)
    }
}

#[test]
fn reset_clears_everything() {
    let mut buf = buffer_with(256);
    buf.push_warp(wave());
    buf.push_modifier(Modifier::Offset { distance: 2.0 });
    buf.push_clip(Rect::new(0.0, 0.0, 100.0, 100.0));
    buf.begin_group(BooleanOp::Union, 0.0);
    buf.add_circle(10.0, 10.0, 5.0, Color::RED);
    buf.add_polyline(&[Point::new(0.0, 0.0), Point::new(5.0, 5.0)], 1.0, Color::RED);
    buf.add_gradient_stops(&[
        GradientStop::new(0.0, Color::RED),
        GradientStop::new(1.0, Color::BLUE),
    ]);
    buf.build(64, 64);

    buf.reset();
    assert_eq!(buf.count(), 0);
    assert_eq!(buf.warp_depth(), 0);
    assert_eq!(buf.modifier_depth(), 0);
    assert_eq!(buf.clip_depth(), 0);
    assert_eq!(buf.scope_depth(), 0);
    assert_eq!((buf.warp_head(), buf.modifier_head()), (0, 0));
    assert!(buf.warp_nodes().is_empty());
    assert!(buf.points().is_empty());
    assert!(buf.gradient_stops().is_empty());
    assert!(buf.group_ranges().is_empty());
    // Stacks left open across the frame boundary are reported
    assert_eq!(buf.stats().count(Fault::UnbalancedReset), 1);

    buf.reset();
    assert!(buf.stats().is_clean());
    assert_eq!(buf.count(), 0);
}

#[test]
fn balanced_stacks_return_to_empty() {
    let mut buf = buffer_with(1024);
    for n in [1usize, 7, MAX_CHAIN_DEPTH + 5] {
        for _ in 0..n {
            buf.push_warp(wave());
            buf.push_modifier(Modifier::Feather { radius: 1.0 });
        }
        for _ in 0..n {
            buf.pop_modifier();
            buf.pop_warp();
        }
        assert_eq!((buf.warp_depth(), buf.warp_head()), (0, 0), "warps after {n}");
        assert_eq!((buf.modifier_depth(), buf.modifier_head()), (0, 0), "modifiers after {n}");
    }
    // Pushes past the depth limit are ignored, and so are their pops
    assert_eq!(buf.stats().count(Fault::WarpOverflow), 5);
    assert_eq!(buf.stats().count(Fault::ModifierOverflow), 5);
    assert_eq!(buf.stats().count(Fault::WarpUnderflow), 0);

    for _ in 0..MAX_CLIP_DEPTH + 2 {
        buf.push_clip(Rect::new(0.0, 0.0, 50.0, 50.0));
    }
    for _ in 0..MAX_CLIP_DEPTH + 2 {
        buf.pop_clip();
    }
    assert_eq!(buf.clip_depth(), 0);
    assert_eq!(buf.stats().count(Fault::ClipOverflow), 2);
    assert_eq!(buf.stats().count(Fault::ClipUnderflow), 0);
}

#[test]
fn nested_scopes_past_the_limit_stay_balanced() {
    let mut buf = buffer_with(256);
    for _ in 0..MAX_SCOPE_DEPTH + 2 {
        buf.begin_group(BooleanOp::Union, 0.0);
    }
    buf.add_circle(10.0, 10.0, 4.0, Color::RED);
    for _ in 0..MAX_SCOPE_DEPTH + 2 {
        buf.end_group(Color::RED);
    }
    assert_eq!(buf.scope_depth(), 0);
    assert_eq!(buf.stats().count(Fault::ScopeOverflow), 2);
    assert_eq!(buf.stats().count(Fault::ScopeMismatch), 0);
    assert_eq!(buf.group_ranges().len(), MAX_SCOPE_DEPTH);
    // One begin and one end marker per accepted scope
    assert_eq!(buf.count(), 2 * MAX_SCOPE_DEPTH + 1);
}

#[test]
fn pops_on_empty_stacks_are_ignored() {
    let mut buf = buffer_with(64);
    buf.pop_warp();
    buf.pop_modifier();
    buf.pop_clip();
    assert!(buf.pop_mask().is_none());

    assert_eq!(buf.stats().count(Fault::WarpUnderflow), 1);
    assert_eq!(buf.stats().count(Fault::ModifierUnderflow), 1);
    assert_eq!(buf.stats().count(Fault::ClipUnderflow), 1);
    assert_eq!(buf.stats().count(Fault::ScopeUnderflow), 1);
    assert_eq!(buf.stats().discipline_violations(), 4);
    assert_eq!(buf.count(), 0);
}

#[test]
fn command_overflow_keeps_capacity_and_warns_once() {
    let capacity = 32;
    let mut buf = buffer_with(capacity);
    for i in 0..=capacity {
        buf.add_circle(i as f32, 10.0, 2.0, Color::RED);
    }
    assert_eq!(buf.count(), capacity);
    assert_eq!(buf.stats().count(Fault::CommandOverflow), 1);
    assert_eq!(buf.stats().warnings_logged(), 1);

    // Further drops in the same frame only count
    buf.add_circle(0.0, 0.0, 2.0, Color::RED);
    buf.add_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::RED);
    assert_eq!(buf.stats().count(Fault::CommandOverflow), 3);
    assert_eq!(buf.stats().warnings_logged(), 1);
    assert_eq!(buf.stats().category_total(FaultCategory::CapacityExhaustion), 3);

    buf.reset();
    assert_eq!(buf.stats().warnings_logged(), 0);
    assert!(buf.add_circle(0.0, 0.0, 2.0, Color::RED).is_some());
}

#[test]
fn polyline_lengths_are_monotonic() {
    let mut buf = buffer_with(64);
    let points: Vec<Point> = (0..50)
        .map(|i| {
            let t = i as f32 * 0.3;
            Point::new(t * 20.0, 100.0 + t.sin() * 40.0)
        })
        .collect();
    buf.add_polyline(&points[..10], 2.0, Color::WHITE).unwrap();
    let idx = buf.add_polyline(&points, 2.0, Color::WHITE).unwrap();

    let header = buf.polyline_headers()[buf.commands()[idx as usize].data[0] as usize];
    let start = header.start as usize;
    let lengths = &buf.lengths()[start..start + header.count as usize];
    assert_eq!(lengths[0], 0.0);
    assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(lengths.last().copied(), Some(header.total_length));
}

#[test]
fn flush_hands_over_populated_arrays() {
    let mut buf = buffer_with(64);
    buf.push_modifier(Modifier::Offset { distance: 1.0 });
    buf.add_circle(20.0, 20.0, 5.0, Color::RED);
    buf.pop_modifier();
    buf.build(64, 64);

    let mut sink = RecordingSink::default();
    buf.flush(1, &mut sink).unwrap();

    assert!(sink.writes.iter().all(|(frame, _, _)| *frame == 1));
    assert_eq!(sink.bytes_for(BufferKind::Commands), Some(176));
    assert_eq!(sink.bytes_for(BufferKind::ModifierNodes), Some(48));
    assert_eq!(sink.bytes_for(BufferKind::TileOffsets), Some((8 * 8 + 1) * 4));
    assert_eq!(
        sink.bytes_for(BufferKind::TileIndices),
        Some(buf.tile_indices().len() * 4)
    );
    // Empty arrays are skipped
    assert_eq!(sink.bytes_for(BufferKind::WarpNodes), None);
    assert_eq!(sink.bytes_for(BufferKind::Points), None);
}

#[test]
fn flush_rejects_unknown_frame_slots() {
    let buf = buffer_with(64);
    let mut sink = RecordingSink::default();
    let err = buf.flush(FRAMES_IN_FLIGHT, &mut sink).unwrap_err();
    assert!(matches!(
        err,
        TesseraError::InvalidFrameIndex {
            index: FRAMES_IN_FLIGHT,
            frames_in_flight: FRAMES_IN_FLIGHT
        }
    ));
    assert!(sink.writes.is_empty());
}

#[test]
fn build_with_open_stacks_is_reported_but_binned() {
    let mut buf = buffer_with(64);
    buf.push_clip(Rect::new(0.0, 0.0, 32.0, 32.0));
    let idx = buf.add_circle(10.0, 10.0, 4.0, Color::RED).unwrap();
    buf.build(64, 64);

    assert_eq!(buf.stats().count(Fault::UnbalancedBuild), 1);
    assert_eq!(buf.tile_commands(1, 1), &[idx]);
}

#[test]
fn dangling_lattice_is_a_malformed_reference() {
    let mut buf = buffer_with(64);
    buf.push_warp(Warp::Lattice {
        lattice: 3,
        region: Rect::new(0.0, 0.0, 100.0, 100.0),
        scale: 1.0,
    });
    buf.pop_warp();
    assert_eq!(buf.stats().malformed_references(), 1);

    let lattice = buf.add_lattice([[0.5, -0.5]; 16]).unwrap();
    buf.push_warp(Warp::Lattice {
        lattice,
        region: Rect::new(0.0, 0.0, 100.0, 100.0),
        scale: 4.0,
    });
    buf.pop_warp();
    assert_eq!(buf.stats().malformed_references(), 1);
    assert_eq!(buf.lattices().len(), 1);
}
