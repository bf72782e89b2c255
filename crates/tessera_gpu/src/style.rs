//! Paint styling shared by every shape factory

use tessera_paint::{BlendMode, Color, GradientKind, Point, Rect};

use crate::primitives::GpuCommand;
use crate::stores::GradientRange;

/// Gradient fill referencing stops already pushed into the frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientFill {
    pub kind: GradientKind,
    pub params: [f32; 4],
    pub stops: GradientRange,
}

impl GradientFill {
    pub fn linear(from: Point, to: Point, stops: GradientRange) -> Self {
        Self {
            kind: GradientKind::Linear,
            params: [from.x, from.y, to.x, to.y],
            stops,
        }
    }

    pub fn radial(center: Point, radius: f32, stops: GradientRange) -> Self {
        Self {
            kind: GradientKind::Radial,
            params: [center.x, center.y, radius, 0.0],
            stops,
        }
    }

    pub fn conic(center: Point, start_angle: f32, stops: GradientRange) -> Self {
        Self {
            kind: GradientKind::Conic,
            params: [center.x, center.y, start_angle, 0.0],
            stops,
        }
    }
}

/// Paint for a shape or compound
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeStyle {
    pub fill: Color,
    pub stroke: Color,
    pub stroke_width: f32,
    pub glow_radius: f32,
    pub soft_edge: f32,
    pub gradient: Option<GradientFill>,
    pub blend_mode: BlendMode,
    /// Visible fraction of the outline, `(start, end)` in 0..=1
    pub trim: Option<(f32, f32)>,
    /// `(dash_length, gap_length)` in pixels
    pub dash: Option<(f32, f32)>,
    /// Explicit clip; otherwise the clip stack top applies
    pub clip: Option<Rect>,
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            fill: Color::WHITE,
            stroke: Color::TRANSPARENT,
            stroke_width: 0.0,
            glow_radius: 0.0,
            soft_edge: 0.0,
            gradient: None,
            blend_mode: BlendMode::Normal,
            trim: None,
            dash: None,
            clip: None,
        }
    }
}

impl From<Color> for ShapeStyle {
    fn from(fill: Color) -> Self {
        Self::fill(fill)
    }
}

impl ShapeStyle {
    /// Solid fill, no outline
    pub fn fill(color: Color) -> Self {
        Self {
            fill: color,
            ..Default::default()
        }
    }

    /// Outline only
    pub fn stroke(color: Color, width: f32) -> Self {
        Self {
            fill: Color::TRANSPARENT,
            stroke: color,
            stroke_width: width,
            ..Default::default()
        }
    }

    pub fn with_stroke(mut self, color: Color, width: f32) -> Self {
        self.stroke = color;
        self.stroke_width = width;
        self
    }

    pub fn with_glow(mut self, radius: f32) -> Self {
        self.glow_radius = radius;
        self
    }

    pub fn with_soft_edge(mut self, width: f32) -> Self {
        self.soft_edge = width;
        self
    }

    pub fn with_gradient(mut self, gradient: GradientFill) -> Self {
        self.gradient = Some(gradient);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_trim(mut self, start: f32, end: f32) -> Self {
        self.trim = Some((start, end));
        self
    }

    pub fn with_dash(mut self, length: f32, gap: f32) -> Self {
        self.dash = Some((length, gap));
        self
    }

    pub fn with_clip(mut self, rect: Rect) -> Self {
        self.clip = Some(rect);
        self
    }

    /// Write the paint into a command
    pub fn apply(&self, cmd: GpuCommand) -> GpuCommand {
        let mut cmd = cmd
            .with_fill(self.fill)
            .with_stroke(self.stroke, self.stroke_width)
            .with_glow(self.glow_radius)
            .with_soft_edge(self.soft_edge)
            .with_blend_mode(self.blend_mode);
        if let Some(gradient) = self.gradient {
            cmd = cmd.with_gradient(
                gradient.kind,
                gradient.params,
                gradient.stops.start,
                gradient.stops.count,
            );
        }
        if let Some((start, end)) = self.trim {
            cmd = cmd.with_trim(start, end);
        }
        if let Some((length, gap)) = self.dash {
            cmd = cmd.with_dash(length, gap);
        }
        if let Some(clip) = self.clip {
            cmd = cmd.with_clip_rect(clip);
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::flags;

    #[test]
    fn test_apply_style() {
        let style = ShapeStyle::from(Color::RED)
            .with_stroke(Color::BLUE, 2.0)
            .with_glow(3.0)
            .with_dash(4.0, 2.0)
            .with_clip(Rect::new(0.0, 0.0, 50.0, 50.0));
        let cmd = style.apply(GpuCommand::circle(10.0, 10.0, 5.0));

        assert_eq!(cmd.fill_color, Color::RED.to_array());
        assert_eq!(cmd.effects, [2.0, 3.0, 0.0, 0.0]);
        assert!(cmd.has_flag(flags::DASH));
        assert!(!cmd.has_flag(flags::TRIM));
        assert_eq!(cmd.clip_rect(), Some(Rect::new(0.0, 0.0, 50.0, 50.0)));
    }

    #[test]
    fn test_gradient_fill() {
        let range = GradientRange { start: 4, count: 3 };
        let style = ShapeStyle::default().with_gradient(GradientFill::radial(Point::new(5.0, 5.0), 10.0, range));
        let cmd = style.apply(GpuCommand::circle(5.0, 5.0, 10.0));
        assert_eq!(cmd.gradient_kind(), GradientKind::Radial);
        assert_eq!(cmd.gradient, [5.0, 5.0, 10.0, 0.0]);
        assert_eq!(&cmd.data[2..], &[4, 3]);
    }
}
