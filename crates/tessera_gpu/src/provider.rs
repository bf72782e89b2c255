//! Collaborators that resolve glyph and image references
//!
//! Font shaping and asset loading live outside the command buffer. Callers
//! hand in lookups through these traits when recording glyphs and images.

use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::primitives::AtlasPage;

/// Where a glyph lives in the atlas
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AtlasGlyph {
    /// Normalized atlas rect (u0, v0, u1, v1)
    pub uv: [f32; 4],
    pub page: AtlasPage,
}

/// Supplies atlas UV rects for glyph ids
pub trait GlyphAtlas {
    fn glyph(&self, glyph_id: u32) -> Option<AtlasGlyph>;
}

impl<S: BuildHasher> GlyphAtlas for HashMap<u32, AtlasGlyph, S> {
    fn glyph(&self, glyph_id: u32) -> Option<AtlasGlyph> {
        self.get(&glyph_id).copied()
    }
}

/// Opaque image handle issued by the asset system
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(pub u64);

/// Supplies bindless texture indices for images
pub trait TextureRegistry {
    fn texture_index(&self, image: ImageId) -> Option<u32>;
}

impl<S: BuildHasher> TextureRegistry for HashMap<ImageId, u32, S> {
    fn texture_index(&self, image: ImageId) -> Option<u32> {
        self.get(&image).copied()
    }
}
