//! Blend modes understood by the compositing stage of the compute shader

/// Blend mode applied when a command's coverage is composited (must match
/// shader constants; packed into 4 bits of the command flags)
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Normal = 0,
    Multiply = 1,
    Screen = 2,
    Overlay = 3,
    Darken = 4,
    Lighten = 5,
    Additive = 6,
    Difference = 7,
}

impl BlendMode {
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::Darken,
            5 => BlendMode::Lighten,
            6 => BlendMode::Additive,
            7 => BlendMode::Difference,
            _ => BlendMode::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip_unknown_is_normal() {
        assert_eq!(BlendMode::from_bits(BlendMode::Screen as u32), BlendMode::Screen);
        assert_eq!(BlendMode::from_bits(15), BlendMode::Normal);
    }
}
