//! Command buffer error types
//!
//! Only cold-path operations fail. Per-frame recording degrades instead and
//! reports through [`crate::FrameStats`].

use thiserror::Error;

/// Errors from configuration, GPU buffer setup and upload
#[derive(Error, Debug)]
pub enum TesseraError {
    /// A capacity in the buffer configuration is unusable
    #[error("Invalid buffer configuration: {0}")]
    InvalidConfig(String),

    /// Flush targeted a frame slot that does not exist
    #[error("Frame index {index} out of range (frames in flight: {frames_in_flight})")]
    InvalidFrameIndex {
        index: usize,
        frames_in_flight: usize,
    },
}

/// Result type for command buffer operations
pub type Result<T> = std::result::Result<T, TesseraError>;
