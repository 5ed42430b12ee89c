//! Camera-frame heuristics: book framing for page capture and obstacle
//! announcement bookkeeping.

pub mod book;
pub mod objects;
pub mod overlay;
pub mod pipeline;
pub mod position;
pub mod region;
pub mod stability;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("frame {width}x{height} is too small to analyse")]
    FrameTooSmall { width: u32, height: u32 },
}
