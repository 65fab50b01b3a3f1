// src/capture/mod.rs

pub mod merger;
pub mod reader;

pub use merger::{FrameMerger, MergedFrame};
pub use reader::{CaptureStream, CornerFrame, FrontFrame, StreamFrame, StreamKind, TrackFrame};
