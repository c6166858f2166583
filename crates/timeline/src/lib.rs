//! Time-indexed annotation data: ordered key frame / segment storage and
//! the bracketing interpolation that turns a frame number into shape state.

use thiserror::Error;

pub mod keyframe;
pub mod lerp;
pub mod ordered;
pub mod primitives;
pub mod project;
pub mod segment;

pub use keyframe::{KeyFrame, KeyFrameData, ShapeKind};
pub use lerp::{lerp_items_at, LerpItem};
pub use ordered::{CollectionChange, Keyed, OrderedCollection};
pub use primitives::{Fps, FrameSize, Point, Ratio, VideoResizeMode, VideoSizeOptions};
pub use project::{Project, VideoProcessingOptions};
pub use segment::{Segment, SegmentCollection};

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid operation: {0}")]
    InvalidOp(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("item at index {0} would break collection order")]
    OrderViolation(usize),
    #[error("a segment needs at least one key frame")]
    EmptyKeyFrames,
    #[error("invalid frame range {start}..={end}")]
    InvalidRange { start: Frame, end: Frame },
    #[error("key frame {frame} lies outside segment range {start}..={end}")]
    KeyFrameOutOfSegment { frame: Frame, start: Frame, end: Frame },
    #[error("cannot remove the last key frame of a segment")]
    LastKeyFrame,
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: ShapeKind, actual: ShapeKind },
    #[error("polygon point count mismatch ({0} vs {1})")]
    PointCountMismatch(usize, usize),
    #[error("zero denominator")]
    ZeroDenominator,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Zero-based frame number. Signed so out-of-range requests stay representable.
pub type Frame = i64;
