use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::primitives::{FrameSize, Ratio, VideoResizeMode, VideoSizeOptions};
use crate::segment::SegmentCollection;
use crate::TimelineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProcessingOptions {
    pub output_resize_mode: VideoResizeMode,
    pub output_size: Option<FrameSize>,
    pub output_aspect_ratio: Option<Ratio>,
}

impl VideoProcessingOptions {
    /// Preview sizing for a source of `frame_size`; an unset output size
    /// falls back to the source frame size.
    pub fn to_preview_options(&self, frame_size: FrameSize) -> VideoSizeOptions {
        let size = self.output_size.unwrap_or(frame_size);
        VideoSizeOptions {
            resize_mode: self.output_resize_mode,
            aspect_ratio: self.output_aspect_ratio,
            pixel_width: size.width,
            pixel_height: size.height,
        }
    }
}

/// Annotation document: the script it applies to plus its masking and
/// cropping segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub script_file_source: Option<PathBuf>,
    #[serde(default)]
    pub video_processing_options: VideoProcessingOptions,
    #[serde(default)]
    pub masking: SegmentCollection,
    #[serde(default)]
    pub cropping: SegmentCollection,
}

impl Project {
    pub fn new(script_file_source: impl Into<PathBuf>) -> Self {
        Self { script_file_source: Some(script_file_source.into()), ..Default::default() }
    }

    pub fn to_json(&self) -> Result<String, TimelineError> { Ok(serde_json::to_string_pretty(self)?) }

    /// Parses a document; segment ordering and key frame invariants are
    /// re-checked on the way in.
    pub fn from_json(s: &str) -> Result<Self, TimelineError> { Ok(serde_json::from_str(s)?) }
}
