//! Render backend contract consumed by the playback engine, plus a
//! headless CPU implementation driven by synthetic frame sources.

use std::path::{Path, PathBuf};

use thiserror::Error;
use timeline::{Fps, Frame, FrameSize, LerpItem, TimelineError};
use uuid::Uuid;

pub mod headless;
pub mod mask;
pub mod source;

pub use headless::{HeadlessRenderer, RenderStats};
pub use source::{open_source, FrameSource, LumaFrame, Pattern, SourceDescriptor, SyntheticSource};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("source has no renderable video")]
    NoRenderableVideo,
    #[error("no source loaded")]
    NoSource,
    #[error("no preview surface")]
    NoPreviewSurface,
    #[error("frame {frame} out of range (frame count {frame_count})")]
    FrameOutOfRange { frame: Frame, frame_count: Frame },
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Source(#[from] anyhow::Error),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Opaque token for a backend-owned surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(Uuid);

impl SurfaceHandle {
    pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for SurfaceHandle {
    fn default() -> Self { Self::new() }
}

/// Properties reported by a loaded source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub has_video: bool,
    pub frame_count: Frame,
    pub frame_rate: Fps,
    pub frame_size: FrameSize,
}

/// Surface lifecycle and render calls. Implementations own every surface;
/// callers only hold handles.
pub trait RenderBackend: Send {
    /// Opens the source at `path` and creates the source surface.
    fn load_source(&mut self, path: &Path) -> Result<SourceInfo, RenderError>;

    /// Releases the source and every surface.
    fn close_source(&mut self);

    fn source_surface(&self) -> Option<SurfaceHandle>;

    /// Creates or replaces the preview surface at `size` pixels.
    fn create_preview_surface(&mut self, size: FrameSize) -> Result<SurfaceHandle, RenderError>;

    fn preview_surface(&self) -> Option<SurfaceHandle>;

    fn set_masking_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError>;

    fn set_cropping_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError>;

    /// Decodes `frame` and renders both the source and preview surfaces.
    fn render_frame(&mut self, frame: Frame) -> Result<(), RenderError>;

    /// Re-renders the preview from the last decoded frame.
    fn render_preview(&mut self) -> Result<(), RenderError>;

    /// Re-renders the source surface from the last decoded frame.
    fn render_source(&mut self) -> Result<(), RenderError>;

    /// Whether masking is composited into the source render as well.
    fn set_masking_applied_to_source(&mut self, applied: bool);
}
