use std::path::Path;

use image::GrayImage;
use timeline::{Frame, FrameSize, KeyFrameData, LerpItem};
use tracing::debug;

use crate::mask::{apply_crops, apply_masks, letterbox};
use crate::source::{open_source, FrameSource, LumaFrame};
use crate::{RenderBackend, RenderError, SourceInfo, SurfaceHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_decoded: u64,
    pub source_renders: u64,
    pub preview_renders: u64,
}

/// CPU backend: decodes through a [`FrameSource`] and composites crops and
/// masks into in-memory luma surfaces.
#[derive(Default)]
pub struct HeadlessRenderer {
    source: Option<Box<dyn FrameSource>>,
    info: SourceInfo,
    source_surface: Option<SurfaceHandle>,
    preview_surface: Option<SurfaceHandle>,
    preview_size: FrameSize,
    masking: Vec<KeyFrameData>,
    cropping: Vec<KeyFrameData>,
    mask_source: bool,
    decoded: Option<LumaFrame>,
    source_render: Option<LumaFrame>,
    preview_render: Option<LumaFrame>,
    stats: RenderStats,
}

impl HeadlessRenderer {
    pub fn new() -> Self { Self::default() }

    pub fn info(&self) -> SourceInfo { self.info }
    pub fn stats(&self) -> RenderStats { self.stats }
    pub fn source_frame(&self) -> Option<&LumaFrame> { self.source_render.as_ref() }
    pub fn preview_frame(&self) -> Option<&LumaFrame> { self.preview_render.as_ref() }
    pub fn masking_shapes(&self) -> &[KeyFrameData] { &self.masking }
    pub fn cropping_shapes(&self) -> &[KeyFrameData] { &self.cropping }

    pub fn preview_image(&self) -> Option<GrayImage> {
        let f = self.preview_render.as_ref()?;
        GrayImage::from_raw(f.width, f.height, f.pixels.clone())
    }

    fn resolve(items: &[LerpItem]) -> Result<Vec<KeyFrameData>, RenderError> {
        Ok(items.iter().map(LerpItem::resolve).collect::<Result<Vec<_>, _>>()?)
    }
}

impl RenderBackend for HeadlessRenderer {
    fn load_source(&mut self, path: &Path) -> Result<SourceInfo, RenderError> {
        if !path.exists() {
            return Err(RenderError::SourceNotFound(path.to_path_buf()));
        }
        let source = open_source(path)?;
        let info = source.info();
        if !info.has_video {
            return Err(RenderError::NoRenderableVideo);
        }
        debug!(path = %path.display(), frames = info.frame_count, "headless source loaded");
        self.close_source();
        self.source = Some(source);
        self.info = info;
        self.source_surface = Some(SurfaceHandle::new());
        Ok(info)
    }

    fn close_source(&mut self) {
        *self = Self { stats: self.stats, ..Self::default() };
    }

    fn source_surface(&self) -> Option<SurfaceHandle> { self.source_surface }

    fn create_preview_surface(&mut self, size: FrameSize) -> Result<SurfaceHandle, RenderError> {
        if self.source.is_none() {
            return Err(RenderError::NoSource);
        }
        if size.is_empty() {
            return Err(RenderError::Backend(format!("empty preview size {}x{}", size.width, size.height)));
        }
        let handle = SurfaceHandle::new();
        self.preview_size = size;
        self.preview_surface = Some(handle);
        self.preview_render = None;
        Ok(handle)
    }

    fn preview_surface(&self) -> Option<SurfaceHandle> { self.preview_surface }

    fn set_masking_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError> {
        self.masking = Self::resolve(items)?;
        Ok(())
    }

    fn set_cropping_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError> {
        self.cropping = Self::resolve(items)?;
        Ok(())
    }

    fn render_frame(&mut self, frame: Frame) -> Result<(), RenderError> {
        let source = self.source.as_mut().ok_or(RenderError::NoSource)?;
        if frame < 0 || frame >= self.info.frame_count {
            return Err(RenderError::FrameOutOfRange { frame, frame_count: self.info.frame_count });
        }
        self.decoded = Some(source.decode_frame(frame)?);
        self.stats.frames_decoded += 1;
        self.render_source()?;
        if self.preview_surface.is_some() {
            self.render_preview()?;
        }
        Ok(())
    }

    fn render_preview(&mut self) -> Result<(), RenderError> {
        if self.preview_surface.is_none() {
            return Err(RenderError::NoPreviewSurface);
        }
        let Some(decoded) = self.decoded.as_ref() else {
            // nothing decoded yet; the first render_frame fills it
            return Ok(());
        };
        let mut frame = decoded.clone();
        apply_crops(&mut frame, &self.cropping);
        apply_masks(&mut frame, &self.masking);
        self.preview_render = Some(letterbox(&frame, self.preview_size));
        self.stats.preview_renders += 1;
        Ok(())
    }

    fn render_source(&mut self) -> Result<(), RenderError> {
        let decoded = self.decoded.as_ref().ok_or(RenderError::NoSource)?;
        let mut frame = decoded.clone();
        if self.mask_source {
            apply_masks(&mut frame, &self.masking);
        }
        self.source_render = Some(frame);
        self.stats.source_renders += 1;
        Ok(())
    }

    fn set_masking_applied_to_source(&mut self, applied: bool) { self.mask_source = applied; }
}
