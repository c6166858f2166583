//! Script video service: owns the render backend, the runtime context and
//! the annotation project, and keeps them in step on every seek.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use renderer::RenderBackend;
use timeline::{lerp_items_at, Frame, Project, Segment, VideoSizeOptions};
use tracing::{debug, info};

use crate::cancel::{CancellationContext, CancellationReason};
use crate::config::ServiceConfig;
use crate::context::VideoContext;
use crate::events::{EventBus, ServiceEvent, SurfaceRenderPipeline};
use crate::report::{ErrorReporter, TracingReporter};
use crate::ServiceError;

pub(crate) struct Inner<B> {
    pub(crate) context: VideoContext,
    pub(crate) backend: Mutex<B>,
    pub(crate) project: RwLock<Project>,
    pub(crate) cancel: Arc<CancellationContext>,
    pub(crate) events: EventBus,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) config: ServiceConfig,
}

/// Cloneable handle; all clones drive the same backend and context.
///
/// Lock order is project, then backend. The context lock is never held
/// across either.
pub struct ScriptVideoService<B> {
    pub(crate) inner: Arc<Inner<B>>,
}

impl<B> Clone for ScriptVideoService<B> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

/// Pause/stop/close requests that can be issued from any thread, including
/// from inside a render call.
#[derive(Clone)]
pub struct PlaybackControl {
    cancel: Arc<CancellationContext>,
}

impl PlaybackControl {
    /// Returns whether a playback session took the request. A session takes
    /// requests until its teardown starts.
    pub fn pause(&self) -> bool { self.cancel.request(CancellationReason::PauseRequested) }
    pub fn stop(&self) -> bool { self.cancel.request(CancellationReason::StopRequested) }
    pub fn close_script(&self) -> bool { self.cancel.request(CancellationReason::CloseScriptRequested) }
}

impl<B: RenderBackend + 'static> ScriptVideoService<B> {
    pub fn new(backend: B) -> Self { Self::with_config(backend, ServiceConfig::default(), Arc::new(TracingReporter)) }

    pub fn with_config(backend: B, config: ServiceConfig, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                context: VideoContext::new(),
                backend: Mutex::new(backend),
                project: RwLock::new(Project::default()),
                cancel: Arc::new(CancellationContext::new()),
                events: EventBus::default(),
                reporter,
                config,
            }),
        }
    }

    pub fn context(&self) -> &VideoContext { &self.inner.context }

    pub fn config(&self) -> &ServiceConfig { &self.inner.config }

    pub fn subscribe(&self) -> Receiver<ServiceEvent> { self.inner.events.subscribe() }

    pub fn control(&self) -> PlaybackControl {
        PlaybackControl { cancel: self.inner.cancel.clone() }
    }

    /// Runs `f` with exclusive access to the backend.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R { f(&mut self.inner.backend.lock()) }

    pub fn project(&self) -> Project { self.inner.project.read().clone() }

    /// Mutates the project in place. Call [`Self::refresh`] to re-render
    /// with the edited segments.
    pub fn edit_project<R>(&self, f: impl FnOnce(&mut Project) -> R) -> R { f(&mut self.inner.project.write()) }

    /// Replaces the project; with a video loaded, adopts its output sizing
    /// and re-renders the current frame. While playing, the running loop
    /// picks up the new segments from its next frame instead.
    pub fn set_project(&self, project: Project) -> Result<(), ServiceError> {
        let options = project.video_processing_options.clone();
        *self.inner.project.write() = project;
        let ctx = &self.inner.context;
        if !ctx.has_video() {
            return Ok(());
        }
        let frame_size = ctx.snapshot().frame_size;
        self.set_output_preview_size(options.to_preview_options(frame_size))?;
        if ctx.is_playing() {
            return Ok(());
        }
        self.refresh()
    }

    /// Forced seek to the current frame. Rejected while playback is running.
    pub fn refresh(&self) -> Result<(), ServiceError> {
        let ctx = &self.inner.context;
        if !ctx.has_video() {
            return Ok(());
        }
        if ctx.is_playing() {
            return Err(ServiceError::PlaybackActive);
        }
        self.seek_frame_core(ctx.frame_number(), true, true)
    }

    pub fn load_script_from_file_source(&self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        let path = path.as_ref();
        if path.to_string_lossy().trim().is_empty() {
            return Err(ServiceError::BlankSourcePath);
        }
        let ctx = &self.inner.context;
        if ctx.is_playing() {
            return Err(ServiceError::PlaybackActive);
        }
        if ctx.has_video() || ctx.script_file_source().is_some() {
            self.close_script();
        }
        if !path.exists() {
            return Err(ServiceError::SourceNotFound(path.to_path_buf()));
        }

        if let Err(e) = self.open_source(path) {
            self.close_script_core();
            return Err(e);
        }
        info!(path = %path.display(), frames = ctx.video_frame_count(), "script opened");
        self.inner.events.emit(ServiceEvent::ScriptOpened);
        Ok(())
    }

    fn open_source(&self, path: &Path) -> Result<(), ServiceError> {
        let ctx = &self.inner.context;
        let info = self.inner.backend.lock().load_source(path)?;
        ctx.set_video_properties(&info);
        ctx.set_script_file_source(Some(path.to_path_buf()));

        {
            let project = self.inner.project.read();
            if project.script_file_source.is_some() {
                ctx.set_output_preview_size(project.video_processing_options.to_preview_options(info.frame_size));
            }
        }
        let size = ctx.refresh_output_preview_pixel_size();

        let (source_surface, preview_surface) = {
            let mut backend = self.inner.backend.lock();
            let preview = backend.create_preview_surface(size)?;
            (backend.source_surface(), preview)
        };
        self.inner.events.emit(ServiceEvent::NewSourceRenderSurface(source_surface));
        self.inner.events.emit(ServiceEvent::NewPreviewRenderSurface(Some(preview_surface)));

        self.seek_frame_core(0, true, true)
    }

    /// Closes the script now, or once the running playback loop observes the
    /// request.
    pub fn close_script(&self) {
        if self.control().close_script() {
            debug!("close deferred until playback stops");
            return;
        }
        self.close_script_core();
        self.inner.events.emit(ServiceEvent::ScriptClosed);
    }

    pub(crate) fn close_script_core(&self) {
        self.inner.backend.lock().close_source();
        self.inner.events.emit(ServiceEvent::NewSourceRenderSurface(None));
        self.inner.events.emit(ServiceEvent::NewPreviewRenderSurface(None));
        self.inner.context.reset();
        info!("script closed");
    }

    /// Seeks and renders `frame`. A no-op when already there. Rejected while
    /// playback is running; pause or stop first.
    pub fn seek_frame(&self, frame: Frame) -> Result<(), ServiceError> {
        if self.inner.context.is_playing() {
            return Err(ServiceError::PlaybackActive);
        }
        self.seek_frame_core(frame, false, true)
    }

    pub(crate) fn seek_frame_core(&self, frame: Frame, seek_even_if_current: bool, raise_events: bool) -> Result<(), ServiceError> {
        let state = self.inner.context.snapshot();
        if !state.has_video {
            return Err(ServiceError::NoVideo);
        }
        if frame < 0 || frame >= state.video_frame_count {
            return Err(ServiceError::FrameOutOfRange { frame, frame_count: state.video_frame_count });
        }
        if frame == state.frame_number && !seek_even_if_current {
            return Ok(());
        }

        {
            let project = self.inner.project.read();
            let masking = lerp_items_at(frame, project.masking.active_at(frame));
            let cropping = lerp_items_at(frame, project.cropping.active_at(frame));
            let mut backend = self.inner.backend.lock();
            backend.set_masking_preview_items(&masking)?;
            backend.set_cropping_preview_items(&cropping)?;
            backend.render_frame(frame)?;
        }
        debug!(frame, "frame rendered");

        if raise_events {
            self.on_frame_changed(frame);
        }
        Ok(())
    }

    /// Commits a rendered frame to the context and announces it.
    pub(crate) fn on_frame_changed(&self, frame: Frame) {
        let ctx = &self.inner.context;
        let previous = ctx.frame_number();
        ctx.set_frame_number(frame);
        self.inner.events.emit(ServiceEvent::FrameChanged { previous, current: frame });
        self.inner.events.emit(ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::Both));
    }

    pub fn pause_video_playback(&self) { self.control().pause(); }

    /// Stops playback, or seeks to the first frame when nothing is playing.
    pub fn stop_video_playback(&self) -> Result<(), ServiceError> {
        if self.control().stop() {
            return Ok(());
        }
        self.seek_frame(0)
    }

    pub fn set_output_preview_size(&self, options: VideoSizeOptions) -> Result<(), ServiceError> {
        let ctx = &self.inner.context;
        ctx.set_output_preview_size(options);
        if !ctx.has_video() {
            return Ok(());
        }
        let size = ctx.refresh_output_preview_pixel_size();
        let handle = {
            let mut backend = self.inner.backend.lock();
            let handle = backend.create_preview_surface(size)?;
            backend.render_preview()?;
            handle
        };
        self.inner.events.emit(ServiceEvent::NewPreviewRenderSurface(Some(handle)));
        self.inner.events.emit(ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::OutputPreview));
        Ok(())
    }

    /// Previews `segments` as the masking layer at the current frame.
    pub fn set_preview_frame_masking_segments<'a, I>(&self, segments: I) -> Result<(), ServiceError>
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        let frame = self.require_video()?;
        let items = lerp_items_at(frame, segments);
        {
            let mut backend = self.inner.backend.lock();
            backend.set_masking_preview_items(&items)?;
            backend.render_preview()?;
        }
        self.inner.events.emit(ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::OutputPreview));
        Ok(())
    }

    /// Previews `segments` as the cropping layer at the current frame.
    pub fn set_preview_frame_cropping_segments<'a, I>(&self, segments: I) -> Result<(), ServiceError>
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        let frame = self.require_video()?;
        let items = lerp_items_at(frame, segments);
        {
            let mut backend = self.inner.backend.lock();
            backend.set_cropping_preview_items(&items)?;
            backend.render_preview()?;
        }
        self.inner.events.emit(ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::OutputPreview));
        Ok(())
    }

    pub fn apply_masking_preview_to_source_render(&self) -> Result<(), ServiceError> {
        self.set_masking_on_source(true)
    }

    pub fn remove_masking_preview_from_source_render(&self) -> Result<(), ServiceError> {
        self.set_masking_on_source(false)
    }

    fn set_masking_on_source(&self, applied: bool) -> Result<(), ServiceError> {
        let ctx = &self.inner.context;
        ctx.set_apply_masking_preview_to_source(applied);
        {
            let mut backend = self.inner.backend.lock();
            backend.set_masking_applied_to_source(applied);
            if !ctx.has_video() {
                return Ok(());
            }
            backend.render_source()?;
        }
        self.inner.events.emit(ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::SourceVideo));
        Ok(())
    }

    fn require_video(&self) -> Result<Frame, ServiceError> {
        let state = self.inner.context.snapshot();
        if !state.has_video {
            return Err(ServiceError::NoVideo);
        }
        Ok(state.frame_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{events, fixture, mask_segment, Call};
    use timeline::{Ratio, VideoResizeMode};

    #[test]
    fn load_pushes_surfaces_seeks_zero_and_opens() {
        let (svc, log, file) = fixture(10);
        let rx = svc.subscribe();
        svc.load_script_from_file_source(file.path()).unwrap();

        let state = svc.context().snapshot();
        assert!(state.has_video);
        assert_eq!(state.video_frame_count, 10);
        assert_eq!(state.seekable_frame_count, 9);
        assert_eq!(state.frame_number, 0);
        assert_eq!(state.output_preview_size.pixel_width, 64);
        assert_eq!(log.renders(), vec![0]);

        let evs = events(&rx);
        assert!(matches!(evs[0], ServiceEvent::NewSourceRenderSurface(Some(_))));
        assert!(matches!(evs[1], ServiceEvent::NewPreviewRenderSurface(Some(_))));
        assert_eq!(evs[2], ServiceEvent::FrameChanged { previous: 0, current: 0 });
        assert_eq!(evs[3], ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::Both));
        assert_eq!(evs[4], ServiceEvent::ScriptOpened);
    }

    #[test]
    fn load_rejects_blank_and_missing_paths() {
        let (svc, _log, _file) = fixture(10);
        assert!(matches!(svc.load_script_from_file_source("  "), Err(ServiceError::BlankSourcePath)));
        assert!(matches!(
            svc.load_script_from_file_source("/no/such/script.json"),
            Err(ServiceError::SourceNotFound(_))
        ));
        assert!(!svc.context().has_video());
    }

    #[test]
    fn load_failure_leaves_context_closed() {
        let (svc, log, file) = fixture(10);
        log.fail_preview_surface();
        assert!(matches!(svc.load_script_from_file_source(file.path()), Err(ServiceError::Render(_))));
        assert_eq!(svc.context().snapshot(), crate::ContextState::default());
    }

    #[test]
    fn seek_rejects_out_of_range_without_state_change() {
        let (svc, log, file) = fixture(10);
        assert!(matches!(svc.seek_frame(0), Err(ServiceError::NoVideo)));
        svc.load_script_from_file_source(file.path()).unwrap();
        let before = svc.context().snapshot();
        let renders = log.renders().len();
        assert!(matches!(svc.seek_frame(-1), Err(ServiceError::FrameOutOfRange { frame: -1, frame_count: 10 })));
        assert!(matches!(svc.seek_frame(10), Err(ServiceError::FrameOutOfRange { frame: 10, .. })));
        assert_eq!(svc.context().snapshot(), before);
        assert_eq!(log.renders().len(), renders);
    }

    #[test]
    fn repeated_seek_is_a_no_op() {
        let (svc, log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(4).unwrap();
        let rx = svc.subscribe();
        let calls = log.calls().len();
        svc.seek_frame(4).unwrap();
        assert_eq!(log.calls().len(), calls);
        assert!(rx.try_recv().is_err());
        assert_eq!(svc.context().frame_number(), 4);
    }

    #[test]
    fn seek_sends_items_for_active_segments_only() {
        let (svc, log, file) = fixture(50);
        svc.edit_project(|p| {
            p.masking.add_segment(mask_segment(0, 10, 20)).unwrap();
            p.masking.add_segment(mask_segment(1, 30, 40)).unwrap();
        });
        svc.load_script_from_file_source(file.path()).unwrap();
        let rx = svc.subscribe();
        svc.seek_frame(15).unwrap();

        assert_eq!(log.last_masking_tracks(), vec![0]);
        assert_eq!(svc.context().frame_number(), 15);
        assert_eq!(svc.context().video_position(), svc.context().frame_rate().position_of(15));
        let evs = events(&rx);
        assert_eq!(evs, vec![
            ServiceEvent::FrameChanged { previous: 0, current: 15 },
            ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::Both),
        ]);

        svc.seek_frame(25).unwrap();
        assert!(log.last_masking_tracks().is_empty());
    }

    #[test]
    fn output_preview_size_recreates_surface_when_loaded() {
        let (svc, log, file) = fixture(10);
        let opts = VideoSizeOptions { resize_mode: VideoResizeMode::LetterboxToAspectRatio, aspect_ratio: Some(Ratio::new(2, 1)), ..Default::default() };
        svc.set_output_preview_size(opts).unwrap();
        assert!(log.calls().is_empty());

        svc.load_script_from_file_source(file.path()).unwrap();
        let rx = svc.subscribe();
        svc.set_output_preview_size(VideoSizeOptions { aspect_ratio: Some(Ratio::new(4, 1)), ..opts }).unwrap();
        assert_eq!(svc.context().output_preview_size().pixel_width, 192);
        assert!(log.calls().contains(&Call::CreatePreview(timeline::FrameSize::new(192, 48))));
        let evs = events(&rx);
        assert!(matches!(evs[0], ServiceEvent::NewPreviewRenderSurface(Some(_))));
        assert_eq!(evs[1], ServiceEvent::SurfaceRendered(SurfaceRenderPipeline::OutputPreview));
    }

    #[test]
    fn preview_segments_use_current_frame() {
        let (svc, log, file) = fixture(50);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(12).unwrap();
        let seg = mask_segment(3, 10, 20);
        svc.set_preview_frame_masking_segments([&seg]).unwrap();
        assert_eq!(log.last_masking_tracks(), vec![3]);
        svc.set_preview_frame_cropping_segments(std::iter::empty()).unwrap();
        assert_eq!(log.calls().last(), Some(&Call::RenderPreview));
    }

    #[test]
    fn masking_toggle_updates_context_and_rerenders_source() {
        let (svc, log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.apply_masking_preview_to_source_render().unwrap();
        assert!(svc.context().snapshot().apply_masking_preview_to_source);
        assert!(log.calls().ends_with(&[Call::MaskSource(true), Call::RenderSource]));
        svc.remove_masking_preview_from_source_render().unwrap();
        assert!(!svc.context().snapshot().apply_masking_preview_to_source);
    }

    #[test]
    fn close_resets_context_and_releases_surfaces() {
        let (svc, log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(3).unwrap();
        let rx = svc.subscribe();
        svc.close_script();
        assert_eq!(svc.context().snapshot(), crate::ContextState::default());
        assert_eq!(log.calls().last(), Some(&Call::Close));
        assert_eq!(events(&rx), vec![
            ServiceEvent::NewSourceRenderSurface(None),
            ServiceEvent::NewPreviewRenderSurface(None),
            ServiceEvent::ScriptClosed,
        ]);
    }

    #[test]
    fn stop_when_idle_rewinds() {
        let (svc, _log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        svc.seek_frame(6).unwrap();
        svc.stop_video_playback().unwrap();
        assert_eq!(svc.context().frame_number(), 0);
    }

    #[test]
    fn set_project_applies_processing_options() {
        let (svc, _log, file) = fixture(10);
        svc.load_script_from_file_source(file.path()).unwrap();
        let mut project = Project::new(file.path());
        project.video_processing_options.output_resize_mode = VideoResizeMode::LetterboxToAspectRatio;
        project.video_processing_options.output_aspect_ratio = Some(Ratio::new(1, 1));
        project.cropping.add_segment(mask_segment(0, 0, 9)).unwrap();
        svc.set_project(project).unwrap();
        let preview = svc.context().output_preview_size();
        assert_eq!((preview.pixel_width, preview.pixel_height), (64, 64));
        assert_eq!(svc.project().cropping.len(), 1);
    }
}
