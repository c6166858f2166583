//! Recording backend and fixtures shared by the service and scheduler tests.

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use renderer::{RenderBackend, RenderError, SourceInfo, SurfaceHandle};
use timeline::{Fps, Frame, FrameSize, KeyFrame, KeyFrameData, LerpItem, Segment, ShapeKind};

use crate::report::ErrorReporter;
use crate::{ScriptVideoService, ServiceConfig, ServiceError, ServiceEvent};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Load,
    Close,
    CreatePreview(FrameSize),
    Masking(Vec<u32>),
    Cropping(Vec<u32>),
    Render(Frame),
    RenderPreview,
    RenderSource,
    MaskSource(bool),
}

type RenderHook = Box<dyn FnMut(Frame) + Send>;

#[derive(Default)]
struct LogState {
    calls: Vec<Call>,
    reports: Vec<String>,
    fail_render_at: Option<Frame>,
    fail_preview_surface: bool,
    hook: Option<RenderHook>,
}

/// Shared view of everything a [`RecordingBackend`] was asked to do.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<LogState>>);

impl CallLog {
    pub(crate) fn calls(&self) -> Vec<Call> { self.0.lock().calls.clone() }

    pub(crate) fn clear(&self) { self.0.lock().calls.clear(); }

    pub(crate) fn renders(&self) -> Vec<Frame> {
        self.0
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Render(f) => Some(*f),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_masking_tracks(&self) -> Vec<u32> {
        self.0
            .lock()
            .calls
            .iter()
            .rev()
            .find_map(|c| match c {
                Call::Masking(tracks) => Some(tracks.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub(crate) fn reports(&self) -> Vec<String> { self.0.lock().reports.clone() }

    pub(crate) fn fail_render_at(&self, frame: Frame) { self.0.lock().fail_render_at = Some(frame); }

    pub(crate) fn fail_preview_surface(&self) { self.0.lock().fail_preview_surface = true; }

    /// Runs `f` inside every `render_frame`, after the frame is recorded.
    pub(crate) fn on_render(&self, f: impl FnMut(Frame) + Send + 'static) { self.0.lock().hook = Some(Box::new(f)); }

    fn push(&self, call: Call) { self.0.lock().calls.push(call); }
}

impl ErrorReporter for CallLog {
    fn report(&self, context: &str, error: &ServiceError) {
        self.0.lock().reports.push(format!("{context}: {error}"));
    }
}

/// Backend that renders nothing and records every call.
pub(crate) struct RecordingBackend {
    info: SourceInfo,
    loaded: bool,
    preview: Option<SurfaceHandle>,
    source: Option<SurfaceHandle>,
    log: CallLog,
}

impl RecordingBackend {
    pub(crate) fn new(frame_count: Frame, log: CallLog) -> Self {
        let info = SourceInfo { has_video: true, frame_count, frame_rate: Fps::new(25, 1), frame_size: FrameSize::new(64, 48) };
        Self { info, loaded: false, preview: None, source: None, log }
    }
}

impl RenderBackend for RecordingBackend {
    fn load_source(&mut self, _path: &Path) -> Result<SourceInfo, RenderError> {
        self.log.push(Call::Load);
        self.loaded = true;
        self.source = Some(SurfaceHandle::new());
        Ok(self.info)
    }

    fn close_source(&mut self) {
        self.log.push(Call::Close);
        self.loaded = false;
        self.source = None;
        self.preview = None;
    }

    fn source_surface(&self) -> Option<SurfaceHandle> { self.source }

    fn create_preview_surface(&mut self, size: FrameSize) -> Result<SurfaceHandle, RenderError> {
        if self.log.0.lock().fail_preview_surface {
            return Err(RenderError::Backend("preview surface refused".into()));
        }
        self.log.push(Call::CreatePreview(size));
        let handle = SurfaceHandle::new();
        self.preview = Some(handle);
        Ok(handle)
    }

    fn preview_surface(&self) -> Option<SurfaceHandle> { self.preview }

    fn set_masking_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError> {
        self.log.push(Call::Masking(items.iter().map(|i| i.track_number).collect()));
        Ok(())
    }

    fn set_cropping_preview_items(&mut self, items: &[LerpItem]) -> Result<(), RenderError> {
        self.log.push(Call::Cropping(items.iter().map(|i| i.track_number).collect()));
        Ok(())
    }

    fn render_frame(&mut self, frame: Frame) -> Result<(), RenderError> {
        if !self.loaded {
            return Err(RenderError::NoSource);
        }
        if self.log.0.lock().fail_render_at == Some(frame) {
            return Err(RenderError::Backend(format!("decode failed at {frame}")));
        }
        self.log.push(Call::Render(frame));
        // taken out so the hook can use the log without deadlocking
        let hook = self.log.0.lock().hook.take();
        if let Some(mut hook) = hook {
            hook(frame);
            let mut state = self.log.0.lock();
            if state.hook.is_none() {
                state.hook = Some(hook);
            }
        }
        Ok(())
    }

    fn render_preview(&mut self) -> Result<(), RenderError> {
        self.log.push(Call::RenderPreview);
        Ok(())
    }

    fn render_source(&mut self) -> Result<(), RenderError> {
        self.log.push(Call::RenderSource);
        Ok(())
    }

    fn set_masking_applied_to_source(&mut self, applied: bool) { self.log.push(Call::MaskSource(applied)); }
}

type Fixture = (ScriptVideoService<RecordingBackend>, CallLog, tempfile::NamedTempFile);

/// Service over a [`RecordingBackend`] of `frame_count` frames, with frame
/// pacing off. The temp file stands in for the script on disk.
pub(crate) fn fixture(frame_count: Frame) -> Fixture {
    fixture_with(frame_count, ServiceConfig { hold_frame_rate: false, ..Default::default() })
}

/// Same as [`fixture`] with an explicit config; the backend runs at 25 fps.
pub(crate) fn fixture_with(frame_count: Frame, config: ServiceConfig) -> Fixture {
    let log = CallLog::default();
    let service = ScriptVideoService::with_config(RecordingBackend::new(frame_count, log.clone()), config, Arc::new(log.clone()));
    let file = tempfile::NamedTempFile::new().expect("temp script");
    (service, log, file)
}

pub(crate) fn events(rx: &Receiver<ServiceEvent>) -> Vec<ServiceEvent> { rx.try_iter().collect() }

pub(crate) fn mask_segment(track: u32, start: Frame, end: Frame) -> Segment {
    let rect = |left: f64| KeyFrameData::Rectangle { left, top: 0.0, width: 8.0, height: 8.0 };
    let key_frames = vec![KeyFrame::new(start, rect(0.0)), KeyFrame::new(end, rect(16.0))];
    Segment::new(track, start, end, format!("mask {track}"), ShapeKind::Rectangle, key_frames).expect("valid segment")
}
