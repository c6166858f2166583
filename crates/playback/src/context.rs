//! Runtime context: the single lock-guarded holder of playback state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use renderer::SourceInfo;
use timeline::{Fps, Frame, FrameSize, Ratio, VideoSizeOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct ContextState {
    pub script_file_source: Option<PathBuf>,
    pub has_video: bool,
    pub is_playing: bool,
    pub frame_number: Frame,
    pub video_frame_count: Frame,
    /// Highest frame number that can be sought, `video_frame_count - 1`.
    pub seekable_frame_count: Frame,
    pub frame_rate: Fps,
    pub frame_size: FrameSize,
    pub aspect_ratio: Ratio,
    pub video_duration: Duration,
    pub video_position: Duration,
    pub output_preview_size: VideoSizeOptions,
    pub apply_masking_preview_to_source: bool,
}

impl Default for ContextState {
    fn default() -> Self {
        Self {
            script_file_source: None,
            has_video: false,
            is_playing: false,
            frame_number: 0,
            video_frame_count: 0,
            seekable_frame_count: 0,
            frame_rate: Fps::new(1, 1),
            frame_size: FrameSize::default(),
            aspect_ratio: Ratio::new(1, 1),
            video_duration: Duration::ZERO,
            video_position: Duration::ZERO,
            output_preview_size: VideoSizeOptions::default(),
            apply_masking_preview_to_source: false,
        }
    }
}

/// One per changed field, carrying the new value.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextChange {
    ScriptFileSource(Option<PathBuf>),
    HasVideo(bool),
    IsPlaying(bool),
    FrameNumber(Frame),
    VideoFrameCount(Frame),
    SeekableFrameCount(Frame),
    FrameRate(Fps),
    FrameSize(FrameSize),
    AspectRatio(Ratio),
    VideoDuration(Duration),
    VideoPosition(Duration),
    OutputPreviewSize(VideoSizeOptions),
    ApplyMaskingPreviewToSource(bool),
}

#[derive(Default)]
struct Shared {
    state: ContextState,
    observers: Vec<Sender<ContextChange>>,
}

impl Shared {
    fn set<T: PartialEq + Clone>(
        &mut self,
        field: fn(&mut ContextState) -> &mut T,
        value: T,
        change: fn(T) -> ContextChange,
    ) {
        let slot = field(&mut self.state);
        if *slot == value {
            return;
        }
        *slot = value.clone();
        self.notify(change(value));
    }

    fn refresh_position(&mut self) {
        let position = self.state.frame_rate.position_of(self.state.frame_number);
        self.set(|s| &mut s.video_position, position, ContextChange::VideoPosition);
    }

    fn notify(&mut self, change: ContextChange) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Cheap to clone; every clone observes the same state. Writes hold the
/// lock across the mutation and its notification, and emit only on change.
#[derive(Clone, Default)]
pub struct VideoContext {
    shared: Arc<Mutex<Shared>>,
}

impl VideoContext {
    pub fn new() -> Self { Self::default() }

    pub fn snapshot(&self) -> ContextState { self.shared.lock().state.clone() }

    pub fn subscribe(&self) -> Receiver<ContextChange> {
        let (tx, rx) = unbounded();
        self.shared.lock().observers.push(tx);
        rx
    }

    pub fn has_video(&self) -> bool { self.shared.lock().state.has_video }
    pub fn is_playing(&self) -> bool { self.shared.lock().state.is_playing }
    pub fn frame_number(&self) -> Frame { self.shared.lock().state.frame_number }
    pub fn video_frame_count(&self) -> Frame { self.shared.lock().state.video_frame_count }
    pub fn seekable_frame_count(&self) -> Frame { self.shared.lock().state.seekable_frame_count }
    pub fn frame_rate(&self) -> Fps { self.shared.lock().state.frame_rate }
    pub fn video_position(&self) -> Duration { self.shared.lock().state.video_position }
    pub fn output_preview_size(&self) -> VideoSizeOptions { self.shared.lock().state.output_preview_size }
    pub fn script_file_source(&self) -> Option<PathBuf> { self.shared.lock().state.script_file_source.clone() }

    pub(crate) fn set_script_file_source(&self, path: Option<PathBuf>) {
        self.shared.lock().set(|s| &mut s.script_file_source, path, ContextChange::ScriptFileSource);
    }

    pub(crate) fn set_is_playing(&self, playing: bool) {
        self.shared.lock().set(|s| &mut s.is_playing, playing, ContextChange::IsPlaying);
    }

    /// Sets `is_playing` unless it already is; false means another session
    /// owns playback.
    pub(crate) fn try_begin_playing(&self) -> bool {
        let mut g = self.shared.lock();
        if g.state.is_playing {
            return false;
        }
        g.set(|s| &mut s.is_playing, true, ContextChange::IsPlaying);
        true
    }

    /// Moves to `frame` and recomputes the derived position.
    pub(crate) fn set_frame_number(&self, frame: Frame) {
        let mut g = self.shared.lock();
        g.set(|s| &mut s.frame_number, frame, ContextChange::FrameNumber);
        g.refresh_position();
    }

    pub(crate) fn set_apply_masking_preview_to_source(&self, apply: bool) {
        self.shared.lock().set(|s| &mut s.apply_masking_preview_to_source, apply, ContextChange::ApplyMaskingPreviewToSource);
    }

    /// Adopts the properties of a freshly loaded source.
    pub(crate) fn set_video_properties(&self, info: &SourceInfo) {
        let mut g = self.shared.lock();
        g.set(|s| &mut s.has_video, info.has_video, ContextChange::HasVideo);
        g.set(|s| &mut s.frame_size, info.frame_size, ContextChange::FrameSize);
        g.set(|s| &mut s.video_frame_count, info.frame_count, ContextChange::VideoFrameCount);
        g.set(|s| &mut s.seekable_frame_count, (info.frame_count - 1).max(0), ContextChange::SeekableFrameCount);
        g.set(|s| &mut s.frame_rate, info.frame_rate, ContextChange::FrameRate);
        g.set(|s| &mut s.video_duration, info.frame_rate.duration_of(info.frame_count), ContextChange::VideoDuration);
        g.set(|s| &mut s.aspect_ratio, info.frame_size.aspect_ratio(), ContextChange::AspectRatio);
        g.refresh_position();
    }

    pub(crate) fn set_output_preview_size(&self, options: VideoSizeOptions) {
        self.shared.lock().set(|s| &mut s.output_preview_size, options, ContextChange::OutputPreviewSize);
    }

    /// Derives preview pixel dimensions from the resize mode and frame size.
    pub(crate) fn refresh_output_preview_pixel_size(&self) -> FrameSize {
        let mut g = self.shared.lock();
        let mut options = g.state.output_preview_size;
        let size = options.resolve_pixel_size(g.state.frame_size);
        options.pixel_width = size.width;
        options.pixel_height = size.height;
        g.set(|s| &mut s.output_preview_size, options, ContextChange::OutputPreviewSize);
        size
    }

    /// Returns every field to its default, notifying each one that changed.
    pub(crate) fn reset(&self) {
        let d = ContextState::default();
        let mut g = self.shared.lock();
        g.set(|s| &mut s.is_playing, d.is_playing, ContextChange::IsPlaying);
        g.set(|s| &mut s.has_video, d.has_video, ContextChange::HasVideo);
        g.set(|s| &mut s.script_file_source, d.script_file_source, ContextChange::ScriptFileSource);
        g.set(|s| &mut s.frame_size, d.frame_size, ContextChange::FrameSize);
        g.set(|s| &mut s.video_frame_count, d.video_frame_count, ContextChange::VideoFrameCount);
        g.set(|s| &mut s.seekable_frame_count, d.seekable_frame_count, ContextChange::SeekableFrameCount);
        g.set(|s| &mut s.video_duration, d.video_duration, ContextChange::VideoDuration);
        g.set(|s| &mut s.frame_rate, d.frame_rate, ContextChange::FrameRate);
        g.set(|s| &mut s.frame_number, d.frame_number, ContextChange::FrameNumber);
        g.set(|s| &mut s.video_position, d.video_position, ContextChange::VideoPosition);
        g.set(|s| &mut s.aspect_ratio, d.aspect_ratio, ContextChange::AspectRatio);
        g.set(|s| &mut s.output_preview_size, d.output_preview_size, ContextChange::OutputPreviewSize);
        g.set(|s| &mut s.apply_masking_preview_to_source, d.apply_masking_preview_to_source, ContextChange::ApplyMaskingPreviewToSource);
    }
}
