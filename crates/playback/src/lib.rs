//! Frame seek orchestration and cancellable background playback over a
//! [`renderer::RenderBackend`].

use std::path::PathBuf;

use renderer::RenderError;
use thiserror::Error;
use timeline::Frame;

pub mod cancel;
pub mod config;
pub mod context;
pub mod events;
pub mod report;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testing;

pub use cancel::{CancellationContext, CancellationReason};
pub use config::ServiceConfig;
pub use context::{ContextChange, ContextState, VideoContext};
pub use events::{ServiceEvent, SurfaceRenderPipeline};
pub use report::{ErrorReporter, TracingReporter};
pub use scheduler::{PlaybackOutcome, PlaybackSession};
pub use service::{PlaybackControl, ScriptVideoService};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("script doesn't output a video")]
    NoVideo,
    #[error("frame number {frame} out of range (frame count {frame_count})")]
    FrameOutOfRange { frame: Frame, frame_count: Frame },
    #[error("script source path is blank")]
    BlankSourcePath,
    #[error("can't find the script source {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("not allowed while video playback is active")]
    PlaybackActive,
    #[error("playback worker exited unexpectedly")]
    WorkerLost,
    #[error(transparent)]
    Render(#[from] RenderError),
}
