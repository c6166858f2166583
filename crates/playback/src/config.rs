/// Playback tuning for a [`crate::ScriptVideoService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Sleep between frames to hold the source frame rate. When off, frames
    /// are rendered back to back.
    pub hold_frame_rate: bool,
    /// Cadence multiplier, 1.0 by default.
    pub rate: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { hold_frame_rate: true, rate: 1.0 }
    }
}
