use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Frame, TimelineError};

const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32,
}

impl Fps {
    pub const fn new(num: u32, den: u32) -> Self { Self { num, den } }

    pub fn checked(num: u32, den: u32) -> Result<Self, TimelineError> {
        if num == 0 || den == 0 {
            return Err(TimelineError::ZeroDenominator);
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 { 0.0 } else { self.num as f64 / self.den as f64 }
    }

    /// Wall-clock length of one frame. Zero for a degenerate rate.
    pub fn frame_period(&self) -> Duration {
        if self.num == 0 {
            return Duration::ZERO;
        }
        nanos(self.den as u128 * NANOS_PER_SEC / self.num as u128)
    }

    /// Presentation time of `frame`; frames at or before zero map to zero.
    pub fn position_of(&self, frame: Frame) -> Duration {
        if frame <= 0 || self.num == 0 {
            return Duration::ZERO;
        }
        nanos(frame as u128 * self.den as u128 * NANOS_PER_SEC / self.num as u128)
    }

    pub fn duration_of(&self, frame_count: Frame) -> Duration { self.position_of(frame_count) }
}

impl Default for Fps {
    fn default() -> Self { Self::new(1, 1) }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    pub const fn new(num: u32, den: u32) -> Self { Self { num, den } }

    /// Reduced by the greatest common divisor.
    pub fn simplified(num: u32, den: u32) -> Result<Self, TimelineError> {
        if num == 0 || den == 0 {
            return Err(TimelineError::ZeroDenominator);
        }
        let g = gcd(num, den);
        Ok(Self { num: num / g, den: den / g })
    }

    pub fn as_f64(&self) -> f64 { self.num as f64 / self.den as f64 }
}

impl Default for Ratio {
    fn default() -> Self { Self::new(1, 1) }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self { Self { width, height } }

    pub fn is_empty(&self) -> bool { self.width == 0 || self.height == 0 }

    /// Aspect ratio of the frame itself, 1:1 when a dimension is zero.
    pub fn aspect_ratio(&self) -> Ratio {
        Ratio::simplified(self.width.max(1), self.height.max(1)).unwrap_or_default()
    }

    /// Grows one dimension so the result matches `ratio` without cropping.
    /// Both dimensions are rounded to the nearest even integer.
    pub fn expand_to_aspect_ratio(&self, ratio: Ratio) -> FrameSize {
        if ratio.num == 0 || ratio.den == 0 {
            return *self;
        }
        let mut width = self.width as f64;
        let mut height = width * ratio.den as f64 / ratio.num as f64;
        if height < self.height as f64 {
            height = self.height as f64;
            width = height * ratio.num as f64 / ratio.den as f64;
        }
        FrameSize { width: round_to_even(width), height: round_to_even(height) }
    }
}

fn round_to_even(value: f64) -> u32 {
    ((value * 0.5).round_ties_even() * 2.0) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self { Self { x, y } }

    pub fn lerp(self, other: Point, amount: f64) -> Point {
        Point { x: lerp(self.x, other.x, amount), y: lerp(self.y, other.y, amount) }
    }
}

/// Linear blend that is exact at both ends of `[0, 1]`.
pub fn lerp(from: f64, to: f64, amount: f64) -> f64 {
    if amount == 0.0 {
        from
    } else if amount == 1.0 {
        to
    } else {
        from + (to - from) * amount
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoResizeMode {
    #[default]
    None,
    LetterboxToSize,
    LetterboxToAspectRatio,
}

/// Output preview sizing. Pixel dimensions are derived from the source
/// frame size whenever a video is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSizeOptions {
    pub resize_mode: VideoResizeMode,
    pub aspect_ratio: Option<Ratio>,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl VideoSizeOptions {
    pub fn pixel_size(&self) -> FrameSize { FrameSize::new(self.pixel_width, self.pixel_height) }

    /// Pixel size the preview should take for a source of `frame_size`.
    pub fn resolve_pixel_size(&self, frame_size: FrameSize) -> FrameSize {
        match (self.resize_mode, self.aspect_ratio) {
            (VideoResizeMode::LetterboxToAspectRatio, Some(ratio)) => frame_size.expand_to_aspect_ratio(ratio),
            _ => frame_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_zero_at_and_before_first_frame() {
        let fps = Fps::new(25, 1);
        assert_eq!(fps.position_of(0), Duration::ZERO);
        assert_eq!(fps.position_of(-4), Duration::ZERO);
        assert_eq!(fps.position_of(50), Duration::from_secs(2));
    }

    #[test]
    fn ntsc_rate_keeps_precision() {
        let fps = Fps::new(30000, 1001);
        assert_eq!(fps.position_of(30), Duration::from_millis(1001));
        assert_eq!(fps.frame_period(), Duration::from_nanos(33_366_666));
    }

    #[test]
    fn checked_rejects_zero_terms() {
        assert!(matches!(Fps::checked(0, 1), Err(TimelineError::ZeroDenominator)));
        assert!(matches!(Fps::checked(24, 0), Err(TimelineError::ZeroDenominator)));
    }

    #[test]
    fn ratio_simplifies() {
        assert_eq!(Ratio::simplified(1920, 1080).unwrap(), Ratio::new(16, 9));
        assert_eq!(FrameSize::new(0, 0).aspect_ratio(), Ratio::new(1, 1));
    }

    #[test]
    fn expand_to_aspect_ratio_prefers_width_then_height() {
        assert_eq!(FrameSize::new(720, 480).expand_to_aspect_ratio(Ratio::new(16, 9)), FrameSize::new(854, 480));
        assert_eq!(FrameSize::new(1920, 1080).expand_to_aspect_ratio(Ratio::new(4, 3)), FrameSize::new(1920, 1440));
        assert_eq!(FrameSize::new(640, 480).expand_to_aspect_ratio(Ratio::new(4, 3)), FrameSize::new(640, 480));
    }

    #[test]
    fn lerp_is_exact_at_bounds() {
        assert_eq!(lerp(0.1, 0.7, 0.0), 0.1);
        assert_eq!(lerp(0.1, 0.7, 1.0), 0.7);
        assert_eq!(Point::new(0.0, 10.0).lerp(Point::new(10.0, 20.0), 0.5), Point::new(5.0, 15.0));
    }

    #[test]
    fn preview_pixel_size_only_expands_for_aspect_letterbox() {
        let frame = FrameSize::new(720, 480);
        let mut opts = VideoSizeOptions { resize_mode: VideoResizeMode::LetterboxToSize, aspect_ratio: Some(Ratio::new(16, 9)), ..Default::default() };
        assert_eq!(opts.resolve_pixel_size(frame), frame);
        opts.resize_mode = VideoResizeMode::LetterboxToAspectRatio;
        assert_eq!(opts.resolve_pixel_size(frame), FrameSize::new(854, 480));
        opts.aspect_ratio = None;
        assert_eq!(opts.resolve_pixel_size(frame), frame);
    }
}
