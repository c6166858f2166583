//! Frame sources: the decoder side of the backend.
//!
//! A source reports its frame count, rate and size and can decode any frame
//! by number. The bundled [`SyntheticSource`] generates deterministic luma
//! frames from a small JSON descriptor, which keeps the engine runnable and
//! testable without a media stack.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use timeline::{Fps, Frame, FrameSize};

use crate::SourceInfo;

/// Single-plane 8-bit frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub frame_number: Frame,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl LumaFrame {
    pub fn blank(frame_number: Frame, size: FrameSize) -> Self {
        Self {
            frame_number,
            width: size.width,
            height: size.height,
            pixels: vec![0; size.width as usize * size.height as usize],
        }
    }

    pub fn size(&self) -> FrameSize { FrameSize::new(self.width, self.height) }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize).copied()
    }
}

/// Video frame provider
pub trait FrameSource: Send {
    /// Static properties of the stream
    fn info(&self) -> SourceInfo;

    /// Decode frame `frame` (zero-based)
    fn decode_frame(&mut self, frame: Frame) -> Result<LumaFrame>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Diagonal ramp that scrolls one step per frame
    #[default]
    Gradient,
    /// 8x8 checkerboard that inverts every frame
    Checker,
    /// Constant level
    Flat(u8),
}

/// On-disk description of a synthetic source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub frame_count: Frame,
    pub fps_num: u32,
    #[serde(default = "one")]
    pub fps_den: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub pattern: Pattern,
}

fn one() -> u32 { 1 }

impl Default for SourceDescriptor {
    fn default() -> Self {
        Self { frame_count: 240, fps_num: 24, fps_den: 1, width: 320, height: 180, pattern: Pattern::Gradient }
    }
}

impl SourceDescriptor {
    pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string_pretty(self)?) }
}

pub struct SyntheticSource {
    info: SourceInfo,
    pattern: Pattern,
}

impl SyntheticSource {
    pub fn new(desc: &SourceDescriptor) -> Result<Self> {
        if desc.frame_count < 0 {
            bail!("negative frame count {}", desc.frame_count);
        }
        let frame_rate = Fps::checked(desc.fps_num, desc.fps_den).context("invalid frame rate")?;
        let frame_size = FrameSize::new(desc.width, desc.height);
        let info = SourceInfo {
            has_video: desc.frame_count > 0 && !frame_size.is_empty(),
            frame_count: desc.frame_count,
            frame_rate,
            frame_size,
        };
        Ok(Self { info, pattern: desc.pattern })
    }

    fn sample(&self, x: u32, y: u32, frame: Frame) -> u8 {
        match self.pattern {
            Pattern::Gradient => ((x as i64 + y as i64 + frame) & 0xff) as u8,
            Pattern::Checker => {
                if ((x / 8 + y / 8) as i64 + frame) % 2 == 0 { 255 } else { 0 }
            }
            Pattern::Flat(level) => level,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn info(&self) -> SourceInfo { self.info }

    fn decode_frame(&mut self, frame: Frame) -> Result<LumaFrame> {
        if frame < 0 || frame >= self.info.frame_count {
            bail!("frame {frame} outside 0..{}", self.info.frame_count);
        }
        let FrameSize { width, height } = self.info.frame_size;
        let mut out = LumaFrame::blank(frame, self.info.frame_size);
        for y in 0..height {
            for x in 0..width {
                out.pixels[y as usize * width as usize + x as usize] = self.sample(x, y, frame);
            }
        }
        Ok(out)
    }
}

/// Open the source described by the JSON file at `path`
pub fn open_source<P: AsRef<Path>>(path: P) -> Result<Box<dyn FrameSource>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let desc: SourceDescriptor =
        serde_json::from_str(&text).with_context(|| format!("parsing source descriptor {}", path.display()))?;
    Ok(Box::new(SyntheticSource::new(&desc)?))
}
