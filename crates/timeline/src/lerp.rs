//! Bracketing key frame lookup for an arbitrary frame.

use serde::{Deserialize, Serialize};

use crate::keyframe::{KeyFrame, KeyFrameData};
use crate::ordered::OrderedCollection;
use crate::segment::Segment;
use crate::{Frame, TimelineError};

/// Interpolation descriptor for one segment at one frame.
///
/// `after` is `None` on an exact key frame hit. Outside the key frame span
/// both ends clamp to the boundary key frame and `amount` is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LerpItem {
    pub track_number: u32,
    pub at_or_before: KeyFrame,
    pub after: Option<KeyFrame>,
    pub amount: f64,
}

impl LerpItem {
    /// Shape payload at the descriptor's frame.
    pub fn resolve(&self) -> Result<KeyFrameData, TimelineError> {
        match &self.after {
            Some(after) if self.amount > 0.0 => self.at_or_before.data.lerp(&after.data, self.amount),
            _ => Ok(self.at_or_before.data.clone()),
        }
    }
}

/// Indices of the bracketing key frames and the weight between them.
/// Returns `None` only for an empty collection.
pub fn bracket(key_frames: &OrderedCollection<KeyFrame>, frame: Frame) -> Option<(usize, Option<usize>, f64)> {
    if key_frames.is_empty() {
        return None;
    }
    let i = match key_frames.binary_search(&frame) {
        Ok(exact) => return Some((exact, None, 0.0)),
        Err(insert_at) => insert_at,
    };
    let before = if i > 0 { i - 1 } else { i };
    let after = if i < key_frames.len() { i } else { before };

    let range = key_frames[after].frame_number - key_frames[before].frame_number;
    let amount = if range > 0 {
        (frame - key_frames[before].frame_number) as f64 / range as f64
    } else {
        0.0
    };
    Some((before, Some(after), amount))
}

pub fn lerp_item_at(frame: Frame, segment: &Segment) -> LerpItem {
    let key_frames = segment.key_frames();
    // segments never hold an empty key frame collection
    let (before, after, amount) = bracket(key_frames, frame).unwrap_or((0, None, 0.0));
    LerpItem {
        track_number: segment.track_number(),
        at_or_before: key_frames[before].clone(),
        after: after.map(|i| key_frames[i].clone()),
        amount,
    }
}

/// One descriptor per input segment, in input order.
pub fn lerp_items_at<'a, I>(frame: Frame, segments: I) -> Vec<LerpItem>
where
    I: IntoIterator<Item = &'a Segment>,
{
    segments.into_iter().map(|segment| lerp_item_at(frame, segment)).collect()
}
