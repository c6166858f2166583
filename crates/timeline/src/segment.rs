//! Segments: track-assigned frame ranges animated by key frames.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyframe::{KeyFrame, KeyFrameData, ShapeKind};
use crate::lerp::lerp_item_at;
use crate::ordered::{Keyed, OrderedCollection};
use crate::{Frame, TimelineError};

/// One editable crop or mask region over `start_frame..=end_frame`.
///
/// Key frames are never empty, unique by frame number, sorted, lie within
/// the segment's range and all carry the segment's shape kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRecord")]
pub struct Segment {
    id: Uuid,
    track_number: u32,
    start_frame: Frame,
    end_frame: Frame,
    name: String,
    kind: ShapeKind,
    key_frames: OrderedCollection<KeyFrame>,
}

#[derive(Deserialize)]
struct SegmentRecord {
    id: Uuid,
    track_number: u32,
    start_frame: Frame,
    end_frame: Frame,
    name: String,
    kind: ShapeKind,
    key_frames: Vec<KeyFrame>,
}

impl TryFrom<SegmentRecord> for Segment {
    type Error = TimelineError;

    fn try_from(r: SegmentRecord) -> Result<Self, Self::Error> {
        Segment::build(r.id, r.track_number, r.start_frame, r.end_frame, r.name, r.kind, r.key_frames)
    }
}

impl Segment {
    pub fn new(
        track_number: u32,
        start_frame: Frame,
        end_frame: Frame,
        name: impl Into<String>,
        kind: ShapeKind,
        key_frames: Vec<KeyFrame>,
    ) -> Result<Self, TimelineError> {
        Self::build(Uuid::new_v4(), track_number, start_frame, end_frame, name.into(), kind, key_frames)
    }

    fn build(
        id: Uuid,
        track_number: u32,
        start_frame: Frame,
        end_frame: Frame,
        name: String,
        kind: ShapeKind,
        key_frames: Vec<KeyFrame>,
    ) -> Result<Self, TimelineError> {
        if start_frame < 0 || start_frame > end_frame {
            return Err(TimelineError::InvalidRange { start: start_frame, end: end_frame });
        }
        if key_frames.is_empty() {
            return Err(TimelineError::EmptyKeyFrames);
        }
        let segment = Segment {
            id,
            track_number,
            start_frame,
            end_frame,
            name,
            kind,
            key_frames: OrderedCollection::from_items(key_frames)?,
        };
        for kf in &segment.key_frames {
            segment.check_key_frame(kf)?;
        }
        Ok(segment)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn track_number(&self) -> u32 { self.track_number }
    pub fn start_frame(&self) -> Frame { self.start_frame }
    pub fn end_frame(&self) -> Frame { self.end_frame }
    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> ShapeKind { self.kind }
    pub fn key_frames(&self) -> &OrderedCollection<KeyFrame> { &self.key_frames }

    /// Number of frames covered, both ends inclusive.
    pub fn duration(&self) -> Frame { self.end_frame - self.start_frame + 1 }

    pub fn is_frame_within(&self, frame: Frame) -> bool {
        self.start_frame <= frame && frame <= self.end_frame
    }

    pub fn overlaps(&self, start: Frame, end: Frame) -> bool {
        self.start_frame <= end && start <= self.end_frame
    }

    pub fn rename(&mut self, name: impl Into<String>) { self.name = name.into(); }

    /// Change feed for this segment's key frames.
    pub fn subscribe_key_frames(&mut self) -> crossbeam_channel::Receiver<crate::CollectionChange<KeyFrame>> {
        self.key_frames.subscribe()
    }

    pub fn key_frame_at(&self, frame: Frame) -> Option<&KeyFrame> {
        self.key_frames.binary_search(&frame).ok().map(|i| &self.key_frames[i])
    }

    pub fn key_frame_at_or_before(&self, frame: Frame) -> Option<&KeyFrame> {
        let i = self.key_frames.lower_bound(&frame.saturating_add(1));
        if i > 0 { self.key_frames.get(i - 1) } else { None }
    }

    /// Shape state at `frame`, clamped to the outermost key frames.
    pub fn interpolated_data_at(&self, frame: Frame) -> Result<KeyFrameData, TimelineError> {
        lerp_item_at(frame, self).resolve()
    }

    pub fn add_key_frame(&mut self, key_frame: KeyFrame) -> Result<usize, TimelineError> {
        self.check_key_frame(&key_frame)?;
        self.key_frames.insert(key_frame)
    }

    /// Adds a key frame at `frame` holding the current interpolated state.
    pub fn add_key_frame_at(&mut self, frame: Frame) -> Result<usize, TimelineError> {
        let data = self.interpolated_data_at(frame)?;
        self.add_key_frame(KeyFrame::new(frame, data))
    }

    pub fn remove_key_frame(&mut self, frame: Frame) -> Result<KeyFrame, TimelineError> {
        let index = self
            .key_frames
            .binary_search(&frame)
            .map_err(|_| TimelineError::NotFound(format!("key frame {frame}")))?;
        if self.key_frames.len() == 1 {
            return Err(TimelineError::LastKeyFrame);
        }
        self.key_frames.remove_at(index)
    }

    pub fn set_key_frame_data(&mut self, frame: Frame, data: KeyFrameData) -> Result<(), TimelineError> {
        self.check_kind(data.kind())?;
        let index = self.index_of_key_frame(frame)?;
        self.key_frames.update(index, |kf| kf.data = data)?;
        Ok(())
    }

    /// Overwrites the key frame at `frame` with its predecessor's shape.
    pub fn copy_previous_key_frame(&mut self, frame: Frame) -> Result<(), TimelineError> {
        let index = self.index_of_key_frame(frame)?;
        if index == 0 {
            return Err(TimelineError::InvalidOp(format!("no key frame before {frame}")));
        }
        let data = self.key_frames[index - 1].data.clone();
        self.key_frames.update(index, |kf| kf.data = data)?;
        Ok(())
    }

    /// Overwrites the key frame at `frame` with its successor's shape.
    pub fn copy_next_key_frame(&mut self, frame: Frame) -> Result<(), TimelineError> {
        let index = self.index_of_key_frame(frame)?;
        if index + 1 >= self.key_frames.len() {
            return Err(TimelineError::InvalidOp(format!("no key frame after {frame}")));
        }
        let data = self.key_frames[index + 1].data.clone();
        self.key_frames.update(index, |kf| kf.data = data)?;
        Ok(())
    }

    /// Relocates the whole segment, shifting every key frame with it.
    pub fn move_to(&mut self, track_number: u32, start_frame: Frame) -> Result<(), TimelineError> {
        if start_frame < 0 {
            return Err(TimelineError::InvalidRange { start: start_frame, end: start_frame + self.duration() - 1 });
        }
        let offset = start_frame - self.start_frame;
        self.track_number = track_number;
        self.start_frame = start_frame;
        self.end_frame += offset;

        // walk against the direction of travel so shifted frames never collide
        let len = self.key_frames.len();
        if offset > 0 {
            for i in (0..len).rev() {
                self.key_frames.update(i, |kf| kf.frame_number += offset)?;
            }
        } else if offset < 0 {
            for i in 0..len {
                self.key_frames.update(i, |kf| kf.frame_number += offset)?;
            }
        }
        Ok(())
    }

    pub fn move_start_frame(&mut self, new_start: Frame) -> Result<(), TimelineError> {
        if new_start < 0 || new_start > self.end_frame {
            return Err(TimelineError::InvalidRange { start: new_start, end: self.end_frame });
        }
        if new_start < self.start_frame {
            if self.key_frames.len() > 1 {
                let data = self.key_frames[0].data.clone();
                self.key_frames.insert(KeyFrame::new(new_start, data))?;
            } else {
                self.key_frames.update(0, |kf| kf.frame_number = new_start)?;
            }
            self.start_frame = new_start;
            return Ok(());
        }

        let remove_before = match self.key_frames.binary_search(&new_start) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) if i < self.key_frames.len() => {
                let boundary = self.key_frames[i - 1].lerp_at(new_start, &self.key_frames[i])?;
                self.key_frames.insert(boundary)?;
                i
            }
            Err(i) => {
                self.key_frames.update(i - 1, |kf| kf.frame_number = new_start)?;
                i - 1
            }
        };
        for i in (0..remove_before).rev() {
            self.key_frames.remove_at(i)?;
        }
        self.start_frame = new_start;
        Ok(())
    }

    pub fn move_end_frame(&mut self, new_end: Frame) -> Result<(), TimelineError> {
        if new_end < self.start_frame {
            return Err(TimelineError::InvalidRange { start: self.start_frame, end: new_end });
        }
        if new_end >= self.end_frame {
            self.end_frame = new_end;
            return Ok(());
        }

        let keep = match self.key_frames.binary_search(&new_end) {
            Ok(i) => i + 1,
            Err(0) => {
                self.key_frames.update(0, |kf| kf.frame_number = new_end)?;
                1
            }
            Err(i) if i < self.key_frames.len() => {
                let boundary = self.key_frames[i - 1].lerp_at(new_end, &self.key_frames[i])?;
                self.key_frames.insert(boundary)?;
                i + 1
            }
            Err(i) => i,
        };
        while self.key_frames.len() > keep {
            self.key_frames.remove_at(self.key_frames.len() - 1)?;
        }
        self.end_frame = new_end;
        Ok(())
    }

    /// Cuts the segment so `self` ends at `frame - 1`; returns the tail
    /// starting at `frame`. Both halves get a key frame at their new edge.
    pub fn split_at(&mut self, frame: Frame) -> Result<Segment, TimelineError> {
        if frame <= self.start_frame || frame > self.end_frame {
            return Err(TimelineError::InvalidOp(format!(
                "cannot split {}..={} at {frame}",
                self.start_frame, self.end_frame
            )));
        }
        let tail_boundary = self.interpolated_data_at(frame)?;
        let head_boundary = self.interpolated_data_at(self.start_frame)?;

        let first_tail = self.key_frames.lower_bound(&frame);
        let mut tail = Vec::with_capacity(self.key_frames.len() - first_tail + 1);
        while self.key_frames.len() > first_tail {
            tail.push(self.key_frames.remove_at(first_tail)?);
        }
        if tail.first().map(|kf| kf.frame_number) != Some(frame) {
            tail.insert(0, KeyFrame::new(frame, tail_boundary));
        }
        if self.key_frames.is_empty() {
            self.key_frames.insert(KeyFrame::new(self.start_frame, head_boundary))?;
        }

        let end = self.end_frame;
        self.end_frame = frame - 1;
        Segment::new(self.track_number, frame, end, self.name.clone(), self.kind, tail)
    }

    /// Absorbs `right`, which must directly follow `self` on the same track.
    pub fn merge(&mut self, right: Segment) -> Result<(), TimelineError> {
        if right.track_number != self.track_number || right.start_frame != self.end_frame + 1 {
            return Err(TimelineError::InvalidOp(format!(
                "segment '{}' is not adjacent to '{}'",
                right.name, self.name
            )));
        }
        self.check_kind(right.kind)?;
        self.end_frame = right.end_frame;
        for kf in right.key_frames.into_vec() {
            self.key_frames.insert(kf)?;
        }
        Ok(())
    }

    fn index_of_key_frame(&self, frame: Frame) -> Result<usize, TimelineError> {
        self.key_frames
            .binary_search(&frame)
            .map_err(|_| TimelineError::NotFound(format!("key frame {frame}")))
    }

    fn check_kind(&self, kind: ShapeKind) -> Result<(), TimelineError> {
        if kind != self.kind {
            return Err(TimelineError::ShapeMismatch { expected: self.kind, actual: kind });
        }
        Ok(())
    }

    fn check_key_frame(&self, kf: &KeyFrame) -> Result<(), TimelineError> {
        self.check_kind(kf.kind())?;
        if !self.is_frame_within(kf.frame_number) {
            return Err(TimelineError::KeyFrameOutOfSegment {
                frame: kf.frame_number,
                start: self.start_frame,
                end: self.end_frame,
            });
        }
        Ok(())
    }
}

impl Keyed for Segment {
    type Key = (u32, Frame);
    const UNIQUE: bool = false;
    fn key(&self) -> (u32, Frame) { (self.track_number, self.start_frame) }
}

/// Segments ordered by track, then start frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentCollection(OrderedCollection<Segment>);

impl SegmentCollection {
    pub fn new() -> Self { Self::default() }

    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, TimelineError> {
        Ok(Self(OrderedCollection::from_items(segments)?))
    }

    /// Segments whose range contains `frame`, in collection order.
    pub fn active_at(&self, frame: Frame) -> impl Iterator<Item = &Segment> + '_ {
        self.0.iter().filter(move |s| s.is_frame_within(frame))
    }

    pub fn in_track(&self, track_number: u32) -> impl Iterator<Item = &Segment> + '_ {
        self.0.iter().filter(move |s| s.track_number == track_number)
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> { self.0.position(|s| s.id == id) }

    pub fn find_by_id(&self, id: Uuid) -> Option<&Segment> { self.index_of(id).map(|i| &self.0[i]) }

    pub fn remove_by_id(&mut self, id: Uuid) -> Result<Segment, TimelineError> {
        let index = self.index_of(id).ok_or_else(|| TimelineError::NotFound(format!("segment {id}")))?;
        self.0.remove_at(index)
    }

    /// Whether `duration` frames from `start` fit on `track_number` without
    /// overlapping another segment.
    pub fn can_place(&self, track_number: u32, start: Frame, duration: Frame) -> bool {
        if start < 0 || duration < 1 {
            return false;
        }
        let end = start + duration - 1;
        !self.in_track(track_number).any(|s| s.overlaps(start, end))
    }

    pub fn add_segment(&mut self, segment: Segment) -> Result<usize, TimelineError> {
        if !self.can_place(segment.track_number, segment.start_frame, segment.duration()) {
            return Err(TimelineError::InvalidOp(format!(
                "segment '{}' overlaps track {} at {}..={}",
                segment.name, segment.track_number, segment.start_frame, segment.end_frame
            )));
        }
        self.0.insert(segment)
    }

    /// Edits one segment and re-sorts it. A failing edit is discarded whole.
    pub fn edit<F>(&mut self, id: Uuid, f: F) -> Result<usize, TimelineError>
    where
        F: FnOnce(&mut Segment) -> Result<(), TimelineError>,
    {
        let index = self.index_of(id).ok_or_else(|| TimelineError::NotFound(format!("segment {id}")))?;
        self.0.try_update(index, f)
    }

    /// Splits segment `id` at `frame` and inserts the tail; returns its id.
    pub fn split_segment(&mut self, id: Uuid, frame: Frame) -> Result<Uuid, TimelineError> {
        let mut tail = None;
        self.edit(id, |s| {
            tail = Some(s.split_at(frame)?);
            Ok(())
        })?;
        let tail = tail.ok_or_else(|| TimelineError::InvalidOp("split produced no segment".into()))?;
        let tail_id = tail.id;
        self.0.insert(tail)?;
        Ok(tail_id)
    }

    /// Merges segment `id` with the segment directly after it on its track.
    pub fn merge_with_next(&mut self, id: Uuid) -> Result<(), TimelineError> {
        let left = self.find_by_id(id).ok_or_else(|| TimelineError::NotFound(format!("segment {id}")))?;
        let right_id = self
            .in_track(left.track_number)
            .find(|s| s.start_frame == left.end_frame + 1)
            .map(|s| s.id)
            .ok_or_else(|| TimelineError::InvalidOp(format!("segment '{}' has no adjacent successor", left.name)))?;
        let right = self.remove_by_id(right_id)?;
        let restore = right.clone();
        if let Err(e) = self.edit(id, |s| s.merge(right)) {
            self.0.insert(restore)?;
            return Err(e);
        }
        Ok(())
    }

    /// Nearest key frame strictly before `frame` among the track's segments.
    pub fn previous_key_frame_in_track(&self, track_number: u32, frame: Frame) -> Option<Frame> {
        self.in_track(track_number)
            .filter_map(|s| {
                let i = s.key_frames.lower_bound(&frame);
                if i > 0 { Some(s.key_frames[i - 1].frame_number) } else { None }
            })
            .max()
    }

    /// Nearest key frame strictly after `frame` among the track's segments.
    pub fn next_key_frame_in_track(&self, track_number: u32, frame: Frame) -> Option<Frame> {
        self.in_track(track_number)
            .filter_map(|s| {
                let i = s.key_frames.lower_bound(&frame.saturating_add(1));
                s.key_frames.get(i).map(|kf| kf.frame_number)
            })
            .min()
    }
}

impl Deref for SegmentCollection {
    type Target = OrderedCollection<Segment>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

impl DerefMut for SegmentCollection {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}
