use serde::{Deserialize, Serialize};

use crate::ordered::Keyed;
use crate::primitives::{lerp, Point};
use crate::{Frame, TimelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Crop,
    Rectangle,
    Polygon,
    Ellipse,
}

/// Shape parameters sampled at one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KeyFrameData {
    #[serde(rename = "crop")]
    Crop { left: f64, top: f64, width: f64, height: f64, angle: f64 },

    #[serde(rename = "rectangle")]
    Rectangle { left: f64, top: f64, width: f64, height: f64 },

    #[serde(rename = "polygon")]
    Polygon { points: Vec<Point> },

    #[serde(rename = "ellipse")]
    Ellipse { center: Point, radius_x: f64, radius_y: f64 },
}

impl KeyFrameData {
    pub fn kind(&self) -> ShapeKind {
        match self {
            KeyFrameData::Crop { .. } => ShapeKind::Crop,
            KeyFrameData::Rectangle { .. } => ShapeKind::Rectangle,
            KeyFrameData::Polygon { .. } => ShapeKind::Polygon,
            KeyFrameData::Ellipse { .. } => ShapeKind::Ellipse,
        }
    }

    /// Blends towards `other` by `amount` in `[0, 1]`. Both sides must be the
    /// same shape; polygons must also agree on point count.
    pub fn lerp(&self, other: &KeyFrameData, amount: f64) -> Result<KeyFrameData, TimelineError> {
        use KeyFrameData::*;

        if self.kind() != other.kind() {
            return Err(TimelineError::ShapeMismatch { expected: self.kind(), actual: other.kind() });
        }
        if amount == 0.0 {
            return Ok(self.clone());
        }

        let data = match (self, other) {
            (
                Crop { left, top, width, height, angle },
                Crop { left: l2, top: t2, width: w2, height: h2, angle: a2 },
            ) => Crop {
                left: lerp(*left, *l2, amount),
                top: lerp(*top, *t2, amount),
                width: lerp(*width, *w2, amount),
                height: lerp(*height, *h2, amount),
                angle: lerp(*angle, *a2, amount),
            },
            (Rectangle { left, top, width, height }, Rectangle { left: l2, top: t2, width: w2, height: h2 }) => Rectangle {
                left: lerp(*left, *l2, amount),
                top: lerp(*top, *t2, amount),
                width: lerp(*width, *w2, amount),
                height: lerp(*height, *h2, amount),
            },
            (Polygon { points }, Polygon { points: p2 }) => {
                if points.len() != p2.len() {
                    return Err(TimelineError::PointCountMismatch(points.len(), p2.len()));
                }
                Polygon { points: points.iter().zip(p2).map(|(a, b)| a.lerp(*b, amount)).collect() }
            }
            (Ellipse { center, radius_x, radius_y }, Ellipse { center: c2, radius_x: rx2, radius_y: ry2 }) => Ellipse {
                center: center.lerp(*c2, amount),
                radius_x: lerp(*radius_x, *rx2, amount),
                radius_y: lerp(*radius_y, *ry2, amount),
            },
            _ => return Err(TimelineError::ShapeMismatch { expected: self.kind(), actual: other.kind() }),
        };
        Ok(data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFrame {
    pub frame_number: Frame,
    #[serde(flatten)]
    pub data: KeyFrameData,
}

impl KeyFrame {
    pub fn new(frame_number: Frame, data: KeyFrameData) -> Self { Self { frame_number, data } }

    pub fn kind(&self) -> ShapeKind { self.data.kind() }

    /// Key frame at `frame_number` holding the state between `self` and `next`.
    pub fn lerp_at(&self, frame_number: Frame, next: &KeyFrame) -> Result<KeyFrame, TimelineError> {
        let range = next.frame_number - self.frame_number;
        let amount = if range > 0 { (frame_number - self.frame_number) as f64 / range as f64 } else { 0.0 };
        Ok(KeyFrame::new(frame_number, self.data.lerp(&next.data, amount.clamp(0.0, 1.0))?))
    }
}

impl Keyed for KeyFrame {
    type Key = Frame;
    const UNIQUE: bool = true;
    fn key(&self) -> Frame { self.frame_number }
}
