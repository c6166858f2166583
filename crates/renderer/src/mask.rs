//! CPU coverage tests and compositing for resolved shapes.

use timeline::{FrameSize, KeyFrameData, Point};

use crate::source::LumaFrame;

/// Whether the point lies inside the shape. Crops are rectangles rotated
/// by `angle` degrees about their centre.
pub fn contains(shape: &KeyFrameData, p: Point) -> bool {
    match shape {
        KeyFrameData::Rectangle { left, top, width, height } => in_rect(p, *left, *top, *width, *height),
        KeyFrameData::Crop { left, top, width, height, angle } => {
            let center = Point::new(left + width / 2.0, top + height / 2.0);
            in_rect(rotate(p, center, -angle.to_radians()), *left, *top, *width, *height)
        }
        KeyFrameData::Ellipse { center, radius_x, radius_y } => {
            if *radius_x <= 0.0 || *radius_y <= 0.0 {
                return false;
            }
            let dx = (p.x - center.x) / radius_x;
            let dy = (p.y - center.y) / radius_y;
            dx * dx + dy * dy <= 1.0
        }
        KeyFrameData::Polygon { points } => in_polygon(p, points),
    }
}

fn in_rect(p: Point, left: f64, top: f64, width: f64, height: f64) -> bool {
    p.x >= left && p.x < left + width && p.y >= top && p.y < top + height
}

fn rotate(p: Point, center: Point, radians: f64) -> Point {
    let (sin, cos) = radians.sin_cos();
    let (dx, dy) = (p.x - center.x, p.y - center.y);
    Point::new(center.x + dx * cos - dy * sin, center.y + dx * sin + dy * cos)
}

// even-odd rule
fn in_polygon(p: Point, points: &[Point]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Blanks every pixel whose centre is covered by a mask shape.
pub fn apply_masks(frame: &mut LumaFrame, masks: &[KeyFrameData]) {
    if masks.is_empty() {
        return;
    }
    for_each_pixel(frame, |p, px| {
        if masks.iter().any(|m| contains(m, p)) {
            *px = 0;
        }
    });
}

/// Blanks every pixel outside all crop regions.
pub fn apply_crops(frame: &mut LumaFrame, crops: &[KeyFrameData]) {
    if crops.is_empty() {
        return;
    }
    for_each_pixel(frame, |p, px| {
        if !crops.iter().any(|c| contains(c, p)) {
            *px = 0;
        }
    });
}

/// Centres `frame` on a black canvas of `size`, clipping if it is larger.
pub fn letterbox(frame: &LumaFrame, size: FrameSize) -> LumaFrame {
    if frame.size() == size {
        return frame.clone();
    }
    let mut out = LumaFrame::blank(frame.frame_number, size);
    let off_x = (size.width as i64 - frame.width as i64) / 2;
    let off_y = (size.height as i64 - frame.height as i64) / 2;
    for y in 0..frame.height as i64 {
        let ty = y + off_y;
        if ty < 0 || ty >= size.height as i64 {
            continue;
        }
        for x in 0..frame.width as i64 {
            let tx = x + off_x;
            if tx < 0 || tx >= size.width as i64 {
                continue;
            }
            out.pixels[(ty * size.width as i64 + tx) as usize] = frame.pixels[(y * frame.width as i64 + x) as usize];
        }
    }
    out
}

fn for_each_pixel(frame: &mut LumaFrame, mut f: impl FnMut(Point, &mut u8)) {
    let width = frame.width as usize;
    if width == 0 {
        return;
    }
    for (i, px) in frame.pixels.iter_mut().enumerate() {
        let p = Point::new((i % width) as f64 + 0.5, (i / width) as f64 + 0.5);
        f(p, px);
    }
}
