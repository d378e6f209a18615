//! Eye-region geometry derived from tracked facial landmarks.
//!
//! The tracker reports an ordered set of 2D points in display coordinates.
//! Four of them bound one eye: the two horizontal corners and the upper and
//! lower lid extremes. From those we derive an axis-aligned box, the crop
//! side length and the roll angle of the eye axis.

use serde::{Deserialize, Serialize};

/// A 2D point in display coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point2 {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Ordered landmark positions produced by the tracker for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet(Vec<Point2>);

impl LandmarkSet {
    pub fn new(points: Vec<Point2>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Point2> {
        self.0.get(index).copied()
    }

    pub fn points(&self) -> &[Point2] {
        &self.0
    }

    /// Pick the four eye landmarks named by `indices`.
    ///
    /// Returns `None` when the set is too short for the configured layout,
    /// which callers treat the same as lost tracking.
    pub fn eye_corners(&self, indices: &EyeLandmarkIndices) -> Option<EyeCorners> {
        Some(EyeCorners {
            left: self.get(indices.left_corner)?,
            top: self.get(indices.top_lid)?,
            right: self.get(indices.right_corner)?,
            bottom: self.get(indices.bottom_lid)?,
        })
    }
}

impl From<Vec<(f32, f32)>> for LandmarkSet {
    fn from(points: Vec<(f32, f32)>) -> Self {
        Self(points.into_iter().map(Point2::from).collect())
    }
}

/// Landmark indices bounding the tracked eye.
///
/// Defaults follow the 71-point face model convention for the subject's
/// right eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EyeLandmarkIndices {
    pub left_corner: usize,
    pub top_lid: usize,
    pub right_corner: usize,
    pub bottom_lid: usize,
}

impl Default for EyeLandmarkIndices {
    fn default() -> Self {
        Self {
            left_corner: 23,
            top_lid: 24,
            right_corner: 25,
            bottom_lid: 26,
        }
    }
}

/// The four points bounding one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeCorners {
    pub left: Point2,
    pub top: Point2,
    pub right: Point2,
    pub bottom: Point2,
}

/// Eye bounding box, crop side and roll angle, in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EyeRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Roll of the corner-to-corner axis in radians.
    pub angle: f32,
    /// Square crop side: `max(width, height) + padding`.
    pub side: f32,
    pub center: Point2,
}

impl EyeRegion {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Compute the eye region from its bounding landmarks.
///
/// Width and height are clamped at zero so coincident or crossed corners
/// yield an empty box instead of a negative one. The angle is measured from
/// the left corner to the right corner; `atan2(0, 0)` is zero, so no input
/// divides by zero.
pub fn compute_eye_region(corners: &EyeCorners, padding: f32) -> EyeRegion {
    let dx = corners.right.x - corners.left.x;
    let dy = corners.right.y - corners.left.y;

    let width = dx.max(0.0);
    let height = (corners.bottom.y - corners.top.y).max(0.0);

    EyeRegion {
        x: corners.left.x,
        y: corners.top.y,
        width,
        height,
        angle: dy.atan2(dx),
        side: width.max(height) + padding,
        center: Point2 {
            x: (corners.left.x + corners.right.x) / 2.0,
            y: (corners.top.y + corners.bottom.y) / 2.0,
        },
    }
}
