//! Reprojection of a reference pixel with known inverse depth into a target view.
use nalgebra::{Isometry3, Point3};

use crate::camera::CameraIntrinsics;

/// A reference point seen from the target frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpedPoint {
    pub u: f64,
    pub v: f64,
    /// The point in target camera coordinates.
    pub point: Point3<f64>,
}

/// Back-projects pixel (x, y) at `inverse_depth` with the reference
/// intrinsics, moves it with `transform` (reference → target) and projects
/// it with the target intrinsics.
///
/// `None` when the point has no valid depth, lands behind the target camera
/// or outside the target image.
#[inline]
pub fn warp(
    x: f64,
    y: f64,
    inverse_depth: f64,
    transform: &Isometry3<f64>,
    reference: &CameraIntrinsics,
    target: &CameraIntrinsics,
) -> Option<WarpedPoint> {
    if !(inverse_depth > 0.0) || !inverse_depth.is_finite() {
        return None;
    }
    let point = transform * reference.back_project(x, y, inverse_depth);
    if !(point.z > 0.0) {
        return None;
    }
    let (u, v) = target.project(&point);
    target.contains(u, v).then_some(WarpedPoint { u, v, point })
}
