use nalgebra::{Matrix3, Point3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rectified output images must be a multiple of this size in both dimensions.
pub const RESOLUTION_MULTIPLE: u32 = 16;

/// Pinhole intrinsics of the rectified camera at one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Result<Self> {
        let intrinsics = Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Principal point in the image centre, square pixels.
    pub fn from_focal(focal: f64, width: u32, height: u32) -> Result<Self> {
        Self::new(
            focal,
            focal,
            width as f64 / 2.0,
            height as f64 / 2.0,
            width,
            height,
        )
    }

    /// Checks the rectification constraint on the output resolution.
    pub fn validate(&self) -> Result<()> {
        if !(self.fx > 0.0 && self.fy > 0.0) || !self.fx.is_finite() || !self.fy.is_finite() {
            return Err(Error::Config(format!(
                "focal lengths must be positive, got fx={} fy={}",
                self.fx, self.fy
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config("output resolution must be non-zero".into()));
        }
        if self.width % RESOLUTION_MULTIPLE != 0 || self.height % RESOLUTION_MULTIPLE != 0 {
            return Err(Error::Config(format!(
                "output resolution {}x{} must be a multiple of {RESOLUTION_MULTIPLE}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Camera matrix K.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Intrinsics of pyramid level `level`: dimensions and parameters halved per level.
    pub fn scaled(&self, level: usize) -> Self {
        let scale = 0.5f64.powi(level as i32);
        Self {
            fx: self.fx * scale,
            fy: self.fy * scale,
            cx: self.cx * scale,
            cy: self.cy * scale,
            width: self.width >> level,
            height: self.height >> level,
        }
    }

    /// Per-level intrinsics for a pyramid of `levels` levels.
    ///
    /// Fails when the resolution cannot be halved `levels - 1` times without
    /// a remainder.
    pub fn pyramid(&self, levels: usize) -> Result<Vec<Self>> {
        check_halvings(self.width, self.height, levels)?;
        Ok((0..levels).map(|level| self.scaled(level)).collect())
    }

    /// 3D point in camera coordinates for pixel (u, v) at the given inverse depth.
    #[inline]
    pub fn back_project(&self, u: f64, v: f64, inverse_depth: f64) -> Point3<f64> {
        let depth = 1.0 / inverse_depth;
        Point3::new(
            (u - self.cx) / self.fx * depth,
            (v - self.cy) / self.fy * depth,
            depth,
        )
    }

    /// Pixel coordinates of a camera-frame point. The caller checks depth.
    #[inline]
    pub fn project(&self, point: &Point3<f64>) -> (f64, f64) {
        (
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        )
    }

    #[inline]
    pub fn contains(&self, u: f64, v: f64) -> bool {
        u >= 0.0 && v >= 0.0 && u <= (self.width - 1) as f64 && v <= (self.height - 1) as f64
    }
}

/// `width` and `height` must stay integral through `levels - 1` halvings.
pub fn check_halvings(width: u32, height: u32, levels: usize) -> Result<()> {
    if levels == 0 {
        return Err(Error::Config("pyramid needs at least one level".into()));
    }
    if levels > 16 {
        return Err(Error::Config(format!("{levels} pyramid levels is too many")));
    }
    let divisor = 1u32 << (levels - 1);
    if width % divisor != 0 || height % divisor != 0 || width < divisor || height < divisor {
        return Err(Error::Config(format!(
            "resolution {width}x{height} cannot be halved {} times",
            levels - 1
        )));
    }
    Ok(())
}
