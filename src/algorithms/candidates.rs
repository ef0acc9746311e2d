//! Sparse selection of high-gradient pixels per pyramid level.
//!
//! Each level is tiled into square buckets (edge `bucket_size >> level`,
//! at least 2 px). A bucket contributes its strongest pixel if that pixel's
//! gradient magnitude reaches the threshold, which spreads points over the
//! image. When a level still has more than `max_per_level` points the
//! weakest are dropped.
use nalgebra::Isometry3;
use rayon::prelude::*;

use crate::{
    algorithms::warp::warp,
    camera::CameraIntrinsics,
    config::CandidateConfig,
    error::{Error, Result},
    frame::{Candidate, CandidateLevels, Frame, GradientLevel},
};

/// Largest distance (px) between a candidate and a projected reference point
/// for the candidate to take over that point's depth.
const INHERIT_RADIUS: f64 = 1.5;

/// Source of the initial inverse depth of new candidates.
#[derive(Debug, Clone, Copy)]
pub enum DepthPrior<'a> {
    /// Same inverse depth for every point.
    Constant(f64),
    /// Project the reference candidates with `transform` (reference → frame)
    /// and take the nearest one's depth; `fallback` where none is close.
    Inherited {
        reference: &'a Frame,
        transform: &'a Isometry3<f64>,
        intrinsics: &'a [CameraIntrinsics],
        fallback: f64,
    },
}

#[derive(Debug, Clone)]
pub struct CandidateSelector {
    config: CandidateConfig,
}

impl CandidateSelector {
    pub fn new(config: &CandidateConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Constant prior from the configuration.
    pub fn default_prior(&self) -> DepthPrior<'static> {
        DepthPrior::Constant(self.config.prior_inverse_depth)
    }

    /// Candidates of every level of `frame`, selected on first use.
    ///
    /// The frame's gradients must have been extracted. The stored selection
    /// is validated on every call: a level with fewer than `min_per_level`
    /// points is `TrackingDegenerate`.
    pub fn select<'f>(&self, frame: &'f Frame, prior: DepthPrior<'_>) -> Result<&'f CandidateLevels> {
        let gradients = frame.gradients().ok_or_else(|| {
            Error::ContractViolation(format!(
                "candidates requested for frame {} before its gradients",
                frame.id()
            ))
        })?;

        let levels = frame.candidates.get_or_init(|| {
            let mut levels: CandidateLevels = gradients
                .par_iter()
                .enumerate()
                .map(|(level, grad)| self.select_level(frame, level, grad))
                .collect();
            assign_depths(&mut levels, prior);
            log::debug!(
                "frame {}: candidates per level {:?}",
                frame.id(),
                levels.iter().map(Vec::len).collect::<Vec<_>>()
            );
            levels
        });

        self.check_viable(levels)?;
        Ok(levels)
    }

    fn check_viable(&self, levels: &CandidateLevels) -> Result<()> {
        match levels
            .iter()
            .enumerate()
            .find(|(_, points)| points.len() < self.config.min_per_level)
        {
            Some((level, points)) => Err(Error::TrackingDegenerate {
                level,
                found: points.len(),
                required: self.config.min_per_level,
            }),
            None => Ok(()),
        }
    }

    fn select_level(&self, frame: &Frame, level: usize, grad: &GradientLevel) -> Vec<Candidate> {
        let image = frame.image(level);
        let (w, h) = image.dimensions();
        let border = self.config.border;
        if w <= 2 * border || h <= 2 * border {
            return Vec::new();
        }
        let bucket = (self.config.bucket_size >> level).max(2);
        let threshold = self.config.gradient_threshold;

        let mut selected = Vec::new();
        for by in (border..h - border).step_by(bucket as usize) {
            for bx in (border..w - border).step_by(bucket as usize) {
                let mut best: Option<(u32, u32, f32)> = None;
                for y in by..(by + bucket).min(h - border) {
                    for x in bx..(bx + bucket).min(w - border) {
                        let magnitude = grad.magnitude.get_pixel(x, y)[0];
                        if magnitude >= threshold && best.map_or(true, |(_, _, m)| magnitude > m) {
                            best = Some((x, y, magnitude));
                        }
                    }
                }
                if let Some((x, y, magnitude)) = best {
                    selected.push(Candidate {
                        x,
                        y,
                        intensity: image.get_pixel(x, y)[0] as f32,
                        magnitude,
                        inverse_depth: self.config.prior_inverse_depth,
                    });
                }
            }
        }

        if selected.len() > self.config.max_per_level {
            selected.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
            selected.truncate(self.config.max_per_level);
            selected.sort_by_key(|c| (c.y, c.x));
        }
        selected
    }
}

fn assign_depths(levels: &mut CandidateLevels, prior: DepthPrior<'_>) {
    match prior {
        DepthPrior::Constant(inverse_depth) => {
            for candidate in levels.iter_mut().flatten() {
                candidate.inverse_depth = inverse_depth;
            }
        }
        DepthPrior::Inherited {
            reference,
            transform,
            intrinsics,
            fallback,
        } => {
            let Some(reference_levels) = reference.candidates() else {
                log::warn!(
                    "reference frame {} has no candidates to inherit depth from",
                    reference.id()
                );
                return assign_depths(levels, DepthPrior::Constant(fallback));
            };
            for (level, points) in levels.iter_mut().enumerate() {
                let (Some(source), Some(k)) = (reference_levels.get(level), intrinsics.get(level)) else {
                    points.iter_mut().for_each(|c| c.inverse_depth = fallback);
                    continue;
                };
                let depths = DepthGrid::project(source, transform, k);
                for candidate in points.iter_mut() {
                    candidate.inverse_depth = depths
                        .nearest(candidate.x, candidate.y)
                        .unwrap_or(fallback);
                }
            }
        }
    }
}

/// Projected reference points, bucketed by their rounded target pixel.
struct DepthGrid {
    width: u32,
    height: u32,
    /// (u, v, inverse depth in the target frame)
    cells: Vec<Option<(f64, f64, f64)>>,
}

impl DepthGrid {
    fn project(source: &[Candidate], transform: &Isometry3<f64>, k: &CameraIntrinsics) -> Self {
        let (width, height) = (k.width, k.height);
        let mut cells = vec![None; (width * height) as usize];
        for c in source {
            let Some(warped) = warp(c.x as f64, c.y as f64, c.inverse_depth, transform, k, k) else {
                continue;
            };
            let inverse_depth = 1.0 / warped.point.z;
            let index = (warped.v.round() as u32 * width + warped.u.round() as u32) as usize;
            // the nearer surface occludes the farther one
            let occluded = matches!(cells[index], Some((_, _, nearer)) if nearer >= inverse_depth);
            if !occluded {
                cells[index] = Some((warped.u, warped.v, inverse_depth));
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    fn nearest(&self, x: u32, y: u32) -> Option<f64> {
        let (x0, x1) = (x.saturating_sub(2), (x + 2).min(self.width - 1));
        let (y0, y1) = (y.saturating_sub(2), (y + 2).min(self.height - 1));
        let mut best: Option<(f64, f64)> = None;
        for cy in y0..=y1 {
            for cx in x0..=x1 {
                if let Some((u, v, inverse_depth)) = self.cells[(cy * self.width + cx) as usize] {
                    let d2 = (u - x as f64).powi(2) + (v - y as f64).powi(2);
                    if d2 <= INHERIT_RADIUS * INHERIT_RADIUS && best.map_or(true, |(b, _)| d2 < b) {
                        best = Some((d2, inverse_depth));
                    }
                }
            }
        }
        best.map(|(_, inverse_depth)| inverse_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::{gradient::GradientExtractor, pyramid::PyramidBuilder},
        config::PyramidConfig,
    };
    use image::{GrayImage, Luma};

    fn textured(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let (x, y) = (x as f64, y as f64);
            let v = 128.0
                + 60.0 * (x / 5.0).sin() * (y / 7.0).cos()
                + 30.0 * ((x + y) / 11.0).sin();
            Luma([v.round() as u8])
        })
    }

    fn frame_from(image: GrayImage, levels: usize) -> Frame {
        let builder = PyramidBuilder::new(&PyramidConfig { levels });
        let frame = Frame::new(0, 0.0, image, &builder).unwrap();
        GradientExtractor::new().extract(&frame);
        frame
    }

    #[test]
    fn respects_threshold_and_maximum() {
        let config = CandidateConfig {
            max_per_level: 150,
            min_per_level: 1,
            ..Default::default()
        };
        let frame = frame_from(textured(160, 128), 3);
        let levels = CandidateSelector::new(&config)
            .select(&frame, DepthPrior::Constant(0.5))
            .unwrap();
        let gradients = frame.gradients().unwrap();
        assert_eq!(levels.len(), 3);
        for (level, points) in levels.iter().enumerate() {
            assert!(!points.is_empty());
            assert!(points.len() <= config.max_per_level);
            for c in points {
                let magnitude = gradients[level].magnitude.get_pixel(c.x, c.y)[0];
                assert!(magnitude >= config.gradient_threshold);
                assert_eq!(c.inverse_depth, 0.5);
            }
        }
        // 8 px buckets over the 156 x 124 interior give more than 150 points
        assert_eq!(levels[0].len(), 150);
    }

    #[test]
    fn one_point_per_bucket() {
        let config = CandidateConfig {
            min_per_level: 1,
            ..Default::default()
        };
        let frame = frame_from(textured(64, 64), 1);
        let points = &CandidateSelector::new(&config)
            .select(&frame, DepthPrior::Constant(1.0))
            .unwrap()[0];
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                let same_bucket = (a.x - 2) / 8 == (b.x - 2) / 8 && (a.y - 2) / 8 == (b.y - 2) / 8;
                assert!(!same_bucket);
            }
        }
    }

    #[test]
    fn flat_image_is_degenerate() {
        let frame = frame_from(GrayImage::from_pixel(64, 64, Luma([100])), 3);
        let err = CandidateSelector::new(&CandidateConfig::default())
            .select(&frame, DepthPrior::Constant(1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TrackingDegenerate {
                level: 0,
                found: 0,
                ..
            }
        ));
        // the empty selection is still memoized
        assert!(frame.has_candidates());
    }

    #[test]
    fn gradients_are_a_precondition() {
        let builder = PyramidBuilder::new(&PyramidConfig { levels: 2 });
        let frame = Frame::new(0, 0.0, textured(32, 32), &builder).unwrap();
        let err = CandidateSelector::new(&CandidateConfig::default())
            .select(&frame, DepthPrior::Constant(1.0))
            .unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn selection_happens_once() {
        let config = CandidateConfig {
            min_per_level: 1,
            ..Default::default()
        };
        let selector = CandidateSelector::new(&config);
        let frame = frame_from(textured(64, 64), 2);
        let first = selector.select(&frame, DepthPrior::Constant(1.0)).unwrap();
        // a different prior does not trigger reselection
        let second = selector.select(&frame, DepthPrior::Constant(3.0)).unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(second[0][0].inverse_depth, 1.0);
    }

    #[test]
    fn identity_motion_inherits_reference_depths() {
        let config = CandidateConfig {
            min_per_level: 1,
            ..Default::default()
        };
        let selector = CandidateSelector::new(&config);
        let k = CameraIntrinsics::from_focal(100.0, 64, 64).unwrap();
        let intrinsics = k.pyramid(2).unwrap();

        let reference = frame_from(textured(64, 64), 2);
        selector.select(&reference, DepthPrior::Constant(0.25)).unwrap();

        let target = frame_from(textured(64, 64), 2);
        let identity = Isometry3::identity();
        let levels = selector
            .select(
                &target,
                DepthPrior::Inherited {
                    reference: &reference,
                    transform: &identity,
                    intrinsics: &intrinsics,
                    fallback: 1.0,
                },
            )
            .unwrap();
        // same image, same selection: every point finds itself
        for c in levels.iter().flatten() {
            assert!((c.inverse_depth - 0.25).abs() < 1e-9);
        }
    }
}
