//! Direct photometric alignment of two frames, coarse to fine.
//!
//! The reference frame contributes its candidates (pixel, intensity, inverse
//! depth), the target frame its intensity and gradient pyramids. At every
//! level the pose is refined with damped Gauss-Newton on Huber-weighted
//! residuals `I_target(warp(p)) - I_reference(p)`. Updates are applied on the
//! left through the SE(3) exponential, so the hypothesis stays a rigid motion.
//!
//! A step that does not lower the cost is reverted and the damping raised.
//! A level ends when the relative cost reduction drops below epsilon, when the
//! damping exceeds its ceiling, or when the iteration budget is spent.
//!
//! The cost of a pose is averaged over all candidates of the level. A point
//! that warps out of view costs a fixed `delta^2 / 2`, the Huber cost of a
//! residual at the inlier bound, so a step cannot win by pushing outliers
//! out of the image and a step that loses inliers pays for it.
//!
//! If the coarse levels hand the finest level a pose that ends up costing
//! more than the initial hypothesis, the finest level is refined again from
//! the initial hypothesis. Only when that restart is impossible is the
//! alignment reported as diverged.
use nalgebra::{Isometry3, Matrix6, Vector3, Vector6};

use crate::{
    algorithms::{interpolation::bilinear, robust::Huber, se3, warp::warp},
    camera::CameraIntrinsics,
    config::AlignmentConfig,
    error::{Error, Result},
    frame::{Candidate, CandidateLevels, Frame, GradientLevel},
};

/// Mean cost under which the residuals are considered explained exactly.
const COST_FLOOR: f64 = 1e-12;

/// Damping used after a rejection when the configured start value is zero.
const MIN_DAMPING: f64 = 1e-6;

/// How refinement at one level ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOutcome {
    Converged,
    /// No step could lower the cost any further.
    DampingExhausted,
    /// The iteration budget ran out while the cost was still dropping.
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub level: usize,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub valid_residuals: usize,
    pub outcome: LevelOutcome,
}

/// Result of one alignment: the motion mapping reference coordinates into
/// the target frame and how well it explains the target.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub transform: Isometry3<f64>,
    /// Huber cost per finest level candidate, out-of-view points included.
    pub cost: f64,
    /// False for fallback estimates that did not come out of an alignment.
    pub valid: bool,
    /// False when some level ran out of iterations.
    pub converged: bool,
    pub iterations: usize,
    /// The finest level was refined again from the initial hypothesis.
    pub restarted: bool,
    /// Finest level candidates with a valid warp.
    pub valid_residuals: usize,
    /// Share of finest level candidates with a valid warp.
    pub tracked_ratio: f64,
    pub levels: Vec<LevelSummary>,
}

impl PoseEstimate {
    /// Placeholder carrying an assumed motion after a failed alignment.
    pub fn fallback(transform: Isometry3<f64>) -> Self {
        Self {
            transform,
            cost: f64::INFINITY,
            valid: false,
            converged: false,
            iterations: 0,
            restarted: false,
            valid_residuals: 0,
            tracked_ratio: 0.0,
            levels: Vec::new(),
        }
    }

    /// Estimate for the first frame, which is its own reference.
    pub fn origin() -> Self {
        Self {
            transform: Isometry3::identity(),
            cost: 0.0,
            valid: true,
            converged: true,
            iterations: 0,
            restarted: false,
            valid_residuals: 0,
            tracked_ratio: 1.0,
            levels: Vec::new(),
        }
    }
}

/// Normal equations of the weighted residuals at one pose.
struct Linearization {
    cost: f64,
    valid: usize,
    hessian: Matrix6<f64>,
    gradient: Vector6<f64>,
}

/// Per-level view of the data one alignment works on.
struct LevelData<'a> {
    level: usize,
    intrinsics: &'a CameraIntrinsics,
    points: &'a [Candidate],
    image: &'a image::GrayImage,
    gradients: &'a GradientLevel,
}

impl<'a> LevelData<'a> {
    fn new(
        level: usize,
        intrinsics: &'a [CameraIntrinsics],
        candidates: &'a CandidateLevels,
        target: &'a Frame,
        gradients: &'a [GradientLevel],
    ) -> Self {
        Self {
            level,
            intrinsics: &intrinsics[level],
            points: &candidates[level],
            image: target.image(level),
            gradients: &gradients[level],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectAligner {
    config: AlignmentConfig,
    intrinsics: Vec<CameraIntrinsics>,
    huber: Huber,
}

impl DirectAligner {
    pub fn new(config: &AlignmentConfig, intrinsics: &CameraIntrinsics, levels: usize) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            intrinsics: intrinsics.pyramid(levels)?,
            huber: Huber::new(config.huber_delta),
        })
    }

    pub fn intrinsics(&self) -> &[CameraIntrinsics] {
        &self.intrinsics
    }

    /// Estimates the motion taking `reference` coordinates into `target`,
    /// starting from `initial`.
    ///
    /// The reference must have candidates and the target gradients.
    pub fn align(&self, reference: &Frame, target: &Frame, initial: &Isometry3<f64>) -> Result<PoseEstimate> {
        let levels = self.intrinsics.len();
        let candidates = reference.candidates().ok_or_else(|| {
            Error::ContractViolation(format!("reference frame {} has no candidates", reference.id()))
        })?;
        let gradients = target.gradients().ok_or_else(|| {
            Error::ContractViolation(format!("target frame {} has no gradients", target.id()))
        })?;
        if reference.levels() != levels || target.levels() != levels || candidates.len() != levels {
            return Err(Error::ContractViolation(format!(
                "frames {} and {} do not have {levels} pyramid levels",
                reference.id(),
                target.id()
            )));
        }

        let intrinsics = self.intrinsics.as_slice();
        let data = |level: usize| LevelData::new(level, intrinsics, candidates, target, gradients);

        let initial_cost = self.linearize(&data(0), initial).cost;

        let mut pose = *initial;
        let mut summaries = Vec::with_capacity(levels);
        for level in (0..levels).rev() {
            let (refined, summary) = self.refine_level(&data(level), pose)?;
            log::debug!(
                "align {} -> {} level {}: cost {:.4} -> {:.4} in {} iterations ({:?}, {} residuals)",
                reference.id(),
                target.id(),
                level,
                summary.initial_cost,
                summary.final_cost,
                summary.iterations,
                summary.outcome,
                summary.valid_residuals
            );
            pose = refined;
            summaries.push(summary);
        }

        let mut finest = summaries.last().cloned().ok_or_else(|| {
            Error::ContractViolation("alignment needs at least one level".into())
        })?;
        let mut restarted = false;
        if initial_cost.is_finite() && finest.final_cost > initial_cost + COST_FLOOR {
            // refinement from the initial hypothesis can only lower its cost
            match self.refine_level(&data(0), *initial) {
                Ok((refined, summary)) => {
                    log::debug!(
                        "align {} -> {}: coarse result cost {:.4}, restart from {:.4} reached {:.4}",
                        reference.id(),
                        target.id(),
                        finest.final_cost,
                        initial_cost,
                        summary.final_cost
                    );
                    pose = refined;
                    restarted = true;
                    finest = summary.clone();
                    summaries.push(summary);
                }
                Err(err) => {
                    log::debug!("align {} -> {}: restart impossible: {err}", reference.id(), target.id());
                    return Err(Error::TrackingDiverged {
                        initial_cost,
                        final_cost: finest.final_cost,
                    });
                }
            }
        }

        let total = candidates[0].len();
        Ok(PoseEstimate {
            transform: pose,
            cost: finest.final_cost,
            valid: true,
            converged: summaries.iter().all(|s| s.outcome != LevelOutcome::MaxIterations),
            iterations: summaries.iter().map(|s| s.iterations).sum(),
            restarted,
            valid_residuals: finest.valid_residuals,
            tracked_ratio: if total == 0 {
                0.0
            } else {
                finest.valid_residuals as f64 / total as f64
            },
            levels: summaries,
        })
    }

    fn refine_level(&self, data: &LevelData, initial: Isometry3<f64>) -> Result<(Isometry3<f64>, LevelSummary)> {
        let required = self.config.min_valid_residuals;
        let mut pose = initial;
        let mut current = self.linearize(data, &pose);
        if current.valid < required {
            return Err(Error::TrackingDegenerate {
                level: data.level,
                found: current.valid,
                required,
            });
        }

        let initial_cost = current.cost;
        let mut damping = self.config.initial_damping;
        let mut outcome = LevelOutcome::MaxIterations;
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            if current.cost <= COST_FLOOR {
                outcome = LevelOutcome::Converged;
                break;
            }

            let mut damped = current.hessian;
            for i in 0..6 {
                damped[(i, i)] *= 1.0 + damping;
            }
            let step = damped.cholesky().map(|c| c.solve(&(-current.gradient)));

            let accepted = match step {
                Some(delta) => {
                    let candidate = se3::exp(&delta) * pose;
                    let next = self.linearize(data, &candidate);
                    if next.valid >= required && next.cost < current.cost {
                        let reduction = (current.cost - next.cost) / current.cost;
                        pose = candidate;
                        current = next;
                        if reduction < self.config.epsilon {
                            outcome = LevelOutcome::Converged;
                            break;
                        }
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if accepted {
                damping *= 0.1;
            } else {
                damping = (damping * 10.0).max(MIN_DAMPING);
                if damping > self.config.max_damping {
                    outcome = LevelOutcome::DampingExhausted;
                    break;
                }
            }
        }

        Ok((
            pose,
            LevelSummary {
                level: data.level,
                iterations,
                initial_cost,
                final_cost: current.cost,
                valid_residuals: current.valid,
                outcome,
            },
        ))
    }

    /// Residuals, robust weights and Jacobians of every valid point at `pose`.
    fn linearize(&self, data: &LevelData, pose: &Isometry3<f64>) -> Linearization {
        let k = data.intrinsics;
        let mut lin = Linearization {
            cost: 0.0,
            valid: 0,
            hessian: Matrix6::zeros(),
            gradient: Vector6::zeros(),
        };

        for c in data.points {
            let Some(warped) = warp(c.x as f64, c.y as f64, c.inverse_depth, pose, k, k) else {
                continue;
            };
            let (u, v) = (warped.u, warped.v);
            let (Some(intensity), Some(gx), Some(gy)) = (
                bilinear(data.image, u, v),
                bilinear(&data.gradients.gx, u, v),
                bilinear(&data.gradients.gy, u, v),
            ) else {
                continue;
            };

            let residual = intensity - c.intensity as f64;
            let weight = self.huber.weight(residual);

            // image gradient pulled back onto the target-frame point
            let p = warped.point.coords;
            let inv_z = 1.0 / p.z;
            let (a, b) = (gx * k.fx * inv_z, gy * k.fy * inv_z);
            let grad_p = Vector3::new(a, b, -(a * p.x + b * p.y) * inv_z);
            let rot = p.cross(&grad_p);
            let jacobian = Vector6::new(grad_p.x, grad_p.y, grad_p.z, rot.x, rot.y, rot.z);

            lin.cost += self.huber.cost(residual);
            lin.valid += 1;
            lin.hessian += weight * jacobian * jacobian.transpose();
            lin.gradient += weight * residual * jacobian;
        }

        let total = data.points.len();
        lin.cost = if total > 0 {
            let out_of_view = (total - lin.valid) as f64 * self.huber.cost(self.huber.delta);
            (lin.cost + out_of_view) / total as f64
        } else {
            f64::INFINITY
        };
        lin
    }
}
