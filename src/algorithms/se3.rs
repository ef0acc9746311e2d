//! SE(3) exponential and logarithm on `nalgebra::Isometry3`.
//!
//! Tangent vectors are ordered `[v_x, v_y, v_z, ω_x, ω_y, ω_z]`: translational
//! part first, rotation vector last.
use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3, Vector6};

/// Below this rotation angle the series expansions are used.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-8;

/// Skew-symmetric matrix [v]× such that [v]× u = v × u.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Left Jacobian V of SO(3), mapping the translational tangent to translation.
///
/// ```text
/// V = I + (1 - cos θ)/θ² [ω]× + (θ - sin θ)/θ³ [ω]×²
/// ```
fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let omega_hat = skew(omega);
    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + 0.5 * omega_hat;
    }
    let theta_sq = theta * theta;
    Matrix3::identity()
        + ((1.0 - theta.cos()) / theta_sq) * omega_hat
        + ((theta - theta.sin()) / (theta_sq * theta)) * omega_hat * omega_hat
}

/// Exponential map se(3) → SE(3).
pub fn exp(xi: &Vector6<f64>) -> Isometry3<f64> {
    let v = Vector3::new(xi[0], xi[1], xi[2]);
    let omega = Vector3::new(xi[3], xi[4], xi[5]);
    let rotation = UnitQuaternion::from_scaled_axis(omega);
    let translation = left_jacobian(&omega) * v;
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Logarithm SE(3) → se(3), inverse of [`exp`] for rotations below π.
pub fn log(pose: &Isometry3<f64>) -> Vector6<f64> {
    let omega = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    let theta = omega.norm();
    let omega_hat = skew(&omega);

    let v_inv = if theta < SMALL_ANGLE_THRESHOLD {
        Matrix3::identity() - 0.5 * omega_hat + (1.0 / 12.0) * omega_hat * omega_hat
    } else {
        let half = 0.5 * theta;
        let coeff = (1.0 - half * half.cos() / half.sin()) / (theta * theta);
        Matrix3::identity() - 0.5 * omega_hat + coeff * omega_hat * omega_hat
    };
    let v = v_inv * t;
    Vector6::new(v.x, v.y, v.z, omega.x, omega.y, omega.z)
}

/// Rotation angle (radians) and translation norm of a rigid motion.
pub fn motion_magnitude(pose: &Isometry3<f64>) -> (f64, f64) {
    (pose.rotation.angle(), pose.translation.vector.norm())
}
