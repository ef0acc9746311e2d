//! Huber M-estimator used to down-weight photometric outliers
//! (occlusions, specular highlights, illumination changes).

/// Quadratic below `delta`, linear beyond.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Huber {
    pub delta: f64,
}

impl Huber {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }

    /// IRLS weight in (0, 1]: 1 if |r| ≤ δ, else δ/|r|.
    #[inline]
    pub fn weight(&self, residual: f64) -> f64 {
        let r = residual.abs();
        if r <= self.delta {
            1.0
        } else {
            self.delta / r
        }
    }

    /// Loss ρ(r): r²/2 if |r| ≤ δ, else δ(|r| - δ/2).
    #[inline]
    pub fn cost(&self, residual: f64) -> f64 {
        let r = residual.abs();
        if r <= self.delta {
            0.5 * r * r
        } else {
            self.delta * (r - 0.5 * self.delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inliers_have_full_weight() {
        let huber = Huber::new(10.0);
        assert_eq!(huber.weight(0.0), 1.0);
        assert_eq!(huber.weight(-10.0), 1.0);
        assert_relative_eq!(huber.cost(4.0), 8.0);
    }

    #[test]
    fn outliers_are_bounded() {
        let huber = Huber::new(10.0);
        assert_relative_eq!(huber.weight(40.0), 0.25);
        assert_relative_eq!(huber.cost(-40.0), 350.0);
        // continuous at the threshold
        assert_relative_eq!(huber.cost(10.0), 50.0);
    }
}
