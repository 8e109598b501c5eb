use std::f32::consts::PI;

/// Compute the absolute difference between two angles (radians),
/// normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    // Normalize angle difference to [-π, π).
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Difference between two undirected axes (angles modulo π), in `[0, π/2]`.
pub fn axis_diff(a: f32, b: f32) -> f32 {
    let d = angle_diff_abs(a, b);
    d.min(PI - d)
}

/// Check whether two corner orientations (axes, modulo π) are approximately
/// orthogonal within the given `tolerance`.
pub fn is_orthogonal(reference_angle: f32, other_angle: f32, tolerance: f32) -> bool {
    let diff = axis_diff(reference_angle, other_angle);
    (std::f32::consts::FRAC_PI_2 - diff).abs() <= tolerance.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orthogonal_cases() {
        let tol = 1e-3;
        assert!(is_orthogonal(0.0, std::f32::consts::FRAC_PI_2, tol));
        // Axes are undirected: 3π/4 and -π/4 are the same axis.
        assert!(is_orthogonal(PI / 4.0, -PI / 4.0, tol));
        assert!(is_orthogonal(PI / 4.0, 3.0 * PI / 4.0, tol));
        assert!(!is_orthogonal(0.0, 0.25, 0.05));
    }

    #[test]
    fn axis_difference_wraps_at_pi() {
        assert!((axis_diff(0.1, PI - 0.1) - 0.2).abs() < 1e-6);
        assert!((axis_diff(0.0, PI) - 0.0).abs() < 1e-6);
    }
}
