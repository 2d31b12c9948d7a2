//! Euclidean projection onto per-dipole L2 balls and the reduced-gradient
//! helpers built on top of it.
//!
//! Every dipole moment is a 3-vector constrained to `||m_i|| <= rho_i`.
//! The MwPGP splitting between the "free" set (strictly inside the ball)
//! and the "active" set (on the ball surface) is decided by a relative
//! tolerance on the squared magnitude.

use crate::numerics::dot3;

const ON_BALL_ABS: f64 = 1e-8;
const ON_BALL_REL: f64 = 1e-5;
const STEP_CURVATURE_TOL: f64 = 1e-20;

/// Sentinel returned by [`max_feasible_step`] when the direction has no
/// component, standing in for an unbounded step.
pub const UNBOUNDED_STEP: f64 = 1e100;

/// Projects `v` onto the L2 ball of the given radius.
pub fn project_l2_ball(v: [f64; 3], radius: f64) -> [f64; 3] {
    let denom = 1f64.max(dot3(v, v).sqrt() / radius);
    [v[0] / denom, v[1] / denom, v[2] / denom]
}

/// Whether `v` sits on the ball surface, up to tolerance.
pub fn on_ball(v: [f64; 3], radius: f64) -> bool {
    let r2 = radius * radius;
    (dot3(v, v) - r2).abs() < ON_BALL_ABS + ON_BALL_REL * r2
}

/// Free-set gradient: `g` off the ball surface, zero on it.
pub fn free_gradient(x: [f64; 3], g: [f64; 3], radius: f64) -> [f64; 3] {
    if on_ball(x, radius) {
        [0.0; 3]
    } else {
        g
    }
}

/// Gradient of a projected step of length `alpha`, `(x - P(x - alpha g)) / alpha`.
pub fn reduced_gradient(x: [f64; 3], g: [f64; 3], alpha: f64, radius: f64) -> [f64; 3] {
    let p = project_l2_ball(
        [x[0] - alpha * g[0], x[1] - alpha * g[1], x[2] - alpha * g[2]],
        radius,
    );
    [
        (x[0] - p[0]) / alpha,
        (x[1] - p[1]) / alpha,
        (x[2] - p[2]) / alpha,
    ]
}

/// Active-set gradient: zero off the ball; on the ball it is `g` when the
/// gradient points outward, otherwise the reduced gradient.
pub fn active_gradient(x: [f64; 3], g: [f64; 3], alpha: f64, radius: f64) -> [f64; 3] {
    if !on_ball(x, radius) {
        return [0.0; 3];
    }
    if dot3(x, g) > 0.0 {
        g
    } else {
        reduced_gradient(x, g, alpha, radius)
    }
}

/// Combined reduced projected gradient, free + active parts.
pub fn reduced_projected_gradient(x: [f64; 3], g: [f64; 3], alpha: f64, radius: f64) -> [f64; 3] {
    let free = free_gradient(x, g, radius);
    let active = active_gradient(x, g, alpha, radius);
    [free[0] + active[0], free[1] + active[1], free[2] + active[2]]
}

/// Largest `alpha >= 0` keeping `x - alpha p` inside the ball.
///
/// Solves `||x - alpha p||^2 = radius^2` for the positive root. Directions
/// with negligible curvature yield [`UNBOUNDED_STEP`].
pub fn max_feasible_step(x: [f64; 3], p: [f64; 3], radius: f64) -> f64 {
    let a = dot3(p, p);
    if a <= STEP_CURVATURE_TOL {
        return UNBOUNDED_STEP;
    }
    let b = -2.0 * dot3(x, p);
    let c = dot3(x, x) - radius * radius;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    (-b + discriminant.sqrt()) / (2.0 * a)
}
