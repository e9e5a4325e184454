//! Numeric helpers shared by the pipelines.
//!
//! None of these fail: an impossible result is `None` or NaN, which the calling
//! step writes into the record.

use super::constants::{
    ATOMIC_MASS_UNIT, BOHM_FACTOR, ELEMENTARY_CHARGE, SOLVER_MAX_ITERATIONS, SOLVER_TOLERANCE,
    VACUUM_PERMITTIVITY,
};

/// `dy/dx` by central differences, one-sided at the ends.
///
/// Returns NaN everywhere if the inputs differ in length or hold fewer than two
/// points.
pub fn derivative(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return vec![f64::NAN; n.max(y.len())];
    }
    (0..n)
        .map(|i| {
            let (lo, hi) = match i {
                0 => (0, 1),
                i if i == n - 1 => (n - 2, n - 1),
                i => (i - 1, i + 1),
            };
            (y[hi] - y[lo]) / (x[hi] - x[lo])
        })
        .collect()
}

/// Index of the first zero crossing of `current`: of the two points bracketing
/// the first sign change, the one closest to zero.
pub fn floating_index(current: &[f64]) -> Option<usize> {
    current.windows(2).enumerate().find_map(|(i, pair)| {
        let (a, b) = (pair[0], pair[1]);
        if a == 0.0 {
            return Some(i);
        }
        if a.signum() != b.signum() && a.is_finite() && b.is_finite() {
            Some(if a.abs() <= b.abs() { i } else { i + 1 })
        } else {
            None
        }
    })
}

/// First index after `start` where the second derivative turns from positive to
/// non-positive: the knee of the characteristic.
pub fn plasma_index(second_derivative: &[f64], start: usize) -> Option<usize> {
    (start.max(1)..second_derivative.len())
        .find(|&j| second_derivative[j - 1] > 0.0 && second_derivative[j] <= 0.0 && j > start)
}

/// Index of the largest finite value.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}

/// Least-squares line through `(x, y)`: `(slope, intercept)`.
///
/// Non-finite points are skipped; fewer than two usable points gives NaN.
pub fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .map(|(&a, &b)| (a, b))
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect();
    if points.len() < 2 {
        return (f64::NAN, f64::NAN);
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    if sxx == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

/// Outcome of a Newton-Raphson solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solution {
    /// Root, or NaN if the solve failed
    pub value: f64,
    /// Iterations used
    pub iterations: usize,
}

/// Find a root of `f` from `guess` by Newton-Raphson.
///
/// Gives NaN on a zero or non-finite derivative, on a non-finite step and when
/// [`SOLVER_MAX_ITERATIONS`] pass without the step dropping below
/// [`SOLVER_TOLERANCE`].
pub fn newton_raphson(f: impl Fn(f64) -> f64, df: impl Fn(f64) -> f64, guess: f64) -> Solution {
    let mut x = guess;
    for iteration in 1..=SOLVER_MAX_ITERATIONS {
        let slope = df(x);
        if slope == 0.0 || !slope.is_finite() {
            return Solution {
                value: f64::NAN,
                iterations: iteration,
            };
        }
        let step = f(x) / slope;
        if !step.is_finite() {
            return Solution {
                value: f64::NAN,
                iterations: iteration,
            };
        }
        x -= step;
        if step.abs() < SOLVER_TOLERANCE {
            return Solution {
                value: x,
                iterations: iteration,
            };
        }
    }
    Solution {
        value: f64::NAN,
        iterations: SOLVER_MAX_ITERATIONS,
    }
}

/// Ion sound speed (m/s) for electron temperature `te_ev` and ion mass `amu`.
pub fn ion_sound_speed(te_ev: f64, ion_mass_amu: f64) -> f64 {
    (ELEMENTARY_CHARGE * te_ev / (ion_mass_amu * ATOMIC_MASS_UNIT)).sqrt()
}

/// Density (m⁻³) from the ion saturation current via the Bohm criterion.
pub fn bohm_density(ion_saturation: f64, te_ev: f64, area: f64, ion_mass_amu: f64) -> f64 {
    let density = ion_saturation.abs()
        / (BOHM_FACTOR * ELEMENTARY_CHARGE * area * ion_sound_speed(te_ev, ion_mass_amu));
    positive_or_nan(density)
}

/// Electron Debye length (m).
pub fn debye_length(te_ev: f64, density: f64) -> f64 {
    positive_or_nan((VACUUM_PERMITTIVITY * te_ev / (density * ELEMENTARY_CHARGE)).sqrt())
}

/// `value` if finite and positive, NaN otherwise.
pub fn positive_or_nan(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        f64::NAN
    }
}
