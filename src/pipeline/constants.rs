//! Physical constants (CODATA 2018, SI).

/// Elementary charge (C)
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;
/// Atomic mass unit (kg)
pub const ATOMIC_MASS_UNIT: f64 = 1.660_539_066_60e-27;
/// Vacuum permittivity (F/m)
pub const VACUUM_PERMITTIVITY: f64 = 8.854_187_812_8e-12;

/// Bohm sheath factor: ion flux at the sheath edge is `0.61 n c_s`.
pub const BOHM_FACTOR: f64 = 0.61;

/// Iteration bound of the triple probe temperature solve.
pub const SOLVER_MAX_ITERATIONS: usize = 100;
/// Convergence tolerance (eV) of the triple probe temperature solve.
pub const SOLVER_TOLERANCE: f64 = 1e-5;
