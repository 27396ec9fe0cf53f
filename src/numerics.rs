use ndarray::ArrayView1;

/// Centred first difference in z along one mode's vertical profile.
#[inline]
pub fn dfdz(f: ArrayView1<f64>, k: usize, dz: f64) -> f64 {
    (f[k + 1] - f[k - 1]) / (2.0 * dz)
}

/// Centred second difference in z along one mode's vertical profile.
#[inline]
pub fn dfdz2(f: ArrayView1<f64>, k: usize, oodz2: f64) -> f64 {
    (f[k + 1] - 2.0 * f[k] + f[k - 1]) * oodz2
}

/// Two-level Adams-Bashforth increment.
///
/// With f = 1 this is the standard dt*(3/2 current - 1/2 previous) update.
/// When dt has just been rescaled by a ratio f, the coefficients become
/// (1 + f/2) and f/2, the variable-step generalisation of the scheme.
#[inline]
pub fn adams_bashforth(current: f64, previous: f64, f: f64, dt: f64) -> f64 {
    dt * ((1.0 + 0.5 * f) * current - 0.5 * f * previous)
}
