use crate::grid::Grid;
use crate::numerics::dfdz;
use ndarray::Array2;

/// Estimate a timestep rescaling factor keeping the advective Courant
/// number within the configured safety bound.
///
/// The velocities u = dpsi/dz and w = -dpsi/dx are reconstructed on the
/// physical nx x nz grid from the mode expansion, so this costs
/// O(nx * nz * nn) and is meant to be invoked periodically rather than
/// every step. Returns f <= 1; f = 1 means the current dt is already safe.
pub fn step_ratio(psi: &Array2<f64>, grid: &Grid, dt: f64, safety: f64) -> f64 {
    let a = grid.aspect as f64;
    let mut u_max = 0.0f64;
    let mut w_max = 0.0f64;

    for i in 0..grid.nx {
        let x = grid.x_coord(i);
        for k in 1..grid.nz - 1 {
            let mut u = 0.0;
            let mut w = 0.0;
            for n in 1..grid.nn {
                let kn = grid.wavenumber(n);
                let phase = n as f64 * std::f64::consts::PI * x / a;
                u += dfdz(psi.row(n), k, grid.dz) * phase.sin();
                w -= kn * psi[[n, k]] * phase.cos();
            }
            u_max = u_max.max(u.abs());
            w_max = w_max.max(w.abs());
        }
    }

    // Courant number per direction; the tighter one sets the limit
    let courant = (u_max * dt / grid.dx).max(w_max * dt / grid.dz);
    if courant <= safety {
        1.0
    } else {
        safety / courant
    }
}
