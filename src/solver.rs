use crate::grid::Grid;
use ndarray::{Array2, ArrayView1, ArrayViewMut1};

/// Thomas-algorithm solver for the per-mode streamfunction equation
///
///   -d2(psi_n)/dz2 + (n pi / a)^2 psi_n = omg_n,    psi_n(0) = psi_n(1) = 0
///
/// discretised with centred second differences. One independent tridiagonal
/// system per mode; the forward-elimination coefficients depend only on nz,
/// the mode wavenumber and oodz2, so they are computed once at construction.
pub struct ThomasSolver {
    nz: usize,
    sub: f64, // Constant sub/super-diagonal entry, -oodz2
    // Per (mode, level): eliminated super-diagonal and inverse pivot
    sup_elim: Array2<f64>,
    inv_diag: Array2<f64>,
}

impl ThomasSolver {
    pub fn new(grid: &Grid) -> Self {
        let (nn, nz) = (grid.nn, grid.nz);
        let sub = -grid.oodz2;
        let mut sup_elim = Array2::zeros((nn, nz));
        let mut inv_diag = Array2::zeros((nn, nz));

        for n in 0..nn {
            let kn2 = grid.wavenumber(n).powi(2);
            let dia = kn2 + 2.0 * grid.oodz2;

            // Dirichlet rows at both walls: unit diagonal, no coupling
            sup_elim[[n, 0]] = 0.0;
            inv_diag[[n, 0]] = 1.0;
            for k in 1..nz - 1 {
                let denom = dia - sub * sup_elim[[n, k - 1]];
                inv_diag[[n, k]] = 1.0 / denom;
                sup_elim[[n, k]] = sub / denom;
            }
            sup_elim[[n, nz - 1]] = 0.0;
            inv_diag[[n, nz - 1]] = 1.0;
        }

        ThomasSolver {
            nz,
            sub,
            sup_elim,
            inv_diag,
        }
    }

    /// Solve one mode's system in place. The caller guarantees
    /// omg(n,0) = omg(n,nz-1) = 0; the output satisfies
    /// psi(n,0) = psi(n,nz-1) = 0 exactly.
    pub fn solve_mode(&self, n: usize, omg: ArrayView1<f64>, mut psi: ArrayViewMut1<f64>) {
        let nz = self.nz;

        // Forward substitution with precomputed pivots; both wall rows are
        // pure Dirichlet so their eliminated right-hand sides are zero.
        psi[0] = 0.0;
        for k in 1..nz - 1 {
            psi[k] = (omg[k] - self.sub * psi[k - 1]) * self.inv_diag[[n, k]];
        }
        psi[nz - 1] = 0.0;

        // Back substitution
        for k in (1..nz - 1).rev() {
            let correction = self.sup_elim[[n, k]] * psi[k + 1];
            psi[k] -= correction;
        }
    }

    /// Recover the streamfunction from the vorticity for every mode.
    pub fn solve(&self, omg: &Array2<f64>, psi: &mut Array2<f64>) {
        let nn = omg.nrows();
        for n in 0..nn {
            self.solve_mode(n, omg.row(n), psi.row_mut(n));
        }
    }
}
