use crate::config::PhysicsConfig;
use crate::fields::{CurrentDerivs, Variables};
use crate::grid::Grid;
use crate::numerics::{dfdz, dfdz2};
use ndarray::Array1;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Term evaluators writing time derivatives into the current history slot.
///
/// Both implementations must satisfy identical pre/postconditions: given the
/// same fields they produce the same derivatives to floating tolerance, so a
/// run is reproducible whichever backend is configured.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Diffusion and buoyancy forcing for modes `start_mode..nn`, assigned
    /// (not accumulated) into the current slot. With `linearized` set the
    /// advection of the mean gradient is added, which is what makes a pure
    /// linear-stability run grow or decay exponentially.
    fn linear_terms(
        &self,
        grid: &Grid,
        physics: &PhysicsConfig,
        vars: &Variables,
        out: CurrentDerivs<'_>,
        start_mode: usize,
        linearized: bool,
    );

    /// Triad-convolution advection accumulated on top of the linear terms.
    fn nonlinear_terms(&self, grid: &Grid, vars: &Variables, out: CurrentDerivs<'_>);
}

/// Straightforward nested-loop reference implementation.
pub struct SerialBackend;

/// Same arithmetic with the outer mode loop distributed over a thread pool.
/// Each mode's accumulation writes only its own derivative row, so the modes
/// are computed independently and applied in mode order.
pub struct ParallelBackend;

pub fn make_backend(kind: crate::config::BackendKind) -> Box<dyn Backend> {
    match kind {
        crate::config::BackendKind::Serial => Box::new(SerialBackend),
        crate::config::BackendKind::Parallel => Box::new(ParallelBackend),
    }
}

fn linear_terms_impl(
    grid: &Grid,
    physics: &PhysicsConfig,
    vars: &Variables,
    out: CurrentDerivs<'_>,
    start_mode: usize,
    linearized: bool,
) {
    let CurrentDerivs {
        dtmpdt,
        domgdt,
        mut dxidt,
    } = out;
    let (nz, oodz2) = (grid.nz, grid.oodz2);

    for n in start_mode..grid.nn {
        let kn = grid.wavenumber(n);
        let tmp_n = vars.tmp.row(n);
        let omg_n = vars.omg.row(n);
        let psi_n = vars.psi.row(n);

        for k in 1..nz - 1 {
            // d(tmp)/dt = del^2 tmp, with the horizontal part spectral
            let mut dtmp = dfdz2(tmp_n, k, oodz2) - kn * kn * tmp_n[k];
            if linearized {
                dtmp += -physics.gradient * kn * psi_n[k];
            }
            dtmpdt[[n, k]] = dtmp;

            // d(omg)/dt = Pr*(del^2 omg + Ra * d(tmp)/dx)
            let mut domg =
                physics.pr * (dfdz2(omg_n, k, oodz2) - kn * kn * omg_n[k] + physics.ra * kn * tmp_n[k]);
            if let (Some(solutal), Some(xi)) = (&physics.solutal, vars.xi.as_ref()) {
                // Solutal buoyancy counteracts the thermal forcing
                domg += -solutal.ra_xi * solutal.tau * physics.pr * kn * xi[[n, k]];
            }
            domgdt[[n, k]] = domg;
        }

        if let (Some(solutal), Some(xi), Some(dxidt)) =
            (&physics.solutal, vars.xi.as_ref(), dxidt.as_deref_mut())
        {
            let xi_n = xi.row(n);
            for k in 1..nz - 1 {
                let mut dxi = solutal.tau * (dfdz2(xi_n, k, oodz2) - kn * kn * xi_n[k]);
                if linearized {
                    dxi += -solutal.gradient * kn * psi_n[k];
                }
                dxidt[[n, k]] = dxi;
            }
        }
    }
}

/// Advective flux into the horizontally averaged profile: every mode n >= 1
/// deposits -pi*n/(2a) * (dpsi/dz * f + df/dz * psi) on mode 0.
fn mean_profile_contribution(grid: &Grid, vars: &Variables, out: &mut CurrentDerivs<'_>) {
    let (nz, dz) = (grid.nz, grid.dz);
    let c = PI / (2.0 * grid.aspect as f64);

    for n in 1..grid.nn {
        let n_f = n as f64;
        let psi_n = vars.psi.row(n);
        let tmp_n = vars.tmp.row(n);
        for k in 1..nz - 1 {
            out.dtmpdt[[0, k]] +=
                -c * n_f * (dfdz(psi_n, k, dz) * tmp_n[k] + dfdz(tmp_n, k, dz) * psi_n[k]);
        }
        if let (Some(xi), Some(dxidt)) = (vars.xi.as_ref(), out.dxidt.as_deref_mut()) {
            let xi_n = xi.row(n);
            for k in 1..nz - 1 {
                dxidt[[0, k]] +=
                    -c * n_f * (dfdz(psi_n, k, dz) * xi_n[k] + dfdz(xi_n, k, dz) * psi_n[k]);
            }
        }
    }
}

/// Accumulated advective increments for one perturbation mode n.
///
/// The three triad families cover every (m, o) pair that projects onto mode
/// n under the sine product-to-sum identities: o = n-m, o = m-n, o = n+m.
/// The last family's vorticity term enters with the opposite overall sign;
/// that asymmetry comes out of the trigonometric identity itself.
fn mode_increments(
    n: usize,
    grid: &Grid,
    vars: &Variables,
) -> (Array1<f64>, Array1<f64>, Option<Array1<f64>>) {
    let (nn, nz, dz) = (grid.nn, grid.nz, grid.dz);
    let a = grid.aspect as f64;
    let c = PI / (2.0 * a);
    let n_f = n as f64;

    let mut dtmp = Array1::zeros(nz);
    let mut domg = Array1::zeros(nz);
    let mut dxi = vars.xi.as_ref().map(|_| Array1::<f64>::zeros(nz));

    // Advection of the mean profile gradient by this mode
    let psi_n = vars.psi.row(n);
    let tmp_0 = vars.tmp.row(0);
    for k in 1..nz - 1 {
        dtmp[k] += -n_f * PI / a * psi_n[k] * dfdz(tmp_0, k, dz);
    }
    if let (Some(xi), Some(dxi)) = (vars.xi.as_ref(), dxi.as_mut()) {
        let xi_0 = xi.row(0);
        for k in 1..nz - 1 {
            dxi[k] += -n_f * PI / a * psi_n[k] * dfdz(xi_0, k, dz);
        }
    }

    // Case n = m + o: interactions from below
    for m in 1..n {
        let o = n - m;
        let (m_f, o_f) = (m as f64, o as f64);
        let psi_o = vars.psi.row(o);
        let tmp_m = vars.tmp.row(m);
        let omg_m = vars.omg.row(m);
        for k in 1..nz - 1 {
            dtmp[k] +=
                -c * (-m_f * dfdz(psi_o, k, dz) * tmp_m[k] + o_f * dfdz(tmp_m, k, dz) * psi_o[k]);
            domg[k] +=
                -c * (-m_f * dfdz(psi_o, k, dz) * omg_m[k] + o_f * dfdz(omg_m, k, dz) * psi_o[k]);
        }
        if let (Some(xi), Some(dxi)) = (vars.xi.as_ref(), dxi.as_mut()) {
            let xi_m = xi.row(m);
            for k in 1..nz - 1 {
                dxi[k] += -c
                    * (-m_f * dfdz(psi_o, k, dz) * xi_m[k] + o_f * dfdz(xi_m, k, dz) * psi_o[k]);
            }
        }
    }

    // Case n = m - o: interactions from above
    for m in n + 1..nn {
        let o = m - n;
        let (m_f, o_f) = (m as f64, o as f64);
        let psi_o = vars.psi.row(o);
        let tmp_m = vars.tmp.row(m);
        let omg_m = vars.omg.row(m);
        for k in 1..nz - 1 {
            dtmp[k] +=
                -c * (m_f * dfdz(psi_o, k, dz) * tmp_m[k] + o_f * dfdz(tmp_m, k, dz) * psi_o[k]);
            domg[k] +=
                -c * (m_f * dfdz(psi_o, k, dz) * omg_m[k] + o_f * dfdz(omg_m, k, dz) * psi_o[k]);
        }
        if let (Some(xi), Some(dxi)) = (vars.xi.as_ref(), dxi.as_mut()) {
            let xi_m = xi.row(m);
            for k in 1..nz - 1 {
                dxi[k] +=
                    -c * (m_f * dfdz(psi_o, k, dz) * xi_m[k] + o_f * dfdz(xi_m, k, dz) * psi_o[k]);
            }
        }
    }

    // Case n = o - m: folding back from higher modes. The vorticity
    // contribution flips sign relative to the first two families.
    for m in 1..nn.saturating_sub(n) {
        let o = n + m;
        let (m_f, o_f) = (m as f64, o as f64);
        let psi_o = vars.psi.row(o);
        let tmp_m = vars.tmp.row(m);
        let omg_m = vars.omg.row(m);
        for k in 1..nz - 1 {
            dtmp[k] +=
                -c * (m_f * dfdz(psi_o, k, dz) * tmp_m[k] + o_f * dfdz(tmp_m, k, dz) * psi_o[k]);
            domg[k] +=
                c * (m_f * dfdz(psi_o, k, dz) * omg_m[k] + o_f * dfdz(omg_m, k, dz) * psi_o[k]);
        }
        if let (Some(xi), Some(dxi)) = (vars.xi.as_ref(), dxi.as_mut()) {
            let xi_m = xi.row(m);
            for k in 1..nz - 1 {
                dxi[k] +=
                    -c * (m_f * dfdz(psi_o, k, dz) * xi_m[k] + o_f * dfdz(xi_m, k, dz) * psi_o[k]);
            }
        }
    }

    (dtmp, domg, dxi)
}

fn apply_increments(
    out: &mut CurrentDerivs<'_>,
    updates: Vec<(usize, (Array1<f64>, Array1<f64>, Option<Array1<f64>>))>,
) {
    for (n, (dtmp, domg, dxi)) in updates {
        for k in 0..dtmp.len() {
            out.dtmpdt[[n, k]] += dtmp[k];
            out.domgdt[[n, k]] += domg[k];
        }
        if let (Some(dxi), Some(dxidt)) = (dxi, out.dxidt.as_deref_mut()) {
            for k in 0..dxi.len() {
                dxidt[[n, k]] += dxi[k];
            }
        }
    }
}

impl Backend for SerialBackend {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn linear_terms(
        &self,
        grid: &Grid,
        physics: &PhysicsConfig,
        vars: &Variables,
        out: CurrentDerivs<'_>,
        start_mode: usize,
        linearized: bool,
    ) {
        linear_terms_impl(grid, physics, vars, out, start_mode, linearized);
    }

    fn nonlinear_terms(&self, grid: &Grid, vars: &Variables, mut out: CurrentDerivs<'_>) {
        mean_profile_contribution(grid, vars, &mut out);
        let updates = (1..grid.nn)
            .map(|n| (n, mode_increments(n, grid, vars)))
            .collect();
        apply_increments(&mut out, updates);
    }
}

impl Backend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn linear_terms(
        &self,
        grid: &Grid,
        physics: &PhysicsConfig,
        vars: &Variables,
        out: CurrentDerivs<'_>,
        start_mode: usize,
        linearized: bool,
    ) {
        linear_terms_impl(grid, physics, vars, out, start_mode, linearized);
    }

    fn nonlinear_terms(&self, grid: &Grid, vars: &Variables, mut out: CurrentDerivs<'_>) {
        mean_profile_contribution(grid, vars, &mut out);
        // Modes are write-disjoint: compute every row's increments in
        // parallel, then apply them in mode order.
        let updates: Vec<_> = (1..grid.nn)
            .into_par_iter()
            .map(|n| (n, mode_increments(n, grid, vars)))
            .collect();
        apply_increments(&mut out, updates);
    }
}
