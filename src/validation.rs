use crate::config::PhysicsConfig;
use crate::fields::{History, Variables};
use crate::grid::Grid;
use ndarray::Array2;
use std::fmt;

/// Tolerance for the wall boundary values, which the integrator never
/// touches and the solver pins exactly.
pub const BOUNDARY_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A state or derivative entry is NaN: the simulation has diverged.
    NotANumber,
    /// A wall value departed from its required Dirichlet value: the
    /// integration or discretisation is broken.
    Boundary,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub field: &'static str,
    pub mode: usize,
    pub level: usize,
    pub value: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::NotANumber => write!(
                f,
                "NaN in {} at (mode {}, level {})",
                self.field, self.mode, self.level
            ),
            ViolationKind::Boundary => write!(
                f,
                "{}({}, {}) = {:e} violates its boundary condition",
                self.field, self.mode, self.level, self.value
            ),
        }
    }
}

/// One line per violation, for the abort diagnostic.
pub fn report(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_finite(field: &Array2<f64>, name: &'static str, out: &mut Vec<Violation>) {
    for ((n, k), &v) in field.indexed_iter() {
        if v.is_nan() {
            out.push(Violation {
                kind: ViolationKind::NotANumber,
                field: name,
                mode: n,
                level: k,
                value: v,
            });
        }
    }
}

fn check_wall_zero(
    field: &Array2<f64>,
    name: &'static str,
    nz: usize,
    out: &mut Vec<Violation>,
) {
    for (n, row) in field.outer_iter().enumerate() {
        for k in [0, nz - 1] {
            if row[k].abs() > BOUNDARY_EPSILON {
                out.push(Violation {
                    kind: ViolationKind::Boundary,
                    field: name,
                    mode: n,
                    level: k,
                    value: row[k],
                });
            }
        }
    }
}

/// Wall values for the mean profile of a bounded scalar: gradient -1 runs
/// heated from below (1 at the bottom wall, 0 at the top), gradient +1 the
/// reverse.
fn mean_profile_walls(gradient: f64) -> (f64, f64) {
    if gradient < 0.0 {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    }
}

fn check_scalar_walls(
    field: &Array2<f64>,
    name: &'static str,
    gradient: f64,
    nz: usize,
    out: &mut Vec<Violation>,
) {
    let (bottom, top) = mean_profile_walls(gradient);
    for (n, row) in field.outer_iter().enumerate() {
        let (want_bottom, want_top) = if n == 0 { (bottom, top) } else { (0.0, 0.0) };
        if (row[0] - want_bottom).abs() > BOUNDARY_EPSILON {
            out.push(Violation {
                kind: ViolationKind::Boundary,
                field: name,
                mode: n,
                level: 0,
                value: row[0],
            });
        }
        if (row[nz - 1] - want_top).abs() > BOUNDARY_EPSILON {
            out.push(Violation {
                kind: ViolationKind::Boundary,
                field: name,
                mode: n,
                level: nz - 1,
                value: row[nz - 1],
            });
        }
    }
}

/// Independently invocable invariant pass over the whole state.
///
/// Returns every violation found rather than asserting, so the caller can
/// run it at any cadence and attach the full report to the abort.
pub fn check_state(
    vars: &Variables,
    history: &History,
    grid: &Grid,
    physics: &PhysicsConfig,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let nz = grid.nz;

    check_finite(&vars.tmp, "tmp", &mut violations);
    check_finite(&vars.omg, "omg", &mut violations);
    check_finite(&vars.psi, "psi", &mut violations);
    check_finite(history.dtmpdt.current(), "dtmpdt", &mut violations);
    check_finite(history.dtmpdt.previous(), "dtmpdt", &mut violations);
    check_finite(history.domgdt.current(), "domgdt", &mut violations);
    check_finite(history.domgdt.previous(), "domgdt", &mut violations);

    check_wall_zero(&vars.omg, "omg", nz, &mut violations);
    check_wall_zero(&vars.psi, "psi", nz, &mut violations);
    check_scalar_walls(&vars.tmp, "tmp", physics.gradient, nz, &mut violations);

    if let Some(xi) = vars.xi.as_ref() {
        check_finite(xi, "xi", &mut violations);
        if let Some(solutal) = &physics.solutal {
            check_scalar_walls(xi, "xi", solutal.gradient, nz, &mut violations);
        }
        if let Some(dxidt) = history.dxidt.as_ref() {
            check_finite(dxidt.current(), "dxidt", &mut violations);
            check_finite(dxidt.previous(), "dxidt", &mut violations);
        }
    }

    violations
}
