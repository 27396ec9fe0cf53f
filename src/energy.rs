use crate::grid::Grid;
use crate::numerics::dfdz;
use anyhow::{Context, Result};
use ndarray::Array2;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Kinetic energy held by one mode: trapezoid quadrature over z of
/// (dpsi/dz)^2 + ((n pi / a) psi)^2, half-weighted at the walls, scaled by
/// the domain width over 4(nz - 1).
pub fn mode_kinetic_energy(psi: &Array2<f64>, grid: &Grid, n: usize) -> f64 {
    let kn = grid.wavenumber(n);
    let row = psi.row(n);
    let nz = grid.nz;

    let mut ke = (kn * row[0]).powi(2) / 2.0 + (kn * row[nz - 1]).powi(2) / 2.0;
    for k in 1..nz - 1 {
        ke += dfdz(row, k, grid.dz).powi(2) + (kn * row[k]).powi(2);
    }
    ke * grid.aspect as f64 / (4.0 * (nz - 1) as f64)
}

/// Total kinetic energy over all modes.
pub fn total_kinetic_energy(psi: &Array2<f64>, grid: &Grid) -> f64 {
    (0..grid.nn)
        .map(|n| mode_kinetic_energy(psi, grid, n))
        .sum()
}

/// Append-only binary kinetic-energy series: one file for the total plus one
/// per perturbation mode, 8-byte records.
pub struct EnergyLog {
    folder: PathBuf,
}

impl EnergyLog {
    pub fn new(folder: &Path) -> Self {
        EnergyLog {
            folder: folder.to_path_buf(),
        }
    }

    fn append_record(&self, name: &str, value: f64) -> Result<()> {
        let path = self.folder.join(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("couldn't open {} for appending", path.display()))?;
        file.write_all(bytemuck::bytes_of(&value))?;
        Ok(())
    }

    /// Log total and per-mode kinetic energy; returns the total.
    pub fn append(&self, psi: &Array2<f64>, grid: &Grid) -> Result<f64> {
        let total = total_kinetic_energy(psi, grid);
        self.append_record("KineticEnergy.dat", total)?;
        for n in 1..grid.nn {
            let ke = mode_kinetic_energy(psi, grid, n);
            self.append_record(&format!("KineticEnergyMode{}.dat", n), ke)?;
        }
        Ok(total)
    }
}
