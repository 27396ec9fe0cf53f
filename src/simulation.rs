use crate::cfl;
use crate::config::{Config, OutputConfig, PhysicsConfig, RunConfig, TimeConfig, ValidationConfig, VisualisationConfig};
use crate::energy::EnergyLog;
use crate::fields::{read_snapshot, write_snapshot, History, Variables};
use crate::grid::Grid;
use crate::numerics::adams_bashforth;
use crate::solver::ThomasSolver;
use crate::terms::{make_backend, Backend};
use crate::validation;
use crate::visualisation::{to_physical, FieldVisualiser};
use anyhow::{bail, Result};
use std::f64::consts::PI;
use std::path::PathBuf;

/// Slack used when comparing accumulated simulation time against the gates.
const TIME_EPSILON: f64 = 1e-8;

/// Cadence, in steps, of the growth-rate probe in the linear driver.
const GROWTH_CHECK_STEPS: usize = 500;

/// Window-to-window stability tolerance for the growth-rate estimates.
const GROWTH_TOLERANCE: f64 = 1e-10;

/// Perturbation amplitude used when a nonlinear run starts without a
/// restart snapshot.
const SEED_AMPLITUDE: f64 = 1e-2;

struct ProbeAmplitudes {
    tmp: f64,
    omg: f64,
    psi: f64,
    xi: Option<f64>,
}

pub struct Simulation {
    pub grid: Grid,
    pub vars: Variables,
    pub history: History,
    solver: ThomasSolver,
    backend: Box<dyn Backend>,
    physics: PhysicsConfig,
    time_cfg: TimeConfig,
    output: OutputConfig,
    run_cfg: RunConfig,
    validation_cfg: ValidationConfig,
    visualisation_cfg: Option<VisualisationConfig>,
    energy_log: EnergyLog,
    save_folder: PathBuf,
    pub dt: f64,
    pub time: f64,
    step_count: usize,
    save_number: usize,
    ke_current: f64,
    ke_prev: f64,
}

impl Simulation {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let grid = Grid::new(config.grid.n_z, config.grid.n_modes, config.grid.aspect);
        let double_diffusive = config.physics.double_diffusive();
        let vars = Variables::new(&grid, double_diffusive);
        let history = History::new(&grid, double_diffusive);
        let solver = ThomasSolver::new(&grid);
        let backend = make_backend(config.run.backend);

        let save_folder = PathBuf::from(&config.output.save_folder);
        std::fs::create_dir_all(&save_folder)?;
        let energy_log = EnergyLog::new(&save_folder);

        Ok(Simulation {
            grid,
            vars,
            history,
            solver,
            backend,
            physics: config.physics.clone(),
            time_cfg: config.time.clone(),
            output: config.output.clone(),
            run_cfg: config.run.clone(),
            validation_cfg: config.validation.clone(),
            visualisation_cfg: config.visualisation.clone(),
            energy_log,
            save_folder,
            dt: config.time.dt,
            time: 0.0,
            step_count: 0,
            save_number: 0,
            ke_current: 0.0,
            ke_prev: 0.0,
        })
    }

    /// Analytic initial conditions: the conductive mean profile for mode 0
    /// and a sin(pi z) perturbation in every other mode.
    pub fn set_analytic_conditions(&mut self, amplitude: f64) {
        self.vars.zero();
        self.history.zero();

        for k in 0..self.grid.nz {
            let z = self.grid.z_coord(k);
            self.vars.tmp[[0, k]] = if self.physics.gradient < 0.0 { 1.0 - z } else { z };
            for n in 1..self.grid.nn {
                self.vars.tmp[[n, k]] = amplitude * (PI * z).sin();
            }
        }
        if let (Some(xi), Some(solutal)) = (self.vars.xi.as_mut(), &self.physics.solutal) {
            for k in 0..self.grid.nz {
                let z = self.grid.z_coord(k);
                xi[[0, k]] = if solutal.gradient < 0.0 { 1.0 - z } else { z };
                for n in 1..self.grid.nn {
                    xi[[n, k]] = amplitude * (PI * z).sin();
                }
            }
        }
    }

    fn load_initial_conditions(&mut self) -> Result<()> {
        match self.output.ic_file.clone() {
            Some(path) => {
                read_snapshot(path.as_ref(), &mut self.vars, &mut self.history)?;
            }
            None => self.set_analytic_conditions(SEED_AMPLITUDE),
        }
        Ok(())
    }

    /// Diffusion and buoyancy into the current derivative slot.
    pub fn compute_linear(&mut self, start_mode: usize, linearized: bool) {
        let derivs = self.history.current_mut_set();
        self.backend.linear_terms(
            &self.grid,
            &self.physics,
            &self.vars,
            derivs,
            start_mode,
            linearized,
        );
    }

    /// Triad advection accumulated on top of the linear terms.
    pub fn compute_nonlinear(&mut self) {
        let derivs = self.history.current_mut_set();
        self.backend.nonlinear_terms(&self.grid, &self.vars, derivs);
    }

    /// Adams-Bashforth update of every prognostic field at interior levels.
    /// The wall rows carry zero derivatives throughout, so the Dirichlet
    /// values are untouched by construction.
    pub fn integrate(&mut self, f: f64) {
        let dt = self.dt;
        let (nn, nz) = (self.grid.nn, self.grid.nz);

        let cur = self.history.dtmpdt.current();
        let prev = self.history.dtmpdt.previous();
        for n in 0..nn {
            for k in 1..nz - 1 {
                self.vars.tmp[[n, k]] += adams_bashforth(cur[[n, k]], prev[[n, k]], f, dt);
            }
        }

        let cur = self.history.domgdt.current();
        let prev = self.history.domgdt.previous();
        for n in 0..nn {
            for k in 1..nz - 1 {
                self.vars.omg[[n, k]] += adams_bashforth(cur[[n, k]], prev[[n, k]], f, dt);
            }
        }

        if let (Some(xi), Some(dxidt)) = (self.vars.xi.as_mut(), self.history.dxidt.as_ref()) {
            let cur = dxidt.current();
            let prev = dxidt.previous();
            for n in 0..nn {
                for k in 1..nz - 1 {
                    xi[[n, k]] += adams_bashforth(cur[[n, k]], prev[[n, k]], f, dt);
                }
            }
        }
    }

    /// Recover the streamfunction from the updated vorticity.
    pub fn solve_psi(&mut self) {
        self.solver.solve(&self.vars.omg, &mut self.vars.psi);
    }

    /// Run the invariant pass unconditionally, aborting on any violation.
    pub fn validate_now(&self) -> Result<()> {
        let violations =
            validation::check_state(&self.vars, &self.history, &self.grid, &self.physics);
        if !violations.is_empty() {
            bail!(
                "invariant violations at t={:e}: {}",
                self.time,
                validation::report(&violations)
            );
        }
        Ok(())
    }

    /// Cadence-gated invariant pass.
    fn check_invariants(&self) -> Result<()> {
        let every = self.validation_cfg.check_every;
        if every == 0 || self.step_count % every != 0 {
            return Ok(());
        }
        self.validate_now()
    }

    fn save_snapshot(&mut self) -> Result<()> {
        let path = self.save_folder.join(format!("vars{}.dat", self.save_number));
        write_snapshot(&path, &self.vars, &self.history)?;
        self.save_number += 1;
        Ok(())
    }

    fn save_kinetic_energy(&mut self) -> Result<()> {
        let total = self.energy_log.append(&self.vars.psi, &self.grid)?;
        self.ke_prev = self.ke_current;
        self.ke_current = total;
        Ok(())
    }

    fn spectral_field(&self, name: &str) -> Option<&ndarray::Array2<f64>> {
        match name {
            "temperature" => Some(&self.vars.tmp),
            "vorticity" => Some(&self.vars.omg),
            "streamfunction" => Some(&self.vars.psi),
            "solute" => self.vars.xi.as_ref(),
            _ => None,
        }
    }

    fn probe_amplitudes(&self, n: usize, level: usize) -> ProbeAmplitudes {
        ProbeAmplitudes {
            tmp: self.vars.tmp[[n, level]],
            omg: self.vars.omg[[n, level]],
            psi: self.vars.psi[[n, level]],
            xi: self.vars.xi.as_ref().map(|xi| xi[[n, level]]),
        }
    }

    /// Transient nonlinear evolution until total_time elapses.
    pub fn run_nonlinear(&mut self) -> Result<()> {
        self.load_initial_conditions()?;
        self.validate_now()?;

        println!("Starting nonlinear evolution...");
        println!(
            "Grid: {} modes x {} levels, aspect ratio {}",
            self.grid.nn, self.grid.nz, self.grid.aspect
        );
        println!("Time step: {:e}", self.dt);
        println!("Total time: {}", self.time_cfg.total_time);
        println!("Term evaluation: {}", self.backend.name());

        let cfl_interval = self.output.cfl_interval.unwrap_or(1e4 * self.time_cfg.dt);
        let visualiser = match &self.visualisation_cfg {
            Some(cfg) => {
                let dir = self.save_folder.join("frames");
                let dir = dir.to_string_lossy().into_owned();
                Some((
                    FieldVisualiser::new(&dir, cfg.image_width, cfg.image_height)?,
                    cfg.clone(),
                ))
            }
            None => None,
        };

        let total_time = self.time_cfg.total_time;
        let mut save_time = 0.0;
        let mut ke_save_time = 0.0;
        let mut cfl_check_time = 0.0;
        let mut frame_time = 0.0;
        let mut frame = 0;
        let mut f = 1.0;

        while total_time - self.time > TIME_EPSILON {
            if ke_save_time - self.time < TIME_EPSILON {
                self.save_kinetic_energy()?;
                ke_save_time += self.output.ke_interval;
            }
            if self.time_cfg.adaptive_dt && cfl_check_time - self.time < TIME_EPSILON {
                f = cfl::step_ratio(&self.vars.psi, &self.grid, self.dt, self.time_cfg.cfl_safety);
                if f < 1.0 {
                    self.dt *= f;
                    println!("CFL bound approached; dt rescaled to {:e}", self.dt);
                }
                println!(
                    "KE growth: {:e}",
                    self.ke_current.abs().ln() - self.ke_prev.abs().ln()
                );
                cfl_check_time += cfl_interval;
            }
            if save_time - self.time < TIME_EPSILON {
                let (max_tmp, n, k) = Variables::max_of(&self.vars.tmp);
                println!(
                    "{:e} of {:e} ({:.2}%) | max tmp {:e} @ ({}, {})",
                    self.time,
                    total_time,
                    self.time / total_time * 100.0,
                    max_tmp,
                    n,
                    k
                );
                self.save_snapshot()?;
                save_time += self.output.save_interval;
            }
            if let Some((vis, cfg)) = &visualiser {
                if frame_time - self.time < TIME_EPSILON {
                    if let Some(spectral) = self.spectral_field(&cfg.field) {
                        let physical = to_physical(spectral, &self.grid);
                        if let Err(e) = vis.plot_field(&physical, frame, &cfg.field, self.time) {
                            eprintln!("Warning: failed to render frame: {}", e);
                        }
                        frame += 1;
                    }
                    frame_time += cfg.interval;
                }
            }

            self.compute_linear(0, false);
            self.compute_nonlinear();
            self.integrate(f);
            f = 1.0;
            self.solve_psi();
            self.time += self.dt;
            self.step_count += 1;
            self.history.advance();
            self.check_invariants()?;
        }

        println!(
            "{:e} of {:e} ({:.2}%)",
            self.time,
            total_time,
            self.time / total_time * 100.0
        );
        self.save_snapshot()?;
        Ok(())
    }

    /// Pure linear-stability evolution of the perturbation modes.
    ///
    /// Every 500 steps the log-amplitude growth of the tracked mode at an
    /// interior probe level is compared against the previous window for
    /// every prognostic field; once all estimates are simultaneously stable
    /// the converged temperature growth rate (per window) is returned.
    /// Returns 0 if total_time elapses first, the non-convergence sentinel.
    pub fn run_linear(&mut self, n_crit: usize) -> Result<f64> {
        if n_crit == 0 || n_crit >= self.grid.nn {
            bail!(
                "n_crit must be a perturbation mode in [1, {}), got {}",
                self.grid.nn,
                n_crit
            );
        }
        self.set_analytic_conditions(1.0);
        self.validate_now()?;

        let probe = self.run_cfg.probe_level.unwrap_or(self.grid.nz / 3);
        let log_ratio = |now: f64, before: f64| now.abs().ln() - before.abs().ln();

        let mut prev_amp = self.probe_amplitudes(n_crit, probe);
        let mut prev_log: Option<(f64, f64, f64, Option<f64>)> = None;
        let mut steps = 0usize;

        while self.time < self.time_cfg.total_time {
            if steps > 0 && steps % GROWTH_CHECK_STEPS == 0 {
                let amp = self.probe_amplitudes(n_crit, probe);
                let log_tmp = log_ratio(amp.tmp, prev_amp.tmp);
                let log_omg = log_ratio(amp.omg, prev_amp.omg);
                let log_psi = log_ratio(amp.psi, prev_amp.psi);
                let log_xi = match (amp.xi, prev_amp.xi) {
                    (Some(now), Some(before)) => Some(log_ratio(now, before)),
                    _ => None,
                };

                if let Some((p_tmp, p_omg, p_psi, p_xi)) = prev_log {
                    let mut stable = (log_tmp - p_tmp).abs() < GROWTH_TOLERANCE
                        && (log_omg - p_omg).abs() < GROWTH_TOLERANCE
                        && (log_psi - p_psi).abs() < GROWTH_TOLERANCE;
                    if let (Some(now), Some(before)) = (log_xi, p_xi) {
                        stable = stable && (now - before).abs() < GROWTH_TOLERANCE;
                    }
                    if stable {
                        return Ok(log_tmp);
                    }
                }
                prev_log = Some((log_tmp, log_omg, log_psi, log_xi));
                prev_amp = amp;
            }
            steps += 1;

            self.compute_linear(1, true);
            self.integrate(1.0);
            self.solve_psi();
            self.time += self.dt;
            self.step_count += 1;
            self.history.advance();
            self.check_invariants()?;
        }

        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use approx::assert_relative_eq;

    fn base_config(dir: &std::path::Path) -> String {
        format!(
            r#"
            [grid]
            n_z = 12
            n_modes = 5
            aspect = 1

            [physics]
            ra = 1e4
            pr = 1.0

            [time]
            dt = 1e-6
            total_time = 5e-5

            [output]
            save_folder = "{}"
            save_interval = 1e-4
            ke_interval = 1e-5

            [run]
            mode = "nonlinear"
            "#,
            dir.display()
        )
    }

    fn config_from(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn nonlinear_run_holds_boundary_invariants() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(&base_config(dir.path()));
        let mut sim = Simulation::new(&config).unwrap();
        sim.run_nonlinear().unwrap();

        assert!(sim.time >= config.time.total_time - 1e-8);
        // The run validated every step; spot-check the walls anyway
        for n in 0..sim.grid.nn {
            assert_eq!(sim.vars.psi[[n, 0]], 0.0);
            assert_eq!(sim.vars.psi[[n, sim.grid.nz - 1]], 0.0);
        }
        assert_relative_eq!(sim.vars.tmp[[0, 0]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn nonlinear_run_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(&base_config(dir.path()));
        let mut sim = Simulation::new(&config).unwrap();
        sim.run_nonlinear().unwrap();

        assert!(dir.path().join("vars0.dat").exists());
        assert!(dir.path().join("KineticEnergy.dat").exists());
        for n in 1..config.grid.n_modes {
            assert!(dir.path().join(format!("KineticEnergyMode{}.dat", n)).exists());
        }
    }

    #[test]
    fn restart_resumes_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(&base_config(dir.path()));
        let mut sim = Simulation::new(&config).unwrap();
        sim.run_nonlinear().unwrap();
        let final_snapshot = dir
            .path()
            .join(format!("vars{}.dat", sim.save_number - 1));

        let dir2 = tempfile::tempdir().unwrap();
        let toml_str = base_config(dir2.path()).replace(
            "save_interval = 1e-4",
            &format!(
                "save_interval = 1e-4\nic_file = \"{}\"",
                final_snapshot.display()
            ),
        );
        let config2 = config_from(&toml_str);
        let mut sim2 = Simulation::new(&config2).unwrap();
        sim2.load_initial_conditions().unwrap();

        assert_eq!(sim.vars.tmp, sim2.vars.tmp);
        assert_eq!(sim.vars.omg, sim2.vars.omg);
        assert_eq!(sim.vars.psi, sim2.vars.psi);
        assert_eq!(
            sim.history.dtmpdt.current(),
            sim2.history.dtmpdt.current()
        );
        assert_eq!(
            sim.history.domgdt.previous(),
            sim2.history.domgdt.previous()
        );
    }

    #[test]
    fn missing_snapshot_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let toml_str = base_config(dir.path()).replace(
            "save_interval = 1e-4",
            "save_interval = 1e-4\nic_file = \"/nonexistent/state.dat\"",
        );
        let config = config_from(&toml_str);
        let mut sim = Simulation::new(&config).unwrap();
        assert!(sim.run_nonlinear().is_err());
    }

    fn linear_config(dir: &std::path::Path, ra: f64) -> Config {
        let toml_str = format!(
            r#"
            [grid]
            n_z = 10
            n_modes = 5
            aspect = 1

            [physics]
            ra = {}
            pr = 1.0

            [time]
            dt = 1e-5
            total_time = 3.0
            adaptive_dt = false

            [output]
            save_folder = "{}"
            save_interval = 1.0

            [run]
            mode = "linear"
            n_crit = 1

            [validation]
            check_every = 100
            "#,
            ra,
            dir.display()
        );
        config_from(&toml_str)
    }

    #[test]
    fn subcritical_perturbation_decays() {
        // Free-slip critical Rayleigh number for mode 1 at aspect 1 is
        // pi^4 (1 + 1)^3 / 1 ~= 779; Ra = 500 must decay.
        let dir = tempfile::tempdir().unwrap();
        let config = linear_config(dir.path(), 500.0);
        let mut sim = Simulation::new(&config).unwrap();
        let rate = sim.run_linear(1).unwrap();
        assert!(rate < 0.0, "expected decay, got rate {}", rate);
    }

    #[test]
    fn supercritical_perturbation_grows() {
        let dir = tempfile::tempdir().unwrap();
        let config = linear_config(dir.path(), 2000.0);
        let mut sim = Simulation::new(&config).unwrap();
        let rate = sim.run_linear(1).unwrap();
        assert!(rate > 0.0, "expected growth, got rate {}", rate);
    }

    #[test]
    fn unconverged_probe_returns_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = linear_config(dir.path(), 2000.0);
        // Far too short for the probe to stabilise
        config.time.total_time = 1e-3;
        let mut sim = Simulation::new(&config).unwrap();
        let rate = sim.run_linear(1).unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn backends_agree_at_every_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let toml_str = base_config(dir.path());
        let serial_cfg = config_from(&toml_str.replace("mode = \"nonlinear\"", "mode = \"nonlinear\"\nbackend = \"serial\""));
        let parallel_cfg = config_from(&toml_str.replace("mode = \"nonlinear\"", "mode = \"nonlinear\"\nbackend = \"parallel\""));

        let mut a = Simulation::new(&serial_cfg).unwrap();
        let mut b = Simulation::new(&parallel_cfg).unwrap();
        a.set_analytic_conditions(0.01);
        b.set_analytic_conditions(0.01);

        for _ in 0..10 {
            a.compute_linear(0, false);
            a.compute_nonlinear();
            b.compute_linear(0, false);
            b.compute_nonlinear();
            for (x, y) in a
                .history
                .dtmpdt
                .current()
                .iter()
                .zip(b.history.dtmpdt.current().iter())
            {
                assert_relative_eq!(*x, *y, epsilon = 1e-13, max_relative = 1e-12);
            }
            for (x, y) in a
                .history
                .domgdt
                .current()
                .iter()
                .zip(b.history.domgdt.current().iter())
            {
                assert_relative_eq!(*x, *y, epsilon = 1e-13, max_relative = 1e-12);
            }

            a.integrate(1.0);
            b.integrate(1.0);
            for (x, y) in a.vars.tmp.iter().zip(b.vars.tmp.iter()) {
                assert_relative_eq!(*x, *y, epsilon = 1e-13, max_relative = 1e-12);
            }

            a.solve_psi();
            b.solve_psi();
            for (x, y) in a.vars.psi.iter().zip(b.vars.psi.iter()) {
                assert_relative_eq!(*x, *y, epsilon = 1e-13, max_relative = 1e-12);
            }

            a.history.advance();
            b.history.advance();
        }
    }

    #[test]
    fn double_diffusive_linear_run_keeps_solute_invariants() {
        // Salt-fingering setup: both mean gradients increase upward
        let dir = tempfile::tempdir().unwrap();
        let toml_str = format!(
            r#"
            [grid]
            n_z = 10
            n_modes = 5
            aspect = 1

            [physics]
            ra = 1e3
            pr = 1.0
            gradient = 1

            [physics.solutal]
            ra_xi = 1e2
            tau = 0.01
            gradient = 1

            [time]
            dt = 1e-5
            total_time = 0.02
            adaptive_dt = false

            [output]
            save_folder = "{}"
            save_interval = 1.0

            [run]
            mode = "linear"
            n_crit = 1

            [validation]
            check_every = 100
            "#,
            dir.path().display()
        );
        let config = config_from(&toml_str);
        let mut sim = Simulation::new(&config).unwrap();
        sim.run_linear(1).unwrap();

        // The solute field evolved alongside the others and kept its walls
        let xi = sim.vars.xi.as_ref().unwrap();
        assert!(xi[[1, sim.grid.nz / 2]] != 0.0);
        assert_relative_eq!(xi[[0, 0]], 0.0, epsilon = 1e-10);
        sim.validate_now().unwrap();
    }

    #[test]
    fn divergent_state_aborts_with_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(&base_config(dir.path()));
        let mut sim = Simulation::new(&config).unwrap();
        sim.set_analytic_conditions(0.01);
        sim.vars.omg[[1, 3]] = f64::NAN;
        let err = sim.validate_now().unwrap_err();
        assert!(err.to_string().contains("NaN"));
    }
}
