use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub n_z: usize,
    pub n_modes: usize,
    pub aspect: usize,
}

impl GridConfig {
    fn validate(&self) -> Result<()> {
        if self.n_z < 4 {
            return Err(anyhow!("n_z must be at least 4, got {}", self.n_z));
        }
        if self.n_modes < 2 {
            return Err(anyhow!(
                "n_modes must include the mean profile and at least one perturbation mode, got {}",
                self.n_modes
            ));
        }
        if self.aspect == 0 {
            return Err(anyhow!("aspect ratio must be positive"));
        }
        Ok(())
    }
}

/// Solutal (double-diffusion) parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutalConfig {
    pub ra_xi: f64, // Solutal Rayleigh number
    pub tau: f64,   // Ratio of solutal to thermal diffusivity
    #[serde(default = "default_solutal_gradient")]
    pub gradient: f64, // Sign of the mean solute gradient, +1 or -1
}

fn default_solutal_gradient() -> f64 {
    1.0
}

/// Physical parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub ra: f64, // Rayleigh number
    pub pr: f64, // Prandtl number
    #[serde(default = "default_thermal_gradient")]
    pub gradient: f64, // Sign of the mean temperature gradient, +1 or -1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solutal: Option<SolutalConfig>,
}

fn default_thermal_gradient() -> f64 {
    -1.0
}

impl PhysicsConfig {
    pub fn double_diffusive(&self) -> bool {
        self.solutal.is_some()
    }

    fn validate(&self) -> Result<()> {
        if self.ra <= 0.0 {
            return Err(anyhow!("Rayleigh number must be positive, got {}", self.ra));
        }
        if self.pr <= 0.0 {
            return Err(anyhow!("Prandtl number must be positive, got {}", self.pr));
        }
        if self.gradient != 1.0 && self.gradient != -1.0 {
            return Err(anyhow!(
                "temperature gradient sign must be +1 or -1, got {}",
                self.gradient
            ));
        }
        if let Some(solutal) = &self.solutal {
            if solutal.ra_xi <= 0.0 {
                return Err(anyhow!(
                    "solutal Rayleigh number must be positive, got {}",
                    solutal.ra_xi
                ));
            }
            if solutal.tau <= 0.0 {
                return Err(anyhow!(
                    "diffusivity ratio tau must be positive, got {}",
                    solutal.tau
                ));
            }
            if solutal.gradient != 1.0 && solutal.gradient != -1.0 {
                return Err(anyhow!(
                    "solute gradient sign must be +1 or -1, got {}",
                    solutal.gradient
                ));
            }
        }
        Ok(())
    }
}

/// Time-stepping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    pub dt: f64,
    pub total_time: f64,
    #[serde(default = "default_adaptive_dt")]
    pub adaptive_dt: bool, // Rescale dt when the CFL bound is approached
    #[serde(default = "default_cfl_safety")]
    pub cfl_safety: f64,
}

fn default_adaptive_dt() -> bool {
    true
}

fn default_cfl_safety() -> f64 {
    0.5
}

impl TimeConfig {
    fn validate(&self) -> Result<()> {
        if self.dt <= 0.0 {
            return Err(anyhow!("dt must be positive, got {}", self.dt));
        }
        if self.total_time <= 0.0 {
            return Err(anyhow!("total_time must be positive, got {}", self.total_time));
        }
        if self.cfl_safety <= 0.0 || self.cfl_safety > 1.0 {
            return Err(anyhow!(
                "cfl_safety must be in (0, 1], got {}",
                self.cfl_safety
            ));
        }
        Ok(())
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub save_folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic_file: Option<String>, // Restart snapshot; analytic conditions if absent
    pub save_interval: f64,
    #[serde(default = "default_ke_interval")]
    pub ke_interval: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfl_interval: Option<f64>, // Defaults to 1e4 * dt
}

fn default_ke_interval() -> f64 {
    1e-4
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.save_folder.is_empty() {
            return Err(anyhow!("save_folder must not be empty"));
        }
        if self.save_interval <= 0.0 {
            return Err(anyhow!(
                "save_interval must be positive, got {}",
                self.save_interval
            ));
        }
        if self.ke_interval <= 0.0 {
            return Err(anyhow!(
                "ke_interval must be positive, got {}",
                self.ke_interval
            ));
        }
        if let Some(interval) = self.cfl_interval {
            if interval <= 0.0 {
                return Err(anyhow!("cfl_interval must be positive, got {}", interval));
            }
        }
        Ok(())
    }
}

/// Which driver to run and how
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Nonlinear,
    Linear,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: RunMode,
    #[serde(default = "default_n_crit")]
    pub n_crit: usize, // Tracked mode for growth-rate extraction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_level: Option<usize>, // Interior level sampled by the growth probe
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
}

fn default_n_crit() -> usize {
    1
}

fn default_backend() -> BackendKind {
    BackendKind::Parallel
}

impl RunConfig {
    fn validate(&self, n_z: usize, n_modes: usize) -> Result<()> {
        if self.mode == RunMode::Linear && (self.n_crit == 0 || self.n_crit >= n_modes) {
            return Err(anyhow!(
                "n_crit must be a perturbation mode in [1, {}), got {}",
                n_modes,
                self.n_crit
            ));
        }
        if let Some(level) = self.probe_level {
            if level == 0 || level >= n_z - 1 {
                return Err(anyhow!(
                    "probe_level must be an interior level in [1, {}), got {}",
                    n_z - 1,
                    level
                ));
            }
        }
        Ok(())
    }
}

/// Invariant-checking cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_check_every")]
    pub check_every: usize, // In steps; 0 disables the pass
}

fn default_check_every() -> usize {
    1
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            check_every: default_check_every(),
        }
    }
}

/// Optional physical-space rendering of a field to PNG frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualisationConfig {
    pub interval: f64, // Simulated time between frames
    #[serde(default = "default_vis_field")]
    pub field: String,
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    #[serde(default = "default_image_height")]
    pub image_height: u32,
}

fn default_vis_field() -> String {
    "temperature".to_string()
}

fn default_image_width() -> u32 {
    1200
}

fn default_image_height() -> u32 {
    400
}

impl VisualisationConfig {
    fn validate(&self, double_diffusive: bool) -> Result<()> {
        let mut valid_fields = vec!["temperature", "vorticity", "streamfunction"];
        if double_diffusive {
            valid_fields.push("solute");
        }
        if !valid_fields.contains(&self.field.as_str()) {
            return Err(anyhow!(
                "Invalid field '{}'. Must be one of: {:?}",
                self.field,
                valid_fields
            ));
        }
        if self.interval <= 0.0 {
            return Err(anyhow!("interval must be positive, got {}", self.interval));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(anyhow!(
                "Image dimensions must be positive (width={}, height={})",
                self.image_width,
                self.image_height
            ));
        }
        Ok(())
    }
}

/// Complete simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub physics: PhysicsConfig,
    pub time: TimeConfig,
    pub output: OutputConfig,
    pub run: RunConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualisation: Option<VisualisationConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.physics.validate()?;
        self.time.validate()?;
        self.output.validate()?;
        self.run.validate(self.grid.n_z, self.grid.n_modes)?;
        if let Some(vis) = &self.visualisation {
            vis.validate(self.physics.double_diffusive())?;
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("=== Simulation Configuration ===");
        println!(
            "Grid: {} modes x {} levels, aspect ratio {}",
            self.grid.n_modes, self.grid.n_z, self.grid.aspect
        );
        print!("Physics: Ra={:e}, Pr={}", self.physics.ra, self.physics.pr);
        if let Some(solutal) = &self.physics.solutal {
            print!(", RaXi={:e}, tau={}", solutal.ra_xi, solutal.tau);
        }
        println!();
        println!(
            "Time: dt={:e}, total_time={}, adaptive_dt={}",
            self.time.dt, self.time.total_time, self.time.adaptive_dt
        );
        println!(
            "Mode: {:?} ({:?} backend)",
            self.run.mode, self.run.backend
        );
        println!("Output: {}", self.output.save_folder);
        println!("================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [grid]
            n_z = 101
            n_modes = 51
            aspect = 3

            [physics]
            ra = 1e6
            pr = 0.5

            [time]
            dt = 3e-6
            total_time = 0.05

            [output]
            save_folder = "out"
            save_interval = 1e-3

            [run]
            mode = "nonlinear"
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.physics.gradient, -1.0);
        assert!(!config.physics.double_diffusive());
        assert!(config.time.adaptive_dt);
        assert_eq!(config.validation.check_every, 1);
        assert_eq!(config.run.backend, BackendKind::Parallel);
        assert!(config.output.ic_file.is_none());
    }

    #[test]
    fn parses_double_diffusive_config() {
        let toml_str = r#"
            [grid]
            n_z = 101
            n_modes = 51
            aspect = 3

            [physics]
            ra = 1e6
            pr = 0.5

            [physics.solutal]
            ra_xi = 1e5
            tau = 0.01

            [time]
            dt = 3e-6
            total_time = 0.05

            [output]
            save_folder = "out"
            save_interval = 1e-3

            [run]
            mode = "linear"
            n_crit = 2
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert!(config.physics.double_diffusive());
        assert_eq!(config.physics.solutal.as_ref().unwrap().gradient, 1.0);
    }

    #[test]
    fn rejects_bad_gradient_sign() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.physics.gradient = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_exterior_probe_level() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.run.mode = RunMode::Linear;
        config.run.probe_level = Some(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_grid() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.grid.n_z = 3;
        assert!(config.validate().is_err());
    }
}
