mod cfl;
mod config;
mod energy;
mod fields;
mod grid;
mod numerics;
mod simulation;
mod solver;
mod terms;
mod validation;
mod visualisation;

use anyhow::{bail, Result};
use config::{Config, RunMode};
use simulation::Simulation;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        bail!("usage: {} <config.toml>", args[0]);
    }

    let config = Config::from_file(&args[1])?;
    config.print_summary();

    let mut sim = Simulation::new(&config)?;
    match config.run.mode {
        RunMode::Nonlinear => {
            sim.run_nonlinear()?;
            println!("Evolution complete.");
        }
        RunMode::Linear => {
            let rate = sim.run_linear(config.run.n_crit)?;
            if rate == 0.0 {
                println!(
                    "Growth probe for mode {} did not converge within t={}",
                    config.run.n_crit, config.time.total_time
                );
            } else {
                println!("Mode {} growth rate: {:e}", config.run.n_crit, rate);
            }
        }
    }

    Ok(())
}
