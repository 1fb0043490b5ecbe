use anyhow::{Context, Result};
use ipcs_flow::sweep;
use ipcs_flow::Config;
use log::info;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!("  config.json - JSON file containing domain, physics and run parameters");
        std::process::exit(1);
    }

    let config_path = &args[1];
    info!("Loading configuration from: {}", config_path);
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    info!("Simulation parameters:");
    info!(
        "  Domain: {} x {} with {} cells across",
        config.domain.length, config.domain.height, config.domain.resolution
    );
    info!("  Reynolds numbers: {:?}", config.physics.reynolds_numbers);
    info!("  Peak inflow velocity: {}", config.physics.inflow_max_velocity);
    info!("  End time: {}, CFL: {}", config.simulation.end_time, config.simulation.cfl);
    info!("  Tentative scheme: {:?}", config.simulation.scheme);
    info!("  Output directory: {}", config.output.output_directory);

    // CPU-bound; runs on a blocking worker
    let outcomes = tokio::task::spawn_blocking(move || sweep::run_sweep(&config))
        .await
        .context("sweep worker terminated unexpectedly")?;

    let mut failures = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => println!("{}", summary),
            Err(e) => {
                failures += 1;
                println!("Re = {}: FAILED: {}", outcome.reynolds, e);
            }
        }
    }

    info!(
        "Sweep finished: {} of {} cases succeeded",
        outcomes.len() - failures,
        outcomes.len()
    );
    if failures == outcomes.len() {
        anyhow::bail!("every case of the sweep failed");
    }
    Ok(())
}
