//! Grid Relay simulator binary
//!
//! Runs one relay over a simulated grid and prints the report as JSON.
//! Configure with `GRIDRELAY_*` environment variables and `RUST_LOG`.

use gridrelay_node::{Simulation, SimulationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gridrelay_node=info,gridrelay_protocol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = SimulationConfig::from_env()?;
    tracing::info!(
        rows = config.protocol.rows,
        cols = config.protocol.cols,
        data_loss = config.link.data_loss,
        ack_loss = config.link.ack_loss,
        "Starting Grid Relay simulator"
    );

    let report = Simulation::new(config).run().await?;
    println!("{}", report.to_json()?);

    if !report.converged {
        tracing::warn!("Grid did not converge before the deadline");
        std::process::exit(2);
    }
    Ok(())
}
