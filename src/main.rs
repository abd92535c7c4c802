//! netrate: measure TCP payload transfer rate between two endpoints.
//!
//! - `netrate host`: serve random payloads, gated by a memory self-test
//! - `netrate client`: request payloads and report throughput statistics
//!
//! Configuration via CLI arguments or TOML file.

use netrate::config::{ClientConfig, Config, HostConfig, Mode};
use netrate::{report, ClientRunner, Host};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match config.mode {
        Mode::Host(host) => run_host(host),
        Mode::Client(client) => run_client(client),
    }
}

/// Serve runs until drained (or forever in continuous mode)
fn run_host(config: HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        port = config.port,
        headroom_percent = config.headroom_percent,
        continuous = config.continuous,
        "Starting netrate host"
    );
    let mut host = Host::bind(&config)?;
    host.run()?;
    Ok(())
}

/// Run one benchmark and print the report
fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        port = config.port,
        unit = %config.unit,
        multiplier = config.multiplier,
        cycles = config.cycles,
        "Starting netrate client"
    );
    println!("\n{}", report::header(&config));

    let cycles = config.cycles;
    let runner = ClientRunner::new(config);
    let mut printed_pass = false;

    let result = runner.run(|sample| {
        if !printed_pass {
            println!("Host self-test: [PASS]");
            printed_pass = true;
        }
        println!("{}", report::cycle_line(sample, cycles));
    });

    match result {
        Ok(run) => {
            if printed_pass {
                println!("{}", report::summary(&runner.config().host, &run.stats));
            } else {
                println!("{}", report::render(runner.config(), &run));
            }
            Ok(())
        }
        Err(e) => {
            // Already reported; only the exit status is left to set
            println!("{}", report::handshake_error(&e));
            std::process::exit(1);
        }
    }
}
