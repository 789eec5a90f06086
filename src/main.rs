//! tsfetch - time-windowed streaming export for PostgreSQL
//!
//! # Usage
//!
//! ```bash
//! # Known tables
//! tsfetch list-tables
//!
//! # Stream one day of tweets as JSON Lines, one envelope per chunk
//! tsfetch stream tweets --start-time 2024-01-01 --end-time 2024-01-02 --format jsonl
//!
//! # Export to Parquet in hourly windows of 5000-row pages
//! tsfetch export tweets --start-time 2024-01-01 --end-time 2024-01-08 \
//!     --chunk-size 5000 -o tweets.parquet
//! ```

use tracing::Level;

use tsfetch::cli::{CliInterface, commands};
use tsfetch::error::Result;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments
/// 2. Load environment file and configuration
/// 3. Initialize logging
/// 4. Run the subcommand
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    commands::run(&cli).await
}

/// Initialize logging system based on verbosity level
///
/// Logs go to stderr so streamed chunks on stdout stay parseable.
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else if cli.args().quiet {
        Level::ERROR
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.args().no_color);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
