//! gebiedcache CLI - fetch Dutch area data through the shared cache
//!
//! ```text
//! gebiedcache fetch BU03630000 WK036300 --repeat 2
//! gebiedcache config show
//! ```

mod commands;
mod error;

use clap::{Parser, Subcommand};
use console::style;
use gebiedcache::config::ConfigFile;
use gebiedcache::logging;

use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

/// Filter directive used for `--verbose`.
const VERBOSE_FILTER: &str = "gebiedcache=debug,info";

#[derive(Debug, Parser)]
#[command(name = "gebiedcache", version, about = "Dutch area geometry and facilities, cached")]
struct Cli {
    /// Log cache and fetch activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch areas and their facilities
    Fetch(FetchArgs),

    /// View or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Fetch(args) => {
            let config = ConfigFile::load()?;

            let mut logging_config = config.logging.clone();
            if cli.verbose {
                logging_config = logging_config.with_level(VERBOSE_FILTER);
            }
            let _guard =
                logging::init(&logging_config).map_err(|e| CliError::Logging(e.to_string()))?;

            commands::fetch::run(args, &config)
        }
    }
}
