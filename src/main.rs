//! storadm - deploy and change storage clusters
//!
//! This is the main entry point for the storadm CLI.

use storadm::cli::commands::CommandContext;
use storadm::cli::{Cli, Commands};
use storadm::config::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(cli.config.as_ref()).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {:#}", e);
        Config::default()
    });

    init_logging(cli.verbosity(), config.logging.level.as_deref());

    if cli.verbosity() >= 2 {
        eprintln!("storadm v{}", VERSION);
    }

    let mut ctx = CommandContext::new(&cli, config);

    let result = match &cli.command {
        Commands::Check(args) => args.execute(&mut ctx).await,
        Commands::Diff(args) => args.execute(&mut ctx).await,
        Commands::Deploy(args) => args.deploy(&mut ctx).await,
        Commands::Status(args) => args.status(&mut ctx).await,
        Commands::Precheck(args) => args.precheck(&mut ctx).await,
        Commands::Migrate(args) => args.migrate(&mut ctx).await,
        Commands::ScaleOut(args) => args.scale_out(&mut ctx).await,
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&e.to_string());
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}

/// RUST_LOG wins over the config file, which wins over -v.
fn init_logging(verbosity: u8, configured: Option<&str>) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match configured {
            Some(level) if verbosity == 0 => EnvFilter::try_new(level),
            _ => EnvFilter::try_new(filter),
        })
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
