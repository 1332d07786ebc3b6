//! Parlay market maker CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use parlay_maker::catalog::validate_catalog;
use parlay_maker::{App, Config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parlay-maker")]
#[command(about = "Market-making client for parlay pricing requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, seed, subscribe and answer pricing requests until interrupted
    Run,

    /// Log in, run one seeding pass and print the catalog summary
    Seed,

    /// Log in and print the account balance
    Balance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;
    let app = App::new(config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => app.run().await?,
        Commands::Seed => seed_once(&app).await?,
        Commands::Balance => {
            app.login().await?;
            println!("Balance: ${}", app.balance().await?);
        }
    }

    Ok(())
}

async fn seed_once(app: &App) -> Result<()> {
    app.login().await?;
    let catalog = app.seed().await?;
    let report = validate_catalog(&catalog)?;

    println!("\n{}", "=".repeat(60));
    println!("  CATALOG");
    println!("{}", "=".repeat(60));
    println!("Tournaments listed:      {}", catalog.tournaments.len());
    for tournament in catalog.my_tournaments.values() {
        println!("  * {} ({})", tournament.name, tournament.id);
    }
    println!("Sport events:            {}", catalog.sport_events.len());
    println!("Markets:                 {}", report.markets);
    println!("Supported lines:         {}", catalog.supported_line_ids().len());
    if !report.is_clean() {
        println!(
            "Tolerated gaps:          {} missing line ids, {} empty selections, {} unstructured markets",
            report.missing_line_ids, report.empty_selections, report.unstructured_markets
        );
    }
    println!();

    Ok(())
}
