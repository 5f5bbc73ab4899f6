//! Orchard CLI - Database migrations, catalog seeding and order audits.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! orchard-cli migrate
//!
//! # Load products, shipping templates and promo codes
//! orchard-cli seed catalog catalog.yaml
//!
//! # Re-verify every stored order's integrity signature
//! orchard-cli orders verify
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed catalog` - Upsert catalog data from YAML
//! - `orders verify` - Report tampered orders (non-zero exit if any)

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "orchard-cli")]
#[command(author, version, about = "Orchard CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Seed the database
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Audit stored orders
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Load catalog data from a YAML file
    Catalog {
        /// Path to the catalog YAML file
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Recompute every order's signature and report mismatches
    Verify,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await,
        Commands::Seed {
            target: SeedTarget::Catalog { file },
        } => commands::seed::catalog(&file).await,
        Commands::Orders {
            action: OrdersAction::Verify,
        } => commands::orders::verify().await,
    }
}
