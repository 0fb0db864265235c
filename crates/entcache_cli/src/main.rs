//! entcache CLI
//!
//! Command-line tools for working with entcache metadata catalogs.
//!
//! # Commands
//!
//! - `inspect` - Summarize the entity types in a catalog
//! - `verify` - Validate a catalog and report suspicious declarations
//! - `query-url` - Render a query as the request the client would send

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// entcache command-line tools.
#[derive(Parser)]
#[command(name = "entcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the entity types in a metadata catalog
    Inspect {
        /// Path to the metadata JSON document
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a metadata catalog
    Verify {
        /// Path to the metadata JSON document
        file: PathBuf,
    },

    /// Render a query as its wire request
    QueryUrl {
        /// Path to the metadata JSON document
        #[arg(short, long)]
        metadata: PathBuf,

        /// Resource or entity type name to query
        #[arg(short, long)]
        from: String,

        /// Filter clause such as "City eq Berlin"; repeated clauses are and-ed
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,

        /// Sort clause such as "CompanyName" or "OrderDate desc"
        #[arg(short, long)]
        order_by: Vec<String>,

        /// Navigation path to expand
        #[arg(short, long)]
        expand: Vec<String>,

        /// Number of rows to skip
        #[arg(long)]
        skip: Option<usize>,

        /// Maximum number of rows to return
        #[arg(long)]
        top: Option<usize>,

        /// Ask the server for the total row count
        #[arg(long)]
        inline_count: bool,

        /// Service root to prefix the request with
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { file, format } => {
            commands::inspect::run(&file, &format)?;
        }
        Commands::Verify { file } => {
            commands::verify::run(&file)?;
        }
        Commands::QueryUrl {
            metadata,
            from,
            filters,
            order_by,
            expand,
            skip,
            top,
            inline_count,
            base,
        } => {
            let args = commands::query_url::QueryArgs {
                from,
                filters,
                order_by,
                expand,
                skip,
                top,
                inline_count,
            };
            commands::query_url::run(&metadata, &args, base.as_deref())?;
        }
        Commands::Version => {
            println!("entcache CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("entcache core v{}", entcache_core::VERSION);
        }
    }

    Ok(())
}
