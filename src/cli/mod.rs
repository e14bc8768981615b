pub mod commands;
pub mod config;
pub mod scripts;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use commands::CrawlOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the data directory when no path is given)
    #[arg(long, global = true, num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from seed URLs with parallel isolated runs
    Crawl {
        /// Seed URLs
        urls: Vec<String>,

        /// File with one seed URL per line
        #[arg(long)]
        seeds_file: Option<PathBuf>,

        /// Site profile to use (the default configuration if omitted)
        #[arg(short, long)]
        profile: Option<String>,

        /// Number of independent runs per seed
        #[arg(long)]
        runs: Option<usize>,

        /// Cost charged for every page fetched
        #[arg(long)]
        request_penalty: Option<f64>,

        /// Item extractor (forum, profiles)
        #[arg(long)]
        extractor: Option<String>,

        /// Profile rules CSV for the profiles extractor
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Export file for extracted items (.jl or .jl.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum crawling depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Maximum number of pages to crawl (0 for no limit)
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Collect exported items under ROOT/*/*.jl[.gz] into a gzipped CSV
    ExportProfiles {
        /// Root directory of crawl outputs
        root: PathBuf,

        /// Output .csv.gz file
        output: PathBuf,
    },

    /// Sample lines of every archive under ROOT/*/*.jl[.gz]
    Sample {
        /// Root directory of crawl outputs
        root: PathBuf,

        /// Output directory
        output: PathBuf,

        /// Lines to sample per archive
        #[arg(long, default_value_t = 10)]
        n: usize,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl {
            urls,
            seeds_file,
            profile,
            runs,
            request_penalty,
            extractor,
            rules,
            output,
            depth,
            limit,
        } => {
            info!("Starting crawl from {} seed URLs", urls.len());
            let options = CrawlOptions {
                profile,
                runs,
                request_penalty,
                extractor,
                rules,
                output,
                depth,
                limit,
            };
            commands::crawl(urls, seeds_file, options).await
        }
        Commands::ExportProfiles { root, output } => {
            info!("Exporting items from {}", root.display());
            commands::export_profiles(root, output).await
        }
        Commands::Sample { root, output, n } => {
            info!("Sampling {} lines per archive from {}", n, root.display());
            commands::sample(root, output, n).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles().await
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name).await
            } else {
                info!("Showing current configuration");
                commands::show_config().await
            }
        }
    }
}
