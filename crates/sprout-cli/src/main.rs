//! Sprout CLI
//!
//! Command-line interface for formatting, checking, normalizing and
//! evaluating Sprout grammars

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use sprout_core::{Result, init_tracing};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "sprout")]
#[command(about = "Sprout: format, check, normalize and evaluate procedural grammars")]
#[command(version = sprout_core::VERSION)]
#[command(
    long_about = "Sprout is a toolkit for the Sprout procedural-generation grammar language.\n\
\n\
Examples:\n  \
sprout fmt --check city.sprout       # Check formatting without changes\n  \
sprout check city.sprout             # Report rules, symbols and operations\n  \
sprout normalize --split city.sprout # Extract shared subtrees into rules\n  \
sprout eval city.sprout --input 3    # Evaluate on a single value\n  \
sprout config init                   # Create sprout.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        help = "Path to configuration file (sprout.toml/sprout.json)"
    )]
    config: Option<PathBuf>,

    /// Verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pretty-print grammar files in canonical form
    Fmt {
        /// Grammar files to format
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Exit non-zero when a file is not canonically formatted
        #[arg(long)]
        check: bool,

        /// Rewrite files in place instead of printing them
        #[arg(short, long, conflicts_with = "check")]
        write: bool,
    },

    /// Parse grammars and report their rules, symbols and operations
    Check {
        /// Grammar files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print a normalized form of a grammar
    Normalize {
        /// Grammar file
        file: PathBuf,

        /// Extract shared subtrees into new rules
        #[arg(long, conflicts_with = "inline", required_unless_present = "inline")]
        split: bool,

        /// Inline every symbol reference
        #[arg(long)]
        inline: bool,
    },

    /// Evaluate a grammar on one input value
    Eval {
        /// Grammar file
        file: PathBuf,

        /// Input value as JSON; an array becomes one leaf per element
        #[arg(short, long, default_value = "0")]
        input: String,

        /// Seed for random branches
        #[arg(long)]
        seed: Option<u64>,

        /// Print the output matrix as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create a configuration file with default values
    Init {
        /// File format
        #[arg(long, value_enum, default_value = "toml")]
        format: ConfigFormat,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();

    let use_colors =
        !cli.no_color && std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal();
    colored::control::set_override(use_colors);

    let log_level = match cli.verbose {
        0 => "sprout=error",
        1 => "sprout=warn",
        2 => "sprout=info",
        3 => "sprout=debug",
        _ => "sprout=trace",
    };
    unsafe {
        std::env::set_var("RUST_LOG", log_level);
    }
    init_tracing();

    match run_command(cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("sprout failed: {}", e);
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Commands::Fmt {
            files,
            check,
            write,
        } => commands::fmt_command(files, check, write, config_path).await,
        Commands::Check { files } => commands::check_command(files, config_path).await,
        Commands::Normalize {
            file,
            split,
            inline: _,
        } => {
            let mode = if split {
                commands::NormalizeMode::Split
            } else {
                commands::NormalizeMode::Inline
            };
            commands::normalize_command(file, mode, config_path).await
        }
        Commands::Eval {
            file,
            input,
            seed,
            json,
        } => commands::eval_command(file, input, seed, json, config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Init { format, force } => {
                commands::config_init_command(format, force).await
            }
            ConfigAction::Show => commands::config_show_command(config_path).await,
        },
    }
}
