use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use human_panic::setup_panic;
use text_analyzer::prelude::*;
use tracing::{Level, enabled, error, info};

/// analyzer
///
/// Counts the vowels or consonants of a text, either locally or by
/// asking the analysis API, and keeps a history of past analyses.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: LoggingOpts,

    #[clap(flatten)]
    config: ConfigOptions,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a single text and print the result.
    #[clap(alias("a"))]
    Analyze(AnalyzeArgs),
    /// Read texts from stdin, one per line, keeping a history.
    #[clap(alias("s"))]
    Session(SessionArgs),
    /// Print the resolved configuration
    #[clap(alias("c"))]
    Config,
}

#[tokio::main]
async fn main() {
    setup_panic!();
    dotenvy::dotenv().ok();
    let opts = Cli::parse();

    let (_guard, file_location) = match opts
        .logging
        .configure_logging(&opts.config.get_run_id(), "root")
    {
        Ok(configured) => configured,
        Err(e) => {
            eprintln!("Unable to configure logging: {:#}", e);
            std::process::exit(2);
        }
    };
    let error_code = run_subcommand(opts).await;

    if error_code != 0 || enabled!(Level::DEBUG) {
        info!(target: "user", "More detailed logs at {}", file_location);
    }

    std::process::exit(error_code);
}

async fn run_subcommand(opts: Cli) -> i32 {
    let loaded_config = match opts.config.load_config() {
        Err(e) => {
            error!(target: "user", "Failed to load configuration: {}", e);
            return 2;
        }
        Ok(c) => c,
    };

    handle_commands(&loaded_config, &opts.command)
        .await
        .unwrap_or_else(|e| {
            error!(target: "user", "Critical Error. {}", e);
            1
        })
}

async fn handle_commands(found_config: &FoundConfig, command: &Command) -> Result<i32> {
    match command {
        Command::Analyze(args) => {
            let session = AnalyzerSession::from_config(found_config)?;
            analyze_root(&session, args).await
        }
        Command::Session(args) => {
            let session = AnalyzerSession::from_config(found_config)?;
            session_root(&session, args).await
        }
        Command::Config => show_config(found_config).map(|_| 0),
    }
}

fn show_config(found_config: &FoundConfig) -> Result<()> {
    let history_capacity = found_config
        .history_capacity
        .map(|c| c.to_string())
        .unwrap_or_else(|| "unbounded".to_string());

    info!(target: "always", "{:24}{}", "API base url".white().bold(), found_config.api_base_url);
    info!(target: "always", "{:24}{}ms", "Min loading duration".white().bold(), found_config.min_loading_duration.as_millis());
    info!(target: "always", "{:24}{}", "Max input length".white().bold(), found_config.max_input_length);
    info!(target: "always", "{:24}{}", "History capacity".white().bold(), history_capacity);
    info!(target: "always", "{:24}{}", "Run id".white().bold(), found_config.run_id);
    Ok(())
}
