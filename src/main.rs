use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperweave::cli::{GenerateOptions, run_generate};
use paperweave::config::ConfigLoader;

#[derive(Parser)]
#[command(name = "paperweave")]
#[command(version, about = "AI-driven cited draft generation from document corpora")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a cited draft for a topic from a corpus fixture
    Generate {
        #[arg(long, short, help = "Topic to write about")]
        topic: String,
        #[arg(long, short, help = "Path to the corpus JSON fixture")]
        corpus: PathBuf,
        #[arg(long, value_delimiter = ',', help = "Source ids pinned into the corpus")]
        pinned: Vec<String>,
        #[arg(long, default_value = "article", help = "Document type for the structural profile")]
        document_type: String,
        #[arg(long, short, help = "Write the draft to this file instead of stdout")]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show,
    /// Show configuration file paths
    Path,
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Generate {
            topic,
            corpus,
            pinned,
            document_type,
            output,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(run_generate(GenerateOptions {
                topic,
                corpus,
                pinned,
                document_type,
                output,
            }))?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = ConfigLoader::load()?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                if let Some(global) = ConfigLoader::global_config_path() {
                    println!("Global:  {}", global.display());
                }
                println!("Project: {}", ConfigLoader::project_config_path().display());
            }
        },
    }

    Ok(())
}
