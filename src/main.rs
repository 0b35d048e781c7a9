use clap::{Parser, Subcommand};
use mill::cli::backfill::BackfillArgs;
use mill::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mill")]
#[command(about = "Rotate local logs into a remote object store", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotate and upload every configured source until interrupted
    Run,
    /// Upload a stream of timestamped lines in fixed-interval buckets
    Backfill(BackfillArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,

        /// Write to this path instead of the default location
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Validate,
}

#[derive(Subcommand)]
enum JobAction {
    Status { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mill=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            mill::cli::run::run(config_path).await?;
        }
        Some(Commands::Backfill(args)) => {
            mill::cli::backfill::backfill(config_path, args).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout, output } => {
                mill::cli::config::init(stdout, output)?;
            }
            ConfigAction::Validate => {
                mill::cli::config::validate(config_path)?;
            }
        },
        Some(Commands::Job { action }) => match action {
            JobAction::Status { id } => {
                mill::cli::job::status(config_path, &id).await?;
            }
        },
    }

    Ok(())
}
