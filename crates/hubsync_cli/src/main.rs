//! hubsync CLI - drives the GitHub mirroring engine from the command line.

mod commands;
mod config;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::limits::OutputFormat;

#[derive(Parser)]
#[command(name = "hubsync")]
#[command(version)]
#[command(about = "Mirror GitHub entities while respecting rate limits")]
#[command(
    long_about = "hubsync keeps a local mirror of GitHub accounts, repositories, issues, \
comments, events, milestones and webhooks current. Update messages are routed to one \
actor per entity, requests are conditional, and every credential's rate-limit budget \
is tracked so exhausted tokens wait for their reset instead of failing."
)]
#[command(after_long_help = r#"EXAMPLES
    Process a queue dump, writing dead letters aside:
        $ hubsync run --input updates.jsonl --dead-letters failed.jsonl

    Pipe messages from another process:
        $ queue-export | hubsync run

    Refresh one issue now, on behalf of user 583231:
        $ hubsync sync issue 42/139 --user 583231

    Show rate-limit budgets as JSON:
        $ hubsync limits -o json

INPUT FORMAT
    One message per line:
        {"queue": "update-issue", "message": {"Value": {"RepositoryId": 42, "Number": 139}}}

CONFIGURATION
    hubsync reads configuration from:
      1. ~/.config/hubsync/config.toml (or $XDG_CONFIG_HOME/hubsync/config.toml)
      2. ./hubsync.toml
      3. Environment variables (HUBSYNC_ prefix, nested keys joined by __)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    HUBSYNC_DATABASE__URL               Cache database (default: ~/.local/state/hubsync/hubsync.db)
    HUBSYNC_CREDENTIALS__<USER_ID>      Access token for a GitHub user id
    HUBSYNC_ENGINE__CLIENT__BASE_URL    API base URL (default: https://api.github.com)
    RUST_LOG                            Log filter (default: hubsync=info,hubsync_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch queued update messages read as JSON lines
    Run {
        /// Read messages from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Append dead-lettered messages to this file as JSON lines
        #[arg(short, long = "dead-letters")]
        dead_letters: Option<PathBuf>,

        /// Messages dispatched at once (default from config or 16)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Sync one entity now
    Sync {
        /// Entity kind: account, repository, issue, comment, milestone, event, webhook
        kind: String,

        /// Entity key: ID, or REPOSITORY_ID/ID for repository-scoped kinds
        key: String,

        /// Sync on this user's credential, ahead of queued background work
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Show rate-limit budgets of the configured credentials
    Limits {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Set up graceful shutdown handler (Ctrl+C)
    shutdown::setup_shutdown_handler();

    // Logs go to stderr so stdout stays clean for command output.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("hubsync=info,hubsync_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(Term::stderr().is_term())
        .with_target(false)
        .init();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            dead_letters,
            concurrency,
        } => {
            let database_url = database_url(&config)?;
            commands::run::handle_run(input, dead_letters, concurrency, &config, &database_url)
                .await?;
        }
        Commands::Sync { kind, key, user } => {
            let database_url = database_url(&config)?;
            commands::sync::handle_sync(&kind, &key, user, &config, &database_url).await?;
        }
        Commands::Limits { output } => {
            commands::limits::handle_limits(output, &config).await?;
        }
        Commands::Completions { shell } => {
            commands::meta::handle_completions(shell)?;
        }
        Commands::Man { output } => {
            commands::meta::handle_man(output.as_deref())?;
        }
    }

    Ok(())
}

fn database_url(config: &config::Config) -> Result<String, Box<dyn std::error::Error>> {
    config
        .database_url()
        .ok_or_else(|| "Could not determine a database URL; set [database] url".into())
}
