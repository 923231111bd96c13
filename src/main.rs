//! Model Bazaar - command line client

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use model_bazaar::models::{hash_tree, size_of_tree};
use model_bazaar::{
    AccessLevel, Bazaar, BazaarError, CancelToken, CatalogEntry, CatalogFilter, ClientConfig,
    Credentials, FetchOutcome, ModelIdentifier, PushRequest, Session,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "bazaar")]
#[command(about = "Model artifact registry client", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Account email; anonymous when omitted
    #[arg(long, env = "BAZAAR_EMAIL", global = true)]
    email: Option<String>,

    #[arg(long, env = "BAZAAR_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registry entries
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cached entries without contacting the registry
    Cached {
        #[command(flatten)]
        filter: FilterArgs,
        /// Re-hash every artifact and hide those that no longer match
        #[arg(long)]
        verify: bool,
        #[arg(long)]
        json: bool,
    },
    /// Download and install an artifact, printing its path
    Pull { identifier: ModelIdentifier },
    /// Publish a local artifact directory
    Push {
        path: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        trained_on: String,
        #[arg(long, default_value = "public")]
        access_level: AccessLevel,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        indexed: bool,
    },
    /// Remove an artifact from the local cache
    Remove { identifier: ModelIdentifier },
    /// Delete a published artifact from the registry
    Delete { identifier: ModelIdentifier },
    /// Create an account (verify it by email before logging in)
    Signup {
        #[arg(long)]
        username: String,
    },
    /// Print the content hash and size of a directory
    Hash { path: PathBuf },
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Case-insensitive substring of the model name
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    username: Option<String>,
    /// Repeatable; ignored for anonymous registry listings
    #[arg(long = "access-level")]
    access_levels: Vec<AccessLevel>,
}

impl From<FilterArgs> for CatalogFilter {
    fn from(args: FilterArgs) -> Self {
        CatalogFilter {
            name: args.name,
            domain: args.domain,
            username: args.username,
            access_levels: (!args.access_levels.is_empty()).then_some(args.access_levels),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let mut config = ClientConfig::load(cli.config.or_else(existing_default_config))?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    config.validate()?;

    tracing::debug!(
        base_url = %config.base_url,
        cache_dir = ?config.cache_dir,
        block_size = config.block_size_bytes,
        "Configuration loaded"
    );

    let credentials = match (cli.email, cli.password) {
        (Some(email), Some(password)) => Some(Credentials::new(email, password)),
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("--email and --password must be given together")
        }
        (None, None) => None,
    };

    let bazaar = Bazaar::new(&config).context("Failed to initialize client")?;

    let session = match (&cli.command, &credentials) {
        (
            Command::Signup { .. }
            | Command::Cached { .. }
            | Command::Remove { .. }
            | Command::Hash { .. },
            _,
        ) => None,
        (_, Some(credentials)) => Some(bazaar.login(credentials).await?),
        (_, None) => None,
    };

    match cli.command {
        Command::List { filter, json } => {
            let entries = bazaar.fetch(&filter.into(), session.as_ref()).await?;
            print_entries(&entries, json)?;
        }
        Command::Cached {
            filter,
            verify,
            json,
        } => {
            let entries = bazaar.fetch_from_cache(&filter.into(), verify).await?;
            print_entries(&entries, json)?;
        }
        Command::Pull { identifier } => {
            return pull(&bazaar, &identifier, session.as_ref()).await;
        }
        Command::Push {
            path,
            name,
            trained_on,
            access_level,
            description,
            indexed,
        } => {
            let session = require_session(session)?;
            let request = PushRequest {
                local_path: path,
                name,
                trained_on,
                access_level,
                description,
                is_indexed: indexed,
            };
            let record = bazaar.push(&session, &request).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Remove { identifier } => {
            if bazaar.remove(&identifier).await? {
                println!("Removed {}", identifier);
            } else {
                println!("{} is not cached", identifier);
            }
        }
        Command::Delete { identifier } => {
            let session = require_session(session)?;
            bazaar.delete(&session, &identifier).await?;
            println!("Deleted {}", identifier);
        }
        Command::Signup { username } => {
            let credentials = credentials.ok_or(BazaarError::LoginRequired)?;
            bazaar.signup(&credentials, &username).await?;
            println!("Signed up, check {} to verify the account", credentials.email);
        }
        Command::Hash { path } => {
            let hash = hash_tree(&path).with_context(|| format!("Failed to hash {:?}", path))?;
            let size = size_of_tree(&path)?;
            println!("{}  {} bytes", hash, size);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn pull(bazaar: &Bazaar, identifier: &ModelIdentifier, session: Option<&Session>) -> Result<ExitCode> {
    let cancel = CancelToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C signal, cancelling download");
                cancel.cancel();
            }
        }
    });

    let progress = |fraction: f64| {
        eprint!("\r{:>5.1}%", fraction * 100.0);
        let _ = std::io::stderr().flush();
    };
    let outcome = bazaar
        .get_model_dir(identifier, session, progress, &cancel)
        .await;
    watcher.abort();
    eprintln!();

    match outcome? {
        FetchOutcome::Ready(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        FetchOutcome::Cancelled => {
            eprintln!("Download of {} cancelled", identifier);
            Ok(ExitCode::from(130))
        }
    }
}

fn require_session(session: Option<Session>) -> Result<Session> {
    session.ok_or_else(|| BazaarError::LoginRequired.into())
}

fn existing_default_config() -> Option<PathBuf> {
    ClientConfig::default_path().filter(|p| p.is_file())
}

fn print_entries(entries: &[CatalogEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:<40} {:<10} {:>12} {}",
            entry.identifier,
            entry.access_level.to_string(),
            entry.size_on_disk,
            entry.trained_on
        );
    }
    Ok(())
}
