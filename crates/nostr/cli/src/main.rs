//! nostr-pool - run the relay pool and inspect its local store

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use nostr::Filter;
use nostr_client::{Intent, Notification, PoolConfig, RelayPool};
use nostr_store::{Session, Store};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "nostr-pool")]
#[command(about = "Bounded Nostr relay pool with a local event store", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to relays and print new events as JSON lines
    Run {
        /// Account to reconcile for (hex pubkey)
        #[arg(long)]
        pubkey: Option<String>,

        /// Follow these authors' notes (hex pubkeys)
        #[arg(long)]
        follow: Vec<String>,

        /// Follow a hashtag
        #[arg(long)]
        hashtag: Vec<String>,
    },
    /// Manage known relays
    Relays {
        #[command(subcommand)]
        command: RelayCommands,
    },
    /// Query the local store
    Query(QueryArgs),
    /// Manage the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum RelayCommands {
    /// List relays, highest priority first
    List,
    /// Add a relay or change its priority
    Add {
        uri: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Forget a relay
    Remove { uri: String },
    /// Set a relay's priority
    Priority { uri: String, priority: i64 },
}

#[derive(clap::Args)]
struct QueryArgs {
    #[arg(long)]
    id: Vec<String>,
    #[arg(long)]
    author: Vec<String>,
    #[arg(long)]
    kind: Vec<u16>,
    /// Tag query as name=value, e.g. t=nostr
    #[arg(long)]
    tag: Vec<String>,
    #[arg(long)]
    since: Option<u64>,
    #[arg(long)]
    until: Option<u64>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit: u64,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default config if none exists
    Init,
    /// Print the effective config
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config_path = match cli.config {
        Some(path) => path,
        None => PoolConfig::config_path()?,
    };
    let config = PoolConfig::load_from(&config_path)?;

    match cli.command {
        Commands::Run {
            pubkey,
            follow,
            hashtag,
        } => run(config, pubkey, follow, hashtag).await?,
        Commands::Relays { command } => relays(&config, command)?,
        Commands::Query(args) => query(&config, args)?,
        Commands::Config { command } => match command {
            ConfigCommands::Init => {
                if config_path.exists() {
                    println!("Config already exists at {}", config_path.display());
                } else {
                    PoolConfig::default().save_to(&config_path)?;
                    println!("Wrote {}", config_path.display());
                }
            }
            ConfigCommands::Show => {
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}

async fn run(
    config: PoolConfig,
    pubkey: Option<String>,
    follow: Vec<String>,
    hashtags: Vec<String>,
) -> anyhow::Result<()> {
    let session = Session::read_only(pubkey.clone().unwrap_or_default());
    let pool = RelayPool::open(config, session)?;
    let mut notifications = pool.notifications();
    pool.start()?;

    let mut intents = Vec::new();
    if let Some(pubkey) = pubkey {
        intents.push(Intent::Mentions {
            pubkey: pubkey.clone(),
        });
        intents.push(Intent::AuthorFeed {
            pubkey: pubkey.clone(),
        });
        let mut authors = follow;
        if authors.is_empty() {
            authors = pool
                .store()
                .follows(&pubkey)?
                .into_iter()
                .map(|contact| contact.pubkey)
                .collect();
        }
        if !authors.is_empty() {
            intents.push(Intent::HomeFeed { authors });
        }
    } else if !follow.is_empty() {
        intents.push(Intent::HomeFeed { authors: follow });
    }
    for hashtag in hashtags {
        intents.push(Intent::Hashtag { hashtag });
    }
    for intent in intents {
        pool.subscribe(intent).await;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = notifications.recv() => match notification {
                Ok(Notification::NewEvent { event, .. }) => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                Ok(Notification::Change(change)) => info!(?change, "store changed"),
                Ok(other) => debug!(?other, "notification"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification consumer lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    pool.shutdown().await;
    Ok(())
}

fn open_store(config: &PoolConfig) -> anyhow::Result<Store> {
    let db = config.database_config()?;
    Store::open(db).context("failed to open event store")
}

fn relays(config: &PoolConfig, command: RelayCommands) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match command {
        RelayCommands::List => {
            let relays = store.list_relays()?;
            if relays.is_empty() {
                println!("No relays (defaults are added on first run)");
            }
            for relay in relays {
                println!(
                    "{:>4} {:>5} {}{}{} {}",
                    relay.id,
                    relay.priority,
                    if relay.read { "r" } else { "-" },
                    if relay.write { "w" } else { "-" },
                    if relay.is_paid { "$" } else { "-" },
                    relay.uri
                );
            }
        }
        RelayCommands::Add { uri, priority } => {
            let relay = store.upsert_relay(&uri, priority)?;
            println!("{} {} (priority {})", relay.id, relay.uri, relay.priority);
        }
        RelayCommands::Remove { uri } => {
            let Some(relay) = store.relay_by_uri(&uri)? else {
                bail!("unknown relay: {}", uri);
            };
            store.delete_relay(relay.id)?;
            println!("Removed {}", relay.uri);
        }
        RelayCommands::Priority { uri, priority } => {
            let Some(relay) = store.relay_by_uri(&uri)? else {
                bail!("unknown relay: {}", uri);
            };
            store.set_priority(relay.id, priority)?;
            println!("{} priority {}", relay.uri, priority);
        }
    }
    Ok(())
}

fn query(config: &PoolConfig, args: QueryArgs) -> anyhow::Result<()> {
    let mut filter = Filter::new().limit(args.limit);
    if !args.id.is_empty() {
        filter = filter.ids(args.id);
    }
    if !args.author.is_empty() {
        filter = filter.authors(args.author);
    }
    if !args.kind.is_empty() {
        filter = filter.kinds(args.kind);
    }
    for tag in &args.tag {
        let Some((name, value)) = tag.split_once('=') else {
            bail!("tag query must look like name=value: {}", tag);
        };
        filter = filter.tag(name, [value]);
    }
    if let Some(since) = args.since {
        filter = filter.since(since);
    }
    if let Some(until) = args.until {
        filter = filter.until(until);
    }
    if let Some(search) = args.search {
        filter = filter.search(search);
    }

    let store = open_store(config)?;
    for stored in store.query(&filter)? {
        println!("{}", serde_json::to_string(&stored.event)?);
    }
    Ok(())
}
