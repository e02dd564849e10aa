use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use marketfeed::config::Config;
use marketfeed::engine::{self, Command, EngineSnapshot, FeedEngine, FeedPage, Notice};
use marketfeed::feed::{FeedMode, FilterState, TimeRange};
use marketfeed::preferences::Preferences;
use marketfeed::remote::{HttpFeedService, WatchlistEntry};
use marketfeed::storage::{Database, StoreError};
use marketfeed::util::validate_api_base;

/// Get the config directory path (~/.config/marketfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("marketfeed");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(
    name = "marketfeed",
    about = "Follow a personalized market-news feed from the terminal"
)]
struct Args {
    /// Config file (defaults to ~/.config/marketfeed/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override api_base_url from the config file
    #[arg(long, value_name = "URL")]
    api_base_url: Option<String>,

    /// Sign in as this identity (email)
    #[arg(long)]
    identity: Option<String>,

    /// Feed mode: general, personalized (for_me) or trending
    #[arg(long, default_value = "general")]
    mode: FeedMode,

    /// Time range: all, this_week, last_week, this_month or this_year
    #[arg(long, default_value = "all")]
    time_range: TimeRange,

    /// Initial search text
    #[arg(long)]
    search: Option<String>,

    /// Print the first page and exit
    #[arg(long)]
    once: bool,
}

/// Parse one stdin line into an engine command.
fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match verb.to_ascii_lowercase().as_str() {
        "mode" => Command::SetMode(rest.parse()?),
        "range" => Command::SetTimeRange(rest.parse()?),
        "search" => Command::SetSearchText(rest.to_string()),
        "categories" => Command::SetCategories(
            rest.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect::<BTreeSet<_>>(),
        ),
        "page" => Command::GoToPage(
            rest.parse()
                .map_err(|_| format!("not a page number: '{}'", rest))?,
        ),
        "next" => Command::NextPage,
        "prev" => Command::PreviousPage,
        "add" => {
            let (symbol, name) = rest.split_once(' ').unwrap_or((rest, ""));
            if symbol.is_empty() {
                return Err("usage: add SYMBOL [NAME]".to_string());
            }
            Command::AddWatchlist(WatchlistEntry::new(symbol, name.trim()))
        }
        "remove" if !rest.is_empty() => Command::RemoveWatchlist(rest.to_string()),
        "refresh" => Command::RefreshNow,
        "login" if !rest.is_empty() => Command::SetIdentity(Some(rest.to_string())),
        "logout" => Command::SetIdentity(None),
        "view" if !rest.is_empty() => Command::RecordView(rest.to_string()),
        "tickers" => Command::SearchTickers(rest.to_string()),
        "quit" | "exit" => Command::Shutdown,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(command)
}

fn print_page(snapshot: &EngineSnapshot) {
    let FeedPage {
        items,
        page,
        total_pages,
    } = &snapshot.feed;
    let filter = &snapshot.filter;

    println!();
    println!(
        "== page {}/{} | {} | {} | {} ==",
        page,
        total_pages,
        filter.mode,
        filter.time_range,
        snapshot.identity.as_deref().unwrap_or("signed out")
    );
    if items.is_empty() {
        println!("  (no news)");
    }
    for article in items {
        println!(
            "  {:<22} {} ({} views)",
            article.timestamp.as_deref().unwrap_or("-"),
            article.headline,
            article.view_count
        );
    }
    let strip: Vec<String> = snapshot.page_window.iter().map(|s| s.to_string()).collect();
    println!("  pages: {}", strip.join(" "));
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::FeedFailed { detail } => eprintln!("! feed refresh failed: {}", detail),
        Notice::WatchlistApplied { symbol } => println!("* watchlist updated: {}", symbol),
        Notice::WatchlistRolledBack { symbol, detail } => {
            eprintln!("! watchlist change for {} undone: {}", symbol, detail)
        }
        Notice::WatchlistRejected { symbol, reason } => {
            eprintln!("! {}: {}", symbol, reason)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Set up config directory
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access: the preference DB holds identities
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let base_url = match &args.api_base_url {
        Some(url) => validate_api_base(url).context("Invalid --api-base-url")?,
        None => config.api_base()?,
    };
    let service = HttpFeedService::new(base_url, config.client_settings())
        .context("Failed to create HTTP client")?;

    // Open preference database
    let db_path = config_dir.join("preferences.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!("Error: {}", StoreError::Locked);
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let (engine, events) = FeedEngine::new(
        Arc::new(service),
        Preferences::new(Arc::new(db)),
        config.engine_settings(),
    );
    let initial = FilterState::default()
        .with_mode(args.mode)
        .with_time_range(args.time_range)
        .with_search_text(args.search.clone().unwrap_or_default());
    let identity = args.identity.clone().or_else(|| config.identity.clone());

    let mut handle = engine::spawn(engine, events, identity, initial);
    let mut snapshots = handle.snapshots();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_page: Option<FeedPage> = None;

    // Signal handlers for graceful shutdown (Unix only)
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.loading || last_page.as_ref() == Some(&snapshot.feed) {
                    continue;
                }
                print_page(&snapshot);
                last_page = Some(snapshot.feed);
                if args.once {
                    break;
                }
            }

            Some(notice) = handle.next_notice() => {
                print_notice(&notice);
            }

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_command(&line) {
                        Ok(Command::Shutdown) => break,
                        Ok(command) => handle.send(command).await?,
                        Err(e) => eprintln!("? {}", e),
                    },
                    // EOF: keep following the feed until a signal arrives
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
