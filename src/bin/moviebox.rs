#![forbid(unsafe_code)]

//! Terminal front-end: browse the homepage feed, search, inspect titles, resolve
//! playable streams and manage the local watch history.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use moviebox_tools::{
    api::{DEFAULT_QUALITY, DEFAULT_SUBJECT_TYPE},
    catalog::{CatalogItem, build_detail_url, format_duration},
    config::{DEFAULT_CONFIG_PATH, RuntimeConfig, load_runtime_config_from},
    history::HistoryStore,
    logging::init_logging,
    pages::{self, WatchRequest},
    storage::SqliteStorage,
};
use serde::Serialize;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about = "Browse and watch MovieBox titles from the terminal.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "history-db", value_name = "PATH", help = "Override HISTORY_DB")]
    history_db: Option<PathBuf>,
    #[arg(long = "json", help = "Print machine readable JSON")]
    json: bool,
    #[arg(short = 'q', long = "quiet", help = "Only log errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Homepage feed plus the continue-watching row.
    Home,
    /// Search the catalog.
    Search {
        query: String,
        #[arg(long = "type", default_value = DEFAULT_SUBJECT_TYPE)]
        subject_type: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show a title's details, cast, seasons and downloads.
    Detail {
        slug: String,
        #[arg(long)]
        id: String,
        #[arg(long, default_value_t = 1)]
        season: u32,
    },
    /// Resolve the stream for a title and record it in the history.
    Watch {
        slug: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        season: Option<u32>,
        #[arg(long)]
        episode: Option<u32>,
    },
    /// Ask upstream to generate a stream link.
    StreamLink {
        slug: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        season: Option<u32>,
        #[arg(long)]
        episode: Option<u32>,
        #[arg(long, default_value = DEFAULT_QUALITY)]
        quality: String,
    },
    /// Print the direct-stream URL for a media URL.
    DirectUrl { url: String },
    /// Manage the local watch history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Remove { subject_id: String },
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("warn", cli.quiet)?;

    let mut runtime = load_runtime_config_from(&cli.config)?;
    if let Some(path) = cli.history_db.clone() {
        runtime.history_db = path;
    }
    let router = runtime.request_router();

    match cli.command {
        Command::Home => {
            let history = open_history(&runtime);
            let home = pages::load_homepage(&router);
            if cli.json {
                let rows: Vec<_> = home
                    .categories
                    .iter()
                    .map(|row| serde_json::json!({"title": row.title, "subjects": row.subjects}))
                    .collect();
                return print_json(&serde_json::json!({
                    "banner": home.banner,
                    "continueWatching": history.get_history(),
                    "categories": rows,
                }));
            }
            let recent = history.get_history();
            if !recent.is_empty() {
                println!("== Continue Watching ==");
                for entry in &recent {
                    println!("  {}", describe(&entry.item));
                }
                println!();
            }
            for item in &home.banner {
                println!("* {}", item.title);
            }
            if home.categories.is_empty() {
                println!("No content available right now.");
            }
            for row in &home.categories {
                println!("== {} ==", row.title);
                for subject in &row.subjects {
                    println!("  {}", describe(subject));
                }
                println!();
            }
        }
        Command::Search {
            query,
            subject_type,
            page,
        } => {
            let results = pages::search(&router, &query, &subject_type, page);
            if cli.json {
                return print_json(&serde_json::json!({
                    "items": results.items,
                    "page": results.page,
                    "hasMore": results.has_more,
                }));
            }
            if results.items.is_empty() {
                println!("No results for \"{}\".", query);
            }
            for subject in &results.items {
                println!("{}", describe(subject));
            }
            if results.has_more {
                println!("More results: --page {}", page + 1);
            }
        }
        Command::Detail { slug, id, season } => {
            let page = match pages::load_detail(&router, &slug, &id) {
                Ok(page) => page,
                Err(err) => bail!("{err}"),
            };
            if cli.json {
                return print_json(&serde_json::json!({
                    "subject": page.subject,
                    "stars": page.stars,
                    "seasons": page.seasons,
                    "downloads": page.downloads,
                    "watch": page.watch_link(season),
                }));
            }
            let subject = &page.subject;
            println!("{}", describe(subject));
            if !subject.description.is_empty() {
                println!();
                println!("{}", subject.description);
            }
            if !subject.genre.is_empty() {
                println!("Genre: {}", subject.genre.join(", "));
            }
            println!("Watch: {}", page.watch_link(season));
            if page.is_series() {
                for s in &page.seasons {
                    println!("Season {} ({} episodes)", s.se, s.max_ep);
                }
                for link in page.episode_links(season) {
                    println!("  {link}");
                }
            }
            for download in &page.downloads {
                println!("Download {}p: {}", download.resolution, download.url);
            }
        }
        Command::Watch {
            slug,
            id,
            season,
            episode,
        } => {
            let history = open_history(&runtime);
            let request = WatchRequest {
                slug,
                subject_id: id,
                season,
                episode,
            };
            let page = match pages::load_watch(&router, &history, &request) {
                Ok(page) => page,
                Err(err) => bail!("{err}"),
            };
            if cli.json {
                return print_json(&page.to_json());
            }
            if let Some(err) = &page.error {
                println!("{err}");
                println!("Back to details: {}", page.detail_link);
                return Ok(());
            }
            println!("{}", page.title);
            if let Some(url) = &page.stream_url {
                println!("Stream: {url}");
            }
            for track in &page.subtitles {
                println!("Subtitle [{}]: {}", track.language, track.url);
            }
            for link in &page.episode_links {
                println!("  {link}");
            }
        }
        Command::StreamLink {
            slug,
            id,
            season,
            episode,
            quality,
        } => {
            let api_url = build_detail_url(&slug, &id);
            match router
                .get_stream_link(&api_url, season, episode, &quality)
                .map(|response| response.into_data())
            {
                Ok(Some(data)) => print_json(&data)?,
                Ok(None) => println!("Stream link unavailable."),
                Err(err) => {
                    warn!(error = %err, "stream link request failed");
                    println!("Stream link unavailable.");
                }
            }
        }
        Command::DirectUrl { url } => {
            println!("{}", router.direct_stream_url(&url));
        }
        Command::History { action } => {
            let history = open_history(&runtime);
            match action {
                HistoryAction::List => {
                    let entries = history.get_history();
                    if cli.json {
                        return print_json(&entries);
                    }
                    if entries.is_empty() {
                        println!("History is empty.");
                    }
                    for entry in &entries {
                        let watched = Utc
                            .timestamp_millis_opt(entry.timestamp)
                            .single()
                            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default();
                        println!("{watched}  {}", describe(&entry.item));
                    }
                }
                HistoryAction::Remove { subject_id } => history.remove_from_history(&subject_id),
                HistoryAction::Clear => history.clear_history(),
            }
        }
    }

    Ok(())
}

/// History backed by the configured SQLite file, or an inert store when the
/// file cannot be opened.
fn open_history(runtime: &RuntimeConfig) -> HistoryStore {
    match SqliteStorage::open(&runtime.history_db) {
        Ok(storage) => HistoryStore::new(Arc::new(storage)),
        Err(err) => {
            warn!(path = %runtime.history_db.display(), error = %err, "history unavailable");
            HistoryStore::detached()
        }
    }
}

fn describe(subject: &CatalogItem) -> String {
    let mut line = format!("[{}] {}", subject.kind().label(), subject.title);
    if let Some(year) = subject.release_date.get(..4) {
        line.push_str(&format!(" ({year})"));
    }
    if subject.imdb_rating_value > 0.0 {
        line.push_str(&format!(" ★ {:.1}", subject.imdb_rating_value));
    }
    let runtime = format_duration(subject.duration);
    if !runtime.is_empty() {
        line.push_str(&format!(" · {runtime}"));
    }
    if let Some(corner) = subject.corner.as_deref().filter(|c| !c.is_empty()) {
        line.push_str(&format!(" [{corner}]"));
    }
    line.push_str(&format!("  {}", subject.detail_url()));
    line
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
