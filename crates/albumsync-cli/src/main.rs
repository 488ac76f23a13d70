//! Album Sync CLI
//!
//! Thin wrapper around albumsync-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Show data directory, database and effective configuration
//! albumsync info
//!
//! # Walk through create/join, upload and live selection pruning
//! albumsync demo
//!
//! # Favorites stored on this device
//! albumsync favorites list --user u1
//! albumsync favorites toggle --user u1 <album_id> <media_id>
//!
//! # Invite code helpers
//! albumsync code generate
//! albumsync code check "ab c-123"
//!
//! # Read back JSONL logs written by earlier runs
//! albumsync logs --album <album_id> --level info
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use albumsync_core::engine::DATABASE_FILE;
use albumsync_core::invite::{generate_invite_code, normalize_invite_code};
use albumsync_core::logging::{read_entries, EntryFilter, LoggingBuilder};
use albumsync_core::remote::media_collection;
use albumsync_core::{
    AlbumId, AlbumSync, DocumentStore, MediaBlob, MediaId, MemoryBlobStore, MemoryDocumentStore,
    SessionIdentity, Storage, SyncConfig, UserId,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Album Sync - shared photo and video albums
#[derive(Parser)]
#[command(name = "albumsync")]
#[command(version = "0.1.0")]
#[command(about = "Album Sync - shared photo and video albums")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.albumsync/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON file overriding the default limits
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show data directory and effective configuration
    Info,

    /// Run the invite, upload and selection scenarios against in-memory backends
    Demo {
        /// Album owner
        #[arg(long, default_value = "u1")]
        owner: String,
        /// User joining by invite code
        #[arg(long, default_value = "u2")]
        friend: String,
    },

    /// Favorites stored on this device
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },

    /// Invite code helpers
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },

    /// Read JSONL logs from the data directory
    Logs {
        /// Only entries about this album
        #[arg(long)]
        album: Option<String>,
        /// Only entries about this user
        #[arg(long)]
        user: Option<String>,
        /// Lowest level to show (trace, debug, info, warn, error)
        #[arg(long)]
        level: Option<String>,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// List favorites of a user, optionally for one album
    List {
        #[arg(long)]
        user: String,
        /// Album ID (ULID, with or without the album_ prefix)
        album: Option<String>,
    },
    /// Flip one media item in or out of a user's favorites
    Toggle {
        #[arg(long)]
        user: String,
        /// Album ID
        album: String,
        /// Media ID
        media: String,
    },
}

#[derive(Subcommand)]
enum CodeAction {
    /// Print a fresh invite code
    Generate,
    /// Normalize typed input and report whether it is a valid code
    Check {
        input: String,
    },
}

fn setup_logging(verbosity: u8, logs_dir: Option<&Path>) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = LoggingBuilder::new("cli").with_filter(filter);
    if let Some(dir) = logs_dir {
        builder = builder.with_logs_dir(dir);
    }
    builder.init()?;
    Ok(())
}

/// Get the default data directory (~/.albumsync/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".albumsync")
        .join("data")
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

fn parse_album_id(s: &str) -> Result<AlbumId> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid album ID '{}': {}", s, e))
}

fn parse_media_id(s: &str) -> Result<MediaId> {
    s.parse()
        .map_err(|e| anyhow::anyhow!("Invalid media ID '{}': {}", s, e))
}

fn open_storage(data_dir: &Path) -> Result<Storage> {
    std::fs::create_dir_all(data_dir)?;
    Ok(Storage::new(data_dir.join(DATABASE_FILE))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let logs_dir = data_dir.join("logs");
    let writes_logs = matches!(cli.command, Commands::Demo { .. });
    setup_logging(cli.verbose, writes_logs.then_some(logs_dir.as_path()))?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("Album Sync v0.1.0");
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Database: {}", data_dir.join(DATABASE_FILE).display());
            println!("Logs: {}", logs_dir.display());
            println!();
            println!("Configuration:");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Demo { owner, friend } => {
            run_demo(&data_dir, config, UserId::new(owner), UserId::new(friend)).await?;
        }

        Commands::Favorites { action } => {
            let storage = open_storage(&data_dir)?;
            match action {
                FavoritesAction::List { user, album } => {
                    let user = UserId::new(user);
                    let albums = match album {
                        Some(album) => vec![parse_album_id(&album)?],
                        None => storage.favorite_albums(&user)?,
                    };
                    if albums.is_empty() {
                        println!("No favorites for {}", user);
                    }
                    for album_id in albums {
                        let favorites = storage.load_favorites(&user, &album_id)?;
                        println!("{} ({} favorites)", album_id, favorites.len());
                        for media_id in favorites {
                            println!("  {}", media_id);
                        }
                    }
                }
                FavoritesAction::Toggle { user, album, media } => {
                    let user = UserId::new(user);
                    let album_id = parse_album_id(&album)?;
                    let media_id = parse_media_id(&media)?;

                    let mut favorites = storage.load_favorites(&user, &album_id)?;
                    let now_favorite = favorites.insert(media_id);
                    if !now_favorite {
                        favorites.remove(&media_id);
                    }
                    storage.save_favorites(&user, &album_id, &favorites)?;

                    if now_favorite {
                        println!("Added {} to favorites", media_id);
                    } else {
                        println!("Removed {} from favorites", media_id);
                    }
                }
            }
        }

        Commands::Code { action } => match action {
            CodeAction::Generate => {
                println!("{}", generate_invite_code());
            }
            CodeAction::Check { input } => match normalize_invite_code(&input) {
                Ok(code) => println!("Valid invite code: {}", code),
                Err(e) => anyhow::bail!("{}", e),
            },
        },

        Commands::Logs { album, user, level } => {
            let filter = EntryFilter {
                album_id: album,
                user,
                min_level: level,
            };
            let entries = read_entries(&logs_dir, &filter)?;
            if entries.is_empty() {
                println!("No log entries found in {}", logs_dir.display());
            }
            for entry in entries {
                println!(
                    "{} {:>5} [{}] {}: {}",
                    entry.ts, entry.level, entry.session, entry.target, entry.msg
                );
            }
        }
    }

    Ok(())
}

/// One device shared by two users taking turns, against in-memory backends.
///
/// Favorites go to the real database in the data directory.
async fn run_demo(data_dir: &Path, config: SyncConfig, owner: UserId, friend: UserId) -> Result<()> {
    let store = MemoryDocumentStore::new();
    let blobs = MemoryBlobStore::new();
    let identity = SessionIdentity::signed_in(owner.as_str());
    let sync = AlbumSync::builder(data_dir)
        .store(store.clone())
        .blobs(blobs.clone())
        .identity(identity.clone())
        .config(config)
        .build()?;

    // Scenario A: invite and join
    println!("== Invite and join ==");
    let album = sync.directory().create_album("Summer Trip", &owner).await?;
    println!("{} created album {} with code {}", owner, album.id, album.invite_code);

    identity.sign_in(friend.as_str());
    let typed = album.invite_code.to_lowercase();
    let found = sync.directory().find_by_invite_code(&typed).await?;
    let joined = sync.directory().join_album(&found, &friend).await?;
    let members: Vec<&str> = joined.members.iter().map(UserId::as_str).collect();
    println!("{} joined, members: {}", friend, members.join(", "));

    identity.sign_in(owner.as_str());
    let mut feed = sync.notifications().observe(&owner);
    let snap = feed.wait_for(|s| s.is_live()).await?;
    for note in &snap.items {
        println!("  notification for {}: {}", owner, note.title);
    }
    feed.dispose().await;

    // Scenario B: uploads notify the other members
    println!();
    println!("== Upload ==");
    let progress = sync
        .media()
        .bulk_upload(
            vec![
                MediaBlob::image(&b"beach.jpg"[..]),
                MediaBlob::image(&b"sunset.jpg"[..]),
                MediaBlob::video(&b"waves.mp4"[..]),
            ],
            &album.id,
            &owner,
        )
        .finish()
        .await?;
    println!(
        "uploaded {} of {} items ({} bytes total this session)",
        progress.uploaded_count,
        progress.total_count,
        sync.usage().bytes_uploaded()
    );

    identity.sign_in(friend.as_str());
    let mut feed = sync.notifications().observe(&friend);
    let snap = feed.wait_for(|s| s.is_live()).await?;
    println!("{} has {} unread notifications", friend, feed.unread_count());
    for note in &snap.items {
        println!("  {}: {}", note.title, note.message);
    }
    feed.dispose().await;

    // Scenario C: the selection follows the live media list
    println!();
    println!("== Selection ==");
    identity.sign_in(owner.as_str());
    let mut overlay = sync.open_album(&album.id)?;
    let view = tokio::time::timeout(
        Duration::from_secs(5),
        overlay.wait_for(|v| v.items.len() == progress.uploaded_count),
    )
    .await
    .context("Timed out waiting for media")??;

    overlay.enter_selection().await?;
    overlay.select_all_visible().await?;
    if let Some(first) = view.items.first() {
        overlay.toggle_favorite(first.id).await?;
        println!("favorited {}", first.id);
    }
    println!("selected {} items", overlay.view().selection.ids.len());

    if let Some(last) = view.items.last() {
        store
            .delete(&media_collection(&album.id), &last.id.doc_key())
            .await?;
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            overlay.wait_for(|v| !v.items.iter().any(|i| i.id == last.id)),
        )
        .await
        .context("Timed out waiting for the delete")??;
        println!(
            "{} removed elsewhere, {} items still selected",
            last.id,
            view.selection.ids.len()
        );
    }

    let report = overlay
        .bulk_delete(overlay.view().selection.ids.into_iter().collect())
        .await?;
    println!(
        "bulk delete: {} of {} succeeded, {} blobs left",
        report.succeeded,
        report.total,
        blobs.len()
    );
    overlay.dispose().await;

    println!();
    println!("Album: {}", album.id);
    Ok(())
}
