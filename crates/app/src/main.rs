use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use learn_core::model::{ChapterCatalog, SessionId};
use services::{AppServices, Clock, SessionConfig, SessionCoordinator};
use storage::catalog::{bundled_catalog, catalog_from_json};
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod repl;

use repl::{Flow, Repl};

const DEFAULT_DB_URL: &str = "sqlite:learn.sqlite3?mode=rwc";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidSessionId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidSessionId { raw } => write!(f, "invalid --session-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Learn,
    Seed,
    Sessions,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "learn" => Some(Self::Learn),
            "seed" => Some(Self::Seed),
            "sessions" => Some(Self::Sessions),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    chapters: Option<PathBuf>,
    session_id: Option<SessionId>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_URL.into());
        let mut chapters = std::env::var("LEARN_CHAPTERS").ok().map(PathBuf::from);
        let mut session_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() || !value.starts_with("sqlite:") {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--chapters" => {
                    chapters = Some(PathBuf::from(require_value(args, "--chapters")?));
                }
                "--session-id" => {
                    let value = require_value(args, "--session-id")?;
                    let parsed = value
                        .parse::<SessionId>()
                        .map_err(|_| ArgsError::InvalidSessionId { raw: value.clone() })?;
                    session_id = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            chapters,
            session_id,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- learn    [--db <sqlite_url>] [--chapters <file>] [--session-id <uuid>]");
    eprintln!("  cargo run -p app -- seed     [--db <sqlite_url>] [--chapters <file>]");
    eprintln!("  cargo run -p app -- sessions [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!("  --chapters  the bundled Python course");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_CHAPTERS, RUST_LOG");
    eprintln!("  LEARN_EXEC_TIMEOUT_SECS, LEARN_MAX_CODE_LENGTH, LEARN_PASS_THRESHOLD, LEARN_EXTRA_DENYLIST");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_catalog(path: Option<&PathBuf>) -> Result<ChapterCatalog, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => catalog_from_json(&std::fs::read_to_string(path)?)?,
        None => bundled_catalog()?,
    })
}

async fn seed(storage: &Storage, catalog: &ChapterCatalog) -> Result<(), Box<dyn std::error::Error>> {
    for chapter in catalog.chapters() {
        storage.chapters.upsert_chapter(chapter).await?;
    }
    info!(chapters = catalog.len(), "course seeded");
    Ok(())
}

/// Services over the `--chapters` file when given, otherwise over the stored
/// course, seeding the bundled one into an empty database first.
async fn build_services(
    storage: &Storage,
    args: &Args,
    config: SessionConfig,
) -> Result<AppServices, Box<dyn std::error::Error>> {
    let clock = Clock::system();
    if let Some(path) = &args.chapters {
        let catalog = read_catalog(Some(path))?;
        return Ok(AppServices::new(
            catalog,
            Arc::clone(&storage.snapshots),
            config,
            clock,
        ));
    }

    if storage.chapters.list_chapters().await?.is_empty() {
        seed(storage, &bundled_catalog()?).await?;
    }
    Ok(AppServices::from_storage(storage, config, clock).await?)
}

async fn open_session(
    services: &AppServices,
    session_id: Option<SessionId>,
) -> Result<SessionCoordinator, Box<dyn std::error::Error>> {
    Ok(match session_id {
        Some(id) => services.resume_or_start(id).await?,
        None => services.start_session(),
    })
}

async fn learn(storage: &Storage, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::from_env()?;
    let services = build_services(storage, args, config).await?;
    let coordinator = open_session(&services, args.session_id).await?;

    let mut repl = Repl::new(coordinator);
    let mut stdout = std::io::stdout();
    repl.greet(&mut stdout)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(stdout, "{}", repl.prompt())?;
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if repl.handle_line(&line, &mut stdout).await? == Flow::Quit {
            break;
        }
    }

    let saved = repl.coordinator_mut().save().await;
    let session_id = repl.coordinator().session_id();
    match saved {
        Ok(()) => {
            writeln!(stdout)?;
            writeln!(stdout, "Progress saved. Resume with --session-id {session_id}")?;
        }
        Err(err) => {
            warn!(%session_id, error = %err, "final save failed");
            writeln!(stdout, "error: {}", err.user_message())?;
        }
    }
    Ok(())
}

async fn list_sessions(storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = services::load_catalog(storage.chapters.as_ref()).await?;
    for snapshot in storage.snapshots.list_snapshots(20).await? {
        let completed = snapshot.chapters.values().filter(|c| c.completed).count();
        println!(
            "{}  started {}  on {}  {}/{} chapters",
            snapshot.session_id,
            snapshot.start_timestamp.format("%Y-%m-%d %H:%M"),
            snapshot.current_chapter,
            completed,
            catalog.len()
        );
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Learn,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Learn,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let args = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_tracing();
    let storage = Storage::sqlite(&args.db_url).await?;

    match cmd {
        Command::Learn => learn(&storage, &args).await,
        Command::Seed => {
            let catalog = read_catalog(args.chapters.as_ref())?;
            seed(&storage, &catalog).await?;
            println!("Seeded {} chapters into {}", catalog.len(), args.db_url);
            Ok(())
        }
        Command::Sessions => list_sessions(&storage).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
