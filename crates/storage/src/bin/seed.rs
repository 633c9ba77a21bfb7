use std::fmt;
use std::path::PathBuf;

use learn_core::model::ChapterCatalog;
use storage::catalog::{bundled_catalog, catalog_from_json};
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    chapters: Option<PathBuf>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("LEARN_DB_URL").unwrap_or_else(|_| "sqlite:learn.sqlite3?mode=rwc".into());
        let mut chapters = std::env::var("LEARN_CHAPTERS").ok().map(PathBuf::from);

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--chapters" => {
                    chapters = Some(PathBuf::from(require_value(&mut args, "--chapters")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self { db_url, chapters })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:learn.sqlite3?mode=rwc)");
    eprintln!("  --chapters <file.json>    Seed a custom catalog instead of the bundled course");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  LEARN_DB_URL, LEARN_CHAPTERS");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let catalog: ChapterCatalog = match &args.chapters {
        Some(path) => catalog_from_json(&std::fs::read_to_string(path)?)?,
        None => bundled_catalog()?,
    };

    let storage = Storage::sqlite(&args.db_url).await?;
    for chapter in catalog.chapters() {
        storage.chapters.upsert_chapter(chapter).await?;
    }

    println!("Seeded {} chapters into {}", catalog.len(), args.db_url);

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
