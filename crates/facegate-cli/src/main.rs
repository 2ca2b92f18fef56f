use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::codec::{decode_text, encode_text};
use facegate_core::{enroll, Embedding, EmbeddingStore, Identity, MatchDecision, Matcher};
use facegate_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate facial login CLI")]
struct Cli {
    /// Override the user database path (FACEGATE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user without a face
    Register {
        username: String,
    },
    /// Enroll (or replace) a user's face from an embedding file
    Enroll {
        username: String,
        /// File with space-separated embedding components
        embedding: PathBuf,
    },
    /// Match an embedding file against every enrolled face
    Login {
        embedding: PathBuf,
        /// Override the match tolerance (FACEGATE_TOLERANCE)
        #[arg(short, long)]
        tolerance: Option<f32>,
    },
    /// List registered users
    List,
    /// Remove a user and their face
    Remove {
        username: String,
    },
    /// Print a user's embedding in text form
    Export {
        username: String,
    },
    /// Show configuration and store status
    Status,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    tracing::debug!(?config, "configuration loaded");

    let store = SqliteStore::open(&config.db_path, config.dimension)
        .with_context(|| format!("opening user store at {}", config.db_path.display()))?;

    match cli.command {
        Commands::Register { username } => {
            let id = store.register(&username)?;
            println!("{id}");
        }
        Commands::Enroll {
            username,
            embedding,
        } => {
            let id = resolve(&store, &username)?;
            let embedding = read_embedding(&embedding, config.dimension)?;
            enroll(&store, &id, embedding)?;
            println!("Enrolled face for {username}");
        }
        Commands::Login {
            embedding,
            tolerance,
        } => {
            let probe = read_embedding(&embedding, config.dimension)?;
            let tolerance = tolerance.unwrap_or(config.tolerance);
            let snapshot = store.snapshot()?;
            let decision = config
                .matcher
                .build()
                .find_match(&probe, &snapshot, tolerance)?;

            let username = match decision.identity() {
                Some(identity) => store.username(identity)?,
                None => None,
            };
            let (json, code) = login_report(&decision, username);
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(code);
        }
        Commands::List => {
            let users = store.list_users()?;
            println!("{}", serde_json::to_string_pretty(&users)?);
        }
        Commands::Remove { username } => {
            let id = resolve(&store, &username)?;
            store.remove(&id)?;
            println!("Removed {username}");
        }
        Commands::Export { username } => {
            let id = resolve(&store, &username)?;
            match store.embedding(&id)? {
                Some(embedding) => println!("{}", encode_text(&embedding)),
                None => bail!("{username} has no enrolled face"),
            }
        }
        Commands::Status => {
            let users = store.list_users()?;
            let enrolled = store.snapshot()?.len();
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "db_path": config.db_path,
                "dimension": config.dimension,
                "tolerance": config.tolerance,
                "matcher": config.matcher.to_string(),
                "users": users.len(),
                "enrolled": enrolled,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve(store: &SqliteStore, username: &str) -> Result<Identity> {
    store
        .find_by_username(username)?
        .with_context(|| format!("no such user: {username}"))
}

fn read_embedding(path: &Path, dimension: usize) -> Result<Embedding> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading embedding from {}", path.display()))?;
    decode_text(&text, dimension).with_context(|| format!("parsing {}", path.display()))
}

/// JSON body and exit status for a login attempt; no match exits non-zero.
fn login_report(decision: &MatchDecision, username: Option<String>) -> (serde_json::Value, ExitCode) {
    match decision {
        MatchDecision::Matched { identity, distance } => (
            serde_json::json!({
                "matched": true,
                "user_id": identity,
                "username": username,
                "distance": distance,
            }),
            ExitCode::SUCCESS,
        ),
        MatchDecision::NoMatch => (
            serde_json::json!({
                "matched": false,
                "detail": "No match found",
            }),
            ExitCode::FAILURE,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_report_matched() {
        let decision = MatchDecision::Matched { identity: "id-1".into(), distance: 0.25 };
        let (json, code) = login_report(&decision, Some("alice".into()));
        assert_eq!(json["matched"], true);
        assert_eq!(json["username"], "alice");
        assert_eq!(json["user_id"], "id-1");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
    }

    #[test]
    fn test_login_report_no_match_fails() {
        let (json, code) = login_report(&MatchDecision::NoMatch, None);
        assert_eq!(json["matched"], false);
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
    }
}
