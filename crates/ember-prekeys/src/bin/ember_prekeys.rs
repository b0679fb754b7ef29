//! Offline maintenance for a local prekey database.
//!
//! ```text
//! ember-prekeys [--db PATH] [--config PATH] status|prune
//! ```
//!
//! Never talks to the key distribution service.

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ember_prekeys::{
    retention, Clock, IdentityKeyStore, LockoutState, PreKeyError, PreKeyStore,
    RotationPolicy, SignedPreKeyStore, SqliteKeyStore, SystemClock,
};

const USAGE: &str = "usage: ember-prekeys [--db PATH] [--config PATH] status|prune";

struct Args {
    db_path: PathBuf,
    config_path: Option<PathBuf>,
    command: String,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut db_path = None;
    let mut config_path = None;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => db_path = args.next().map(PathBuf::from),
            "--config" => config_path = args.next().map(PathBuf::from),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if command.is_none() => command = Some(other.to_string()),
            other => return Err(format!("unexpected argument {other:?}\n{USAGE}")),
        }
    }

    Ok(Args {
        db_path: db_path.unwrap_or_else(default_db_path),
        config_path,
        command: command.ok_or_else(|| USAGE.to_string())?,
    })
}

fn default_db_path() -> PathBuf {
    let base = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{base}/.local/share/ember/prekeys.db"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedPreKeySummary {
    id: u32,
    generated_at: u64,
    accepted: bool,
    current: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    identity_key: Option<String>,
    lockout: LockoutState,
    blocked_by_sending_lockout: bool,
    current_signed_prekey_id: Option<u32>,
    signed_prekeys: Vec<SignedPreKeySummary>,
    one_time_prekeys: usize,
}

fn status(
    store: &SqliteKeyStore,
    now_ms: u64,
    policy: &RotationPolicy,
) -> Result<Status, PreKeyError> {
    let lockout = LockoutState::load(store)?;
    let current = store.current_signed_prekey_id()?;
    let mut signed_prekeys: Vec<_> = store
        .load_all_signed_prekeys()?
        .iter()
        .map(|r| SignedPreKeySummary {
            id: r.id(),
            generated_at: r.generated_at(),
            accepted: r.was_accepted(),
            current: Some(r.id()) == current,
        })
        .collect();
    signed_prekeys.sort_by_key(|s| (s.generated_at, s.id));
    Ok(Status {
        identity_key: store
            .load_identity_key_pair()?
            .map(|identity| identity.public_key_hex()),
        blocked_by_sending_lockout: lockout.is_blocked(now_ms, policy),
        lockout,
        current_signed_prekey_id: current,
        signed_prekeys,
        one_time_prekeys: store.count_one_time_prekeys()?,
    })
}

fn run(args: &Args) -> Result<serde_json::Value, PreKeyError> {
    let policy = match &args.config_path {
        Some(path) => RotationPolicy::load(path)?,
        None => RotationPolicy::default(),
    };
    if let Some(parent) = args.db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PreKeyError::Storage(format!("create {}: {e}", parent.display())))?;
    }
    let store = SqliteKeyStore::open(&args.db_path)?;
    let now_ms = SystemClock.now_ms();
    let to_json = |e: serde_json::Error| PreKeyError::Storage(e.to_string());

    match args.command.as_str() {
        "status" => serde_json::to_value(status(&store, now_ms, &policy)?).map_err(to_json),
        "prune" => {
            serde_json::to_value(retention::sweep(&store, now_ms, &policy)?).map_err(to_json)
        }
        other => Err(PreKeyError::Config(format!("unknown command {other:?}\n{USAGE}"))),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, command = %args.command, "ember-prekeys failed");
            ExitCode::FAILURE
        }
    }
}
