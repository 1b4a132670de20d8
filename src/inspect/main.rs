//! Standalone inspector for the userbot data directory.
//!
//! Checks the JSON stores for expired grants, sessions without an active
//! grant, missing session files and invalid prefixes. Optionally prunes
//! expired grants.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;

use premium_userbot::config::{DEFAULT_PREFIX, DataPaths};
use premium_userbot::store::{PrefixStore, PremiumRegistry, SessionRegistry, validate_prefix};

/// Userbot data directory inspector.
#[derive(Parser, Debug)]
#[command(name = "inspect_store")]
#[command(about = "Checks the JSON stores of the Telegram userbot")]
#[command(version)]
struct Args {
    /// Data directory to inspect.
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Remove expired premium grants.
    #[arg(long)]
    prune_expired: bool,

    /// Show every grant and session, not only problems.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let paths = DataPaths::new(&args.data_dir);

    println!("Inspecting: {}\n", paths.root().display());

    let premium = PremiumRegistry::new(paths.premium());
    let sessions = SessionRegistry::new(paths.sessions());
    let prefixes = PrefixStore::new(paths.prefixes(), DEFAULT_PREFIX);

    let now = Utc::now();
    let mut errors = 0;
    let mut warnings = 0;

    // Premium grants
    let grants = match premium.list() {
        Ok(grants) => grants,
        Err(e) => {
            eprintln!("✗ Failed to read {}: {e}", paths.premium().display());
            return ExitCode::FAILURE;
        }
    };

    let mut expired = 0;
    for (user_id, grant) in &grants {
        if grant.is_active(now) {
            if args.verbose {
                let expiry = grant
                    .expires_at
                    .map_or_else(|| "never".to_owned(), |at| at.format("%Y-%m-%d").to_string());
                println!("  ✓ {user_id}: {} until {expiry}", grant.plan);
            }
        } else {
            expired += 1;
            warnings += 1;
            println!("  ⚠ {user_id}: {} grant expired", grant.plan);
        }
    }

    // Sessions
    let records = match sessions.list() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("✗ Failed to read {}: {e}", paths.sessions().display());
            return ExitCode::FAILURE;
        }
    };

    for record in &records {
        let label = record.label();
        if !record.session_file.exists() {
            errors += 1;
            println!("  ✗ {label}: session file {} is missing", record.session_file.display());
            continue;
        }

        let active = grants
            .iter()
            .any(|(user_id, grant)| *user_id == record.user_id && grant.is_active(now));
        if active {
            if args.verbose {
                println!("  ✓ {label}: session ok");
            }
        } else {
            warnings += 1;
            println!("  ⚠ {label}: stored session has no active grant");
        }
    }

    // Prefixes
    match prefixes.all() {
        Ok(map) => {
            for (account_id, prefix) in &map {
                if let Err(e) = validate_prefix(prefix) {
                    errors += 1;
                    println!("  ✗ {account_id}: {e}");
                }
            }
        }
        Err(e) => {
            errors += 1;
            println!("  ✗ Failed to read {}: {e}", paths.prefixes().display());
        }
    }

    if args.prune_expired && expired > 0 {
        match premium.prune_expired(now).await {
            Ok(removed) => println!("\n✓ Pruned {} expired grant(s)", removed.len()),
            Err(e) => {
                eprintln!("\n✗ Failed to prune expired grants: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!(
        "{} grant(s), {} session(s): {errors} error(s), {warnings} warning(s)",
        grants.len(),
        records.len()
    );

    if errors == 0 {
        println!("✓ Data directory is consistent");
        ExitCode::SUCCESS
    } else {
        println!("✗ Inspection found problems");
        ExitCode::FAILURE
    }
}
