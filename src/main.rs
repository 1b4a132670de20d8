//! Premium Userbot - Main Entry Point
//!
//! Runs the owner's userbot, restores every premium session, and serves
//! the companion bot through which premium users connect their accounts.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use premium_userbot::bot::BotFrontend;
use premium_userbot::commands::CommandHandler;
use premium_userbot::config::{BotSettings, DataPaths, TelegramConfig};
use premium_userbot::expiry::{ExpirySweeper, SweepMessage};
use premium_userbot::login::LoginFlow;
use premium_userbot::sessions::SessionManager;
use premium_userbot::store::{PrefixStore, PremiumRegistry, SessionRegistry};
use premium_userbot::telegram::qr::{login_url, show_login_qr};
use premium_userbot::telegram::{QrAuthResult, TelegramAuthenticator, TelegramBot, TelegramError};

/// How often a pending QR login is polled.
const QR_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Telegram userbot with premium multi-session support.
#[derive(Parser, Debug)]
#[command(name = "userbot")]
#[command(about = "Telegram userbot with premium sessions for other users")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Data directory (overrides DATA_DIR).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log the owner account in with a QR code instead of a phone number.
    #[arg(long)]
    qr: bool,

    /// Do not start the companion bot even if BOT_TOKEN is set.
    #[arg(long)]
    no_bot: bool,
}

/// Companion bot connection and its update loop.
struct CompanionBot {
    bot: Arc<TelegramBot>,
    task: JoinHandle<()>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let mut settings = BotSettings::from_env_with_defaults();
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }
    let paths = settings.paths();
    std::fs::create_dir_all(paths.session_dir())
        .with_context(|| format!("Failed to create data directory {}", paths.root().display()))?;

    // Owner account
    let owner = TelegramBot::connect(&tg_config.session_path, tg_config.api_id)
        .await
        .context("Failed to connect to Telegram")?;

    if !owner.is_authorized().await.context("Failed to check authorization")? {
        if args.qr {
            authenticate_qr(&owner, &tg_config).await?;
        } else {
            authenticate(&owner, &tg_config).await?;
        }
    }

    let me = owner.me().await.context("Failed to fetch the owner account")?;
    let owner_id = settings.owner_id.unwrap_or(me.id);
    if owner_id != me.id {
        warn!(
            "OWNER_ID {} differs from the logged-in account {}; owner commands only work from {}",
            owner_id, me.id, owner_id
        );
    }
    info!("Logged in as {} ({})", me.first_name, me.id);

    // Stores and command handling
    let prefixes = Arc::new(PrefixStore::new(paths.prefixes(), settings.default_prefix.clone()));
    let premium = Arc::new(PremiumRegistry::new(paths.premium()));
    let registry = Arc::new(SessionRegistry::new(paths.sessions()));
    let online = Arc::new(RwLock::new(BTreeSet::new()));

    let handler = Arc::new(CommandHandler::new(
        owner_id,
        Arc::clone(&prefixes),
        Arc::clone(&premium),
        Arc::clone(&registry),
        Arc::clone(&online),
        settings.mirror_emoji.clone(),
    ));

    let manager = SessionManager::new(
        tg_config.api_id,
        Arc::clone(&handler),
        Arc::clone(&premium),
        Arc::clone(&registry),
        online,
        Duration::from_millis(settings.min_reaction_interval_ms),
    );

    let report = manager
        .restore_all()
        .await
        .context("Failed to read stored sessions")?;
    for (user_id, reason) in &report.failed {
        warn!("Session {} not restored: {}", user_id, reason);
    }

    let owner = Arc::new(owner);
    let owner_updates = owner.take_updates().await?;
    let owner_task = manager.spawn_runner(me.id, owner_updates);

    // Companion bot
    let companion = match settings.bot_token.clone() {
        Some(_) if args.no_bot => {
            info!("Companion bot disabled by --no-bot");
            None
        }
        Some(token) => {
            match start_companion_bot(&tg_config, &settings, &token, &paths, &premium, &registry, &manager).await {
                Ok(companion) => Some(companion),
                Err(e) => {
                    warn!("Companion bot not started: {:#}", e);
                    None
                }
            }
        }
        None => {
            info!("BOT_TOKEN not set, premium users cannot connect new sessions");
            None
        }
    };

    // Expiry sweeper
    let (sweep_tx, sweep_rx) = mpsc::channel::<SweepMessage>(8);
    let sweeper = ExpirySweeper::new(
        Arc::clone(&premium),
        Arc::clone(&manager),
        Duration::from_secs(settings.expiry_check_secs),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweep_rx).await;
    });

    info!("Userbot is running. Prefix: {}", settings.default_prefix);
    info!("Use Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    let _ = sweep_tx.send(SweepMessage::Shutdown).await;
    let _ = sweeper_handle.await;

    if let Some(companion) = companion {
        companion.task.abort();
        companion.bot.disconnect();
    }

    manager.shutdown().await;
    owner_task.abort();
    owner.disconnect();

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Signs the companion bot in and starts serving private chats.
async fn start_companion_bot(
    tg_config: &TelegramConfig,
    settings: &BotSettings,
    token: &str,
    paths: &DataPaths,
    premium: &Arc<PremiumRegistry>,
    registry: &Arc<SessionRegistry>,
    manager: &Arc<SessionManager>,
) -> Result<CompanionBot> {
    let bot = TelegramBot::connect(&settings.bot_session_path, tg_config.api_id)
        .await
        .context("Failed to connect the companion bot")?;

    if !bot.is_authorized().await? {
        bot.bot_sign_in(token, &tg_config.api_hash)
            .await
            .context("Companion bot sign in failed")?;
    }

    let account = bot.me().await?;
    if !account.is_bot {
        bail!("{} is not a bot account", bot.session_path().display());
    }
    info!(
        "Companion bot @{} ready",
        account.username.as_deref().unwrap_or(&account.first_name)
    );

    let authenticator = TelegramAuthenticator::new(
        tg_config.api_id,
        tg_config.api_hash.clone(),
        paths.clone(),
    );
    let frontend = Arc::new(BotFrontend::new(
        LoginFlow::new(authenticator, settings.login_attempts),
        Arc::clone(premium),
        Arc::clone(registry),
        Arc::clone(manager),
        settings.default_prefix.clone(),
    ));

    let bot = Arc::new(bot);
    let updates = bot.take_updates().await?;
    let task = tokio::spawn(frontend.run(updates));

    Ok(CompanionBot { bot, task })
}

/// Handles owner authentication with phone, code and 2FA prompts.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => Ok(()),
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");
            info!("Password hint: {}", password_token.hint().unwrap_or("no hint"));

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}

/// Handles owner authentication by scanning a QR code.
///
/// Falls back to phone login when the account needs 2FA or lives on
/// another datacenter.
async fn authenticate_qr(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required, showing QR code");
    let mut shown: Option<Vec<u8>> = None;

    loop {
        match bot
            .export_login_token(config.api_id, &config.api_hash)
            .await
            .context("Failed to request QR login token")?
        {
            QrAuthResult::Token { token, expires } => {
                if shown.as_ref() != Some(&token) {
                    let expires_in = (i64::from(expires) - Utc::now().timestamp()).max(0);
                    show_login_qr(&login_url(&token), expires_in)?;
                    shown = Some(token);
                }
                tokio::time::sleep(QR_POLL_INTERVAL).await;
            }
            QrAuthResult::Success => {
                info!("QR code accepted");
                return Ok(());
            }
            QrAuthResult::PasswordRequired => {
                info!("The account has 2FA enabled, switching to phone login");
                return authenticate(bot, config).await;
            }
            QrAuthResult::MigrateTo { dc_id } => {
                info!("The account lives on DC {}, switching to phone login", dc_id);
                return authenticate(bot, config).await;
            }
        }
    }
}
