//! Command handler implementation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{CommandResult, GrantArgs, MirrorArg, PrefixArg, UserCommand};
use crate::config::MAX_GRANT_DAYS;
use crate::plugins::{AccountKind, Plugin, PluginSet};
use crate::store::{PrefixStore, PremiumRegistry, SessionRegistry, StoreError};

/// Where a command was sent from.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Account whose session received the message.
    pub account_id: i64,
    pub chat_id: i64,
    pub message_id: i32,
    /// When Telegram says the message was sent.
    pub sent_at: DateTime<Utc>,
}

/// Handles userbot commands for the owner and every premium session.
pub struct CommandHandler {
    owner_id: i64,
    prefixes: Arc<PrefixStore>,
    premium: Arc<PremiumRegistry>,
    sessions: Arc<SessionRegistry>,
    /// IDs of premium sessions currently connected.
    online: Arc<RwLock<BTreeSet<i64>>>,
    default_mirror_emoji: String,
    started_at: Instant,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        owner_id: i64,
        prefixes: Arc<PrefixStore>,
        premium: Arc<PremiumRegistry>,
        sessions: Arc<SessionRegistry>,
        online: Arc<RwLock<BTreeSet<i64>>>,
        default_mirror_emoji: String,
    ) -> Self {
        Self {
            owner_id,
            prefixes,
            premium,
            sessions,
            online,
            default_mirror_emoji,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn owner_id(&self) -> i64 {
        self.owner_id
    }

    /// Returns the current prefix of an account.
    pub fn prefix_for(&self, account_id: i64) -> String {
        self.prefixes.get(account_id)
    }

    /// Resolves what an account is allowed to be right now.
    ///
    /// Returns `None` for a premium account without an active grant.
    pub fn account_kind(&self, account_id: i64) -> Result<Option<AccountKind>, StoreError> {
        if account_id == self.owner_id {
            return Ok(Some(AccountKind::Owner));
        }
        Ok(self
            .premium
            .active_plan(account_id, Utc::now())?
            .map(AccountKind::Premium))
    }

    /// Builds the plugin set of an account from the JSON stores.
    pub fn plugin_set(&self, account_id: i64, kind: AccountKind) -> Result<PluginSet, StoreError> {
        let disabled = match kind {
            AccountKind::Owner => Vec::new(),
            AccountKind::Premium(_) => self
                .sessions
                .get(account_id)?
                .map(|r| r.disabled_plugins)
                .unwrap_or_default(),
        };
        Ok(PluginSet::for_account(kind, &disabled))
    }

    /// Returns the reaction a premium session mirrors onto the owner's
    /// messages, or `None` when mirroring is off or not allowed.
    pub fn mirror_reaction(&self, account_id: i64) -> Result<Option<String>, StoreError> {
        let Some(kind @ AccountKind::Premium(_)) = self.account_kind(account_id)? else {
            return Ok(None);
        };
        let Some(record) = self.sessions.get(account_id)? else {
            return Ok(None);
        };
        if !record.mirror_reactions
            || !PluginSet::for_account(kind, &record.disabled_plugins).contains(Plugin::Mirror)
        {
            return Ok(None);
        }
        Ok(Some(
            record
                .mirror_emoji
                .unwrap_or_else(|| self.default_mirror_emoji.clone()),
        ))
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(&self, ctx: &CommandContext, message_text: &str) -> Option<CommandResult> {
        let prefix = self.prefix_for(ctx.account_id);
        let command = UserCommand::parse(message_text, &prefix)?;

        debug!("Handling command from {}: {}", ctx.account_id, command);
        let result = self.authorize_and_execute(ctx, command, &prefix).await;
        info!(
            "Command result for {}: success={}",
            ctx.account_id, result.success
        );

        Some(result)
    }

    async fn authorize_and_execute(
        &self,
        ctx: &CommandContext,
        command: UserCommand,
        prefix: &str,
    ) -> CommandResult {
        let kind = match self.account_kind(ctx.account_id) {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                return CommandResult::error(
                    "⛔ Your premium subscription is not active. Contact the owner to renew.",
                );
            }
            Err(e) => {
                warn!("Authorization lookup failed: {}", e);
                return CommandResult::error(format!("Storage error: {e}"));
            }
        };

        let plugins = match self.plugin_set(ctx.account_id, kind) {
            Ok(set) => set,
            Err(e) => {
                warn!("Plugin lookup failed: {}", e);
                return CommandResult::error(format!("Storage error: {e}"));
            }
        };

        let plugin = command.plugin();
        if !plugins.contains(plugin) {
            return if PluginSet::available(kind).contains(&plugin) {
                CommandResult::error(format!(
                    "Plugin '{plugin}' is disabled. Use '{prefix}enable {plugin}'."
                ))
            } else {
                CommandResult::error(format!("'{}' is not available on your plan.", command.name()))
            };
        }

        self.execute(ctx, kind, &plugins, command, prefix).await
    }

    /// Executes a parsed and authorized command.
    async fn execute(
        &self,
        ctx: &CommandContext,
        kind: AccountKind,
        plugins: &PluginSet,
        command: UserCommand,
        prefix: &str,
    ) -> CommandResult {
        match command {
            UserCommand::Ping => Self::handle_ping(ctx),
            UserCommand::Alive => self.handle_alive(kind),
            UserCommand::Id => Self::handle_id(ctx),
            UserCommand::Help => Self::handle_help(plugins, prefix),
            UserCommand::Premium => self.handle_premium(ctx.account_id, kind),
            UserCommand::Prefix(arg) => self.handle_prefix(ctx.account_id, arg, prefix).await,
            UserCommand::Plugins => Self::handle_plugins(kind, plugins),
            UserCommand::Enable(name) => self.handle_toggle(ctx.account_id, kind, &name, true).await,
            UserCommand::Disable(name) => self.handle_toggle(ctx.account_id, kind, &name, false).await,
            UserCommand::Mirror(arg) => self.handle_mirror(ctx.account_id, arg).await,
            UserCommand::Grant(args) => self.handle_grant(args).await,
            UserCommand::Revoke(user_id) => self.handle_revoke(user_id).await,
            UserCommand::Premiums => self.handle_premiums(),
            UserCommand::Sessions => self.handle_sessions().await,
            UserCommand::Kick(user_id) => self.handle_kick(user_id),
        }
    }

    fn handle_ping(ctx: &CommandContext) -> CommandResult {
        let latency = (Utc::now() - ctx.sent_at).num_milliseconds().max(0);
        CommandResult::success(format!("🏓 Pong! {latency} ms"))
    }

    fn handle_alive(&self, kind: AccountKind) -> CommandResult {
        let version = env!("CARGO_PKG_VERSION");
        let account = match kind {
            AccountKind::Owner => "owner".to_owned(),
            AccountKind::Premium(plan) => format!("premium ({plan})"),
        };
        CommandResult::success(format!(
            "✅ Userbot v{version} is alive\nUptime: {}\nAccount: {account}",
            format_duration(self.started_at.elapsed().as_secs())
        ))
    }

    fn handle_id(ctx: &CommandContext) -> CommandResult {
        CommandResult::success(format!(
            "Account ID: {}\nChat ID: {}\nMessage ID: {}",
            ctx.account_id, ctx.chat_id, ctx.message_id
        ))
    }

    fn handle_help(plugins: &PluginSet, prefix: &str) -> CommandResult {
        let mut lines = vec![format!("Userbot commands (prefix: {prefix})"), String::new()];

        for (plugin, usage, desc) in UserCommand::all_commands() {
            if plugins.contains(plugin) {
                lines.push(format!("  {prefix}{usage} - {desc}"));
            }
        }

        CommandResult::success(lines.join("\n"))
    }

    fn handle_premium(&self, account_id: i64, kind: AccountKind) -> CommandResult {
        if kind == AccountKind::Owner {
            return CommandResult::success("👑 Owner account: every plugin, no expiry.");
        }

        match self.premium.get(account_id) {
            Ok(Some(grant)) => {
                let expiry = match grant.expires_at {
                    Some(at) => format!(
                        "{} ({} days left)",
                        at.format("%Y-%m-%d %H:%M UTC"),
                        grant.days_left(Utc::now()).unwrap_or(0)
                    ),
                    None => "never".to_owned(),
                };
                CommandResult::success(format!("💎 Plan: {}\nExpires: {expiry}", grant.plan))
            }
            Ok(None) => CommandResult::error("No subscription found."),
            Err(e) => CommandResult::error(format!("Storage error: {e}")),
        }
    }

    async fn handle_prefix(&self, account_id: i64, arg: PrefixArg, current: &str) -> CommandResult {
        match arg {
            PrefixArg::Show => CommandResult::success(format!("Current prefix: {current}")),
            PrefixArg::Set(new_prefix) => match self.prefixes.set(account_id, &new_prefix).await {
                Ok(()) => CommandResult::success(format!(
                    "✓ Prefix changed: {current} → {new_prefix}\nTry: {new_prefix}help"
                )),
                Err(e) => CommandResult::error(e.to_string()),
            },
            PrefixArg::Reset => match self.prefixes.reset(account_id).await {
                Ok(()) => CommandResult::success(format!(
                    "✓ Prefix reset to {}",
                    self.prefixes.default_prefix()
                )),
                Err(e) => CommandResult::error(e.to_string()),
            },
        }
    }

    fn handle_plugins(kind: AccountKind, plugins: &PluginSet) -> CommandResult {
        let mut lines = vec!["Plugins:".to_owned()];
        for plugin in PluginSet::available(kind) {
            let marker = if plugins.contains(plugin) { "✓" } else { "✗" };
            let note = if plugin.is_essential() { " (required)" } else { "" };
            lines.push(format!("  {marker} {plugin}{note}"));
        }
        CommandResult::success(lines.join("\n"))
    }

    async fn handle_toggle(
        &self,
        account_id: i64,
        kind: AccountKind,
        name: &str,
        enable: bool,
    ) -> CommandResult {
        let plugin: Plugin = match name.parse() {
            Ok(p) => p,
            Err(e) => return CommandResult::error(e),
        };

        if kind == AccountKind::Owner {
            return CommandResult::error("The owner account always has every plugin.");
        }
        if !PluginSet::available(kind).contains(&plugin) {
            return CommandResult::error(format!("Plugin '{plugin}' is not available on your plan."));
        }
        if !enable && plugin.is_essential() {
            return CommandResult::error(format!("Plugin '{plugin}' cannot be disabled."));
        }

        let result = self
            .sessions
            .update(account_id, |record| {
                record.disabled_plugins.retain(|p| *p != plugin);
                if !enable {
                    record.disabled_plugins.push(plugin);
                }
            })
            .await;

        match result {
            Ok(_) if enable => CommandResult::success(format!("✓ Enabled plugin '{plugin}'")),
            Ok(_) => CommandResult::success(format!("✓ Disabled plugin '{plugin}'")),
            Err(e) => CommandResult::error(format!("Failed to save: {e}")),
        }
    }

    async fn handle_mirror(&self, account_id: i64, arg: MirrorArg) -> CommandResult {
        if account_id == self.owner_id {
            return CommandResult::error("Mirroring is configured on premium sessions.");
        }

        let result = match &arg {
            MirrorArg::Status => self
                .sessions
                .get(account_id)
                .and_then(|r| r.ok_or(StoreError::NotFound(account_id))),
            MirrorArg::On => self.sessions.update(account_id, |r| r.mirror_reactions = true).await,
            MirrorArg::Off => self.sessions.update(account_id, |r| r.mirror_reactions = false).await,
            MirrorArg::Emoji(emoji) => {
                if let Err(e) = validate_emoji(emoji) {
                    return CommandResult::error(e);
                }
                self.sessions
                    .update(account_id, |r| {
                        r.mirror_emoji = Some(emoji.clone());
                        r.mirror_reactions = true;
                    })
                    .await
            }
        };

        match result {
            Ok(record) => {
                let state = if record.mirror_reactions { "on" } else { "off" };
                let emoji = record
                    .mirror_emoji
                    .as_deref()
                    .unwrap_or(&self.default_mirror_emoji);
                CommandResult::success(format!("🪞 Mirror: {state} ({emoji})"))
            }
            Err(e) => CommandResult::error(format!("Mirror settings unavailable: {e}")),
        }
    }

    async fn handle_grant(&self, args: GrantArgs) -> CommandResult {
        if args.user_id == self.owner_id {
            return CommandResult::error("The owner does not need premium.");
        }

        match self
            .premium
            .grant(args.user_id, args.plan, args.days, self.owner_id, Utc::now())
            .await
        {
            Ok(grant) => {
                let expiry = grant.expires_at.map_or_else(
                    || "never".to_owned(),
                    |at| at.format("%Y-%m-%d").to_string(),
                );
                CommandResult::success(format!(
                    "✓ Granted {} to {} (expires: {expiry})",
                    grant.plan, args.user_id
                ))
            }
            Err(StoreError::GrantTooLong(_)) => CommandResult::error(format!(
                "Grant length must be between 1 and {MAX_GRANT_DAYS} days."
            )),
            Err(e) => CommandResult::error(format!("Failed to save: {e}")),
        }
    }

    async fn handle_revoke(&self, user_id: i64) -> CommandResult {
        match self.premium.revoke(user_id).await {
            Ok(true) => CommandResult::success_with_disconnect(
                format!("✓ Revoked premium of {user_id}"),
                user_id,
                false,
            ),
            Ok(false) => CommandResult::error(format!("{user_id} has no premium.")),
            Err(e) => CommandResult::error(format!("Failed to save: {e}")),
        }
    }

    fn handle_premiums(&self) -> CommandResult {
        let grants = match self.premium.list() {
            Ok(grants) => grants,
            Err(e) => return CommandResult::error(format!("Storage error: {e}")),
        };

        if grants.is_empty() {
            return CommandResult::success("No premium users.");
        }

        let now = Utc::now();
        let mut lines = vec![format!("Premium users ({}):", grants.len())];
        for (user_id, grant) in grants {
            let status = match (grant.is_active(now), grant.days_left(now)) {
                (false, _) => "expired".to_owned(),
                (true, Some(days)) => format!("{days}d left"),
                (true, None) => "unlimited".to_owned(),
            };
            lines.push(format!("  {user_id} - {} ({status})", grant.plan));
        }
        CommandResult::success(lines.join("\n"))
    }

    async fn handle_sessions(&self) -> CommandResult {
        let records = match self.sessions.list() {
            Ok(records) => records,
            Err(e) => return CommandResult::error(format!("Storage error: {e}")),
        };

        if records.is_empty() {
            return CommandResult::success("No premium sessions.");
        }

        let online = self.online.read().await;
        let mut lines = vec![format!("Sessions ({} stored, {} online):", records.len(), online.len())];
        for record in &records {
            let marker = if online.contains(&record.user_id) { "🟢" } else { "⚪" };
            lines.push(format!(
                "{marker} {} {} since {}",
                record.label(),
                record.phone_hint,
                record.connected_at.format("%Y-%m-%d")
            ));
        }
        CommandResult::success(lines.join("\n"))
    }

    fn handle_kick(&self, user_id: i64) -> CommandResult {
        match self.sessions.get(user_id) {
            Ok(Some(record)) => CommandResult::success_with_disconnect(
                format!("✓ Disconnecting {}", record.label()),
                user_id,
                true,
            ),
            Ok(None) => CommandResult::error(format!("No session stored for {user_id}.")),
            Err(e) => CommandResult::error(format!("Storage error: {e}")),
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

/// Checks a reaction emoji supplied by a user.
fn validate_emoji(emoji: &str) -> Result<(), String> {
    let count = emoji.chars().count();
    if count == 0 || count > 8 {
        return Err("Reaction must be a single emoji.".to_owned());
    }
    if emoji.chars().any(|c| c.is_whitespace() || c.is_ascii_alphanumeric()) {
        return Err("Reaction must be a single emoji.".to_owned());
    }
    Ok(())
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::types::CommandAction;
    use crate::store::Plan;
    use crate::store::SessionRecord;

    const OWNER: i64 = 1;
    const USER: i64 = 100;

    struct Fixture {
        handler: CommandHandler,
        premium: Arc<PremiumRegistry>,
        sessions: Arc<SessionRegistry>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let prefixes = Arc::new(PrefixStore::new(dir.path().join("prefixes.json"), "."));
        let premium = Arc::new(PremiumRegistry::new(dir.path().join("premium.json")));
        let sessions = Arc::new(SessionRegistry::new(dir.path().join("sessions.json")));
        let handler = CommandHandler::new(
            OWNER,
            prefixes,
            Arc::clone(&premium),
            Arc::clone(&sessions),
            Arc::new(RwLock::new(BTreeSet::new())),
            "❤".to_owned(),
        );
        Fixture {
            handler,
            premium,
            sessions,
            _dir: dir,
        }
    }

    fn ctx(account_id: i64) -> CommandContext {
        CommandContext {
            account_id,
            chat_id: 500,
            message_id: 9,
            sent_at: Utc::now(),
        }
    }

    fn record(user_id: i64) -> SessionRecord {
        SessionRecord {
            user_id,
            session_file: format!("{user_id}.session").into(),
            phone_hint: "***0000".to_owned(),
            username: None,
            first_name: "User".to_owned(),
            connected_at: Utc::now(),
            mirror_reactions: false,
            mirror_emoji: None,
            disabled_plugins: Vec::new(),
        }
    }

    async fn premium_user(f: &Fixture, plan: Plan) {
        f.premium.grant(USER, plan, None, OWNER, Utc::now()).await.unwrap();
        f.sessions.upsert(record(USER)).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_command_is_ignored() {
        let f = fixture();
        assert!(f.handler.try_handle(&ctx(OWNER), "hello there").await.is_none());
    }

    #[tokio::test]
    async fn test_owner_can_ping() {
        let f = fixture();
        let result = f.handler.try_handle(&ctx(OWNER), ".ping").await.unwrap();
        assert!(result.success);
        assert!(result.message.starts_with("🏓 Pong!"));
    }

    #[tokio::test]
    async fn test_unpaid_account_is_refused() {
        let f = fixture();
        let result = f.handler.try_handle(&ctx(USER), ".ping").await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("not active"));
    }

    #[tokio::test]
    async fn test_premium_account_uses_core() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;
        let result = f.handler.try_handle(&ctx(USER), ".alive").await.unwrap();
        assert!(result.success);
        assert!(result.message.contains("premium (basic)"));
    }

    #[tokio::test]
    async fn test_premium_account_cannot_use_admin() {
        let f = fixture();
        premium_user(&f, Plan::Pro).await;
        let result = f.handler.try_handle(&ctx(USER), ".grant 5 pro").await.unwrap();
        assert!(!result.success);
        assert!(f.premium.get(5).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_basic_plan_cannot_mirror() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;
        let result = f.handler.try_handle(&ctx(USER), ".mirror on").await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("not available"));
    }

    #[tokio::test]
    async fn test_pro_plan_mirror_on() {
        let f = fixture();
        premium_user(&f, Plan::Pro).await;
        let result = f.handler.try_handle(&ctx(USER), ".mirror 🔥").await.unwrap();
        assert!(result.success, "{}", result.message);

        let stored = f.sessions.get(USER).unwrap().unwrap();
        assert!(stored.mirror_reactions);
        assert_eq!(stored.mirror_emoji.as_deref(), Some("🔥"));
    }

    #[tokio::test]
    async fn test_mirror_reaction_follows_plan_and_switch() {
        let f = fixture();
        assert_eq!(f.handler.mirror_reaction(OWNER).unwrap(), None);

        premium_user(&f, Plan::Pro).await;
        assert_eq!(f.handler.mirror_reaction(USER).unwrap(), None);

        f.handler.try_handle(&ctx(USER), ".mirror on").await.unwrap();
        assert_eq!(f.handler.mirror_reaction(USER).unwrap().as_deref(), Some("❤"));

        f.handler.try_handle(&ctx(USER), ".disable mirror").await.unwrap();
        assert_eq!(f.handler.mirror_reaction(USER).unwrap(), None);
    }

    #[tokio::test]
    async fn test_mirror_reaction_stops_after_downgrade() {
        let f = fixture();
        premium_user(&f, Plan::Pro).await;
        f.handler.try_handle(&ctx(USER), ".mirror 🔥").await.unwrap();
        assert!(f.handler.mirror_reaction(USER).unwrap().is_some());

        f.premium.grant(USER, Plan::Basic, None, OWNER, Utc::now()).await.unwrap();
        assert_eq!(f.handler.mirror_reaction(USER).unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_change_applies_to_next_message() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;

        let result = f.handler.try_handle(&ctx(USER), ".prefix !").await.unwrap();
        assert!(result.success);

        assert!(f.handler.try_handle(&ctx(USER), ".ping").await.is_none());
        assert!(f.handler.try_handle(&ctx(USER), "!ping").await.is_some());
        // Other accounts keep their own prefix.
        assert!(f.handler.try_handle(&ctx(OWNER), ".ping").await.is_some());
    }

    #[tokio::test]
    async fn test_disable_then_enable_plugin() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;

        let result = f.handler.try_handle(&ctx(USER), ".disable prefix").await.unwrap();
        assert!(result.success);

        let result = f.handler.try_handle(&ctx(USER), ".prefix !").await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("disabled"));

        let result = f.handler.try_handle(&ctx(USER), ".enable prefix").await.unwrap();
        assert!(result.success);
        assert!(f.sessions.get(USER).unwrap().unwrap().disabled_plugins.is_empty());
    }

    #[tokio::test]
    async fn test_cannot_disable_essential_plugin() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;
        let result = f.handler.try_handle(&ctx(USER), ".disable core").await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_owner_grant_and_revoke() {
        let f = fixture();

        let result = f.handler.try_handle(&ctx(OWNER), ".grant 200 pro 30").await.unwrap();
        assert!(result.success);
        assert_eq!(f.premium.get(200).unwrap().unwrap().plan, Plan::Pro);

        let result = f.handler.try_handle(&ctx(OWNER), ".revoke 200").await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.action,
            CommandAction::Disconnect {
                user_id: 200,
                forget: false
            }
        );
        assert!(f.premium.get(200).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grant_rejects_huge_duration() {
        let f = fixture();
        let result = f
            .handler
            .try_handle(&ctx(OWNER), ".grant 200 pro 4000000000")
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("36500"));
        assert!(f.premium.get(200).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kick_requires_stored_session() {
        let f = fixture();
        let result = f.handler.try_handle(&ctx(OWNER), ".kick 300").await.unwrap();
        assert!(!result.success);

        f.sessions.upsert(record(300)).await.unwrap();
        let result = f.handler.try_handle(&ctx(OWNER), ".kick 300").await.unwrap();
        assert_eq!(
            result.action,
            CommandAction::Disconnect {
                user_id: 300,
                forget: true
            }
        );
    }

    #[tokio::test]
    async fn test_expired_grant_is_refused_on_next_message() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;
        assert!(f.handler.try_handle(&ctx(USER), ".ping").await.unwrap().success);

        f.premium.revoke(USER).await.unwrap();
        assert!(!f.handler.try_handle(&ctx(USER), ".ping").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_help_lists_only_enabled_plugins() {
        let f = fixture();
        premium_user(&f, Plan::Basic).await;
        let result = f.handler.try_handle(&ctx(USER), ".help").await.unwrap();
        assert!(result.message.contains(".ping"));
        assert!(!result.message.contains(".grant"));
        assert!(!result.message.contains(".mirror"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3660), "1h 1m");
        assert_eq!(format_duration(90_000), "1d 1h");
    }

    #[test]
    fn test_validate_emoji() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("ok").is_err());
        assert!(validate_emoji("👍 👍").is_err());
    }
}
