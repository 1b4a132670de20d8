//! Command types and definitions.

use std::fmt;

use crate::plugins::Plugin;
use crate::store::Plan;

/// Arguments of the `prefix` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixArg {
    Show,
    Set(String),
    Reset,
}

/// Arguments of the `mirror` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorArg {
    Status,
    On,
    Off,
    Emoji(String),
}

/// Arguments for granting premium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantArgs {
    pub user_id: i64,
    pub plan: Plan,
    /// `None` grants an unlimited subscription.
    pub days: Option<u32>,
}

/// Commands understood by every userbot session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Measure round trip.
    Ping,

    /// Show that the session is up.
    Alive,

    /// Show account and chat IDs.
    Id,

    /// Show the commands available to this account.
    Help,

    /// Show the subscription of this account.
    Premium,

    /// Show or change the command prefix.
    Prefix(PrefixArg),

    /// List plugins and their state.
    Plugins,

    /// Enable a plugin by name.
    Enable(String),

    /// Disable a plugin by name.
    Disable(String),

    /// Configure reaction mirroring.
    Mirror(MirrorArg),

    /// Grant premium to a user (owner only).
    Grant(GrantArgs),

    /// Revoke premium from a user (owner only).
    Revoke(i64),

    /// List premium users (owner only).
    Premiums,

    /// List connected sessions (owner only).
    Sessions,

    /// Disconnect a premium session (owner only).
    Kick(i64),
}

impl UserCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a valid command.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();

        let after_prefix = text.strip_prefix(prefix)?.trim_start();
        if after_prefix.is_empty() {
            return None;
        }

        let (cmd, args) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd.to_lowercase(), Some(args.trim())),
            None => (after_prefix.to_lowercase(), None),
        };
        let args = args.filter(|a| !a.is_empty());

        match cmd.as_str() {
            "ping" | "p" => Some(Self::Ping),
            "alive" | "up" => Some(Self::Alive),
            "id" | "whoami" => Some(Self::Id),
            "help" | "h" | "?" => Some(Self::Help),
            "premium" | "sub" => Some(Self::Premium),
            "prefix" | "setprefix" => Some(Self::Prefix(match args {
                None => PrefixArg::Show,
                Some(a) if a.eq_ignore_ascii_case("reset") => PrefixArg::Reset,
                Some(a) => PrefixArg::Set(a.to_owned()),
            })),
            "plugins" | "pl" => Some(Self::Plugins),
            "enable" => args.map(|a| Self::Enable(a.to_lowercase())),
            "disable" => args.map(|a| Self::Disable(a.to_lowercase())),
            "mirror" => Some(Self::Mirror(match args {
                None => MirrorArg::Status,
                Some(a) if a.eq_ignore_ascii_case("on") => MirrorArg::On,
                Some(a) if a.eq_ignore_ascii_case("off") => MirrorArg::Off,
                Some(a) => MirrorArg::Emoji(a.to_owned()),
            })),
            "grant" | "addpremium" => Self::parse_grant(args?),
            "revoke" | "delpremium" => Self::parse_user_id(args?).map(Self::Revoke),
            "premiums" | "subs" => Some(Self::Premiums),
            "sessions" | "ss" => Some(Self::Sessions),
            "kick" => Self::parse_user_id(args?).map(Self::Kick),
            _ => None,
        }
    }

    /// Parses grant arguments: `<user_id> <plan> [days]`
    fn parse_grant(args: &str) -> Option<Self> {
        let mut parts = args.split_whitespace();
        let user_id = Self::parse_user_id(parts.next()?)?;
        let plan = parts.next()?.parse().ok()?;
        let days = match parts.next() {
            Some(d) => Some(d.parse().ok().filter(|&d: &u32| d > 0)?),
            None => None,
        };

        if parts.next().is_some() {
            return None;
        }

        Some(Self::Grant(GrantArgs { user_id, plan, days }))
    }

    fn parse_user_id(arg: &str) -> Option<i64> {
        arg.split_whitespace()
            .next()?
            .parse()
            .ok()
            .filter(|&id: &i64| id > 0)
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Alive => "alive",
            Self::Id => "id",
            Self::Help => "help",
            Self::Premium => "premium",
            Self::Prefix(_) => "prefix",
            Self::Plugins => "plugins",
            Self::Enable(_) => "enable",
            Self::Disable(_) => "disable",
            Self::Mirror(_) => "mirror",
            Self::Grant(_) => "grant",
            Self::Revoke(_) => "revoke",
            Self::Premiums => "premiums",
            Self::Sessions => "sessions",
            Self::Kick(_) => "kick",
        }
    }

    /// Plugin that provides this command.
    #[must_use]
    pub const fn plugin(&self) -> Plugin {
        match self {
            Self::Ping | Self::Alive | Self::Id | Self::Help | Self::Premium => Plugin::Core,
            Self::Prefix(_) => Plugin::Prefix,
            Self::Plugins | Self::Enable(_) | Self::Disable(_) => Plugin::Plugins,
            Self::Mirror(_) => Plugin::Mirror,
            Self::Grant(_) | Self::Revoke(_) | Self::Premiums | Self::Sessions | Self::Kick(_) => {
                Plugin::Admin
            }
        }
    }

    /// Returns every command usage line with its plugin.
    #[must_use]
    pub fn all_commands() -> Vec<(Plugin, &'static str, &'static str)> {
        vec![
            (Plugin::Core, "ping", "Check response time"),
            (Plugin::Core, "alive", "Show uptime and version"),
            (Plugin::Core, "id", "Show account and chat IDs"),
            (Plugin::Core, "premium", "Show your subscription"),
            (Plugin::Core, "help", "Show this help message"),
            (Plugin::Prefix, "prefix [new|reset]", "Show or change the command prefix"),
            (Plugin::Plugins, "plugins", "List plugins"),
            (Plugin::Plugins, "enable <plugin>", "Enable a plugin"),
            (Plugin::Plugins, "disable <plugin>", "Disable a plugin"),
            (Plugin::Mirror, "mirror [on|off|emoji]", "Mirror the owner with reactions"),
            (Plugin::Admin, "grant <id> <plan> [days]", "Grant premium"),
            (Plugin::Admin, "revoke <id>", "Revoke premium and disconnect"),
            (Plugin::Admin, "premiums", "List premium users"),
            (Plugin::Admin, "sessions", "List connected sessions"),
            (Plugin::Admin, "kick <id>", "Disconnect a session"),
        ]
    }
}

impl fmt::Display for UserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(PrefixArg::Set(p)) => write!(f, "prefix {p}"),
            Self::Prefix(PrefixArg::Reset) => write!(f, "prefix reset"),
            Self::Enable(p) => write!(f, "enable {p}"),
            Self::Disable(p) => write!(f, "disable {p}"),
            Self::Mirror(MirrorArg::On) => write!(f, "mirror on"),
            Self::Mirror(MirrorArg::Off) => write!(f, "mirror off"),
            Self::Mirror(MirrorArg::Emoji(e)) => write!(f, "mirror {e}"),
            Self::Grant(args) => match args.days {
                Some(days) => write!(f, "grant {} {} {days}", args.user_id, args.plan),
                None => write!(f, "grant {} {}", args.user_id, args.plan),
            },
            Self::Revoke(id) => write!(f, "revoke {id}"),
            Self::Kick(id) => write!(f, "kick {id}"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Side effect the runtime performs after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    None,
    /// Disconnect a premium session; `forget` also drops its record.
    Disconnect { user_id: i64, forget: bool },
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,

    pub action: CommandAction,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: CommandAction::None,
        }
    }

    /// Creates a successful result that asks for a session to be dropped.
    #[must_use]
    pub fn success_with_disconnect(message: impl Into<String>, user_id: i64, forget: bool) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: CommandAction::Disconnect { user_id, forget },
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            action: CommandAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = ".";

    #[test]
    fn test_parse_simple() {
        assert_eq!(UserCommand::parse(".ping", PREFIX), Some(UserCommand::Ping));
        assert_eq!(UserCommand::parse(".alive", PREFIX), Some(UserCommand::Alive));
        assert_eq!(UserCommand::parse(".?", PREFIX), Some(UserCommand::Help));
    }

    #[test]
    fn test_parse_prefix_variants() {
        assert_eq!(
            UserCommand::parse(".prefix", PREFIX),
            Some(UserCommand::Prefix(PrefixArg::Show))
        );
        assert_eq!(
            UserCommand::parse(".prefix !", PREFIX),
            Some(UserCommand::Prefix(PrefixArg::Set("!".to_owned())))
        );
        assert_eq!(
            UserCommand::parse(".prefix RESET", PREFIX),
            Some(UserCommand::Prefix(PrefixArg::Reset))
        );
    }

    #[test]
    fn test_parse_mirror() {
        assert_eq!(
            UserCommand::parse(".mirror on", PREFIX),
            Some(UserCommand::Mirror(MirrorArg::On))
        );
        assert_eq!(
            UserCommand::parse(".mirror 🔥", PREFIX),
            Some(UserCommand::Mirror(MirrorArg::Emoji("🔥".to_owned())))
        );
    }

    #[test]
    fn test_parse_grant() {
        assert_eq!(
            UserCommand::parse(".grant 123 pro 30", PREFIX),
            Some(UserCommand::Grant(GrantArgs {
                user_id: 123,
                plan: Plan::Pro,
                days: Some(30),
            }))
        );
        assert_eq!(
            UserCommand::parse(".grant 123 basic", PREFIX),
            Some(UserCommand::Grant(GrantArgs {
                user_id: 123,
                plan: Plan::Basic,
                days: None,
            }))
        );
    }

    #[test]
    fn test_parse_grant_rejects_bad_args() {
        assert_eq!(UserCommand::parse(".grant", PREFIX), None);
        assert_eq!(UserCommand::parse(".grant abc pro", PREFIX), None);
        assert_eq!(UserCommand::parse(".grant 123 gold", PREFIX), None);
        assert_eq!(UserCommand::parse(".grant 123 pro 0", PREFIX), None);
        assert_eq!(UserCommand::parse(".grant 123 pro 5 extra", PREFIX), None);
    }

    #[test]
    fn test_parse_user_id_commands() {
        assert_eq!(UserCommand::parse(".revoke 55", PREFIX), Some(UserCommand::Revoke(55)));
        assert_eq!(UserCommand::parse(".kick 55", PREFIX), Some(UserCommand::Kick(55)));
        assert_eq!(UserCommand::parse(".kick -5", PREFIX), None);
        assert_eq!(UserCommand::parse(".kick", PREFIX), None);
    }

    #[test]
    fn test_parse_wrong_prefix() {
        assert_eq!(UserCommand::parse("!ping", PREFIX), None);
        assert_eq!(UserCommand::parse("ping", PREFIX), None);
        assert_eq!(UserCommand::parse(".", PREFIX), None);
    }

    #[test]
    fn test_parse_multichar_prefix() {
        assert_eq!(UserCommand::parse("$$ping", "$$"), Some(UserCommand::Ping));
        assert_eq!(UserCommand::parse("$ping", "$$"), None);
    }

    #[test]
    fn test_parse_case_insensitive_and_whitespace() {
        assert_eq!(UserCommand::parse("  .PING  ", PREFIX), Some(UserCommand::Ping));
        assert_eq!(
            UserCommand::parse(".Enable  Mirror ", PREFIX),
            Some(UserCommand::Enable("mirror".to_owned()))
        );
    }

    #[test]
    fn test_plugin_mapping() {
        assert_eq!(UserCommand::Ping.plugin(), Plugin::Core);
        assert_eq!(UserCommand::Kick(1).plugin(), Plugin::Admin);
        assert_eq!(UserCommand::Mirror(MirrorArg::On).plugin(), Plugin::Mirror);
    }

    #[test]
    fn test_display() {
        let cmd = UserCommand::Grant(GrantArgs {
            user_id: 7,
            plan: Plan::Basic,
            days: Some(3),
        });
        assert_eq!(cmd.to_string(), "grant 7 basic 3");
        assert_eq!(UserCommand::Sessions.to_string(), "sessions");
    }
}
