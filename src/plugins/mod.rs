//! Plugin sets loaded per account.
//!
//! Commands are grouped into plugins. Which plugins an account can use
//! depends on whether it is the owner or a premium user (and on their
//! plan), minus the plugins the user switched off.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::Plan;

/// A group of related commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plugin {
    /// ping, alive, id, help, premium
    Core,
    /// prefix
    Prefix,
    /// mirror
    Mirror,
    /// plugins, enable, disable
    Plugins,
    /// grant, revoke, premiums, sessions, kick
    Admin,
}

impl Plugin {
    pub const ALL: [Self; 5] = [
        Self::Core,
        Self::Prefix,
        Self::Mirror,
        Self::Plugins,
        Self::Admin,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Prefix => "prefix",
            Self::Mirror => "mirror",
            Self::Plugins => "plugins",
            Self::Admin => "admin",
        }
    }

    /// Plugins that cannot be disabled.
    #[must_use]
    pub const fn is_essential(self) -> bool {
        matches!(self, Self::Core | Self::Plugins)
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Plugin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| format!("unknown plugin '{wanted}'"))
    }
}

/// Who an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Owner,
    Premium(Plan),
}

/// The plugins enabled for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSet {
    enabled: BTreeSet<Plugin>,
}

impl PluginSet {
    /// Every plugin an account of this kind may use.
    #[must_use]
    pub fn available(kind: AccountKind) -> BTreeSet<Plugin> {
        match kind {
            AccountKind::Owner => Plugin::ALL.into_iter().collect(),
            AccountKind::Premium(Plan::Basic) => {
                [Plugin::Core, Plugin::Prefix, Plugin::Plugins].into_iter().collect()
            }
            AccountKind::Premium(Plan::Pro) => [
                Plugin::Core,
                Plugin::Prefix,
                Plugin::Plugins,
                Plugin::Mirror,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Builds the set for an account, honouring user-disabled plugins.
    #[must_use]
    pub fn for_account(kind: AccountKind, disabled: &[Plugin]) -> Self {
        let enabled = Self::available(kind)
            .into_iter()
            .filter(|p| p.is_essential() || !disabled.contains(p))
            .collect();
        Self { enabled }
    }

    #[must_use]
    pub fn contains(&self, plugin: Plugin) -> bool {
        self.enabled.contains(&plugin)
    }

    pub fn iter(&self) -> impl Iterator<Item = Plugin> + '_ {
        self.enabled.iter().copied()
    }
}
