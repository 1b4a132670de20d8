//! Command handling module.
//!
//! Processes commands that an account sends from its own session.
//! Each account has its own prefix (default `.`).

mod handler;
mod types;

pub use handler::{CommandContext, CommandHandler};
pub use types::{CommandAction, CommandResult, GrantArgs, MirrorArg, PrefixArg, UserCommand};
