//! Premium multi-session connection manager.
//!
//! Every premium account gets its own grammers connection and update
//! loop. Sessions are restored from `sessions.json` at startup, and each
//! incoming message is routed to the command handler or the reaction
//! mirror after re-reading the account's settings.

mod manager;
pub mod router;
mod runner;

pub use manager::{RestoreReport, SessionError, SessionManager, retry_fixed};
#[cfg(test)]
pub(crate) use manager::testing;
pub use router::{AccountProfile, IncomingMessage, Route, route};
