//! Companion bot frontend.
//!
//! Premium users talk to the bot in a private chat to connect their own
//! account: `/connect` starts the login flow, free text feeds it, and a
//! finished login is stored and attached to the session manager.

mod frontend;
mod types;

pub use frontend::BotFrontend;
pub use types::{BotAction, BotRequest, BotResponse};
