//! Premium Userbot Library
//!
//! A Telegram userbot running under the owner's account, with a premium
//! subscription system that lets paying users connect their own accounts.
//!
//! This crate provides the core functionality for:
//! - Storing prefixes, premium grants and sessions in flat JSON files
//! - Logging premium accounts in through the companion bot
//! - Restoring and running every premium session
//! - Handling per-account commands scoped by plan and plugins

pub mod bot;
pub mod commands;
pub mod config;
pub mod expiry;
pub mod login;
pub mod plugins;
pub mod sessions;
pub mod store;
pub mod telegram;
