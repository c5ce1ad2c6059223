//! Shared types, config, and error definitions for the breakout bot.

pub mod broker;
pub mod config;
pub mod error;
pub mod types;

pub use broker::{Brokerage, MarketData};
pub use config::BotConfig;
pub use error::Error;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
