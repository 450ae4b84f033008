//! # alta-bot
//!
//! The runnable shell around [`alta_client`]: CLI parsing, TOML
//! configuration, logging initialization, and signal-driven shutdown.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;
