//! # alta-client
//!
//! A long-running client that federates a fleet of game-server group
//! accounts behind a single identity. The platform exposes a REST API for
//! group/server/member metadata, an authenticated account WebSocket that
//! streams account-level events and carries correlated RPCs, and
//! per-server console WebSockets reached through short-lived tokens.
//!
//! ## Architecture
//!
//! * **Token manager** - obtains and refreshes the JWT, decodes claims,
//!   and exposes the current bearer to every other component.
//! * **REST gateway** - bearer-authenticated requests with retries,
//!   timeouts, and header-token pagination.
//! * **Account-socket pool** - each instance owns one authenticated
//!   socket with pings, routine migration (the platform expires sockets
//!   after roughly two hours), RPC correlation, and recovery that
//!   re-posts every subscription after an abnormal close. The
//!   subscription router fans subscriptions out across the pool under a
//!   per-socket cap.
//! * **Managed entities** - group managers track roles and permissions
//!   and reconcile their servers' console connections from streamed
//!   heartbeats; server managers own at most one console connection each.
//! * **Supervisor** - the [`Client`]: start/stop, account-level event
//!   handling, allow/deny reconciliation, and the public `Ready`/
//!   `Connect` event surface.
//!
//! ## Example
//!
//! ```no_run
//! use alta_client::{Client, ClientConfig, ClientEvent, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         client_id: Some("my-bot".to_string()),
//!         client_secret: Some("secret".to_string()),
//!         scopes: vec![Scope::WsGroup, Scope::ServerConsole],
//!         ..ClientConfig::default()
//!     };
//!     let client = Client::new(config)?;
//!     let mut events = client.subscribe_events();
//!     client.start().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::Connect(console) = event {
//!             console.send("player list").await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub use client::{Client, ClientReadyState};
pub use config::{ClientConfig, Scope};
pub use console::{CommandResult, ConsoleConnection, ConsoleMessage};
pub use error::ClientError;
pub use events::ClientEvent;
pub use logging::LogVerbosity;

pub mod auth;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod group;
pub mod logging;
pub mod rest;
pub mod socket;
pub mod workers;


/// User agent presented to the platform on HTTP and WebSocket requests.
pub const USER_AGENT: &str = concat!("alta-client/", env!("CARGO_PKG_VERSION"));
