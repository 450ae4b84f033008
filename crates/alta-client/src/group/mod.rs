//! Managed entities: groups and their servers.

pub mod manager;
pub mod server;

pub use manager::GroupManager;
pub use server::{ServerConnectionStatus, ServerDescriptor, ServerManager};
