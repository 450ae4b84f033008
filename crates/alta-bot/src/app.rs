//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that orchestrates client
//! startup, event logging, and graceful shutdown.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::wait_for_shutdown};
use alta_client::{Client, ClientEvent};
use std::sync::Arc;
use tracing::{error, info};

/// Manages the complete lifecycle of the bot process.
///
/// # Process
///
/// 1. Load configuration from file (creating a default if missing)
/// 2. Apply command-line overrides and validate
/// 3. Construct the client
/// 4. Start it and log its event stream
/// 5. Stop cleanly on a termination signal
pub struct Application {
    config: AppConfig,
    client: Arc<Client>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` ready to run, or an error if
    /// initialization failed.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }

        display_banner();

        let client = Client::new(config.to_client_config())?;
        Ok(Self { config, client })
    }

    /// Runs the application until a termination signal arrives.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the application ran and shut down successfully, or an
    /// error on a critical startup failure.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let mut events = self.client.subscribe_events();
        let event_task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ClientEvent::Ready => info!("Client ready"),
                    ClientEvent::Connect(console) => {
                        info!("Console open for server {}", console.server_id());
                    }
                }
            }
        });

        self.client.start().await?;
        if !self.config.client.included_groups.is_empty() {
            info!(
                "Allowlist active: {:?}",
                self.config.client.included_groups
            );
        }

        wait_for_shutdown().await?;

        self.client.stop().await;
        event_task.abort();
        info!("Shutdown complete");
        Ok(())
    }
}

/// Entry point shared by `main` so errors funnel through one place.
pub async fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    match Application::new(args).await {
        Ok(app) => app.run().await,
        Err(e) => {
            error!("Startup failed: {e}");
            Err(e)
        }
    }
}
