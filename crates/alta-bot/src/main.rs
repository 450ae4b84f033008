//! Binary entry point for the bot application.

use alta_bot::{app, cli::CliArgs, config::AppConfig, logging::setup_logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging must come up before the config load so load-time messages
    // are visible; the file's logging section is applied on a best-effort
    // peek at the same path.
    let logging_settings = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    setup_logging(&logging_settings, args.json_logs)?;

    app::run(args).await
}
