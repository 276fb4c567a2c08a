use anyhow::Context;
use mailclick::{
    CdpActionDriver, Config, CtrlCShutdown, ImapMailWatcher, MailConfig, OrchestratorBuilder,
    Tracker,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "scanner terminated");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let tracker = Tracker::load(&config.ledger_path)
        .await
        .context("loading processed-message ledger")?;
    info!(
        ledger = %config.ledger_path.display(),
        processed = tracker.count(),
        "ledger loaded"
    );

    let watcher = ImapMailWatcher::connect(MailConfig {
        host: config.imap_host.clone(),
        port: config.imap_port,
        email: config.email.clone(),
        password: config.password.clone(),
    })
    .await
    .context("connecting to mailbox")?;

    let driver = CdpActionDriver::launch(config.headless, config.nav_timeout)
        .await
        .context("launching browser")?;

    let orchestrator = OrchestratorBuilder::new(config)
        .with_watcher(Box::new(watcher))
        .with_driver(Box::new(driver))
        .with_tracker(tracker)
        .with_shutdown_handler(CtrlCShutdown::new())
        .build()?;

    orchestrator.run().await?;
    Ok(())
}
