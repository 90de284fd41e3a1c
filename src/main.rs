use anyhow::anyhow;
use clap::Parser;
use page_capture::{load_config, setup_logging, Cli, CliRunner};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose).map_err(|e| anyhow!("{e}"))?;

    info!("Starting page-capture v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await.map_err(|e| anyhow!("{e}"))?;

    let cli_runner = CliRunner::new(config).with_json(args.json);

    // Ctrl-C / SIGTERM cancel the running capture; teardown still runs
    let cancel = CancellationToken::new();
    let _shutdown_handler = setup_shutdown_handler(cancel.clone());

    let result = cli_runner.run(args.command, cancel).await;

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("page-capture finished");
    Ok(())
}

fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to create SIGTERM handler: {}", e);
                    let _ = signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received SIGINT");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            info!("Received Ctrl-C");
        }

        cancel.cancel();
    })
}
