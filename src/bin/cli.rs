use clap::{CommandFactory, Parser};
use color_eyre::eyre::{eyre, Result};
use tokio::sync::{broadcast, mpsc, watch};

use nats_top::cli::config::Args;
use nats_top::cli::fetch::{build_client, Engine, PollRequest, PollStatus};
use nats_top::cli::logging;
use nats_top::cli::tui::{
    run_tui, spawn_input_reader, Dashboard, StalePolicy, TerminalGuard, INPUT_QUEUE,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    if args.version {
        println!("nats-top v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let settings = match args.into_settings() {
        Ok(s) => s,
        Err(e) => Args::command()
            .error(clap::error::ErrorKind::InvalidValue, e)
            .exit(),
    };
    logging::init(settings.log_file.as_deref()).map_err(|e| eyre!("{e:#}"))?;

    // TLS material is loaded before the terminal is touched.
    let client = build_client(settings.tls.as_ref(), settings.timeout).map_err(|e| eyre!("{e:#}"))?;
    let engine = Engine::new(settings.uri.clone(), client);

    let (requests_tx, requests_rx) = watch::channel(PollRequest::from(&settings.dashboard));
    let (feed_tx, feed_rx) = watch::channel(PollStatus::default());
    let (shutdown_tx, _) = broadcast::channel(1);
    let poller = tokio::spawn(engine.monitor(requests_rx, feed_tx, shutdown_tx.subscribe()));

    let (guard, mut terminal) = match TerminalGuard::enter() {
        Ok(t) => t,
        Err(e) => {
            let _ = shutdown_tx.send(());
            return Err(eyre!("initializing terminal: {e:#}"));
        }
    };

    let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
    spawn_input_reader(input_tx).map_err(|e| eyre!("{e:#}"))?;

    let mut dashboard = Dashboard::new(
        settings.dashboard,
        StalePolicy { after: settings.stale_after },
        requests_tx,
    );
    let result = run_tui(&mut terminal, &mut dashboard, input_rx, feed_rx, &shutdown_tx).await;
    drop(guard);

    let _ = shutdown_tx.send(());
    let _ = poller.await;
    log::info!("bye");
    result.map_err(|e| eyre!("{e:#}"))
}
