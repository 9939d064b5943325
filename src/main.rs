// src/main.rs

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use modtrack::config::{Config, VERSION};
use modtrack::tracker::bot::Bot;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("modtrack=info,twitch_irc=warn"));
    let sub = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).expect("failed to set global subscriber");
}

/// Block until any of the shutdown signals arrives.
async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigabrt = signal(SignalKind::from_raw(libc::SIGABRT))?;
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
        _ = sigabrt.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("initializing moderation tracker v{VERSION}...");

    let cfg = Config::from_env()?;
    let bot = Bot::start(&cfg).await?;

    wait_for_signal().await?;
    info!("stopping moderation tracker");
    bot.stop().await;
    Ok(())
}
