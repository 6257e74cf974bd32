#[cfg(feature = "adc")]
mod adc;
mod config;
mod firmware;
mod gpio;
mod link;
mod mqtt;
mod persist;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod surface;
mod web;

use anyhow::{anyhow, Context, Result};
use std::{env, sync::Arc, thread};
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use firmware::Firmware;
use state::SystemState;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "station.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.station.name)));
    {
        let mut st = shared.write().await;
        st.record_system(format!("station '{}' started", cfg.station.name));
    }

    // ── Firmware thread ─────────────────────────────────────────────
    // The firmware blocks (pump runs, deep sleep, the mqtt connection), so
    // it gets a plain OS thread and talks to the web side over a channel.
    let (posts_tx, posts_rx) = mpsc::unbounded_channel();
    let fw_state = Arc::clone(&shared);
    let fw_cfg = cfg.clone();
    let firmware = thread::Builder::new()
        .name("firmware".into())
        .spawn(move || -> Result<()> { Firmware::new(fw_cfg, fw_state, posts_rx)?.run() })
        .context("failed to spawn firmware thread")?;

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        state: Arc::clone(&shared),
        posts: posts_tx,
    };
    let port = cfg.web.port;
    let web = tokio::spawn(async move {
        if let Err(e) = web::serve(app, port).await {
            tracing::error!("{e:#}");
        }
    });

    let result = tokio::task::spawn_blocking(move || firmware.join())
        .await
        .context("failed to wait for firmware")?
        .map_err(|_| anyhow!("firmware thread panicked"))?;
    web.abort();

    match &result {
        Ok(()) => tracing::info!("firmware halted"),
        Err(e) => tracing::error!("firmware stopped: {e:#}"),
    }
    result
}
