//! Vital-sign broadcast server.
//!
//! Runs the synthetic generator and pushes every message to all WebSocket
//! peers connected on `/ws`. `GET /health` answers `OK`.

use anyhow::Result;
use lib_vitals::generator::Generator;
use lib_vitals::server::{self, PeerHub};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

mod vitals_logic;
use vitals_logic::{config, logger, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level, "vitals_server")?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let hub = Arc::new(PeerHub::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(server::serve(listener, Arc::clone(&hub), shutdown_tx.subscribe()));

    let generator = Generator::new(settings.generator.clone(), hub.clone());
    generator.start();

    shutdown::wait_for_signal().await;

    // Stop producing before the peers are closed
    generator.stop();
    let _ = shutdown_tx.send(());

    server_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}
