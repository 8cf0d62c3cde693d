//! TarangIO - network interface daemon for a USB-attached oscilloscope

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tarang_io::discovery::MdnsAdvertiser;
use tarang_io::scope::create_scope;
use tarang_io::server::{InterfaceServer, State};
use tarang_io::{Config, Error, Result};

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("TarangIO v0.3.0 starting...");

    // Get config path from args or default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tarangio.toml".to_string());

    // Load configuration
    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;

    log::info!(
        "Device: {} ({})",
        config.device.name,
        config.device.device_type
    );

    // Create scope driver and advertiser
    let scope = create_scope(&config)?;
    let advertiser = MdnsAdvertiser::new(config.network.txt.clone())?;

    let server = InterfaceServer::new(scope, Box::new(advertiser), config.network.clone())?;
    server.set_state_callback(|state| log::info!("Server state: {:?}", state));

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    server.start();
    log::info!("TarangIO running. Press Ctrl-C to stop.");

    // The server restarts its session after every client disconnect; the
    // daemon only exits on a signal or once the server destroys itself
    // after a scope failure.
    while running.load(Ordering::Relaxed) {
        match server.state() {
            State::Destroyed => {
                log::error!("Server destroyed itself; scope presumed unhealthy");
                break;
            }
            State::Stopped => server.start(),
            _ => {}
        }
        thread::sleep(Duration::from_millis(100));
    }

    // Shutdown
    log::info!("Shutting down...");
    drop(server);

    log::info!("TarangIO stopped");
    Ok(())
}
