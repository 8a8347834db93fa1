use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use leapntpd::clock::SystemTimeSource;
use leapntpd::config::{Args, ServerConfig};
use leapntpd::ntp_server::NtpServer;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let true_start = Utc::now();
    let config = ServerConfig::from_args(&args)?;
    let simulation = config.simulation(true_start)?;
    info!("[Config] {}", config.to_json()?);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let server = NtpServer::bind(config.listen_addr(), simulation, SystemTimeSource)?;
    server.run(running)?;

    info!("Exiting.");
    Ok(())
}
