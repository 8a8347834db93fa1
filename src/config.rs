use crate::simulation::{LeapMode, Simulation};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// NTP port
pub const NTP_PORT: u16 = 123;

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "SNTP server that reports a simulated clock", long_about = None)]
pub struct Args {
    /// Insert a positive leap second every simulated day
    #[arg(short = 'p', long = "insert", conflicts_with = "delete")]
    pub insert: bool,

    /// Delete a leap second every simulated day
    #[arg(short = 'n', long = "delete")]
    pub delete: bool,

    /// Clock drift in parts per million
    #[arg(short, long, allow_hyphen_values = true)]
    pub drift: Option<f64>,

    /// Address to listen on
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// UDP port to listen on
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Simulated start time (RFC 3339), defaults to now
    pub fake_start: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub drift_ppm: f64,
    pub leap: LeapMode,
    /// RFC 3339 timestamp; `None` runs the fake clock from the real start time.
    pub fake_start: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: NTP_PORT,
            drift_ppm: 0.0,
            leap: LeapMode::None,
            fake_start: None,
        }
    }
}

impl ServerConfig {
    /// Read a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Build the effective configuration: file values (if any), overridden
    /// by whatever was given on the command line.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = args.bind {
            config.bind = bind;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(drift) = args.drift {
            config.drift_ppm = drift;
        }
        match (args.insert, args.delete) {
            (true, true) => return Err(anyhow!("Leap insert and delete are mutually exclusive")),
            (true, false) => config.leap = LeapMode::Insert,
            (false, true) => config.leap = LeapMode::Delete,
            (false, false) => {}
        }
        if let Some(fake_start) = &args.fake_start {
            config.fake_start = Some(fake_start.clone());
        }

        if !config.drift_ppm.is_finite() {
            return Err(anyhow!("Drift must be a finite number, got {}", config.drift_ppm));
        }

        Ok(config)
    }

    /// The effective configuration as JSON, in the same shape `load` reads.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Freeze the configuration into the simulation used for the server's
    /// lifetime. `true_start` is the real time the server starts.
    pub fn simulation(&self, true_start: DateTime<Utc>) -> Result<Simulation> {
        let fake_start = match &self.fake_start {
            Some(text) => parse_fake_start(text)?,
            None => true_start,
        };
        Ok(Simulation::new(true_start, fake_start, self.drift_ppm, self.leap))
    }
}

fn parse_fake_start(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid fake start time {:?} (expected RFC 3339)", text))?;
    Ok(parsed.with_timezone(&Utc))
}
