//! Query an SNTP server once and print what it reports.

use anyhow::Result;
use clap::Parser;
use leapntpd::probe::NtpProbe;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query an SNTP server and print its clock offset", long_about = None)]
struct Args {
    /// Server address (host:port)
    #[arg(default_value = "127.0.0.1:123")]
    server: String,

    /// Reply timeout in milliseconds
    #[arg(short, long, default_value_t = 3000)]
    timeout: u64,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    let args = Args::parse();

    let report = NtpProbe::new(&args.server)
        .with_timeout(Duration::from_millis(args.timeout))
        .query()?;

    println!("{}: {}", args.server, report);
    Ok(())
}
