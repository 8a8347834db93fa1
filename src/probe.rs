use anyhow::{anyhow, Result};
use rsntp::SntpClient;
use std::fmt;
use std::time::Duration;

/// What an SNTP query against a (possibly simulated) server reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Server clock minus local clock, in seconds.
    pub offset_secs: f64,
    pub round_trip_secs: f64,
    pub stratum: u8,
    pub leap_indicator: String,
    pub reference_id: String,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset {:+.6} s, delay {:.6} s, stratum {}, leap {}, refid {}",
            self.offset_secs,
            self.round_trip_secs,
            self.stratum,
            self.leap_indicator,
            self.reference_id
        )
    }
}

pub struct NtpProbe {
    server: String,
    timeout: Duration,
}

impl NtpProbe {
    pub fn new(server: &str) -> Self {
        NtpProbe {
            server: server.to_string(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query the server once.
    pub fn query(&self) -> Result<ProbeReport> {
        let mut client = SntpClient::new();
        client.set_timeout(self.timeout);

        let result = client
            .synchronize(self.server.as_str())
            .map_err(|e| anyhow!("SNTP query to {} failed: {}", self.server, e))?;

        Ok(ProbeReport {
            offset_secs: result.clock_offset().as_secs_f64(),
            round_trip_secs: result.round_trip_delay().as_secs_f64(),
            stratum: result.stratum(),
            leap_indicator: format!("{:?}", result.leap_indicator()),
            reference_id: result.reference_identifier().to_string(),
        })
    }
}
