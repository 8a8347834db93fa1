//! SNTP server reporting a simulated clock.
//!
//! One thread blocks on the socket; every datagram is copied into its own
//! buffer and answered from a detached worker thread, so a slow reply never
//! holds up the receive loop. There is no cap on in-flight workers and no
//! ordering between replies.
//!
//! Receive errors are fatal: `run` returns them and the process exits.

use crate::clock::TimeSource;
use crate::packet;
use crate::simulation::Simulation;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Largest datagram read from the socket
const MAX_DATAGRAM_SIZE: usize = 256;

/// How often the receive loop checks the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything a worker needs to answer one request.
struct Shared<C> {
    socket: UdpSocket,
    simulation: Simulation,
    clock: C,
}

pub struct NtpServer<C> {
    shared: Arc<Shared<C>>,
}

impl<C> NtpServer<C>
where
    C: TimeSource + Send + Sync + 'static,
{
    /// Bind the server to `addr`.
    pub fn bind(addr: SocketAddr, simulation: Simulation, clock: C) -> Result<Self> {
        let socket = bind_socket(addr).map_err(|e| {
            anyhow!(
                "Failed to bind NTP server to {}: {} (hint: port 123 requires root/admin)",
                addr,
                e
            )
        })?;

        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        info!("[NTP-Server] Listening on {}", socket.local_addr()?);
        info!("[NTP-Server] Simulating {}", simulation);

        Ok(NtpServer {
            shared: Arc::new(Shared {
                socket,
                simulation,
                clock,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Run the receive loop until the running flag is cleared.
    pub fn run(&self, running: Arc<AtomicBool>) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        while running.load(Ordering::SeqCst) {
            match self.shared.socket.recv_from(&mut buf) {
                Ok((size, src)) => {
                    let received = self.shared.clock.now();
                    let datagram = buf[..size].to_vec();
                    let shared = Arc::clone(&self.shared);
                    thread::spawn(move || shared.answer(datagram, src, received));
                }
                // poll timeout, or a signal (e.g. Ctrl+C) landed mid-receive
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    return Err(anyhow!("[NTP-Server] Socket receive failed: {}", e));
                }
            }
        }

        info!("[NTP-Server] Shutting down");
        Ok(())
    }
}

impl<C: TimeSource> Shared<C> {
    /// Answer a single request. Short packets are dropped silently.
    fn answer(&self, mut datagram: Vec<u8>, src: SocketAddr, received: DateTime<Utc>) {
        let Some(transmit) = packet::client_transmit(&datagram) else {
            return;
        };
        info!("[NTP-Server] Request from {}, client transmit {}", src, transmit);

        let reply = match packet::build_reply(&mut datagram, &self.simulation, received, || {
            self.clock.now()
        }) {
            Some(reply) => reply,
            None => return,
        };

        if let Err(e) = self.socket.send_to(reply, src) {
            warn!("[NTP-Server] Failed to send reply to {}: {}", src, e);
        }
    }
}

fn bind_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        // accept IPv4-mapped clients on the unspecified address as well
        socket.set_only_v6(false)?;
    }
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MockTimeSource, SystemTimeSource};
    use crate::ntp::{self, NtpTimestamp};
    use crate::simulation::LeapMode;
    use chrono::{TimeDelta, TimeZone};
    use std::net::Ipv4Addr;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    /// Start a server on an ephemeral loopback port, returning its address
    /// and the flag that stops it.
    fn spawn_server<C>(simulation: Simulation, clock: C) -> (SocketAddr, Arc<AtomicBool>)
    where
        C: TimeSource + Send + Sync + 'static,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let server = NtpServer::bind(loopback(), simulation, clock).unwrap();
        let addr = server.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        thread::spawn(move || server.run(r));
        (addr, running)
    }

    fn client() -> UdpSocket {
        let socket = UdpSocket::bind(loopback()).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        socket
    }

    fn request(transmit: NtpTimestamp) -> [u8; 48] {
        let mut req = [0u8; 48];
        req[0] = 0x23; // VN=4, Mode=3
        transmit.write(&mut req[40..]);
        req
    }

    fn within(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: TimeDelta) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_end_to_end_identity() {
        let start = Utc::now();
        let (addr, running) = spawn_server(Simulation::identity(start), SystemTimeSource);

        let t0 = ntp::encode(Utc::now());
        let socket = client();
        socket.send_to(&request(t0), addr).unwrap();

        let mut buf = [0u8; 256];
        let (size, from) = socket.recv_from(&mut buf).unwrap();
        let now = Utc::now();
        running.store(false, Ordering::SeqCst);

        assert_eq!(size, 48);
        assert_eq!(from, addr);
        assert_eq!(buf[0], 0x24);
        assert_eq!(buf[1], 1);
        assert_eq!(&buf[12..16], b"LOCL");
        assert_eq!(NtpTimestamp::read(&buf[24..]), t0);

        let tolerance = TimeDelta::seconds(1);
        let reference = ntp::decode(NtpTimestamp::read(&buf[16..]));
        let receive = ntp::decode(NtpTimestamp::read(&buf[32..]));
        let transmit = ntp::decode(NtpTimestamp::read(&buf[40..]));
        assert!(within(reference, now, tolerance));
        assert!(within(receive, now, tolerance));
        assert!(transmit >= receive);
    }

    #[test]
    fn test_short_datagram_gets_no_reply() {
        let (addr, running) = spawn_server(Simulation::identity(Utc::now()), SystemTimeSource);

        let socket = client();
        socket.send_to(&[0x23u8; 47], addr).unwrap();

        let mut buf = [0u8; 256];
        let result = socket.recv_from(&mut buf);
        running.store(false, Ordering::SeqCst);
        assert!(result.is_err(), "short request was answered");
    }

    #[test]
    fn test_reply_uses_receipt_and_send_samples() {
        let real = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        let fake = Utc.with_ymd_and_hms(2016, 12, 31, 23, 59, 50).unwrap();
        let simulation = Simulation::new(real, fake, 0.0, LeapMode::Insert);

        let mut samples = vec![real + TimeDelta::seconds(5), real + TimeDelta::seconds(3)];
        let mut clock = MockTimeSource::new();
        clock
            .expect_now()
            .times(2)
            .returning(move || samples.pop().unwrap());

        let (addr, running) = spawn_server(simulation, clock);

        let socket = client();
        socket.send_to(&request(NtpTimestamp(99)), addr).unwrap();

        let mut buf = [0u8; 256];
        let (size, _) = socket.recv_from(&mut buf).unwrap();
        running.store(false, Ordering::SeqCst);

        assert_eq!(size, 48);
        assert_eq!(buf[0], 0x40 | 0x24);
        assert_eq!(
            NtpTimestamp::read(&buf[32..]),
            ntp::encode(fake + TimeDelta::seconds(3))
        );
        assert_eq!(
            NtpTimestamp::read(&buf[40..]),
            ntp::encode(fake + TimeDelta::seconds(5))
        );
    }

    #[test]
    fn test_extension_bytes_echoed() {
        let (addr, running) = spawn_server(Simulation::identity(Utc::now()), SystemTimeSource);

        let mut req = request(NtpTimestamp(1)).to_vec();
        req.extend_from_slice(&[0xAB; 16]);

        let socket = client();
        socket.send_to(&req, addr).unwrap();

        let mut buf = [0u8; 256];
        let (size, _) = socket.recv_from(&mut buf).unwrap();
        running.store(false, Ordering::SeqCst);

        assert_eq!(size, 64);
        assert_eq!(&buf[48..64], &[0xAB; 16]);
    }

    #[test]
    fn test_run_stops_when_flag_cleared() {
        let server =
            NtpServer::bind(loopback(), Simulation::identity(Utc::now()), SystemTimeSource)
                .unwrap();
        let running = Arc::new(AtomicBool::new(false));
        assert!(server.run(running).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_during_receive_is_not_fatal() {
        use std::os::unix::thread::JoinHandleExt;

        extern "C" fn ignore_signal(_: libc::c_int) {}

        // SA_RESTART does not restart a receive that has a timeout set
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut()), 0);
        }

        let server =
            NtpServer::bind(loopback(), Simulation::identity(Utc::now()), SystemTimeSource)
                .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        let handle = thread::spawn(move || server.run(r));

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(30));
            unsafe {
                libc::pthread_kill(handle.as_pthread_t(), libc::SIGUSR1);
            }
        }

        running.store(false, Ordering::SeqCst);
        let result = handle.join().unwrap();
        assert!(result.is_ok(), "receive loop failed: {:?}", result);
    }

    #[test]
    fn test_bind_conflict_fails() {
        let taken = UdpSocket::bind(loopback()).unwrap();
        let addr = taken.local_addr().unwrap();
        // SO_REUSEADDR does not let a second UDP socket share a port on every
        // platform, so only check the error message when bind does fail.
        if let Err(e) = NtpServer::bind(addr, Simulation::identity(Utc::now()), SystemTimeSource) {
            assert!(e.to_string().contains("Failed to bind NTP server"));
        }
    }
}
