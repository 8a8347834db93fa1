//! SNTP reply construction.
//!
//! Turns a client request buffer into the server reply in place. Only the
//! 48-byte core header is touched; anything after it (extension fields, MAC)
//! is echoed back unchanged.
//!
//! ```text
//!  0      LI | VN | Mode      1  Stratum   2  Poll   3  Precision
//!  4..8   Root Delay          8..12  Root Dispersion  12..16  Reference ID
//!  16..24 Reference Timestamp
//!  24..32 Originate Timestamp (client's Transmit Timestamp)
//!  32..40 Receive Timestamp
//!  40..48 Transmit Timestamp
//! ```

use crate::ntp::NtpTimestamp;
use crate::simulation::Simulation;
use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};

/// NTP packet size (48 bytes)
pub const NTP_PACKET_SIZE: usize = 48;

/// Mode: 4 = server
const MODE_SERVER: u8 = 4;

/// Version Number bits of byte 0
const VERSION_MASK: u8 = 0x38;

/// Stratum 1, primary reference
const STRATUM: u8 = 1;

/// Poll interval exponent (2^4 = 16 seconds)
const POLL: u8 = 4;

/// Precision (2^-16 s) as signed byte
const PRECISION: i8 = -16;

/// Root Dispersion in NTP short format (16/65536 s)
const ROOT_DISPERSION: u32 = 0x10;

/// Reference ID for local clock (ASCII "LOCL")
const REF_ID_LOCL: &[u8; 4] = b"LOCL";

const REFERENCE_TS: usize = 16;
const ORIGINATE_TS: usize = 24;
const RECEIVE_TS: usize = 32;
const TRANSMIT_TS: usize = 40;

/// The client's Transmit Timestamp, or `None` if the buffer is too short to
/// be an NTP packet.
pub fn client_transmit(request: &[u8]) -> Option<NtpTimestamp> {
    if request.len() < NTP_PACKET_SIZE {
        return None;
    }
    Some(NtpTimestamp::read(&request[TRANSMIT_TS..]))
}

/// Rewrite `buf` into the reply for the request it holds.
///
/// `received` is the real time the datagram arrived; `send_time` is sampled
/// once, after every other field is filled in, for the Transmit Timestamp.
/// Returns `None` (and leaves `buf` untouched) when the request is shorter
/// than an NTP header.
pub fn build_reply<'a, F>(
    buf: &'a mut [u8],
    sim: &Simulation,
    received: DateTime<Utc>,
    send_time: F,
) -> Option<&'a [u8]>
where
    F: FnOnce() -> DateTime<Utc>,
{
    if buf.len() < NTP_PACKET_SIZE {
        return None;
    }

    // Byte 0: LI (2 bits) | VN (3 bits) | Mode (3 bits)
    let version = buf[0] & VERSION_MASK;
    buf[0] = sim.leap.indicator_bits() | version | MODE_SERVER;
    buf[1] = STRATUM;
    buf[2] = POLL;
    buf[3] = PRECISION as u8;

    BigEndian::write_u32(&mut buf[4..8], 0);
    BigEndian::write_u32(&mut buf[8..12], ROOT_DISPERSION);
    buf[12..16].copy_from_slice(REF_ID_LOCL);

    let receive = NtpTimestamp::from(sim.transform(received));
    receive.write(&mut buf[REFERENCE_TS..]);

    // Originate Timestamp: echo of the client's Transmit Timestamp
    buf.copy_within(TRANSMIT_TS..NTP_PACKET_SIZE, ORIGINATE_TS);

    receive.write(&mut buf[RECEIVE_TS..]);

    let transmit = NtpTimestamp::from(sim.transform(send_time()));
    transmit.write(&mut buf[TRANSMIT_TS..]);

    Some(&*buf)
}
