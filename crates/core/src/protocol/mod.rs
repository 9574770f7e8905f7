//! Stop-and-wait ARQ state machines.
//!
//! Five protocol versions share one capability set, the [`Protocol`] trait,
//! and are selected by the explicit factory [`create`]:
//!
//! | Version | Error control | Recovery |
//! |---------|---------------|----------|
//! | 1.0 | none | none; the channel is assumed perfect |
//! | 2.0 | checksum or parity on data | ACK/NACK flags, replies never corrupted |
//! | 2.1 | as 2.0 plus alternating bit | `"ACK"`/`"NAK"` payload replies, duplicates re-ACKed |
//! | 2.2 | as 2.1 | replies tagged with the acknowledged bit and cross-checked |
//! | 3.0 | as 2.2 | per-attempt reply timeout, lossy link in both directions |
//!
//! All variants keep at most one unacknowledged fragment in flight. Each
//! call operates on an explicit [`ProtocolSession`] owned by the caller.
//!
//! Recoverable corruption is handled entirely inside `send`/`receive`. Only
//! a malformed header, a closed channel, an idle timeout or an exhausted
//! retry ceiling surface as errors.

mod alternating;
mod v1;
mod v2_0;
mod v3;

pub use alternating::{AckPolicy, AlternatingBit};
pub use v1::Rdt10;
pub use v2_0::Rdt20;
pub use v3::Rdt30;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::metrics::SessionStats;
use crate::packet::{flags, ErrorControl, Header, Integrity, Packet, FIN_PAYLOAD};
use crate::session::ProtocolSession;

/// Reply payload of a positive acknowledgment (2.1, 2.2).
pub const ACK_PAYLOAD: &[u8] = b"ACK";

/// Reply payload of a negative acknowledgment (2.1, 2.2).
pub const NAK_PAYLOAD: &[u8] = b"NAK";

/// Protocol version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1_0,
    V2_0,
    V2_1,
    V2_2,
    V3_0,
}

impl Version {
    pub const ALL: [Version; 5] = [
        Version::V1_0,
        Version::V2_0,
        Version::V2_1,
        Version::V2_2,
        Version::V3_0,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
            Self::V2_2 => "2.2",
            Self::V3_0 => "3.0",
        }
    }

    /// Whether packets of this version carry an error-control field.
    pub fn has_error_control(self) -> bool {
        self != Self::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.strip_prefix("rdt").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown protocol version {s:?} (1.0|2.0|2.1|2.2|3.0)"))
    }
}

/// Tunables shared by all versions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Maximum payload bytes per fragment
    pub data_len: usize,

    /// Code protecting payloads (ignored by 1.0)
    pub error_control: ErrorControl,

    /// How long the 3.0 sender waits for each reply
    pub reply_timeout: Duration,

    /// Wake-up interval of the 1.0 receiver
    pub poll_interval: Duration,

    /// Give up a 1.0 receive after this long without traffic (None = never)
    pub idle_timeout: Option<Duration>,

    /// Retransmissions allowed per fragment (None = until acknowledged)
    pub max_retries: Option<u32>,
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_len == 0 {
            return Err(Error::Config("data_len must be at least 1".to_string()));
        }
        if self.reply_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            data_len: 64,
            error_control: ErrorControl::Checksum,
            reply_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            idle_timeout: None,
            max_retries: None,
        }
    }
}

/// Outcome of a `receive` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete message
    Message(Vec<u8>),
    /// The peer sent FIN; no further messages follow
    Finished,
}

/// One ARQ variant.
///
/// Implementations are stateless; everything that changes between calls
/// lives in the [`ProtocolSession`].
pub trait Protocol: Send + Sync {
    fn version(&self) -> Version;

    fn config(&self) -> &ProtocolConfig;

    /// Deliver `message`, blocking until every fragment is acknowledged.
    fn send(
        &self,
        session: &mut ProtocolSession,
        channel: &mut dyn Channel,
        message: &[u8],
    ) -> Result<()>;

    /// Block until a complete message (or FIN) arrives.
    fn receive(&self, session: &mut ProtocolSession, channel: &mut dyn Channel) -> Result<Inbound>;

    /// Send the teardown packet: `F:02`, payload `FINMSG`, never corrupted,
    /// never acknowledged.
    fn finish(&self, session: &mut ProtocolSession, channel: &mut dyn Channel) -> Result<()> {
        let fin = Packet::new(
            self.create_header(0, 0, flags::FIN, FIN_PAYLOAD, None),
            FIN_PAYLOAD.to_vec(),
        );
        debug!("rdt{} sending FIN", self.version());
        session.transmit_clean(channel, &fin)
    }

    /// Error-control code applied to outgoing payloads.
    fn error_control(&self) -> Option<ErrorControl> {
        if self.version().has_error_control() {
            Some(self.config().error_control)
        } else {
            None
        }
    }

    /// Build the header for a packet carrying `payload`.
    fn create_header(
        &self,
        seq: u16,
        total: u16,
        flags: u8,
        payload: &[u8],
        alt_bit: Option<u8>,
    ) -> Header {
        let mut header = Header::new(seq, total, flags);
        if let Some(control) = self.error_control() {
            header.error = control.protect(payload);
        }
        header.alt_bit = alt_bit;
        header
    }

    /// Decode a packet received from the wire.
    fn parse_header(&self, bytes: &[u8]) -> Result<Packet> {
        Packet::decode(bytes)
    }
}

/// Build the state machine for `version`.
pub fn create(version: Version, config: ProtocolConfig) -> Box<dyn Protocol> {
    match version {
        Version::V1_0 => Box::new(Rdt10::new(config)),
        Version::V2_0 => Box::new(Rdt20::new(config)),
        Version::V2_1 => Box::new(AlternatingBit::rdt21(config)),
        Version::V2_2 => Box::new(AlternatingBit::rdt22(config)),
        Version::V3_0 => Box::new(Rdt30::new(config)),
    }
}

/// Wait for the next packet and decode it.
fn next_packet<P: Protocol + ?Sized>(
    protocol: &P,
    channel: &mut dyn Channel,
    timeout: Option<Duration>,
) -> Result<Option<Packet>> {
    match channel.receive(timeout)? {
        Some(bytes) => protocol.parse_header(&bytes).map(Some),
        None => Ok(None),
    }
}

/// Split `message` into fragments whose headers carry only `S`/`T`.
fn fragments<P: Protocol + ?Sized>(protocol: &P, message: &[u8]) -> Result<Vec<Packet>> {
    crate::packet::packetize(message, protocol.config().data_len, None)
}

/// Check the payload of `packet` against its error field.
///
/// Returns the (possibly repaired) payload, or `None` if it is corrupt.
fn verified(packet: &Packet, stats: &mut SessionStats) -> Option<Vec<u8>> {
    match packet.verify() {
        Integrity::Intact => Some(packet.payload.clone()),
        Integrity::Corrected(payload) => {
            stats.corrected += 1;
            Some(payload)
        }
        Integrity::Corrupt => {
            stats.corrupt_detected += 1;
            None
        }
    }
}

/// Count a failed attempt and enforce the retry ceiling.
///
/// `attempts` is the number of transmissions of fragment `seq` so far.
fn note_retry(
    config: &ProtocolConfig,
    stats: &mut SessionStats,
    seq: u16,
    attempts: u32,
) -> Result<()> {
    if let Some(max) = config.max_retries {
        if attempts > max {
            return Err(Error::RetriesExhausted { seq, attempts });
        }
    }
    stats.retransmissions += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[test]
    fn test_version_parse() {
        for version in Version::ALL {
            assert_eq!(version.as_str().parse::<Version>().unwrap(), version);
        }
        assert_eq!("rdt2.2".parse::<Version>().unwrap(), Version::V2_2);
        assert!("4.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_factory_versions() {
        for version in Version::ALL {
            let protocol = create(version, ProtocolConfig::default());
            assert_eq!(protocol.version(), version);
        }
    }

    #[test]
    fn test_create_header_per_version() {
        let v1 = create(Version::V1_0, ProtocolConfig::default());
        assert_eq!(
            v1.create_header(1, 1, 0, b"hi", None).render(),
            "HEADER S:0001 T:0001 F:00"
        );

        let v22 = create(Version::V2_2, ProtocolConfig::default());
        let header = v22.create_header(2, 3, flags::ACK, b"ACK", Some(1));
        let line = header.render();
        assert!(line.starts_with("HEADER S:0002 T:0003 F:01 C:"));
        assert!(line.ends_with(" N:1"));

        let config = ProtocolConfig {
            error_control: ErrorControl::Parity,
            ..ProtocolConfig::default()
        };
        let v3 = create(Version::V3_0, config);
        let line = v3.create_header(1, 1, 0, b"ab", Some(0)).render();
        assert!(line.contains(" EC:"));
    }

    #[test]
    fn test_finish_sends_clean_fin() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = create(Version::V2_0, ProtocolConfig::default());
        let mut session = ProtocolSession::new(crate::injector::ErrorModel::corrupt_first(5, 3, 1));
        protocol.finish(&mut session, &mut a).unwrap();

        let fin = protocol.parse_header(&b.receive(None).unwrap().unwrap()).unwrap();
        assert!(fin.has_flag(flags::FIN));
        assert_eq!(fin.payload, FIN_PAYLOAD);
        assert_eq!(fin.verify(), Integrity::Intact);
    }

    #[test]
    fn test_retry_ceiling() {
        let config = ProtocolConfig {
            max_retries: Some(2),
            ..ProtocolConfig::default()
        };
        let mut stats = SessionStats::new();
        assert!(note_retry(&config, &mut stats, 1, 1).is_ok());
        assert!(note_retry(&config, &mut stats, 1, 2).is_ok());
        assert!(matches!(
            note_retry(&config, &mut stats, 1, 3),
            Err(Error::RetriesExhausted { seq: 1, attempts: 3 })
        ));
        assert_eq!(stats.retransmissions, 2);
    }

    #[test]
    fn test_config_validate() {
        assert!(ProtocolConfig::default().validate().is_ok());
        let bad = ProtocolConfig {
            data_len: 0,
            ..ProtocolConfig::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }
}
