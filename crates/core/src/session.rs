//! Per-connection protocol state.
//!
//! A [`ProtocolSession`] is created once per connection and threaded through
//! every `send`/`receive` call of a state machine. It holds the alternating
//! bits, the data fragment awaiting acknowledgment, the fault injector and
//! the session statistics. Nothing here is global: two sessions in one
//! process never share state.
//!
//! # Retransmission contract
//!
//! - At most one data fragment is outstanding (`unacked`).
//! - [`ProtocolSession::hold`] installs it; every send of it, first or
//!   repeated, goes through [`ProtocolSession::retransmit`].
//! - [`ProtocolSession::acknowledge`] clears it once the peer accepts it.
//! - Replies and FIN go through `transmit`/`transmit_clean` and never touch
//!   the outstanding fragment.

use log::trace;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::injector::{ErrorInjector, ErrorModel, InjectorStats};
use crate::metrics::SessionStats;
use crate::packet::Packet;

/// A data fragment that has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct Unacked {
    /// Clean fragment, resent unchanged on every attempt
    pub packet: Packet,
    /// Transmissions so far (0 until the first send)
    pub tx_count: u32,
}

/// Mutable state of one end of a connection.
#[derive(Debug)]
pub struct ProtocolSession {
    /// Alternating bit of the next fragment this end sends
    pub send_bit: u8,

    /// Alternating bit this end expects on the next new fragment
    pub recv_bit: u8,

    unacked: Option<Unacked>,
    injector: ErrorInjector,
    stats: SessionStats,
}

impl ProtocolSession {
    pub fn new(model: ErrorModel) -> Self {
        Self {
            send_bit: 0,
            recv_bit: 0,
            unacked: None,
            injector: ErrorInjector::new(model),
            stats: SessionStats::new(),
        }
    }

    /// Send `packet` through the fault injector.
    ///
    /// When `lossy` is set the packet may be dropped entirely; otherwise it
    /// is always sent, possibly with a corrupted payload. Returns `false` if
    /// the packet was dropped.
    pub fn transmit<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        packet: &Packet,
        lossy: bool,
    ) -> Result<bool> {
        self.stats.transmissions += 1;

        if lossy && self.injector.should_drop() {
            trace!(
                "dropped S:{:04} F:{:02x}",
                packet.header.seq,
                packet.header.flags
            );
            return Ok(false);
        }

        let clean = packet.encode();
        let wire = self.injector.corrupt_packet(&clean);
        if wire != clean {
            trace!(
                "corrupted S:{:04} F:{:02x}",
                packet.header.seq,
                packet.header.flags
            );
        }
        channel.send(&wire)?;
        Ok(true)
    }

    /// Send `packet` exactly as encoded, bypassing the injector.
    pub fn transmit_clean<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        packet: &Packet,
    ) -> Result<()> {
        self.stats.transmissions += 1;
        channel.send(&packet.encode())
    }

    /// Make `packet` the outstanding data fragment.
    ///
    /// Replaces any fragment still held; senders call this only after the
    /// previous one was acknowledged.
    pub fn hold(&mut self, packet: Packet) {
        if let Some(previous) = &self.unacked {
            trace!("replacing unacknowledged fragment {}", previous.packet.header.seq);
        }
        self.stats.fragments_sent += 1;
        self.unacked = Some(Unacked {
            packet,
            tx_count: 0,
        });
    }

    /// Send the outstanding fragment through the injector.
    ///
    /// Returns the number of transmissions of that fragment so far,
    /// including this one.
    pub fn retransmit<C: Channel + ?Sized>(&mut self, channel: &mut C, lossy: bool) -> Result<u32> {
        let entry = self.unacked.as_mut().ok_or(Error::NothingUnacked)?;
        entry.tx_count += 1;
        let tx_count = entry.tx_count;
        let packet = entry.packet.clone();
        self.transmit(channel, &packet, lossy)?;
        Ok(tx_count)
    }

    /// Clear the outstanding fragment, returning it.
    pub fn acknowledge(&mut self) -> Option<Packet> {
        self.unacked.take().map(|entry| entry.packet)
    }

    /// The fragment awaiting acknowledgment, if any.
    pub fn unacked(&self) -> Option<&Unacked> {
        self.unacked.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    pub fn injector_stats(&self) -> InjectorStats {
        self.injector.stats()
    }

    pub fn error_model(&self) -> &ErrorModel {
        self.injector.model()
    }
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new(ErrorModel::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::packet::Header;
    use std::time::Duration;

    fn sample() -> Packet {
        Packet::new(Header::new(1, 1, 0), b"abc".to_vec())
    }

    #[test]
    fn test_transmit_clean_link() {
        let (mut a, mut b) = MemoryChannel::pair();
        let mut session = ProtocolSession::default();
        assert!(session.transmit(&mut a, &sample(), true).unwrap());
        assert_eq!(b.receive(None).unwrap(), Some(sample().encode()));
        assert_eq!(session.stats().transmissions, 1);
    }

    #[test]
    fn test_transmit_corrupts_payload_only() {
        let (mut a, mut b) = MemoryChannel::pair();
        let mut session = ProtocolSession::new(ErrorModel::corrupt_first(1, 1, 7));
        session.transmit(&mut a, &sample(), false).unwrap();
        let wire = b.receive(None).unwrap().unwrap();
        let decoded = Packet::decode(&wire).unwrap();
        assert_eq!(decoded.header, sample().header);
        assert_ne!(decoded.payload, sample().payload);
    }

    #[test]
    fn test_lossy_drop() {
        let (mut a, mut b) = MemoryChannel::pair();
        let model = ErrorModel {
            loss: 100.0,
            ..ErrorModel::perfect(1)
        };
        let mut session = ProtocolSession::new(model);
        assert!(!session.transmit(&mut a, &sample(), true).unwrap());
        assert_eq!(b.receive(Some(Duration::from_millis(10))).unwrap(), None);

        // Loss is ignored unless the caller asks for it
        assert!(session.transmit(&mut a, &sample(), false).unwrap());
        session.transmit_clean(&mut a, &sample()).unwrap();
        assert_eq!(session.injector_stats().packets_dropped, 1);
    }

    #[test]
    fn test_retransmit_resends_held_fragment() {
        let (mut a, mut b) = MemoryChannel::pair();
        let mut session = ProtocolSession::new(ErrorModel::corrupt_first(1, 1, 7));
        session.hold(sample());

        assert_eq!(session.retransmit(&mut a, false).unwrap(), 1);
        let first = b.receive(None).unwrap().unwrap();
        assert_ne!(first, sample().encode());

        // The clean fragment is held, so the resend is intact
        assert_eq!(session.retransmit(&mut a, false).unwrap(), 2);
        assert_eq!(b.receive(None).unwrap(), Some(sample().encode()));
        assert_eq!(session.unacked().unwrap().tx_count, 2);
        assert_eq!(session.stats().fragments_sent, 1);
        assert_eq!(session.stats().transmissions, 2);
    }

    #[test]
    fn test_replies_leave_unacked_alone() {
        let (mut a, _b) = MemoryChannel::pair();
        let mut session = ProtocolSession::default();
        session.hold(sample());

        let reply = Packet::new(Header::new(9, 9, 0), b"ACK".to_vec());
        session.transmit(&mut a, &reply, false).unwrap();
        session.transmit_clean(&mut a, &reply).unwrap();
        assert_eq!(session.unacked().unwrap().packet, sample());

        assert_eq!(session.acknowledge(), Some(sample()));
        assert!(session.unacked().is_none());
    }

    #[test]
    fn test_retransmit_without_fragment() {
        let (mut a, _b) = MemoryChannel::pair();
        let mut session = ProtocolSession::default();
        assert!(matches!(
            session.retransmit(&mut a, false),
            Err(Error::NothingUnacked)
        ));
        assert_eq!(session.acknowledge(), None);
    }
}
