//! rdt 2.1 and 2.2: alternating-bit protocol with protected replies.
//!
//! Both versions number fragments with a one-bit sequence `N` and reply
//! with `"ACK"`/`"NAK"` payload packets that carry their own error field and
//! pass through the fault injector, so replies can be garbled too. They
//! differ only in how acknowledgments are tagged and checked, which is
//! captured by [`AckPolicy`]:
//!
//! | Version | `tag_replies` | `check_reply_bit` |
//! |---------|---------------|-------------------|
//! | 2.1 | false | false |
//! | 2.2 | true | true |
//!
//! The receiver re-acknowledges a duplicate (wrong bit) without buffering
//! it again. The ACK that completes a message is sent clean so the sender
//! is never left retransmitting into a receiver that has already returned.

use log::{debug, trace};

use super::{
    fragments, next_packet, note_retry, verified, Inbound, Protocol, ProtocolConfig, Version,
    ACK_PAYLOAD, NAK_PAYLOAD,
};
use crate::channel::Channel;
use crate::error::{Error, HeaderError, Result};
use crate::packet::{flags, Packet};
use crate::reassembly::{Insert, Reassembler};
use crate::session::ProtocolSession;

/// Per-version differences of the alternating-bit engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    /// Receiver tags each reply with the bit it acknowledges
    pub tag_replies: bool,
    /// Sender only accepts an ACK tagged with the bit just sent
    pub check_reply_bit: bool,
}

impl AckPolicy {
    pub const RDT21: AckPolicy = AckPolicy {
        tag_replies: false,
        check_reply_bit: false,
    };

    pub const RDT22: AckPolicy = AckPolicy {
        tag_replies: true,
        check_reply_bit: true,
    };
}

/// How the sender classified a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nak,
    Garbled,
}

#[derive(Debug, Clone)]
pub struct AlternatingBit {
    version: Version,
    policy: AckPolicy,
    config: ProtocolConfig,
}

impl AlternatingBit {
    pub fn rdt21(config: ProtocolConfig) -> Self {
        Self {
            version: Version::V2_1,
            policy: AckPolicy::RDT21,
            config,
        }
    }

    pub fn rdt22(config: ProtocolConfig) -> Self {
        Self {
            version: Version::V2_2,
            policy: AckPolicy::RDT22,
            config,
        }
    }

    pub fn policy(&self) -> AckPolicy {
        self.policy
    }

    fn classify(&self, session: &mut ProtocolSession, reply: &Packet, sent_bit: u8) -> Reply {
        let Some(payload) = verified(reply, session.stats_mut()) else {
            return Reply::Garbled;
        };
        if payload == ACK_PAYLOAD {
            if self.policy.check_reply_bit && reply.header.alt_bit != Some(sent_bit) {
                trace!(
                    "rdt{} stale ACK N:{:?}, expected N:{sent_bit}",
                    self.version,
                    reply.header.alt_bit
                );
                return Reply::Garbled;
            }
            Reply::Ack
        } else if payload == NAK_PAYLOAD {
            Reply::Nak
        } else {
            Reply::Garbled
        }
    }

    /// Send an `"ACK"`/`"NAK"` reply for `data`.
    ///
    /// `clean` bypasses the injector (used for the completing ACK).
    fn reply(
        &self,
        session: &mut ProtocolSession,
        channel: &mut dyn Channel,
        data: &Packet,
        payload: &[u8],
        clean: bool,
    ) -> Result<()> {
        let bit = if self.policy.tag_replies {
            data.header.alt_bit
        } else {
            None
        };
        let header = self.create_header(data.header.seq, data.header.total, 0, payload, bit);
        let packet = Packet::new(header, payload.to_vec());
        if clean {
            session.transmit_clean(channel, &packet)?;
        } else {
            session.transmit(channel, &packet, false)?;
        }

        let stats = session.stats_mut();
        if payload == ACK_PAYLOAD {
            stats.acks_sent += 1;
        } else {
            stats.naks_sent += 1;
        }
        Ok(())
    }
}

impl Protocol for AlternatingBit {
    fn version(&self) -> Version {
        self.version
    }

    fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn send(
        &self,
        session: &mut ProtocolSession,
        channel: &mut dyn Channel,
        message: &[u8],
    ) -> Result<()> {
        let packets = fragments(self, message)?;
        debug!(
            "rdt{} sending {} bytes in {} fragments",
            self.version,
            message.len(),
            packets.len()
        );

        for fragment in packets {
            let seq = fragment.header.seq;
            let bit = session.send_bit;
            let header = self.create_header(seq, fragment.header.total, 0, &fragment.payload, Some(bit));
            session.hold(Packet::new(header, fragment.payload));

            loop {
                let attempts = session.retransmit(channel, false)?;

                let reply = next_packet(self, channel, None)?.ok_or(Error::ChannelClosed)?;
                let outcome = self.classify(session, &reply, bit);
                let stats = session.stats_mut();
                match outcome {
                    Reply::Ack => {
                        stats.acks_received += 1;
                        break;
                    }
                    Reply::Nak => {
                        stats.naks_received += 1;
                        trace!("rdt{} NAK for fragment {seq} N:{bit}, resending", self.version);
                    }
                    Reply::Garbled => {
                        stats.garbled_replies += 1;
                        trace!("rdt{} garbled reply for fragment {seq}, resending", self.version);
                    }
                }
                note_retry(&self.config, stats, seq, attempts)?;
            }

            session.acknowledge();
            session.send_bit ^= 1;
        }

        session.stats_mut().messages_sent += 1;
        Ok(())
    }

    fn receive(&self, session: &mut ProtocolSession, channel: &mut dyn Channel) -> Result<Inbound> {
        let mut reassembler = Reassembler::new();

        loop {
            let packet = next_packet(self, channel, None)?.ok_or(Error::ChannelClosed)?;
            if packet.has_flag(flags::FIN) {
                debug!("rdt{} received FIN", self.version);
                return Ok(Inbound::Finished);
            }
            let bit = packet.header.alt_bit.ok_or(HeaderError::MissingField("N"))?;

            let Some(payload) = verified(&packet, session.stats_mut()) else {
                trace!("rdt{} fragment {} corrupt, NAK", self.version, packet.header.seq);
                self.reply(session, channel, &packet, NAK_PAYLOAD, false)?;
                continue;
            };

            if bit != session.recv_bit {
                trace!(
                    "rdt{} duplicate fragment {} N:{bit}, re-ACK",
                    self.version,
                    packet.header.seq
                );
                session.stats_mut().duplicates += 1;
                self.reply(session, channel, &packet, ACK_PAYLOAD, false)?;
                continue;
            }

            let fragment = Packet::new(packet.header.clone(), payload);
            let before = reassembler.reordered();
            let inserted = reassembler.insert(fragment)?;
            session.stats_mut().reordered += reassembler.reordered() - before;

            match inserted {
                // Already held under this sequence number: nothing to flip
                Insert::Duplicate => {
                    session.stats_mut().duplicates += 1;
                    self.reply(session, channel, &packet, ACK_PAYLOAD, false)?;
                }
                Insert::Buffered => {
                    session.recv_bit ^= 1;
                    session.stats_mut().fragments_delivered += 1;
                    self.reply(session, channel, &packet, ACK_PAYLOAD, false)?;
                }
                Insert::Complete(message) => {
                    session.recv_bit ^= 1;
                    let stats = session.stats_mut();
                    stats.fragments_delivered += 1;
                    stats.messages_received += 1;
                    self.reply(session, channel, &packet, ACK_PAYLOAD, true)?;
                    return Ok(Inbound::Message(message));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::injector::ErrorModel;
    use std::thread;

    fn scripted_reply(protocol: &AlternatingBit, payload: &[u8], bit: Option<u8>) -> Vec<u8> {
        let header = protocol.create_header(1, 1, 0, payload, bit);
        Packet::new(header, payload.to_vec()).encode()
    }

    #[test]
    fn test_policies() {
        assert_eq!(AlternatingBit::rdt21(ProtocolConfig::default()).policy(), AckPolicy::RDT21);
        assert_eq!(AlternatingBit::rdt22(ProtocolConfig::default()).policy(), AckPolicy::RDT22);
    }

    #[test]
    fn test_rdt22_rejects_stale_ack() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = AlternatingBit::rdt22(ProtocolConfig::default());

        let peer = protocol.clone();
        let handle = thread::spawn(move || {
            let first = Packet::decode(&b.receive(None).unwrap().unwrap()).unwrap();
            assert_eq!(first.header.alt_bit, Some(0));
            // Stale ACK for the other bit
            b.send(&scripted_reply(&peer, ACK_PAYLOAD, Some(1))).unwrap();

            let second = Packet::decode(&b.receive(None).unwrap().unwrap()).unwrap();
            assert_eq!(second, first);
            b.send(&scripted_reply(&peer, ACK_PAYLOAD, Some(0))).unwrap();
        });

        let mut sender = ProtocolSession::default();
        protocol.send(&mut sender, &mut a, b"x").unwrap();
        handle.join().unwrap();

        assert_eq!(sender.stats().garbled_replies, 1);
        assert_eq!(sender.stats().retransmissions, 1);
        assert_eq!(sender.send_bit, 1);
    }

    #[test]
    fn test_rdt21_ignores_reply_bit() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = AlternatingBit::rdt21(ProtocolConfig::default());

        let peer = protocol.clone();
        let handle = thread::spawn(move || {
            b.receive(None).unwrap().unwrap();
            b.send(&scripted_reply(&peer, ACK_PAYLOAD, Some(1))).unwrap();
        });

        let mut sender = ProtocolSession::default();
        protocol.send(&mut sender, &mut a, b"x").unwrap();
        handle.join().unwrap();
        assert_eq!(sender.stats().retransmissions, 0);
    }

    #[test]
    fn test_nak_then_ack() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = AlternatingBit::rdt21(ProtocolConfig::default());

        let peer = protocol.clone();
        let handle = thread::spawn(move || {
            b.receive(None).unwrap().unwrap();
            b.send(&scripted_reply(&peer, NAK_PAYLOAD, None)).unwrap();
            b.receive(None).unwrap().unwrap();
            b.send(&scripted_reply(&peer, ACK_PAYLOAD, None)).unwrap();
        });

        let mut sender = ProtocolSession::default();
        protocol.send(&mut sender, &mut a, b"x").unwrap();
        handle.join().unwrap();
        assert_eq!(sender.stats().naks_received, 1);
        assert_eq!(sender.stats().acks_received, 1);
    }

    #[test]
    fn test_receiver_tags_replies() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = AlternatingBit::rdt22(ProtocolConfig {
            data_len: 1,
            ..ProtocolConfig::default()
        });

        for (seq, bit, byte) in [(1u16, 0u8, b'h'), (2, 1, b'i')] {
            let header = protocol.create_header(seq, 2, 0, &[byte], Some(bit));
            a.send(&Packet::new(header, vec![byte]).encode()).unwrap();
        }

        let mut receiver = ProtocolSession::new(ErrorModel::perfect(0));
        assert_eq!(
            protocol.receive(&mut receiver, &mut b).unwrap(),
            Inbound::Message(b"hi".to_vec())
        );
        for expected in [0u8, 1] {
            let ack = Packet::decode(&a.receive(None).unwrap().unwrap()).unwrap();
            assert_eq!(ack.payload, ACK_PAYLOAD);
            assert_eq!(ack.header.alt_bit, Some(expected));
        }
        assert_eq!(receiver.recv_bit, 0);
    }

    fn data(protocol: &AlternatingBit, seq: u16, bit: u8, byte: u8) -> Vec<u8> {
        let header = protocol.create_header(seq, 2, 0, &[byte], Some(bit));
        Packet::new(header, vec![byte]).encode()
    }

    fn one_byte_rdt22() -> AlternatingBit {
        AlternatingBit::rdt22(ProtocolConfig {
            data_len: 1,
            ..ProtocolConfig::default()
        })
    }

    #[test]
    fn test_receiver_reacks_duplicate_with_its_bit() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = one_byte_rdt22();

        // First fragment twice (its ACK was lost to the sender), then the second
        a.send(&data(&protocol, 1, 0, b'h')).unwrap();
        a.send(&data(&protocol, 1, 0, b'h')).unwrap();
        a.send(&data(&protocol, 2, 1, b'i')).unwrap();

        let mut receiver = ProtocolSession::new(ErrorModel::perfect(0));
        assert_eq!(
            protocol.receive(&mut receiver, &mut b).unwrap(),
            Inbound::Message(b"hi".to_vec())
        );

        for expected in [0u8, 0, 1] {
            let ack = Packet::decode(&a.receive(None).unwrap().unwrap()).unwrap();
            assert_eq!(ack.payload, ACK_PAYLOAD);
            assert_eq!(ack.header.alt_bit, Some(expected));
        }
        let stats = receiver.stats();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.fragments_delivered, 2);
        assert_eq!(stats.acks_sent, 3);
        assert_eq!(receiver.recv_bit, 0);
    }

    #[test]
    fn test_held_sequence_number_keeps_expected_bit() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = one_byte_rdt22();

        // Second copy has the expected bit but a sequence number already held
        a.send(&data(&protocol, 1, 0, b'h')).unwrap();
        a.send(&data(&protocol, 1, 1, b'h')).unwrap();
        a.send(&data(&protocol, 2, 1, b'i')).unwrap();

        let mut receiver = ProtocolSession::new(ErrorModel::perfect(0));
        assert_eq!(
            protocol.receive(&mut receiver, &mut b).unwrap(),
            Inbound::Message(b"hi".to_vec())
        );
        assert_eq!(receiver.stats().duplicates, 1);
        assert_eq!(receiver.stats().fragments_delivered, 2);
        assert_eq!(receiver.recv_bit, 0);
    }

    #[test]
    fn test_missing_alt_bit_is_fatal() {
        let (mut a, mut b) = MemoryChannel::pair();
        let protocol = AlternatingBit::rdt21(ProtocolConfig::default());
        let header = protocol.create_header(1, 1, 0, b"x", None);
        a.send(&Packet::new(header, b"x".to_vec()).encode()).unwrap();

        let mut receiver = ProtocolSession::default();
        assert!(matches!(
            protocol.receive(&mut receiver, &mut b),
            Err(Error::Header(HeaderError::MissingField("N")))
        ));
    }
}
