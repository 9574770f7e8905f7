//! rdt 3.0: alternating bit over a lossy channel.
//!
//! The sender waits at most `reply_timeout` for each reply and resends the
//! outstanding fragment when the wait expires. A reply is accepted only if
//! it has the ACK flag, an intact error field, and the bit of the fragment
//! just sent; anything else triggers a resend.
//!
//! Both directions go through the injector with loss enabled. The receiver
//! mirrors 2.2 without NAKs: a corrupt fragment is answered with an ACK for
//! the previous bit, a duplicate with an ACK for its own bit. The ACK that
//! completes a message is sent clean and is never dropped.

use log::{debug, trace};

use super::{
    fragments, next_packet, note_retry, verified, Inbound, Protocol, ProtocolConfig, Version,
    ACK_PAYLOAD,
};
use crate::channel::Channel;
use crate::error::{Error, HeaderError, Result};
use crate::packet::{flags, Packet};
use crate::reassembly::{Insert, Reassembler};
use crate::session::ProtocolSession;

#[derive(Debug, Clone)]
pub struct Rdt30 {
    config: ProtocolConfig,
}

impl Rdt30 {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    fn accepts(&self, session: &mut ProtocolSession, reply: &Packet, sent_bit: u8) -> bool {
        if !reply.has_flag(flags::ACK) {
            return false;
        }
        if verified(reply, session.stats_mut()).is_none() {
            return false;
        }
        reply.header.alt_bit == Some(sent_bit)
    }

    /// ACK `bit` for the fragment in `data`.
    fn ack(
        &self,
        session: &mut ProtocolSession,
        channel: &mut dyn Channel,
        data: &Packet,
        bit: u8,
        clean: bool,
    ) -> Result<()> {
        let header =
            self.create_header(data.header.seq, data.header.total, flags::ACK, ACK_PAYLOAD, Some(bit));
        let packet = Packet::new(header, ACK_PAYLOAD.to_vec());
        if clean {
            session.transmit_clean(channel, &packet)?;
        } else {
            session.transmit(channel, &packet, true)?;
        }
        session.stats_mut().acks_sent += 1;
        Ok(())
    }
}

impl Protocol for Rdt30 {
    fn version(&self) -> Version {
        Version::V3_0
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
        debug!("rdt3.0 sending {} bytes in {} fragments", message.len(), packets.len());

        for fragment in packets {
            let seq = fragment.header.seq;
            let bit = session.send_bit;
            let header = self.create_header(seq, fragment.header.total, 0, &fragment.payload, Some(bit));
            session.hold(Packet::new(header, fragment.payload));

            loop {
                let attempts = session.retransmit(channel, true)?;

                match next_packet(self, channel, Some(self.config.reply_timeout))? {
                    None => {
                        session.stats_mut().timeouts += 1;
                        trace!("rdt3.0 timeout on fragment {seq} N:{bit}, resending");
                    }
                    Some(reply) => {
                        if self.accepts(session, &reply, bit) {
                            session.stats_mut().acks_received += 1;
                            break;
                        }
                        session.stats_mut().garbled_replies += 1;
                        trace!(
                            "rdt3.0 rejected reply F:{:02x} N:{:?} for fragment {seq}, resending",
                            reply.header.flags,
                            reply.header.alt_bit
                        );
                    }
                }
                note_retry(&self.config, session.stats_mut(), seq, attempts)?;
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
            let packet = match next_packet(self, channel, self.config.idle_timeout)? {
                Some(packet) => packet,
                None => match self.config.idle_timeout {
                    Some(idle) => return Err(Error::Timeout(idle)),
                    None => return Err(Error::ChannelClosed),
                },
            };
            if packet.has_flag(flags::FIN) {
                debug!("rdt3.0 received FIN");
                return Ok(Inbound::Finished);
            }
            if packet.has_flag(flags::ACK) {
                // Late reply to a fragment this end already saw acknowledged
                trace!("rdt3.0 ignoring stray ACK N:{:?}", packet.header.alt_bit);
                continue;
            }
            let bit = packet.header.alt_bit.ok_or(HeaderError::MissingField("N"))?;

            let Some(payload) = verified(&packet, session.stats_mut()) else {
                let previous = session.recv_bit ^ 1;
                trace!(
                    "rdt3.0 fragment {} corrupt, re-ACK N:{previous}",
                    packet.header.seq
                );
                self.ack(session, channel, &packet, previous, false)?;
                continue;
            };

            if bit != session.recv_bit {
                trace!("rdt3.0 duplicate fragment {} N:{bit}, re-ACK", packet.header.seq);
                session.stats_mut().duplicates += 1;
                self.ack(session, channel, &packet, bit, false)?;
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
                    self.ack(session, channel, &packet, bit, false)?;
                }
                Insert::Buffered => {
                    session.recv_bit ^= 1;
                    session.stats_mut().fragments_delivered += 1;
                    self.ack(session, channel, &packet, bit, false)?;
                }
                Insert::Complete(message) => {
                    session.recv_bit ^= 1;
                    let stats = session.stats_mut();
                    stats.fragments_delivered += 1;
                    stats.messages_received += 1;
                    self.ack(session, channel, &packet, bit, true)?;
                    return Ok(Inbound::Message(message));
                }
            }
        }
    }
}
