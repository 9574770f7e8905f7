//! rdt 2.0: error detection with ACK/NACK flags.
//!
//! Data fragments carry an error-control field and pass through the fault
//! injector. Replies are flag-only packets (`F:01` or `F:04`) sent clean:
//! this version assumes acknowledgments are never corrupted.

use log::{debug, trace};

use super::{fragments, next_packet, note_retry, verified, Inbound, Protocol, ProtocolConfig, Version};
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::packet::{flags, Packet};
use crate::reassembly::{Insert, Reassembler};
use crate::session::ProtocolSession;

#[derive(Debug, Clone)]
pub struct Rdt20 {
    config: ProtocolConfig,
}

impl Rdt20 {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    fn reply(
        &self,
        session: &mut ProtocolSession,
        channel: &mut dyn Channel,
        data: &Packet,
        flag: u8,
    ) -> Result<()> {
        let header = self.create_header(data.header.seq, data.header.total, flag, &[], None);
        session.transmit_clean(channel, &Packet::new(header, Vec::new()))?;
        let stats = session.stats_mut();
        if flag == flags::ACK {
            stats.acks_sent += 1;
        } else {
            stats.naks_sent += 1;
        }
        Ok(())
    }
}

impl Protocol for Rdt20 {
    fn version(&self) -> Version {
        Version::V2_0
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
        debug!("rdt2.0 sending {} bytes in {} fragments", message.len(), packets.len());

        for fragment in packets {
            let seq = fragment.header.seq;
            let header = self.create_header(seq, fragment.header.total, 0, &fragment.payload, None);
            session.hold(Packet::new(header, fragment.payload));

            loop {
                let attempts = session.retransmit(channel, false)?;

                let reply = next_packet(self, channel, None)?.ok_or(Error::ChannelClosed)?;
                let stats = session.stats_mut();
                if reply.has_flag(flags::ACK) {
                    stats.acks_received += 1;
                    break;
                }
                if reply.has_flag(flags::NACK) {
                    stats.naks_received += 1;
                    trace!("rdt2.0 NACK for fragment {seq}, resending");
                } else {
                    stats.garbled_replies += 1;
                    trace!("rdt2.0 unexpected reply F:{:02x}, resending", reply.header.flags);
                }
                note_retry(&self.config, stats, seq, attempts)?;
            }
            session.acknowledge();
        }

        session.stats_mut().messages_sent += 1;
        Ok(())
    }

    fn receive(&self, session: &mut ProtocolSession, channel: &mut dyn Channel) -> Result<Inbound> {
        let mut reassembler = Reassembler::new();

        loop {
            let packet = next_packet(self, channel, None)?.ok_or(Error::ChannelClosed)?;
            if packet.has_flag(flags::FIN) {
                debug!("rdt2.0 received FIN");
                return Ok(Inbound::Finished);
            }

            let Some(payload) = verified(&packet, session.stats_mut()) else {
                trace!("rdt2.0 fragment {} corrupt, NACK", packet.header.seq);
                self.reply(session, channel, &packet, flags::NACK)?;
                continue;
            };

            let fragment = Packet::new(packet.header.clone(), payload);
            let before = reassembler.reordered();
            let inserted = reassembler.insert(fragment)?;
            session.stats_mut().reordered += reassembler.reordered() - before;

            match inserted {
                Insert::Duplicate => {
                    session.stats_mut().duplicates += 1;
                    self.reply(session, channel, &packet, flags::ACK)?;
                }
                Insert::Buffered => {
                    session.stats_mut().fragments_delivered += 1;
                    self.reply(session, channel, &packet, flags::ACK)?;
                }
                Insert::Complete(message) => {
                    let stats = session.stats_mut();
                    stats.fragments_delivered += 1;
                    stats.messages_received += 1;
                    self.reply(session, channel, &packet, flags::ACK)?;
                    return Ok(Inbound::Message(message));
                }
            }
        }
    }
}
