//! rdt 1.0: reliable transfer over a perfect channel.
//!
//! The sender pushes every fragment back-to-back and never waits. The
//! receiver wakes every `poll_interval`, buffers whatever arrived, and
//! returns once `total` distinct fragments are held. No acknowledgments
//! are exchanged and packets carry no error-control field.

use std::time::Instant;

use log::{debug, trace};

use super::{fragments, next_packet, Inbound, Protocol, ProtocolConfig, Version};
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::packet::{flags, Packet};
use crate::reassembly::{Insert, Reassembler};
use crate::session::ProtocolSession;

#[derive(Debug, Clone)]
pub struct Rdt10 {
    config: ProtocolConfig,
}

impl Rdt10 {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }
}

impl Protocol for Rdt10 {
    fn version(&self) -> Version {
        Version::V1_0
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
        debug!("rdt1.0 sending {} bytes in {} fragments", message.len(), packets.len());

        for fragment in packets {
            let header = self.create_header(
                fragment.header.seq,
                fragment.header.total,
                0,
                &fragment.payload,
                None,
            );
            session.transmit_clean(channel, &Packet::new(header, fragment.payload))?;
            session.stats_mut().fragments_sent += 1;
        }

        session.stats_mut().messages_sent += 1;
        Ok(())
    }

    fn receive(&self, session: &mut ProtocolSession, channel: &mut dyn Channel) -> Result<Inbound> {
        let mut reassembler = Reassembler::new();
        let mut last_activity = Instant::now();

        loop {
            let Some(packet) = next_packet(self, channel, Some(self.config.poll_interval))? else {
                if let Some(idle) = self.config.idle_timeout {
                    if last_activity.elapsed() >= idle {
                        return Err(Error::Timeout(idle));
                    }
                }
                continue;
            };
            last_activity = Instant::now();

            if packet.has_flag(flags::FIN) {
                debug!("rdt1.0 received FIN");
                return Ok(Inbound::Finished);
            }

            trace!("rdt1.0 fragment {}/{}", packet.header.seq, packet.header.total);
            let before = reassembler.reordered();
            let inserted = reassembler.insert(packet)?;
            let stats = session.stats_mut();
            stats.reordered += reassembler.reordered() - before;

            match inserted {
                Insert::Duplicate => stats.duplicates += 1,
                Insert::Buffered => stats.fragments_delivered += 1,
                Insert::Complete(message) => {
                    stats.fragments_delivered += 1;
                    stats.messages_received += 1;
                    return Ok(Inbound::Message(message));
                }
            }
        }
    }
}
