//! Application-facing wrapper around a protocol and its session.
//!
//! A [`Messenger`] binds one [`Channel`], one protocol version and one
//! [`ProtocolSession`] together so an application only deals in whole
//! messages:
//!
//! ```no_run
//! use rdt_sim_core::channel::MemoryChannel;
//! use rdt_sim_core::injector::ErrorModel;
//! use rdt_sim_core::messenger::Messenger;
//! use rdt_sim_core::protocol::{ProtocolConfig, Version};
//!
//! let (left, _right) = MemoryChannel::pair();
//! let mut messenger = Messenger::new(left, Version::V2_2, ProtocolConfig::default(), ErrorModel::perfect(7))?;
//! messenger.send(b"Hello, World!")?;
//! messenger.finish()?;
//! # Ok::<(), rdt_sim_core::Error>(())
//! ```

use log::info;

use crate::channel::Channel;
use crate::error::Result;
use crate::injector::{ErrorModel, InjectorStats};
use crate::metrics::SessionStats;
use crate::protocol::{self, Inbound, Protocol, ProtocolConfig, Version};
use crate::session::ProtocolSession;

pub struct Messenger<C: Channel> {
    channel: C,
    protocol: Box<dyn Protocol>,
    session: ProtocolSession,
}

impl<C: Channel> Messenger<C> {
    /// # Errors
    /// `Error::Config` if `config` or `model` is out of range.
    pub fn new(
        channel: C,
        version: Version,
        config: ProtocolConfig,
        model: ErrorModel,
    ) -> Result<Self> {
        config.validate()?;
        model.validate()?;
        info!(
            "rdt{version} session: data_len={} control={:?} error={}% x{} burst={} loss={}% seed={}",
            config.data_len,
            config.error_control,
            model.probability,
            model.bit_errors,
            model.burst,
            model.loss,
            model.seed
        );
        Ok(Self {
            channel,
            protocol: protocol::create(version, config),
            session: ProtocolSession::new(model),
        })
    }

    pub fn version(&self) -> Version {
        self.protocol.version()
    }

    /// Send one message, blocking until it is fully acknowledged.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        self.protocol
            .send(&mut self.session, &mut self.channel, message)
    }

    /// Block until the next message or FIN.
    pub fn receive(&mut self) -> Result<Inbound> {
        self.protocol.receive(&mut self.session, &mut self.channel)
    }

    /// Send FIN and close the channel.
    pub fn finish(&mut self) -> Result<()> {
        self.protocol.finish(&mut self.session, &mut self.channel)?;
        self.channel.close()
    }

    pub fn stats(&self) -> &SessionStats {
        self.session.stats()
    }

    pub fn injector_stats(&self) -> InjectorStats {
        self.session.injector_stats()
    }

    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Release the channel, e.g. to hand a socket back to a server loop.
    pub fn into_channel(self) -> C {
        self.channel
    }
}
