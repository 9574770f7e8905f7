//! Byte channel contract consumed by the state machines.
//!
//! A [`Channel`] moves whole packets between two peers. It makes no promise
//! about integrity; the protocol versions layered on top supply that.
//!
//! Waiting is expressed as a single wait-with-deadline: `receive(Some(d))`
//! blocks for at most `d` and returns `Ok(None)` when it expires, so the
//! state machines never busy-poll.
//!
//! [`MemoryChannel`] is an in-process pair used by tests and the demo mode.
//! Socket-backed channels live in the application crate.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{Error, Result};

/// A blocking, message-oriented byte channel.
pub trait Channel {
    /// Send one packet.
    ///
    /// # Errors
    /// `Error::ChannelClosed` if the channel or its peer is gone.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive one packet, waiting at most `timeout` (`None` = forever).
    ///
    /// Returns `Ok(None)` if the deadline passed with nothing to read.
    ///
    /// # Errors
    /// `Error::ChannelClosed` once the peer has disconnected.
    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>>;

    /// Close the channel. Further sends fail.
    fn close(&mut self) -> Result<()>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        (**self).receive(timeout)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// One end of an in-process channel pair.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(bytes.to_vec()).map_err(|_| Error::ChannelClosed)
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        match timeout {
            None => self.rx.recv().map(Some).map_err(|_| Error::ChannelClosed),
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
            },
        }
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the sender lets the peer observe the disconnect.
        self.tx = None;
        Ok(())
    }
}
