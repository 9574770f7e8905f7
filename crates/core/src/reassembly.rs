//! Receiver-side collection of fragments into one message.
//!
//! The reassembler buffers fragments keyed by sequence number until the
//! count of distinct fragments equals the `total` announced in their
//! headers, then emits the message in `seq` order.
//!
//! # Design
//!
//! - **Per-message state**: a fresh reassembler is used for each `receive`
//! - **Duplicate tolerance**: a fragment already held is reported, not stored
//! - **Consistency**: every fragment must agree on `total`
//!
//! # Thread Safety
//!
//! This structure is NOT thread-safe. It is owned by a single receive loop.

use crate::error::{ReassemblyError, Result};
use crate::packet::{reassemble, Packet};
use std::collections::BTreeMap;

/// What happened to an inserted fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    /// Stored; more fragments are needed
    Buffered,
    /// Already held; ignored
    Duplicate,
    /// This fragment completed the message
    Complete(Vec<u8>),
}

/// Collects the fragments of a single message.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Expected total, fixed by the first fragment seen
    total: Option<u16>,

    /// Fragments received so far, keyed by seq
    fragments: BTreeMap<u16, Packet>,

    /// Highest seq seen so far (for reorder detection)
    highest_seq: u16,

    /// Fragments that arrived below the highest seq already seen
    reordered: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fragment.
    ///
    /// # Errors
    /// - `ReassemblyError::TotalMismatch` if `total` disagrees with earlier fragments
    /// - `ReassemblyError::SeqOutOfRange` if `seq` is not within `1..=total`
    pub fn insert(&mut self, packet: Packet) -> Result<Insert> {
        let seq = packet.header.seq;
        let total = *self.total.get_or_insert(packet.header.total);

        if packet.header.total != total {
            return Err(ReassemblyError::TotalMismatch {
                expected: total,
                actual: packet.header.total,
            }
            .into());
        }
        if seq == 0 || seq > total {
            return Err(ReassemblyError::SeqOutOfRange { seq, total }.into());
        }
        if self.fragments.contains_key(&seq) {
            return Ok(Insert::Duplicate);
        }

        if seq < self.highest_seq {
            self.reordered += 1;
        }
        self.highest_seq = self.highest_seq.max(seq);
        self.fragments.insert(seq, packet);

        if self.fragments.len() == total as usize {
            let mut packets: Vec<Packet> = std::mem::take(&mut self.fragments).into_values().collect();
            let message = reassemble(&mut packets)?;
            self.total = None;
            self.highest_seq = 0;
            return Ok(Insert::Complete(message));
        }

        Ok(Insert::Buffered)
    }

    /// Number of fragments buffered so far.
    pub fn received_count(&self) -> usize {
        self.fragments.len()
    }

    /// Number of fragments still missing, if the total is known.
    pub fn missing_count(&self) -> Option<usize> {
        self.total
            .map(|total| total as usize - self.fragments.len())
    }

    /// Fragments that arrived out of order.
    pub fn reordered(&self) -> u64 {
        self.reordered
    }
}
