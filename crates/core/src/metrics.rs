//! Per-session statistics.
//!
//! Recoverable corruption is invisible to the application except as added
//! latency; these counters make it observable. Every state machine updates
//! the [`SessionStats`] of the session it drives.
//!
//! # Thread Safety
//!
//! Not thread-safe. A session, and therefore its statistics, belongs to one
//! thread of control.

use std::time::{Duration, Instant};

use crate::injector::InjectorStats;

/// Counters for one protocol session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session was created
    pub start_time: Instant,

    // === Messages ===
    /// Messages handed to `send` and fully acknowledged
    pub messages_sent: u64,

    /// Messages reassembled by `receive`
    pub messages_received: u64,

    // === Sender side ===
    /// Distinct data fragments sent
    pub fragments_sent: u64,

    /// Packets put on the wire (first sends plus retransmissions)
    pub transmissions: u64,

    /// Repeated transmissions of an already sent fragment
    pub retransmissions: u64,

    /// Reply waits that expired
    pub timeouts: u64,

    /// Positive acknowledgments accepted
    pub acks_received: u64,

    /// Negative acknowledgments received
    pub naks_received: u64,

    /// Replies that were corrupt, stale or unexpected
    pub garbled_replies: u64,

    // === Receiver side ===
    /// Fragments buffered for reassembly
    pub fragments_delivered: u64,

    /// Positive acknowledgments sent
    pub acks_sent: u64,

    /// Negative acknowledgments sent
    pub naks_sent: u64,

    /// Received packets that failed their integrity check
    pub corrupt_detected: u64,

    /// Received packets repaired by 2D parity
    pub corrected: u64,

    /// Retransmitted fragments that were already held
    pub duplicates: u64,

    /// Fragments that arrived below the highest seq seen
    pub reordered: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            messages_sent: 0,
            messages_received: 0,
            fragments_sent: 0,
            transmissions: 0,
            retransmissions: 0,
            timeouts: 0,
            acks_received: 0,
            naks_received: 0,
            garbled_replies: 0,
            fragments_delivered: 0,
            acks_sent: 0,
            naks_sent: 0,
            corrupt_detected: 0,
            corrected: 0,
            duplicates: 0,
            reordered: 0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Retransmissions per distinct fragment sent.
    pub fn retransmission_rate(&self) -> f64 {
        if self.fragments_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.fragments_sent as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self, injected: &InjectorStats) {
        println!("\n=== Session Summary ===");
        println!("Duration: {} ms", self.duration().as_millis());
        println!("Messages sent: {}", self.messages_sent);
        println!("Messages received: {}", self.messages_received);
        println!();

        println!("=== Sender ===");
        println!("Fragments sent: {}", self.fragments_sent);
        println!("Transmissions: {}", self.transmissions);
        println!(
            "Retransmissions: {} ({:.2} per fragment)",
            self.retransmissions,
            self.retransmission_rate()
        );
        println!("Timeouts: {}", self.timeouts);
        println!("ACKs received: {}", self.acks_received);
        println!("NAKs received: {}", self.naks_received);
        println!("Garbled replies: {}", self.garbled_replies);
        println!();

        println!("=== Receiver ===");
        println!("Fragments delivered: {}", self.fragments_delivered);
        println!("ACKs sent: {}", self.acks_sent);
        println!("NAKs sent: {}", self.naks_sent);
        println!("Corruption detected: {}", self.corrupt_detected);
        println!("Corrected by parity: {}", self.corrected);
        println!("Duplicates: {}", self.duplicates);
        println!("Reordered: {}", self.reordered);
        println!();

        println!("=== Injected Faults ===");
        println!("Packets corrupted: {} of {}", injected.packets_corrupted, injected.packets_seen);
        println!("Packets dropped: {}", injected.packets_dropped);
        println!();
    }

    /// Export counters as `key=value` lines (for parsing/testing).
    pub fn export_text(&self) -> String {
        format!(
            "messages_sent={}\n\
             messages_received={}\n\
             fragments_sent={}\n\
             transmissions={}\n\
             retransmissions={}\n\
             timeouts={}\n\
             acks_received={}\n\
             naks_received={}\n\
             garbled_replies={}\n\
             fragments_delivered={}\n\
             acks_sent={}\n\
             naks_sent={}\n\
             corrupt_detected={}\n\
             corrected={}\n\
             duplicates={}\n\
             reordered={}\n",
            self.messages_sent,
            self.messages_received,
            self.fragments_sent,
            self.transmissions,
            self.retransmissions,
            self.timeouts,
            self.acks_received,
            self.naks_received,
            self.garbled_replies,
            self.fragments_delivered,
            self.acks_sent,
            self.naks_sent,
            self.corrupt_detected,
            self.corrected,
            self.duplicates,
            self.reordered,
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retransmission_rate() {
        let mut stats = SessionStats::new();
        assert_eq!(stats.retransmission_rate(), 0.0);
        stats.fragments_sent = 4;
        stats.retransmissions = 1;
        assert_eq!(stats.retransmission_rate(), 0.25);
    }

    #[test]
    fn test_export_text() {
        let mut stats = SessionStats::new();
        stats.fragments_sent = 10;
        stats.naks_sent = 2;
        let text = stats.export_text();
        assert!(text.contains("fragments_sent=10\n"));
        assert!(text.contains("naks_sent=2\n"));
        assert!(text.contains("duplicates=0\n"));
    }

    #[test]
    fn test_export_text_covers_every_counter() {
        let stats = SessionStats {
            acks_sent: 3,
            acks_received: 4,
            reordered: 5,
            ..SessionStats::new()
        };
        let text = stats.export_text();
        assert!(text.contains("acks_sent=3\n"));
        assert!(text.contains("acks_received=4\n"));
        assert!(text.contains("reordered=5\n"));
        assert_eq!(text.lines().count(), 16);
    }
}
