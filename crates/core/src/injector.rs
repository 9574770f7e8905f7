//! Channel noise simulation: bit flips, burst errors and packet loss.
//!
//! The injector sits between a state machine and its channel and models an
//! unreliable link in a deterministic way using seeded randomness. Given the
//! same seed and the same traffic, the same bits are flipped.
//!
//! # Simulated Effects
//!
//! - **Random bit errors**: `bit_errors` distinct bit positions are flipped
//! - **Burst errors**: a contiguous run of `burst` bits is flipped
//! - **Loss**: whole packets are dropped (only honoured by lossy senders)
//!
//! Corruption only ever touches the payload: the packet is split at its
//! first newline and the header in front of it passes through untouched.

use crate::bitio::{bits_to_bytes, bytes_to_bits};
use crate::error::{Error, Result};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Parameters of the simulated noise. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorModel {
    /// Chance that a packet is corrupted, in percent [0, 100]
    pub probability: f64,

    /// Number of random bits flipped in a corrupted packet (when `burst == 0`)
    pub bit_errors: usize,

    /// Length of the burst flipped in a corrupted packet (0 = no burst)
    pub burst: usize,

    /// Chance that a packet is dropped, in percent [0, 100]
    pub loss: f64,

    /// Stop corrupting after this many packets (None = never stop)
    pub corrupt_limit: Option<u64>,

    /// Random seed for determinism
    pub seed: u64,
}

impl ErrorModel {
    /// A noiseless link.
    pub fn perfect(seed: u64) -> Self {
        Self {
            probability: 0.0,
            bit_errors: 0,
            burst: 0,
            loss: 0.0,
            corrupt_limit: None,
            seed,
        }
    }

    /// Corrupt exactly the first `count` packets with `bit_errors` flips each,
    /// then behave as a perfect link.
    pub fn corrupt_first(count: u64, bit_errors: usize, seed: u64) -> Self {
        Self {
            probability: 100.0,
            bit_errors,
            corrupt_limit: Some(count),
            ..Self::perfect(seed)
        }
    }

    /// Check that probabilities are percentages.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("error probability", self.probability), ("loss", self.loss)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{name} must be within 0-100, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ErrorModel {
    fn default() -> Self {
        Self::perfect(0)
    }
}

/// Seeded fault injector.
///
/// # Thread Safety
/// Not thread-safe; each session owns its own instance.
#[derive(Debug, Clone)]
pub struct ErrorInjector {
    model: ErrorModel,
    rng: ChaCha8Rng,
    stats: InjectorStats,
}

impl ErrorInjector {
    pub fn new(model: ErrorModel) -> Self {
        Self {
            model,
            rng: ChaCha8Rng::seed_from_u64(model.seed),
            stats: InjectorStats::default(),
        }
    }

    pub fn model(&self) -> &ErrorModel {
        &self.model
    }

    /// Flip `n` distinct, uniformly chosen bits. `n` is clamped to the bit
    /// length of `data`.
    pub fn corrupt(&mut self, data: &[u8], n: usize) -> Vec<u8> {
        let mut bits = bytes_to_bits(data);
        let n = n.min(bits.len());
        for pos in index::sample(&mut self.rng, bits.len(), n).into_iter() {
            bits[pos] = !bits[pos];
        }
        repack(bits, data)
    }

    /// Flip a contiguous run of `length` bits at a random start. A run longer
    /// than the buffer is clamped to the buffer.
    pub fn burst_error(&mut self, data: &[u8], length: usize) -> Vec<u8> {
        let mut bits = bytes_to_bits(data);
        if bits.is_empty() || length == 0 {
            return data.to_vec();
        }
        let length = length.min(bits.len());
        let start = self.rng.gen_range(0..=bits.len() - length);
        for bit in &mut bits[start..start + length] {
            *bit = !*bit;
        }
        repack(bits, data)
    }

    /// Possibly corrupt the payload of an encoded packet.
    ///
    /// The header (everything up to and including the first newline) is
    /// never modified.
    pub fn corrupt_packet(&mut self, packet: &[u8]) -> Vec<u8> {
        self.stats.packets_seen += 1;

        if !self.roll_corruption() {
            return packet.to_vec();
        }

        let split = match packet.iter().position(|&b| b == b'\n') {
            Some(pos) if pos + 1 < packet.len() => pos + 1,
            _ => return packet.to_vec(),
        };
        let (header, payload) = packet.split_at(split);

        let corrupted = if self.model.burst > 0 {
            self.burst_error(payload, self.model.burst)
        } else {
            self.corrupt(payload, self.model.bit_errors)
        };

        if corrupted != payload {
            self.stats.packets_corrupted += 1;
        }

        let mut out = Vec::with_capacity(packet.len());
        out.extend_from_slice(header);
        out.extend_from_slice(&corrupted);
        out
    }

    /// Decide whether the next packet is lost.
    pub fn should_drop(&mut self) -> bool {
        if self.model.loss <= 0.0 {
            return false;
        }
        let roll: f64 = self.rng.gen_range(0.0..100.0);
        let drop = roll < self.model.loss;
        if drop {
            self.stats.packets_dropped += 1;
        }
        drop
    }

    pub fn stats(&self) -> InjectorStats {
        self.stats
    }

    fn roll_corruption(&mut self) -> bool {
        if self.model.probability <= 0.0 {
            return false;
        }
        if let Some(limit) = self.model.corrupt_limit {
            if self.stats.packets_corrupted >= limit {
                return false;
            }
        }
        let roll: f64 = self.rng.gen_range(0.0..100.0);
        roll < self.model.probability
    }
}

fn repack(bits: Vec<bool>, original: &[u8]) -> Vec<u8> {
    // bytes_to_bits always yields a whole number of bytes
    bits_to_bytes(&bits).unwrap_or_else(|_| original.to_vec())
}

/// Statistics about injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectorStats {
    /// Packets offered to the injector for corruption
    pub packets_seen: u64,

    /// Packets whose payload was altered
    pub packets_corrupted: u64,

    /// Packets dropped due to loss
    pub packets_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hamming(a: &[u8], b: &[u8]) -> u32 {
        a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
    }

    #[test]
    fn test_corrupt_flips_exact_count() {
        let mut injector = ErrorInjector::new(ErrorModel::perfect(42));
        let data = b"Hello, World!".to_vec();
        for n in [0, 1, 2, 5, 16] {
            let corrupted = injector.corrupt(&data, n);
            assert_eq!(hamming(&data, &corrupted), n as u32);
        }
    }

    #[test]
    fn test_corrupt_clamps_to_length() {
        let mut injector = ErrorInjector::new(ErrorModel::perfect(1));
        let corrupted = injector.corrupt(&[0x00], 20);
        assert_eq!(corrupted, vec![0xFF]);
    }

    #[test]
    fn test_burst_is_contiguous() {
        let mut injector = ErrorInjector::new(ErrorModel::perfect(3));
        let data = vec![0u8; 8];
        for length in [1, 5, 13, 64] {
            let corrupted = injector.burst_error(&data, length);
            let bits = bytes_to_bits(&corrupted);
            let first = bits.iter().position(|&b| b).unwrap();
            let last = bits.iter().rposition(|&b| b).unwrap();
            assert_eq!(last - first + 1, length);
            assert_eq!(bits.iter().filter(|&&b| b).count(), length);
        }
    }

    #[test]
    fn test_burst_longer_than_buffer() {
        let mut injector = ErrorInjector::new(ErrorModel::perfect(3));
        assert_eq!(injector.burst_error(&[0x0F], 100), vec![0xF0]);
    }

    #[test]
    fn test_header_untouched() {
        let model = ErrorModel {
            probability: 100.0,
            bit_errors: 3,
            ..ErrorModel::perfect(5)
        };
        let mut injector = ErrorInjector::new(model);
        let packet = b"HEADER S:0001 T:0001 F:00\npayload bytes".to_vec();
        for _ in 0..50 {
            let corrupted = injector.corrupt_packet(&packet);
            assert_eq!(&corrupted[..26], &packet[..26]);
            assert_ne!(corrupted, packet);
        }
        assert_eq!(injector.stats().packets_corrupted, 50);
    }

    #[test]
    fn test_zero_probability_passthrough() {
        let mut injector = ErrorInjector::new(ErrorModel::perfect(5));
        let packet = b"HEADER S:0001 T:0001 F:00\nabc".to_vec();
        assert_eq!(injector.corrupt_packet(&packet), packet);
        assert_eq!(injector.stats().packets_seen, 1);
        assert_eq!(injector.stats().packets_corrupted, 0);
    }

    #[test]
    fn test_empty_payload_passthrough() {
        let mut injector = ErrorInjector::new(ErrorModel::corrupt_first(1, 1, 5));
        let packet = b"HEADER S:0001 T:0001 F:01\n".to_vec();
        assert_eq!(injector.corrupt_packet(&packet), packet);
    }

    #[test]
    fn test_corrupt_limit() {
        let mut injector = ErrorInjector::new(ErrorModel::corrupt_first(1, 1, 9));
        let packet = b"HEADER S:0001 T:0001 F:00\nxyz".to_vec();
        assert_ne!(injector.corrupt_packet(&packet), packet);
        for _ in 0..10 {
            assert_eq!(injector.corrupt_packet(&packet), packet);
        }
    }

    #[test]
    fn test_loss_rate() {
        let model = ErrorModel {
            loss: 25.0,
            ..ErrorModel::perfect(42)
        };
        let mut injector = ErrorInjector::new(model);
        let dropped = (0..1000).filter(|_| injector.should_drop()).count();
        assert!(dropped > 150 && dropped < 350, "dropped {dropped}");
    }

    #[test]
    fn test_determinism() {
        let model = ErrorModel {
            probability: 50.0,
            bit_errors: 2,
            ..ErrorModel::perfect(12345)
        };
        let mut a = ErrorInjector::new(model);
        let mut b = ErrorInjector::new(model);
        let packet = b"HEADER S:0001 T:0001 F:00\nsome payload".to_vec();
        for _ in 0..20 {
            assert_eq!(a.corrupt_packet(&packet), b.corrupt_packet(&packet));
        }
    }

    #[test]
    fn test_validate() {
        assert!(ErrorModel::perfect(0).validate().is_ok());
        let bad = ErrorModel {
            probability: 120.0,
            ..ErrorModel::perfect(0)
        };
        assert!(bad.validate().is_err());
    }
}
