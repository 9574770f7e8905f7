//! One's-complement additive checksum (UDP style, 8-bit words).
//!
//! The payload is split into 8-bit words which are summed with end-around
//! carry: any carry out of the top bit is folded back into the low bit.
//! The checksum is the bitwise complement of that sum.
//!
//! Verification appends the received checksum to the payload and reruns the
//! generator; an intact payload produces an all-zero result.
//!
//! The code is an error *detector* only, and a weak one: two flips of the
//! same bit position in opposite directions cancel out, and many burst
//! patterns go unnoticed. That weakness is part of what the simulator
//! measures.

use std::fmt;

use crate::bitio::{bits_to_bytes, bits_to_string, bytes_to_bits, parse_bit_string};
use crate::error::Result;

/// Width of the rendered checksum in bit characters.
pub const CHECKSUM_BITS: usize = 8;

/// An 8-bit one's-complement checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum(pub u8);

impl Checksum {
    /// The checksum as 8 bits, MSB first.
    pub fn to_bits(self) -> Vec<bool> {
        bytes_to_bits(&[self.0])
    }

    /// Parse the 8-character bit string used on the wire.
    ///
    /// Returns `None` unless the string is exactly 8 '0'/'1' characters.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != CHECKSUM_BITS {
            return None;
        }
        let bits = parse_bit_string(s).ok()?;
        let bytes = bits_to_bytes(&bits).ok()?;
        Some(Self(bytes[0]))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bits_to_string(&self.to_bits()))
    }
}

/// Add two 8-bit words with end-around carry.
fn ones_complement_add(a: u8, b: u8) -> u8 {
    let mut sum = a as u16 + b as u16;
    while sum > 0xFF {
        sum = (sum & 0xFF) + (sum >> 8);
    }
    sum as u8
}

/// Compute the checksum of a byte buffer.
pub fn generate(data: &[u8]) -> Checksum {
    let sum = data.iter().fold(0u8, |acc, &b| ones_complement_add(acc, b));
    Checksum(!sum)
}

/// Compute the checksum of a bit sequence.
///
/// # Errors
/// `BitIoError::Unaligned` if the sequence is not a whole number of bytes.
pub fn generate_bits(bits: &[bool]) -> Result<Checksum> {
    Ok(generate(&bits_to_bytes(bits)?))
}

/// Check a payload against the checksum that travelled with it.
pub fn verify(data: &[u8], checksum: Checksum) -> bool {
    let mut framed = Vec::with_capacity(data.len() + 1);
    framed.extend_from_slice(data);
    framed.push(checksum.0);
    generate(&framed).0 == 0
}
