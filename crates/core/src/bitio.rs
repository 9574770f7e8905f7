//! Bit-level conversion between byte buffers and bit sequences.
//!
//! The error-control codes and the error injector all reason about
//! individual bits, so payloads are expanded into `Vec<bool>` (one entry per
//! bit, MSB first) and packed back afterwards.
//!
//! # Example
//! ```
//! use rdt_sim_core::bitio::{bits_to_bytes, bytes_to_bits};
//!
//! let bits = bytes_to_bits(&[0b1010_0001]);
//! assert_eq!(bits, vec![true, false, true, false, false, false, false, true]);
//! assert_eq!(bits_to_bytes(&bits).unwrap(), vec![0b1010_0001]);
//! ```

use crate::error::{BitIoError, Result};

/// Number of bits per byte.
pub const BYTE_BITS: usize = 8;

/// Writes bits MSB-first into a byte buffer.
///
/// # Invariants
/// - `bit_count` is always < 8
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    /// Completed bytes
    bytes: Vec<u8>,
    /// Accumulator for the current partial byte (MSB-aligned)
    bit_buffer: u8,
    /// Number of bits in bit_buffer (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// Create a writer with room for `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(BYTE_BITS)),
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    /// Append one bit.
    pub fn write_bit(&mut self, bit: bool) {
        if bit {
            self.bit_buffer |= 0x80 >> self.bit_count;
        }
        self.bit_count += 1;

        if self.bit_count == 8 {
            self.bytes.push(self.bit_buffer);
            self.bit_buffer = 0;
            self.bit_count = 0;
        }
    }

    /// Total number of bits written.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * BYTE_BITS + self.bit_count as usize
    }

    /// Finish writing and return the output bytes.
    ///
    /// Fails unless a whole number of bytes has been written.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.bit_count != 0 {
            return Err(BitIoError::Unaligned(self.bit_len()).into());
        }
        Ok(self.bytes)
    }
}

/// Reads bits MSB-first from a byte buffer.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Current bit position (0 = MSB of first byte)
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    /// Read a single bit.
    ///
    /// # Errors
    /// `BitIoError::UnexpectedEof` once every bit has been consumed.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.is_empty() {
            return Err(BitIoError::UnexpectedEof.into());
        }
        let byte = self.data[self.bit_position / BYTE_BITS];
        let bit = byte & (0x80 >> (self.bit_position % BYTE_BITS)) != 0;
        self.bit_position += 1;
        Ok(bit)
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * BYTE_BITS - self.bit_position
    }

    pub fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }
}

impl Iterator for BitReader<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        self.read_bit().ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bits_remaining();
        (n, Some(n))
    }
}

/// Expand bytes into bits, 8 per byte, most significant bit first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    BitReader::new(bytes).collect()
}

/// Pack bits back into bytes.
///
/// # Errors
/// `BitIoError::Unaligned` if `bits.len()` is not a multiple of 8.
pub fn bits_to_bytes(bits: &[bool]) -> Result<Vec<u8>> {
    if bits.len() % BYTE_BITS != 0 {
        return Err(BitIoError::Unaligned(bits.len()).into());
    }
    let mut writer = BitWriter::with_capacity(bits.len());
    for &bit in bits {
        writer.write_bit(bit);
    }
    writer.finish()
}

/// Render bits as a string of '0' and '1' characters.
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

/// Parse a string of '0' and '1' characters.
pub fn parse_bit_string(s: &str) -> Result<Vec<bool>> {
    s.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(BitIoError::InvalidBitChar(other).into()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_msb_first() {
        let bits = bytes_to_bits(&[0b1000_0001, 0b0100_0000]);
        assert_eq!(bits.len(), 16);
        assert!(bits[0]);
        assert!(bits[7]);
        assert!(bits[9]);
        assert_eq!(bits.iter().filter(|&&b| b).count(), 3);
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(bits_to_bytes(&bytes_to_bits(&data)).unwrap(), data);
    }

    #[test]
    fn test_leading_zero_bytes_preserved() {
        let data = vec![0, 0, 7];
        assert_eq!(bits_to_bytes(&bytes_to_bits(&data)).unwrap(), data);
    }

    #[test]
    fn test_empty() {
        assert!(bytes_to_bits(&[]).is_empty());
        assert!(bits_to_bytes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_unaligned_rejected() {
        let result = bits_to_bytes(&[true, false, true]);
        assert!(matches!(
            result,
            Err(Error::BitIo(BitIoError::Unaligned(3)))
        ));
    }

    #[test]
    fn test_reader_eof() {
        let mut reader = BitReader::new(&[0xFF]);
        for _ in 0..8 {
            assert!(reader.read_bit().unwrap());
        }
        assert!(reader.is_empty());
        assert!(reader.read_bit().is_err());
    }

    #[test]
    fn test_bit_string() {
        let bits = bytes_to_bits(&[0b0110_1001]);
        let s = bits_to_string(&bits);
        assert_eq!(s, "01101001");
        assert_eq!(parse_bit_string(&s).unwrap(), bits);
        assert!(parse_bit_string("0120").is_err());
    }
}
