//! Two-dimensional even parity over a byte payload.
//!
//! The payload is laid out as an `N x 8` bit matrix, one byte per row. The
//! sender appends one even-parity bit per row and one per column; the parity
//! vector is flat, rows first, so it is always `N + 8` bits long.
//!
//! ```text
//!            col 0 .. col 7   | row parity
//!  byte 0    b b b b b b b b  |  r0
//!  byte 1    b b b b b b b b  |  r1
//!  ...
//!  ----------------------------
//!  col parity c0 .. c7
//! ```
//!
//! A single flipped bit shows up as exactly one row mismatch and exactly one
//! column mismatch, and is corrected by flipping the bit at the
//! intersection. Any other mismatch pattern is reported as uncorrectable.
//! The code detects at most two bit errors and corrects at most one.

use crate::bitio::{bits_to_bytes, bytes_to_bits, BYTE_BITS};

/// Outcome of verifying a payload against its parity vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParityVerdict {
    /// Parity matches; the payload is returned unchanged.
    Intact(Vec<u8>),
    /// One bit was wrong and has been flipped back.
    Corrected {
        payload: Vec<u8>,
        row: usize,
        column: usize,
    },
    /// The mismatch pattern cannot be explained by a single bit error.
    Uncorrectable,
}

impl ParityVerdict {
    /// Collapse the verdict into the usable payload, if any.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            Self::Intact(payload) | Self::Corrected { payload, .. } => Some(payload),
            Self::Uncorrectable => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Uncorrectable)
    }
}

/// Generate the parity vector for `data`: `data.len()` row bits then 8
/// column bits.
pub fn generate(data: &[u8]) -> Vec<bool> {
    let mut parity = Vec::with_capacity(data.len() + BYTE_BITS);

    for byte in data {
        parity.push(byte.count_ones() % 2 == 1);
    }

    let column_mix = data.iter().fold(0u8, |acc, &b| acc ^ b);
    for col in 0..BYTE_BITS {
        parity.push(column_mix & (0x80 >> col) != 0);
    }

    parity
}

/// Indices where two parity vectors of equal length disagree, split into
/// row and column mismatches.
fn mismatches(rows: usize, expected: &[bool], actual: &[bool]) -> (Vec<usize>, Vec<usize>) {
    let mut row_errors = Vec::new();
    let mut col_errors = Vec::new();
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        if e != a {
            if i < rows {
                row_errors.push(i);
            } else {
                col_errors.push(i - rows);
            }
        }
    }
    (row_errors, col_errors)
}

/// Verify `data` against the sender's `parity`, correcting a single-bit
/// error when the mismatch pattern pins one down.
pub fn verify_and_correct(data: &[u8], parity: &[bool]) -> ParityVerdict {
    let rows = data.len();
    if parity.len() != rows + BYTE_BITS {
        return ParityVerdict::Uncorrectable;
    }

    let (row_errors, col_errors) = mismatches(rows, parity, &generate(data));

    let (row, column) = match (row_errors.as_slice(), col_errors.as_slice()) {
        ([], []) => return ParityVerdict::Intact(data.to_vec()),
        ([row], [column]) => (*row, *column),
        _ => return ParityVerdict::Uncorrectable,
    };

    let mut bits = bytes_to_bits(data);
    let idx = row * BYTE_BITS + column;
    bits[idx] = !bits[idx];
    let payload = match bits_to_bytes(&bits) {
        Ok(payload) => payload,
        Err(_) => return ParityVerdict::Uncorrectable,
    };

    // The flip must leave nothing behind; otherwise more than one bit was hit.
    if generate(&payload) != parity {
        return ParityVerdict::Uncorrectable;
    }

    ParityVerdict::Corrected {
        payload,
        row,
        column,
    }
}
