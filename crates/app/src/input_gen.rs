//! Sample message generation.
//!
//! When the client or demo is given no messages, we generate a batch with
//! interesting fragmentation characteristics.
//!
//! # Design
//!
//! Generated messages mix:
//! - Short text that fits in a single packet
//! - Text spanning several packets
//! - An empty message (one empty fragment)
//! - Raw bytes, including newlines that must not confuse the header split

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const WORDS: &[&str] = &[
    "packet", "checksum", "parity", "sender", "receiver", "channel", "bit", "ack", "timeout",
    "fragment", "stop", "wait", "reliable", "noise", "burst",
];

/// Generate `count` sample messages for a run with `data_len`-byte packets.
///
/// # Arguments
/// - `seed`: random seed for determinism
/// - `count`: number of messages
/// - `data_len`: packet payload size, used to size multi-packet messages
pub fn generate_messages(seed: u64, count: usize, data_len: usize) -> Vec<Vec<u8>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data_len = data_len.max(1);

    (0..count)
        .map(|i| match i % 4 {
            // Single packet
            0 => sentence(&mut rng, data_len.min(40)),
            // Several packets
            1 => {
                let packets = rng.gen_range(2..=6);
                let len = data_len * packets - rng.gen_range(0..data_len);
                sentence(&mut rng, len)
            }
            // Empty
            2 => Vec::new(),
            // Raw bytes with embedded newlines
            _ => {
                let len = rng.gen_range(1..=data_len * 3);
                (0..len)
                    .map(|_| if rng.gen_bool(0.1) { b'\n' } else { rng.gen() })
                    .collect()
            }
        })
        .collect()
}

/// Text of exactly `len` bytes built from protocol vocabulary.
fn sentence(rng: &mut ChaCha8Rng, len: usize) -> Vec<u8> {
    let mut text = Vec::with_capacity(len + 16);
    while text.len() < len {
        if !text.is_empty() {
            text.push(b' ');
        }
        let word = WORDS[rng.gen_range(0..WORDS.len())];
        text.extend_from_slice(word.as_bytes());
    }
    text.truncate(len);
    text
}

/// Render a message for terminal output.
pub fn preview(message: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(message);
    let mut shown: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        shown.push_str("...");
    }
    shown.escape_debug().to_string()
}
