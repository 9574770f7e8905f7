//! Packet format and fragmentation.
//!
//! Messages are fragmented into packets of at most `data_len` payload bytes.
//! Each packet carries a text header identifying its fragment, followed by a
//! newline and the raw payload bytes.
//!
//! # Packet Format
//!
//! ```text
//! HEADER S:0003 T:0010 F:00 C:01101001 N:1
//! <payload bytes>
//! ```
//!
//! | Tag | Width | Meaning |
//! |-----|-------|---------|
//! | `S` | 4 decimal digits | 1-based fragment sequence number |
//! | `T` | 4 decimal digits | total fragments in the message |
//! | `F` | 2 hex digits | flags: ACK 0x01, FIN 0x02, NACK 0x04 |
//! | `C` | 8 bit characters | one's-complement checksum of the payload |
//! | `EC` | `N + 8` bit characters | 2D parity of an `N`-byte payload |
//! | `N` | 1 digit | alternating sequence bit |
//!
//! `C`/`EC` and `N` are optional and depend on the protocol version. Fields
//! are space separated and located by tag, so their order on parse is free;
//! rendering always uses the order above.
//!
//! # Reassembly
//!
//! The receiver collects fragments of one message, sorts them by `seq`, and
//! concatenates payloads once all `total` are present.

use crate::bitio::{bits_to_string, parse_bit_string};
use crate::checksum::{self, Checksum};
use crate::error::{HeaderError, PacketError, ReassemblyError, Result};
use crate::parity::{self, ParityVerdict};

/// Bit-flag constants for the `F` header field.
pub mod flags {
    /// Positive acknowledgment.
    pub const ACK: u8 = 0x01;
    /// Connection teardown.
    pub const FIN: u8 = 0x02;
    /// Negative acknowledgment.
    pub const NACK: u8 = 0x04;
}

/// Leading tag of every header.
pub const HEADER_TAG: &str = "HEADER";

/// Largest value a 4-digit sequence or total field can hold.
pub const MAX_SEQ: u16 = 9999;

/// Payload of the teardown packet.
pub const FIN_PAYLOAD: &[u8] = b"FINMSG";

/// Which error-control code protects packet payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorControl {
    /// 8-bit one's-complement checksum (`C:` field), detection only
    #[default]
    Checksum,
    /// 2D even parity (`EC:` field), corrects single-bit errors
    Parity,
}

impl ErrorControl {
    /// Compute the error field for `payload`.
    pub fn protect(self, payload: &[u8]) -> ErrorField {
        match self {
            Self::Checksum => ErrorField::Checksum(checksum::generate(payload)),
            Self::Parity => ErrorField::Parity(parity::generate(payload)),
        }
    }
}

impl std::str::FromStr for ErrorControl {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "checksum" => Ok(Self::Checksum),
            "parity" => Ok(Self::Parity),
            other => Err(format!("unknown error control {other:?} (checksum|parity)")),
        }
    }
}

/// Error-control information carried in the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorField {
    /// No error control (rdt 1.0)
    #[default]
    None,
    Checksum(Checksum),
    Parity(Vec<bool>),
}

/// Result of checking a payload against its error field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// Payload verified as sent
    Intact,
    /// A single-bit error was repaired; carries the repaired payload
    Corrected(Vec<u8>),
    /// Corruption detected and not repairable
    Corrupt,
}

/// Strongly typed packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Fragment sequence number, 1-based for data packets
    pub seq: u16,
    /// Total fragments in the message
    pub total: u16,
    /// Bitmask of [`flags`] constants
    pub flags: u8,
    /// Error-control field
    pub error: ErrorField,
    /// Alternating sequence bit, if the protocol uses one
    pub alt_bit: Option<u8>,
}

impl Header {
    pub fn new(seq: u16, total: u16, flags: u8) -> Self {
        Self {
            seq,
            total,
            flags,
            error: ErrorField::None,
            alt_bit: None,
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Render the header line (without the trailing newline).
    pub fn render(&self) -> String {
        let mut line = format!(
            "{HEADER_TAG} S:{:04} T:{:04} F:{:02x}",
            self.seq, self.total, self.flags
        );
        match &self.error {
            ErrorField::None => {}
            ErrorField::Checksum(c) => {
                line.push_str(" C:");
                line.push_str(&c.to_string());
            }
            ErrorField::Parity(bits) => {
                line.push_str(" EC:");
                line.push_str(&bits_to_string(bits));
            }
        }
        if let Some(bit) = self.alt_bit {
            line.push_str(&format!(" N:{bit:01}"));
        }
        line
    }

    /// Parse a header line.
    ///
    /// # Errors
    /// Any missing, duplicated, unknown, mis-sized or out-of-range field is a
    /// [`HeaderError`].
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(HEADER_TAG) {
            return Err(HeaderError::MissingTag.into());
        }

        let mut seq = None;
        let mut total = None;
        let mut flag_bits = None;
        let mut error = None;
        let mut alt_bit = None;

        for token in tokens {
            let (tag, value) = token
                .split_once(':')
                .ok_or_else(|| HeaderError::UnknownField(token.to_string()))?;
            match tag {
                "S" => set_once(&mut seq, "S", parse_decimal("S", value)?)?,
                "T" => set_once(&mut total, "T", parse_decimal("T", value)?)?,
                "F" => set_once(&mut flag_bits, "F", parse_flags(value)?)?,
                "C" => {
                    let checksum = Checksum::parse(value).ok_or_else(|| invalid("C", value))?;
                    set_once(&mut error, "C", ErrorField::Checksum(checksum))?;
                }
                "EC" => {
                    let bits = match parse_bit_string(value) {
                        Ok(bits) if !bits.is_empty() => bits,
                        _ => return Err(invalid("EC", value)),
                    };
                    set_once(&mut error, "EC", ErrorField::Parity(bits))?;
                }
                "N" => set_once(&mut alt_bit, "N", parse_alt_bit(value)?)?,
                _ => return Err(HeaderError::UnknownField(token.to_string()).into()),
            }
        }

        Ok(Self {
            seq: seq.ok_or(HeaderError::MissingField("S"))?,
            total: total.ok_or(HeaderError::MissingField("T"))?,
            flags: flag_bits.ok_or(HeaderError::MissingField("F"))?,
            error: error.unwrap_or_default(),
            alt_bit,
        })
    }
}

fn invalid(field: &'static str, value: &str) -> crate::error::Error {
    HeaderError::InvalidValue {
        field,
        value: value.to_string(),
    }
    .into()
}

fn set_once<T>(slot: &mut Option<T>, tag: &str, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(HeaderError::DuplicateField(tag.to_string()).into());
    }
    *slot = Some(value);
    Ok(())
}

fn parse_decimal(field: &'static str, value: &str) -> Result<u16> {
    if value.len() != 4 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(field, value));
    }
    let n: u16 = value.parse().map_err(|_| invalid(field, value))?;
    if n > MAX_SEQ {
        return Err(HeaderError::OutOfRange {
            field,
            value: n as u32,
            max: MAX_SEQ as u32,
        }
        .into());
    }
    Ok(n)
}

fn parse_flags(value: &str) -> Result<u8> {
    if value.len() != 2 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid("F", value));
    }
    u8::from_str_radix(value, 16).map_err(|_| invalid("F", value))
}

fn parse_alt_bit(value: &str) -> Result<u8> {
    if value.len() != 1 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("N", value));
    }
    let bit = value.as_bytes()[0] - b'0';
    if bit > 1 {
        return Err(HeaderError::OutOfRange {
            field: "N",
            value: bit as u32,
            max: 1,
        }
        .into());
    }
    Ok(bit)
}

/// A header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Serialize into `header + "\n" + payload`.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header.render();
        let mut bytes = Vec::with_capacity(header.len() + 1 + self.payload.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse a packet from bytes, splitting at the first newline.
    ///
    /// # Errors
    /// [`HeaderError`] if the separator is missing or the header is malformed.
    /// Payload corruption is not detected here; see [`Packet::verify`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(HeaderError::MissingSeparator)?;
        let line = std::str::from_utf8(&bytes[..split]).map_err(|_| HeaderError::NotText)?;
        let header = Header::parse(line)?;
        Ok(Self {
            header,
            payload: bytes[split + 1..].to_vec(),
        })
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.header.has_flag(flag)
    }

    /// Check the payload against the header's error field.
    pub fn verify(&self) -> Integrity {
        match &self.header.error {
            ErrorField::None => Integrity::Intact,
            ErrorField::Checksum(c) => {
                if checksum::verify(&self.payload, *c) {
                    Integrity::Intact
                } else {
                    Integrity::Corrupt
                }
            }
            ErrorField::Parity(bits) => match parity::verify_and_correct(&self.payload, bits) {
                ParityVerdict::Intact(_) => Integrity::Intact,
                ParityVerdict::Corrected { payload, .. } => Integrity::Corrected(payload),
                ParityVerdict::Uncorrectable => Integrity::Corrupt,
            },
        }
    }
}

/// Fragment a message into packets of at most `data_len` payload bytes.
///
/// Fragment `i` (0-based) gets `seq = i + 1` and every fragment carries the
/// same `total`. An empty message still produces one (empty) fragment so the
/// receiver has something to complete on. When `control` is set, each
/// fragment's error field is computed over its own payload.
///
/// # Errors
/// - `PacketError::ZeroDataLen` if `data_len == 0`
/// - `PacketError::TooManyFragments` if more than 9999 fragments are needed
pub fn packetize(
    message: &[u8],
    data_len: usize,
    control: Option<ErrorControl>,
) -> Result<Vec<Packet>> {
    if data_len == 0 {
        return Err(PacketError::ZeroDataLen.into());
    }

    let total_packets = message.len().div_ceil(data_len).max(1);
    if total_packets > MAX_SEQ as usize {
        return Err(PacketError::TooManyFragments {
            needed: total_packets,
            max: MAX_SEQ as usize,
        }
        .into());
    }

    let mut packets = Vec::with_capacity(total_packets);
    for i in 0..total_packets {
        let start = (i * data_len).min(message.len());
        let end = (start + data_len).min(message.len());
        let payload = message[start..end].to_vec();

        let mut header = Header::new(i as u16 + 1, total_packets as u16, 0);
        if let Some(control) = control {
            header.error = control.protect(&payload);
        }
        packets.push(Packet::new(header, payload));
    }

    Ok(packets)
}

/// Reassemble a message from its fragments, in any arrival order.
///
/// # Errors
/// - `ReassemblyError::TotalMismatch` if fragments disagree on `total`
/// - `ReassemblyError::SeqOutOfRange` for a `seq` outside `1..=total`
/// - `ReassemblyError::Incomplete` unless exactly fragments `1..=total` are present
pub fn reassemble(packets: &mut [Packet]) -> Result<Vec<u8>> {
    let Some(first) = packets.first() else {
        return Ok(Vec::new());
    };
    let total = first.header.total;

    for packet in packets.iter() {
        if packet.header.total != total {
            return Err(ReassemblyError::TotalMismatch {
                expected: total,
                actual: packet.header.total,
            }
            .into());
        }
        if packet.header.seq == 0 || packet.header.seq > total {
            return Err(ReassemblyError::SeqOutOfRange {
                seq: packet.header.seq,
                total,
            }
            .into());
        }
    }

    packets.sort_by_key(|p| p.header.seq);

    let in_sequence = packets
        .iter()
        .enumerate()
        .all(|(i, p)| p.header.seq as usize == i + 1);
    if packets.len() != total as usize || !in_sequence {
        return Err(ReassemblyError::Incomplete {
            have: packets.len(),
            total,
        }
        .into());
    }

    let size: usize = packets.iter().map(|p| p.payload.len()).sum();
    let mut message = Vec::with_capacity(size);
    for packet in packets.iter() {
        message.extend_from_slice(&packet.payload);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn header_error(bytes: &[u8]) -> HeaderError {
        match Packet::decode(bytes) {
            Err(Error::Header(e)) => e,
            other => panic!("expected header error, got {other:?}"),
        }
    }

    #[test]
    fn test_render_exact() {
        let mut header = Header::new(3, 10, flags::ACK);
        header.error = ErrorField::Checksum(Checksum(0b0110_1001));
        header.alt_bit = Some(1);
        assert_eq!(header.render(), "HEADER S:0003 T:0010 F:01 C:01101001 N:1");
    }

    #[test]
    fn test_render_plain() {
        let header = Header::new(1, 1, flags::FIN | flags::NACK);
        assert_eq!(header.render(), "HEADER S:0001 T:0001 F:06");
    }

    #[test]
    fn test_encode_decode() {
        let payload = b"Hello, World!".to_vec();
        let mut header = Header::new(1, 1, 0);
        header.error = ErrorControl::Parity.protect(&payload);
        header.alt_bit = Some(0);
        let packet = Packet::new(header, payload);

        let bytes = packet.encode();
        assert!(bytes.starts_with(b"HEADER S:0001 T:0001 F:00 EC:"));
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_payload_may_contain_newlines() {
        let packet = Packet::new(Header::new(1, 1, 0), b"line one\nline two\n".to_vec());
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_field_order_free_on_parse() {
        let header = Header::parse("HEADER F:ff N:0 T:0002 S:0001").unwrap();
        assert_eq!(header.seq, 1);
        assert_eq!(header.total, 2);
        assert_eq!(header.flags, 0xFF);
        assert_eq!(header.alt_bit, Some(0));
        assert_eq!(header.error, ErrorField::None);
    }

    #[test]
    fn test_missing_separator() {
        assert_eq!(header_error(b"HEADER S:0001"), HeaderError::MissingSeparator);
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(header_error(b"HEADER T:0001 F:00\n"), HeaderError::MissingField("S"));
        assert_eq!(header_error(b"HEADER S:0001 F:00\n"), HeaderError::MissingField("T"));
        assert_eq!(header_error(b"HEADER S:0001 T:0001\n"), HeaderError::MissingField("F"));
        assert_eq!(header_error(b"S:0001 T:0001 F:00\n"), HeaderError::MissingTag);
    }

    #[test]
    fn test_invalid_widths() {
        assert!(matches!(
            header_error(b"HEADER S:001 T:0001 F:00\n"),
            HeaderError::InvalidValue { field: "S", .. }
        ));
        assert!(matches!(
            header_error(b"HEADER S:0001 T:00001 F:00\n"),
            HeaderError::InvalidValue { field: "T", .. }
        ));
        assert!(matches!(
            header_error(b"HEADER S:0001 T:0001 F:0g\n"),
            HeaderError::InvalidValue { field: "F", .. }
        ));
        assert!(matches!(
            header_error(b"HEADER S:0001 T:0001 F:00 C:0101\n"),
            HeaderError::InvalidValue { field: "C", .. }
        ));
        assert!(matches!(
            header_error(b"HEADER S:0001 T:0001 F:00 EC:\n"),
            HeaderError::InvalidValue { field: "EC", .. }
        ));
    }

    #[test]
    fn test_alt_bit_out_of_range() {
        assert_eq!(
            header_error(b"HEADER S:0001 T:0001 F:00 N:2\n"),
            HeaderError::OutOfRange {
                field: "N",
                value: 2,
                max: 1
            }
        );
    }

    #[test]
    fn test_duplicate_and_unknown() {
        assert_eq!(
            header_error(b"HEADER S:0001 S:0002 T:0002 F:00\n"),
            HeaderError::DuplicateField("S".to_string())
        );
        assert_eq!(
            header_error(b"HEADER S:0001 T:0001 F:00 X:1\n"),
            HeaderError::UnknownField("X:1".to_string())
        );
        assert!(matches!(
            header_error(b"HEADER S:0001 T:0001 F:00 C:00000000 EC:00000000\n"),
            HeaderError::DuplicateField(_)
        ));
    }

    #[test]
    fn test_verify() {
        let payload = b"payload".to_vec();

        let mut header = Header::new(1, 1, 0);
        header.error = ErrorControl::Checksum.protect(&payload);
        let mut packet = Packet::new(header, payload.clone());
        assert_eq!(packet.verify(), Integrity::Intact);
        packet.payload[0] ^= 0x10;
        assert_eq!(packet.verify(), Integrity::Corrupt);

        let mut header = Header::new(1, 1, 0);
        header.error = ErrorControl::Parity.protect(&payload);
        let mut packet = Packet::new(header, payload.clone());
        packet.payload[2] ^= 0x04;
        assert_eq!(packet.verify(), Integrity::Corrected(payload));
    }

    #[test]
    fn test_packetize_sizes() {
        let message = vec![0xAB; 250];
        let packets = packetize(&message, 100, Some(ErrorControl::Checksum)).unwrap();
        assert_eq!(packets.len(), 3);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.header.seq as usize, i + 1);
            assert_eq!(packet.header.total, 3);
            assert_eq!(packet.verify(), Integrity::Intact);
        }
        assert_eq!(packets[2].payload.len(), 50);
    }

    #[test]
    fn test_packetize_empty_message() {
        let packets = packetize(b"", 16, None).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.total, 1);
        assert!(packets[0].payload.is_empty());
        assert_eq!(reassemble(&mut packets.clone()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_packetize_limits() {
        assert!(matches!(
            packetize(b"abc", 0, None),
            Err(Error::Packet(PacketError::ZeroDataLen))
        ));
        assert!(matches!(
            packetize(&vec![0; 10_000], 1, None),
            Err(Error::Packet(PacketError::TooManyFragments { .. }))
        ));
        assert_eq!(packetize(&vec![0; 9999], 1, None).unwrap().len(), 9999);
    }

    #[test]
    fn test_fragment_reassemble_any_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        for total in [1usize, 2, 5, 100] {
            let data_len = 7;
            let message: Vec<u8> = (0..total * data_len - 3).map(|i| (i % 251) as u8).collect();
            let mut packets = packetize(&message, data_len, None).unwrap();
            assert_eq!(packets.len(), total);
            packets.shuffle(&mut rng);
            assert_eq!(reassemble(&mut packets).unwrap(), message);
        }
    }

    #[test]
    fn test_reassemble_missing_fragment() {
        let mut packets = packetize(b"abcdefghij", 2, None).unwrap();
        packets.remove(2);
        assert!(matches!(
            reassemble(&mut packets),
            Err(Error::Reassembly(ReassemblyError::Incomplete { have: 4, total: 5 }))
        ));
    }

    #[test]
    fn test_reassemble_total_mismatch() {
        let mut packets = vec![
            Packet::new(Header::new(1, 2, 0), vec![1]),
            Packet::new(Header::new(2, 3, 0), vec![2]),
        ];
        assert!(matches!(
            reassemble(&mut packets),
            Err(Error::Reassembly(ReassemblyError::TotalMismatch { .. }))
        ));
    }
}
