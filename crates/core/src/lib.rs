//! rdt-sim-core: reliable data transfer over an unreliable byte channel
//!
//! This library provides the components of a stop-and-wait ARQ suite:
//! - Error-control codes: an 8-bit one's-complement checksum and a 2D even
//!   parity code that corrects single-bit errors
//! - A seeded fault injector (bit flips, burst errors, packet loss)
//! - A text-header packet format with fragmentation and reassembly
//! - Five protocol state machines (rdt 1.0, 2.0, 2.1, 2.2, 3.0)
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `bitio`: Byte/bit conversion
//! - `checksum`: One's-complement checksum
//! - `parity`: 2D parity generation and single-bit correction
//! - `injector`: Seeded channel noise
//! - `packet`: Header codec and fragmentation
//! - `reassembly`: Receiver-side fragment collection
//! - `channel`: Byte channel contract and an in-memory pair
//! - `session`: Per-connection protocol state
//! - `protocol`: The ARQ state machines and their factory
//! - `messenger`: Whole-message send/receive/finish
//! - `metrics`: Session statistics
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured; recoverable corruption never
//!   leaves the state machines
//! - **Explicit state**: Alternating bits and injector live in a session
//!   value, never in globals
//! - **Deterministic**: Seeded randomness makes runs reproducible
//! - **Observable**: Counters for every retransmission and correction

pub mod bitio;
pub mod channel;
pub mod checksum;
pub mod error;
pub mod injector;
pub mod messenger;
pub mod metrics;
pub mod packet;
pub mod parity;
pub mod protocol;
pub mod reassembly;
pub mod session;

// Re-export commonly used types
pub use channel::{Channel, MemoryChannel};
pub use error::{Error, Result};
pub use injector::ErrorModel;
pub use messenger::Messenger;
pub use packet::ErrorControl;
pub use protocol::{Inbound, ProtocolConfig, Version};
