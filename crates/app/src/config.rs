//! Configuration for the rdt-sim application.
//!
//! Handles command-line/environment arguments and generating sensible
//! defaults (including randomized defaults that are reproducible with a
//! seed).
//!
//! # Philosophy
//!
//! Every mode works with ZERO arguments. Unset noise parameters are drawn
//! from a seeded RNG and the seed is printed, so any run can be repeated
//! with `--seed`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rdt_sim_core::injector::ErrorModel;
use rdt_sim_core::packet::ErrorControl;
use rdt_sim_core::protocol::{ProtocolConfig, Version};

/// Socket type carrying the packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Protocol and noise options shared by every mode.
#[derive(Debug, Clone, Args)]
pub struct ProtocolArgs {
    /// Protocol version (1.0, 2.0, 2.1, 2.2, 3.0)
    #[arg(short = 'r', long = "rdt", env = "RDT_VERSION", default_value = "2.2")]
    pub version: Version,

    /// Error-control code (checksum, parity)
    #[arg(long, default_value = "checksum")]
    pub control: ErrorControl,

    /// Maximum payload bytes per packet
    #[arg(long, default_value_t = 64)]
    pub data_len: usize,

    /// Chance that a packet is corrupted, in percent (default: random 0-20)
    #[arg(long, env = "RDT_ERROR_PROB")]
    pub error_prob: Option<f64>,

    /// Bits flipped in a corrupted packet
    #[arg(long, env = "RDT_ERROR_NUM", default_value_t = 1)]
    pub error_num: usize,

    /// Length of a burst error instead of random flips (0 = off)
    #[arg(long, env = "RDT_BURST", default_value_t = 0)]
    pub burst: usize,

    /// Chance that a packet is lost, in percent; rdt 3.0 only (default: random 0-10)
    #[arg(long, env = "RDT_LOSS")]
    pub loss: Option<f64>,

    /// Random seed for determinism (default: time-based)
    #[arg(long, env = "RDT_SEED")]
    pub seed: Option<u64>,

    /// rdt 3.0 reply timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    pub timeout_ms: u64,

    /// Give up after this many retransmissions of one packet (default: never)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Print resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print the statistics summary
    #[arg(long)]
    pub no_stats: bool,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub version: Version,
    pub protocol: ProtocolConfig,
    pub model: ErrorModel,
    pub print_config: bool,
    pub print_stats: bool,
}

impl Config {
    /// Resolve arguments, filling unset noise parameters from the seed.
    pub fn resolve(args: &ProtocolArgs) -> Result<Self> {
        let seed = match args.seed {
            Some(seed) => seed,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system clock before UNIX epoch")?
                .as_millis() as u64,
        };

        // Generate defaults using seed
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let probability = args.error_prob.unwrap_or_else(|| rng.gen_range(0..=20) as f64);
        let loss = args.loss.unwrap_or_else(|| {
            if args.version == Version::V3_0 {
                rng.gen_range(0..=10) as f64
            } else {
                0.0
            }
        });

        let model = ErrorModel {
            probability,
            bit_errors: args.error_num,
            burst: args.burst,
            loss,
            corrupt_limit: None,
            seed,
        };
        model.validate()?;

        let protocol = ProtocolConfig {
            data_len: args.data_len,
            error_control: args.control,
            reply_timeout: Duration::from_millis(args.timeout_ms),
            max_retries: args.max_retries,
            ..ProtocolConfig::default()
        };
        protocol.validate()?;

        Ok(Self {
            version: args.version,
            protocol,
            model,
            print_config: args.print_config,
            print_stats: !args.no_stats,
        })
    }

    /// Error model for the peer end of an in-process run: same noise,
    /// different random stream.
    pub fn peer_model(&self) -> ErrorModel {
        ErrorModel {
            seed: self.model.seed.wrapping_add(1),
            ..self.model
        }
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Protocol: rdt {}", self.version);
        println!("Error control: {:?}", self.protocol.error_control);
        println!("Data length: {} bytes", self.protocol.data_len);
        println!("Reply timeout: {} ms", self.protocol.reply_timeout.as_millis());
        match self.protocol.max_retries {
            Some(max) => println!("Max retries: {max}"),
            None => println!("Max retries: unlimited"),
        }
        println!();
        println!("=== Channel Noise ===");
        println!("Seed: {}", self.model.seed);
        println!("Corruption: {:.1}%", self.model.probability);
        if self.model.burst > 0 {
            println!("Burst length: {} bits", self.model.burst);
        } else {
            println!("Bit errors: {} per packet", self.model.bit_errors);
        }
        println!("Loss: {:.1}%", self.model.loss);
        println!();
    }
}
