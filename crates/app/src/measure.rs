//! Detection-rate measurement for the error-control codes.
//!
//! Every trial corrupts a fixed sample message and asks the code whether it
//! noticed. For 2D parity a trial also counts as corrected when the repaired
//! payload equals the original. A parity "correction" that produces the
//! wrong payload is counted as undetected.

use anyhow::Result;
use clap::Args;
use rdt_sim_core::checksum;
use rdt_sim_core::injector::{ErrorInjector, ErrorModel};
use rdt_sim_core::parity::{self, ParityVerdict};

const SAMPLE: &str = "Hello, World! This is a test of the performance of checksum. :)";

#[derive(Debug, Clone, Args)]
pub struct MeasureArgs {
    /// Trials per error pattern
    #[arg(long, default_value_t = 10_000)]
    pub trials: usize,

    /// Random seed for determinism
    #[arg(long, env = "RDT_SEED", default_value_t = 1)]
    pub seed: u64,

    /// Message to corrupt (default: a 64-byte sentence)
    #[arg(long)]
    pub message: Option<String>,

    /// Random bit-error counts to test
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5,6,7,8,9,10,16")]
    pub bit_errors: Vec<usize>,

    /// Burst lengths to test
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17"
    )]
    pub bursts: Vec<usize>,
}

/// How a trial corrupts the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// `n` distinct random bits
    Random(usize),
    /// One contiguous run of `n` bits
    Burst(usize),
}

impl Pattern {
    fn apply(self, injector: &mut ErrorInjector, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Random(n) => injector.corrupt(message, n),
            Self::Burst(n) => injector.burst_error(message, n),
        }
    }
}

/// Outcome of a batch of trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rates {
    pub trials: usize,
    pub detected: usize,
    pub corrected: usize,
}

impl Rates {
    pub fn detected_pct(&self) -> f64 {
        percent(self.detected, self.trials)
    }

    pub fn corrected_pct(&self) -> f64 {
        percent(self.corrected, self.trials)
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Checksum detection over `trials` corruptions of `message`.
pub fn checksum_rates(
    injector: &mut ErrorInjector,
    message: &[u8],
    pattern: Pattern,
    trials: usize,
) -> Rates {
    let code = checksum::generate(message);
    let mut rates = Rates {
        trials,
        ..Rates::default()
    };
    for _ in 0..trials {
        let corrupted = pattern.apply(injector, message);
        if !checksum::verify(&corrupted, code) {
            rates.detected += 1;
        }
    }
    rates
}

/// 2D parity detection and correction over `trials` corruptions of `message`.
pub fn parity_rates(
    injector: &mut ErrorInjector,
    message: &[u8],
    pattern: Pattern,
    trials: usize,
) -> Rates {
    let code = parity::generate(message);
    let mut rates = Rates {
        trials,
        ..Rates::default()
    };
    for _ in 0..trials {
        let corrupted = pattern.apply(injector, message);
        match parity::verify_and_correct(&corrupted, &code) {
            ParityVerdict::Uncorrectable => rates.detected += 1,
            ParityVerdict::Corrected { payload, .. } if payload == message => {
                rates.detected += 1;
                rates.corrected += 1;
            }
            // Missed, or "corrected" into the wrong payload
            _ => {}
        }
    }
    rates
}

pub fn run(args: &MeasureArgs) -> Result<()> {
    let message = args.message.as_deref().unwrap_or(SAMPLE).as_bytes();
    let mut injector = ErrorInjector::new(ErrorModel::perfect(args.seed));

    println!("Sample message: {:?}", String::from_utf8_lossy(message));
    println!("Bits in sample message: {}", message.len() * 8);
    println!("Trials per pattern: {} (seed {})", args.trials, args.seed);

    let patterns: Vec<(&str, Vec<Pattern>)> = vec![
        ("Random bit errors", args.bit_errors.iter().map(|&n| Pattern::Random(n)).collect()),
        ("Burst errors", args.bursts.iter().map(|&n| Pattern::Burst(n)).collect()),
    ];

    for (title, list) in patterns {
        println!("\n=== {title} ===");
        println!(
            "{:>6}  {:>18}  {:>16}  {:>17}",
            "bits", "checksum detected", "parity detected", "parity corrected"
        );
        for pattern in list {
            let bits = match pattern {
                Pattern::Random(n) | Pattern::Burst(n) => n,
            };
            let sum = checksum_rates(&mut injector, message, pattern, args.trials);
            let par = parity_rates(&mut injector, message, pattern, args.trials);
            println!(
                "{:>6}  {:>17.3}%  {:>15.3}%  {:>16.3}%",
                bits,
                sum.detected_pct(),
                par.detected_pct(),
                par.corrected_pct()
            );
        }
    }

    Ok(())
}
