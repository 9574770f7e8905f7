//! Entry point for `rdt-sim`.
//!
//! Parses CLI arguments and dispatches into one of four modes:
//! - **server**: accept connections and answer every message
//! - **client**: send messages to a server and print its answers
//! - **demo**: sender and receiver in one process over an in-memory channel
//! - **measure**: detection rates of the checksum and 2D parity codes
//!
//! All protocol work is delegated to `rdt_sim_core`; `main.rs` owns only
//! process setup (logging, argument parsing) and the socket loops.

mod config;
mod input_gen;
mod measure;
mod transport;

use std::io::BufRead;
use std::net::TcpListener;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rdt_sim_core::channel::{Channel, MemoryChannel};
use rdt_sim_core::messenger::Messenger;
use rdt_sim_core::protocol::Inbound;

use config::{Config, ProtocolArgs, Transport};
use input_gen::{generate_messages, preview};
use measure::MeasureArgs;
use transport::{TcpChannel, UdpChannel};

/// Stop-and-wait reliable data transfer over a noisy channel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server, answering each message until the client sends FIN.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: String,

        /// Socket type.
        #[arg(short, long, value_enum, default_value = "udp")]
        transport: Transport,

        /// Exit after this many connections (default: serve forever).
        #[arg(long)]
        connections: Option<usize>,

        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Run as a client, sending messages to a server.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        server: String,

        /// Socket type.
        #[arg(short, long, value_enum, default_value = "udp")]
        transport: Transport,

        /// Message to send (repeatable). Use `-` to read lines from stdin.
        #[arg(short, long)]
        message: Vec<String>,

        /// Number of generated messages when none are given.
        #[arg(long, default_value_t = 4)]
        count: usize,

        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Transfer generated messages between two threads in this process.
    Demo {
        /// Number of generated messages.
        #[arg(long, default_value_t = 8)]
        count: usize,

        #[command(flatten)]
        protocol: ProtocolArgs,
    },
    /// Measure checksum and 2D parity detection rates.
    Measure(MeasureArgs),
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            transport,
            connections,
            protocol,
        } => run_server(&bind, transport, connections, &Config::resolve(&protocol)?),
        Mode::Client {
            server,
            transport,
            message,
            count,
            protocol,
        } => {
            let config = Config::resolve(&protocol)?;
            let messages = client_messages(&message, count, &config)?;
            match transport {
                Transport::Udp => run_client(UdpChannel::connect(&server)?, &config, messages),
                Transport::Tcp => run_client(TcpChannel::connect(&server)?, &config, messages),
            }
        }
        Mode::Demo { count, protocol } => run_demo(count, &Config::resolve(&protocol)?),
        Mode::Measure(args) => measure::run(&args),
    }
}

fn client_messages(given: &[String], count: usize, config: &Config) -> Result<Vec<Vec<u8>>> {
    if given.is_empty() {
        return Ok(generate_messages(config.model.seed, count, config.protocol.data_len));
    }

    let mut messages = Vec::new();
    for message in given {
        if message == "-" {
            for line in std::io::stdin().lock().lines() {
                messages.push(line.context("reading stdin")?.into_bytes());
            }
        } else {
            messages.push(message.clone().into_bytes());
        }
    }
    Ok(messages)
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn run_server(
    bind: &str,
    transport: Transport,
    connections: Option<usize>,
    config: &Config,
) -> Result<()> {
    if config.print_config {
        config.print();
    }

    let mut served = 0usize;
    match transport {
        Transport::Udp => {
            let mut channel = UdpChannel::bind(bind)?;
            info!("udp server on {}", channel.local_addr()?);
            while connections.map_or(true, |max| served < max) {
                channel.reset();
                channel = serve(channel, config)?;
                served += 1;
            }
        }
        Transport::Tcp => {
            let listener = TcpListener::bind(bind).with_context(|| format!("binding {bind}"))?;
            info!("tcp server on {}", listener.local_addr()?);
            while connections.map_or(true, |max| served < max) {
                let channel = TcpChannel::accept(&listener)?;
                info!("connection from {}", channel.peer_addr()?);
                serve(channel, config)?;
                served += 1;
            }
        }
    }
    Ok(())
}

/// Answer messages on one connection until FIN, with a fresh session.
fn serve<C: Channel>(channel: C, config: &Config) -> Result<C> {
    let mut messenger = Messenger::new(
        channel,
        config.version,
        config.protocol.clone(),
        config.peer_model(),
    )?;

    loop {
        match messenger.receive()? {
            Inbound::Message(message) => {
                println!("SERVER: received <<{}>>", preview(&message, 80));
                let mut answer = b"<<".to_vec();
                answer.extend_from_slice(&message);
                answer.extend_from_slice(format!(">> rec'd at {}", timestamp_ms()).as_bytes());
                messenger.send(&answer)?;
            }
            Inbound::Finished => {
                println!("SERVER: closing on FIN");
                break;
            }
        }
    }

    if config.print_stats {
        messenger.stats().print_summary(&messenger.injector_stats());
    }
    Ok(messenger.into_channel())
}

fn run_client<C: Channel>(channel: C, config: &Config, messages: Vec<Vec<u8>>) -> Result<()> {
    if config.print_config {
        config.print();
    }

    let mut messenger = Messenger::new(
        channel,
        config.version,
        config.protocol.clone(),
        config.model,
    )?;

    for message in &messages {
        messenger.send(message)?;
        match messenger.receive()? {
            Inbound::Message(answer) => println!("CLIENT: received [[{}]]", preview(&answer, 120)),
            Inbound::Finished => {
                warn!("server finished early");
                break;
            }
        }
    }
    messenger.finish()?;

    if config.print_stats {
        messenger.stats().print_summary(&messenger.injector_stats());
    }
    Ok(())
}

fn run_demo(count: usize, config: &Config) -> Result<()> {
    config.print();

    let messages = generate_messages(config.model.seed, count, config.protocol.data_len);
    let (left, right) = MemoryChannel::pair();

    let receiver_config = config.clone();
    let handle = thread::spawn(move || -> rdt_sim_core::Result<_> {
        let mut receiver = Messenger::new(
            right,
            receiver_config.version,
            receiver_config.protocol.clone(),
            receiver_config.peer_model(),
        )?;
        let mut received = Vec::new();
        while let Inbound::Message(message) = receiver.receive()? {
            received.push(message);
        }
        Ok((received, receiver.stats().clone(), receiver.injector_stats()))
    });

    let mut sender = Messenger::new(left, config.version, config.protocol.clone(), config.model)?;
    for message in &messages {
        sender.send(message)?;
        println!("sent {} bytes: {}", message.len(), preview(message, 60));
    }
    sender.finish()?;

    let (received, receiver_stats, receiver_injected) = match handle.join() {
        Ok(result) => result?,
        Err(_) => bail!("receiver thread panicked"),
    };

    if config.print_stats {
        println!("\n##### Sender #####");
        sender.stats().print_summary(&sender.injector_stats());
        println!("##### Receiver #####");
        receiver_stats.print_summary(&receiver_injected);
    }

    if received != messages {
        bail!(
            "delivered messages differ from sent ({} sent, {} received)",
            messages.len(),
            received.len()
        );
    }
    println!("All {} messages delivered intact.", messages.len());
    Ok(())
}
