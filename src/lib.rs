//! Lossless capture of UDP packet streams to disk.
//!
//! A recording session is three cooperating threads around a shared
//! [`vrb::Vrb`] per port: [`ingress`] reads datagrams off the wire and
//! frames them into the ring, [`egress`] drains the ring to an output
//! [`sink`], and [`control`] owns signal handling and the wall-clock
//! schedule that tells the other two when to roll files or stop. [`app`]
//! wires the three together from a parsed [`config::Config`].

pub mod app;
pub mod channel;
pub mod config;
pub mod control;
pub mod egress;
pub mod error;
pub mod header;
pub mod ingress;
pub mod sink;
pub mod stats;
pub mod vrb;

pub use error::{Error, Result};

/// Hard cap on a single datagram's size; nothing from the wire is ever
/// accepted larger than this regardless of `--len`.
pub const MAXLEN: usize = 9000;
