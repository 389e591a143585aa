//! Wires a validated [`Config`] into the Control, Ingress, and Egress
//! threads and runs a full recording session to completion.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::error;

use crate::channel::{Channel, RUNNING};
use crate::config::{Config, Source};
use crate::control;
use crate::egress;
use crate::error::{Error, Result};
use crate::ingress;

/// How long `main` waits for Ingress to notice a stop request and exit
/// cleanly, after Egress has already drained and exited, before giving up
/// and forcing the process down. There is no portable thread-cancel in
/// Rust, so this is a last resort, not the expected path.
const INGRESS_GRACE_PERIOD: Duration = Duration::from_secs(1);

pub fn run(config: Config) -> Result<()> {
    let now = chrono::Utc::now();
    let end = control::resolve_end(&config, now);
    if let Some(end) = end {
        control::check_end_not_imminent(end, now)?;
    }

    let port_numbers: Vec<u16> = match &config.source {
        Source::Udp(ports) => ports.clone(),
        Source::Stdin => vec![0],
    };

    let channel = Arc::new(
        Channel::new(config.bufsize, &port_numbers)
            .map_err(|e| Error::io("allocate ring buffer", e))?,
    );

    let _signal_thread = control::spawn_signal_thread(channel.clone())?;
    let _deadline_thread = end.map(|e| control::spawn_deadline_thread(channel.clone(), e));

    // Mirrors the original's synchronous wait in main() before the producer
    // thread is created: Ingress is not spawned at all until S, so no
    // pre-S datagram is ever read off the wire, not merely excluded from
    // the first file after the fact.
    if let Some(start) = config.start {
        control::wait_until(&channel, start);
        if channel.stop_level() != RUNNING {
            for line in channel.final_reports(config.check) {
                println!("{line}");
            }
            println!("{}", channel.aggregate_report());
            return Ok(());
        }
    }

    let egress_channel = channel.clone();
    let egress_config = config.clone();
    let egress_thread: JoinHandle<Result<()>> =
        thread::spawn(move || egress::run(&egress_config, &egress_channel));

    let ingress_channel = channel.clone();
    let ingress_config = config.clone();
    let ingress_thread: JoinHandle<Result<()>> =
        thread::spawn(move || ingress::run(&ingress_config, &ingress_channel));

    let egress_result = egress_thread
        .join()
        .unwrap_or_else(|_| Err(Error::Config("egress thread panicked".into())));

    let ingress_result = join_with_grace(ingress_thread, "ingress", INGRESS_GRACE_PERIOD);

    for line in channel.final_reports(config.check) {
        println!("{line}");
    }
    println!("{}", channel.aggregate_report());

    ingress_result.and(egress_result)
}

fn join_with_grace(
    handle: JoinHandle<Result<()>>,
    name: &'static str,
    grace: Duration,
) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(handle.join());
    });
    match rx.recv_timeout(grace) {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::Config(format!("{name} thread panicked"))),
        Err(_) => {
            error!(
                "{name} did not exit within the grace period; forcing process exit"
            );
            std::process::exit(1);
        }
    }
}
