//! Stop-level transitions and the signal/deadline handling that drives
//! them.
//!
//! Everything that would otherwise run in signal-handler context runs
//! instead on an ordinary thread blocked in
//! [`signal_hook::iterator::Signals::forever`], so the mutex and condition
//! variable behind [`Channel`] are only ever touched from normal code.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use crate::channel::{Channel, RUNNING, STOP_FILE, STOP_PROGRAM};
use crate::config::Config;
use crate::error::{Error, Result};

/// Events that can change the stop level, independent of where they come
/// from (a real signal or a scheduled deadline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Terminate,
    HangupOrIdle,
}

/// Pure transition function mirroring the stop-level table: given the
/// current level, whether a sink is open, and the event, what's the new
/// level? Kept free of any I/O so the table itself is unit-testable.
pub fn transition(event: Event, current: i32, sink_open: bool) -> i32 {
    match event {
        Event::Terminate => STOP_PROGRAM,
        Event::HangupOrIdle => {
            if sink_open && current == RUNNING {
                STOP_FILE
            } else {
                current
            }
        }
    }
}

/// Applies the SIGHUP / idle-timeout transition directly, preserving the
/// "no-op when idle and no file is open" behavior: only SIGHUP or an idle
/// timeout while a sink is open ends the current file.
pub fn on_idle_or_hangup(channel: &Channel) {
    let current = channel.stop_level();
    let next = transition(Event::HangupOrIdle, current, channel.sink_open());
    if next != current {
        channel.set_stop_if_running(next);
    }
}

/// Resolves the end-of-recording instant from `--End`, or `--Start` +
/// `--duration`, or `now` + `--duration`. `None` means open-ended.
pub fn resolve_end(config: &Config, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(end) = config.end {
        return Some(end);
    }
    let duration = config.duration?;
    let base = config.start.unwrap_or(now);
    Some(base + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero()))
}

/// An end instant due within 100ms of `now` is rejected before the
/// recording starts — there would be no meaningful window to record in.
pub fn check_end_not_imminent(end: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if (end - now).num_milliseconds() < 100 {
        return Err(Error::Config(format!(
            "--End/--duration resolves to {end}, which is already past or imminent"
        )));
    }
    Ok(())
}

/// Spawns the control thread: blocks on `SIGINT`/`SIGTERM`/`SIGHUP` and
/// applies the stop-level table for each. Returns once `SIGINT`/`SIGTERM`
/// has been observed (the program is stopping) or the channel is told to
/// stop by some other means and this thread is dropped with the process.
pub fn spawn_signal_thread(channel: Arc<Channel>) -> Result<JoinHandle<()>> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).map_err(Error::Signal)?;
    Ok(std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT | SIGTERM => {
                    info!(signal, "received termination signal");
                    channel.set_stop_level(STOP_PROGRAM);
                    break;
                }
                SIGHUP => {
                    info!("received SIGHUP");
                    on_idle_or_hangup(&channel);
                }
                _ => {}
            }
        }
    }))
}

/// Sleeps until `deadline`, in coarse one-second steps while more than a
/// second remains and a final fine-grained sleep for the tail, waking
/// early if the stop level leaves `RUNNING` in the meantime (so a
/// SIGINT/SIGTERM during a start-time wait doesn't block it).
pub fn wait_until(channel: &Channel, deadline: DateTime<Utc>) {
    loop {
        if channel.stop_level() != RUNNING {
            return;
        }
        let remaining = deadline - Utc::now();
        let Ok(remaining) = remaining.to_std() else {
            return;
        };
        if remaining <= Duration::from_secs(1) {
            channel.sleep_or_stop(remaining);
            return;
        }
        channel.sleep_or_stop(Duration::from_secs(1));
    }
}

/// Spawns the deadline thread for `--End`/`--duration`: waits until `end`
/// and then sets the stop level to `STOP_PROGRAM`.
pub fn spawn_deadline_thread(channel: Arc<Channel>, end: DateTime<Utc>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        wait_until(&channel, end);
        if channel.stop_level() == RUNNING {
            info!("recording duration elapsed");
            channel.set_stop_level(STOP_PROGRAM);
        }
    })
}
