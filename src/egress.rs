//! Drains the VRB to the active sink in bounded chunks and manages file
//! lifecycle: opening, size-based splitting, and the close-then-stop path.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::channel::{Channel, RUNNING, SPLIT, STOP_FILE, STOP_PROGRAM};
use crate::config::{Config, Source};
use crate::error::Result;
use crate::sink::Sink;

pub fn run(config: &Config, channel: &Channel) -> Result<()> {
    let portlist = portlist_string(&config.source);
    let mut sink: Option<Sink> = None;
    let mut seq: u32 = 0;
    let mut bytes_written_thisfile: u64 = 0;
    let mut first_open = true;

    loop {
        let (fill, stop) = channel.wait_for_data();

        let mut local_stop = stop;
        if local_stop == RUNNING {
            if let Some(split) = config.maxfilesize {
                if bytes_written_thisfile > split.bytes {
                    local_stop = SPLIT;
                }
            }
        }

        let should_close = (local_stop == STOP_PROGRAM && fill == 0)
            || local_stop == STOP_FILE
            || local_stop == SPLIT;

        if should_close {
            if let Some(s) = sink.take() {
                close_sink(s, channel, config)?;
                channel.set_sink_open(false);
            }
            if local_stop == SPLIT {
                seq += 1;
                let now = Utc::now();
                let seq_opt = config.maxfilesize.map(|_| seq);
                sink = Some(open_sink(config, &portlist, seq_opt, now)?);
                channel.set_sink_open(true);
                bytes_written_thisfile = 0;
            }
        }

        if local_stop == STOP_PROGRAM && fill == 0 {
            break;
        }

        channel.reset_stop_if_unchanged(stop);

        if fill == 0 {
            continue;
        }

        if sink.is_none() {
            // By the time Egress observes data, Ingress (gated on `--Start`
            // in `app::run`) has already waited for S — the first file's
            // name just carries that same instant rather than the time the
            // first byte happened to land.
            let now = if first_open {
                config.start.unwrap_or_else(Utc::now)
            } else {
                Utc::now()
            };
            let seq_opt = config.maxfilesize.map(|_| seq);
            sink = Some(open_sink(config, &portlist, seq_opt, now)?);
            channel.set_sink_open(true);
            bytes_written_thisfile = 0;
        }

        let mut chunk_len = fill.min(config.maxwrite);
        if config.len > 0 {
            chunk_len = chunk_len / config.len * config.len;
        }

        if chunk_len == 0 {
            // Less than one whole packet resident; wait for Ingress to
            // commit more before a chunk can be carved out.
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        let (ptr, _fill) = match channel.peek() {
            Some(p) => p,
            None => continue,
        };
        let bytes = unsafe { std::slice::from_raw_parts(ptr, chunk_len) };
        sink.as_mut().expect("sink opened above").write_all(bytes)?;
        bytes_written_thisfile += chunk_len as u64;

        channel.release(chunk_len);

        if first_open {
            first_open = false;
        }
    }

    if let Some(s) = sink.take() {
        close_sink(s, channel, config)?;
        channel.set_sink_open(false);
    }

    Ok(())
}

fn open_sink(
    config: &Config,
    portlist: &str,
    seq: Option<u32>,
    now: chrono::DateTime<Utc>,
) -> Result<Sink> {
    Sink::open(
        &config.out,
        portlist,
        now,
        seq,
        config.compress,
        &config.compcommand,
        config.path_override.as_deref(),
    )
}

fn close_sink(sink: Sink, channel: &Channel, config: &Config) -> Result<()> {
    let path = sink.path.clone();
    let written = sink.bytes_written;
    if let Some(ratio) = sink.close()? {
        info!(?path, written, ratio, "closed compressed sink");
    } else {
        info!(?path, written, "closed sink");
    }
    if config.maxfilesize.is_some_and(|s| s.per_file_stats) {
        for line in channel.file_reports(config.check) {
            println!("{line}");
        }
    }
    Ok(())
}

fn portlist_string(source: &Source) -> String {
    match source {
        Source::Stdin => "0".to_string(),
        Source::Udp(ports) => ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join("+"),
    }
}
