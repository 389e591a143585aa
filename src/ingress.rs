//! Reads datagrams off the wire (or stdin) and appends them to the VRB.

use std::io::{ErrorKind, Read};
use std::net::SocketAddr;

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Socket, Type};
use tracing::{debug, info, warn};

use crate::channel::{Channel, STOP_PROGRAM};
use crate::config::{Config, Source};
use crate::control::on_idle_or_hangup;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::stats::PROGRESS_BYTES;
use crate::MAXLEN;

pub fn run(config: &Config, channel: &Channel) -> Result<()> {
    match &config.source {
        Source::Udp(ports) => run_udp(config, ports, channel),
        Source::Stdin => run_stdin(config, channel),
    }
}

fn bind_udp(port: u16) -> Result<MioUdpSocket> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, None).map_err(|e| Error::io("create UDP socket", e))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::io("set SO_REUSEADDR", e))?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket
        .bind(&addr.into())
        .map_err(|e| Error::io("bind UDP socket", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| Error::io("set socket nonblocking", e))?;
    Ok(MioUdpSocket::from_std(socket.into()))
}

fn run_udp(config: &Config, ports: &[u16], channel: &Channel) -> Result<()> {
    let mut poll = Poll::new().map_err(|e| Error::io("create poll", e))?;
    let mut sockets = Vec::with_capacity(ports.len());
    for (idx, &port) in ports.iter().enumerate() {
        let mut sock = bind_udp(port)?;
        poll.registry()
            .register(&mut sock, Token(idx), Interest::READABLE)
            .map_err(|e| Error::io("register socket with poll", e))?;
        sockets.push(sock);
        info!(port, "listening");
    }

    let mut events = Events::with_capacity(ports.len().max(1));
    let mut scratch = vec![0u8; MAXLEN];
    let mut since_progress: u64 = 0;

    loop {
        if channel.stop_level() == STOP_PROGRAM {
            break;
        }
        poll.poll(&mut events, Some(config.timeout))
            .map_err(|e| Error::io("poll", e))?;

        if events.is_empty() {
            debug!("ingress idle timeout");
            on_idle_or_hangup(channel);
            continue;
        }

        for ev in events.iter() {
            let idx = ev.token().0;
            loop {
                if channel.stop_level() == STOP_PROGRAM {
                    debug!(port = ports[idx], "discarding packet after stop");
                    // Still drain the socket so poll doesn't spin hot.
                    match sockets[idx].recv(&mut scratch) {
                        Ok(_) => continue,
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(_) => break,
                    }
                }
                match sockets[idx].recv(&mut scratch) {
                    Ok(n) => {
                        since_progress += n as u64;
                        ingest(config, channel, idx, ports[idx], &scratch[..n], false);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(source) => return Err(Error::io("recvfrom", source)),
                }
            }
        }

        if since_progress >= PROGRESS_BYTES {
            report_progress(channel, config.check);
            since_progress = 0;
        }
    }
    Ok(())
}

fn run_stdin(config: &Config, channel: &Channel) -> Result<()> {
    let mut stdin = std::io::stdin().lock();
    let read_len = if config.len != 0 { config.len } else { MAXLEN };
    let mut scratch = vec![0u8; read_len];
    let mut since_progress: u64 = 0;

    loop {
        if channel.stop_level() == STOP_PROGRAM {
            break;
        }
        let n = read_as_much_as_possible(&mut stdin, &mut scratch)
            .map_err(|e| Error::io("read stdin", e))?;
        if n == 0 {
            info!("stdin EOF");
            channel.set_stop_level(STOP_PROGRAM);
            break;
        }
        since_progress += n as u64;
        ingest(config, channel, 0, 0, &scratch[..n], true);

        if since_progress >= PROGRESS_BYTES {
            report_progress(channel, config.check);
            since_progress = 0;
        }
    }
    Ok(())
}

/// Reads up to `buf.len()` bytes, looping past short reads (stdin on a
/// pipe commonly returns less than requested), stopping only at EOF or a
/// full buffer.
fn read_as_much_as_possible(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn ingest(
    config: &Config,
    channel: &Channel,
    port_idx: usize,
    port: u16,
    data: &[u8],
    blocking: bool,
) {
    if config.len != 0 && data.len() != config.len {
        warn!(port, len = data.len(), expected = config.len, "wrong length packet discarded");
        return;
    }

    if config.check {
        if let Some(h) = Header::parse(data) {
            channel.record_packno(port_idx, h.packno(), h.is_good());
        }
    }

    if config.sizehead {
        let mut framed = Vec::with_capacity(data.len() + 2);
        framed.extend_from_slice(&(data.len() as u16).to_le_bytes());
        framed.extend_from_slice(data);
        enqueue(channel, port_idx, &framed, blocking);
    } else {
        enqueue(channel, port_idx, data, blocking);
    }
}

fn enqueue(channel: &Channel, port_idx: usize, data: &[u8], blocking: bool) {
    if blocking {
        channel.record_packet_blocking(port_idx, data);
    } else if !channel.record_packet(port_idx, data) {
        debug!(port_idx, "dropped packet, buffer full");
    }
}

fn report_progress(channel: &Channel, checked: bool) {
    for idx in 0..channel.port_count() {
        let line = channel.with_port(idx, |p| p.progress_line(checked));
        println!("{line}");
    }
}
