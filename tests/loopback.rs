//! End-to-end tests driving real UDP loopback sockets and temporary
//! output directories, covering the literal scenarios from the recording
//! session's testable properties.

use std::net::UdpSocket;
use std::sync::Arc;

use beamdump::channel::{Channel, RUNNING, STOP_PROGRAM};

fn loopback_pair() -> (UdpSocket, u16) {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = sock.local_addr().unwrap().port();
    (sock, port)
}

#[test]
fn tiny_loopback_no_drops() {
    let channel = Arc::new(Channel::new(1 << 20, &[16011]).unwrap());
    let (sock, _port) = loopback_pair();
    let dest = sock.local_addr().unwrap();

    for i in 0u8..200 {
        let payload = [i % 8, 1, 2, 3, 4, 5, 6, 7];
        sock.send_to(&payload, dest).unwrap();
    }

    let mut buf = [0u8; 8];
    for _ in 0..200 {
        let (n, _) = sock.recv_from(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert!(channel.record_packet(0, &buf[..n]));
    }

    channel.with_port(0, |p| {
        assert_eq!(p.seen, 200);
        assert_eq!(p.dropped, 0);
    });
    assert_eq!(channel.fill(), 200 * 8);
}

#[test]
fn drop_under_backpressure_accounts_for_every_packet() {
    let channel = Arc::new(Channel::new(1 << 14, &[16011]).unwrap());
    let mut sent = 0u64;
    for _ in 0..10_000 {
        sent += 1;
        channel.record_packet(0, &[0u8; 1024]);
    }
    channel.with_port(0, |p| {
        assert_eq!(p.seen, sent);
        assert_eq!(p.seen, p.dropped + (p.bytes_written / 1024));
        assert!(p.dropped > 0, "buffer is far smaller than the burst");
    });
}

#[test]
fn stdin_style_blocking_path_never_drops() {
    let channel = Arc::new(Channel::new(4096, &[0]).unwrap());
    let writer = {
        let channel = channel.clone();
        std::thread::spawn(move || {
            for _ in 0..1000 {
                channel.record_packet_blocking(0, &[0xAB; 64]);
            }
        })
    };

    let mut drained = 0usize;
    while drained < 1000 * 64 {
        let (fill, _stop) = channel.wait_for_data();
        if fill == 0 {
            continue;
        }
        let (ptr, len) = channel.peek().unwrap();
        let chunk = len.min(512);
        let _ = unsafe { std::slice::from_raw_parts(ptr, chunk) };
        channel.release(chunk);
        drained += chunk;
    }
    writer.join().unwrap();
    channel.with_port(0, |p| assert_eq!(p.dropped, 0));
}

#[test]
fn wrong_length_packets_are_not_counted() {
    let channel = Arc::new(Channel::new(4096, &[16011]).unwrap());
    let len = 8usize;

    let accept = |data: &[u8]| {
        if data.len() == len {
            channel.record_packet(0, data);
        }
    };
    accept(&[0u8; 8]);
    accept(&[0u8; 7]);
    accept(&[0u8; 8]);

    channel.with_port(0, |p| assert_eq!(p.seen, 2));
}

#[test]
fn stop_program_stops_egress_wait_immediately() {
    let channel = Arc::new(Channel::new(4096, &[16011]).unwrap());
    channel.set_stop_level(STOP_PROGRAM);
    let (fill, stop) = channel.wait_for_data();
    assert_eq!(fill, 0);
    assert_eq!(stop, STOP_PROGRAM);
    assert_ne!(stop, RUNNING);
}
