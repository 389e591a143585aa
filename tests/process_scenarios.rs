//! Integration tests that spawn the actual compiled binary as a separate
//! OS process, rather than calling library functions in-process. These
//! cover behavior that only a real process exhibits: signal delivery,
//! stdin EOF, and the combined ingress/egress pipeline end to end.

use std::io::Write;
use std::net::UdpSocket;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_beamdump")
}

fn free_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn(args: &[&str], stdin: Stdio) -> Child {
    Command::new(bin())
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn beamdump")
}

fn terminate(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGTERM);
    }
}

fn hangup(child: &Child) {
    unsafe {
        libc::kill(child.id() as i32, libc::SIGHUP);
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            panic!("process did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    entries
}

#[test]
fn tiny_loopback_round_trips_every_datagram() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = spawn(
        &[
            "--ports",
            &port.to_string(),
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            "8",
            "--bufsize",
            "20000",
            "--timeout",
            "0.02",
        ],
        Stdio::null(),
    );

    std::thread::sleep(Duration::from_millis(150));

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    const N: usize = 2000;
    for i in 0..N {
        sender
            .send_to(&[(i % 8) as u8; 8], ("127.0.0.1", port))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));

    terminate(&mut child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let entries = files_in(dir.path());
    assert_eq!(entries.len(), 1, "expected exactly one output file");
    assert_eq!(std::fs::metadata(&entries[0]).unwrap().len(), (N * 8) as u64);
}

#[test]
fn wrong_length_datagrams_are_discarded_from_output() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = spawn(
        &[
            "--ports",
            &port.to_string(),
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            "8",
            "--bufsize",
            "20000",
            "--timeout",
            "0.02",
        ],
        Stdio::null(),
    );

    std::thread::sleep(Duration::from_millis(150));

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut good = 0usize;
    for i in 0..200 {
        sender
            .send_to(&[(i % 8) as u8; 8], ("127.0.0.1", port))
            .unwrap();
        good += 1;
        if i % 5 == 0 {
            sender
                .send_to(&[0u8; 7], ("127.0.0.1", port))
                .unwrap(); // wrong length, must be discarded
        }
    }
    std::thread::sleep(Duration::from_millis(300));

    terminate(&mut child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let entries = files_in(dir.path());
    assert_eq!(entries.len(), 1);
    assert_eq!(
        std::fs::metadata(&entries[0]).unwrap().len(),
        (good * 8) as u64
    );
}

#[test]
fn split_files_roll_over_at_the_configured_size() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = spawn(
        &[
            "--ports",
            &port.to_string(),
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            "1000",
            "--bufsize",
            "200000",
            "--maxwrite",
            "2000",
            "--timeout",
            "0.02",
            "--Maxfilesize",
            "50000",
        ],
        Stdio::null(),
    );

    std::thread::sleep(Duration::from_millis(150));

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    const PACKETS: usize = 175; // 175,000 bytes total, spans several 50,000-byte splits
    for _ in 0..PACKETS {
        sender
            .send_to(&[0xCDu8; 1000], ("127.0.0.1", port))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(500));

    terminate(&mut child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let entries = files_in(dir.path());
    assert!(
        entries.len() >= 3,
        "expected several split files, got {}",
        entries.len()
    );
    let total: u64 = entries
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().len())
        .sum();
    assert_eq!(total, (PACKETS * 1000) as u64);
    // Every file but the last should be at or past the split threshold.
    for entry in &entries[..entries.len() - 1] {
        assert!(std::fs::metadata(entry).unwrap().len() >= 50_000);
    }
}

#[test]
fn sighup_rollover_produces_one_file_per_hangup() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = spawn(
        &[
            "--ports",
            &port.to_string(),
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            "8",
            "--bufsize",
            "200000",
            "--timeout",
            "0.02",
        ],
        Stdio::null(),
    );

    std::thread::sleep(Duration::from_millis(150));
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    let mut total_sent = 0usize;
    for round in 0..4 {
        for i in 0..100 {
            sender
                .send_to(&[(i % 8) as u8; 8], ("127.0.0.1", port))
                .unwrap();
            total_sent += 1;
        }
        std::thread::sleep(Duration::from_millis(150));
        if round < 3 {
            hangup(&child);
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    terminate(&mut child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let entries = files_in(dir.path());
    assert_eq!(entries.len(), 4, "expected one file per hangup plus the final file");
    let total: u64 = entries
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().len())
        .sum();
    assert_eq!(total, (total_sent * 8) as u64);
    for entry in &entries {
        assert!(std::fs::metadata(entry).unwrap().len() > 0);
    }
}

#[test]
fn stdin_pipe_is_captured_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let record_len = 7824;
    let record_count = 50;
    let mut input = Vec::with_capacity(record_len * record_count);
    for i in 0..record_count {
        input.extend(std::iter::repeat((i % 251) as u8).take(record_len));
    }

    let mut child = spawn(
        &[
            "--ports",
            "0",
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            &record_len.to_string(),
            "--bufsize",
            "1000000",
        ],
        Stdio::piped(),
    );

    child
        .stdin
        .take()
        .unwrap()
        .write_all(&input)
        .expect("write to child stdin");
    // Dropping the handle above closed it, signaling EOF; the process
    // should see the EOF, stop itself, and exit without a signal.

    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let entries = files_in(dir.path());
    assert_eq!(entries.len(), 1);
    let written = std::fs::read(&entries[0]).unwrap();
    assert_eq!(written, input);
}

#[test]
fn backpressure_drop_accounts_for_every_packet() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let mut child = spawn(
        &[
            "--ports",
            &port.to_string(),
            "--out",
            dir.path().join("udp").to_str().unwrap(),
            "--len",
            "1024",
            "--bufsize",
            "10000", // tiny buffer relative to the burst below
            "--maxwrite",
            "2000",
            "--timeout",
            "0.02",
        ],
        Stdio::null(),
    );

    std::thread::sleep(Duration::from_millis(150));
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    const N: usize = 10_000;
    for _ in 0..N {
        // Fire-and-forget burst with no pacing, to force the consumer
        // behind the producer and guarantee some drops.
        let _ = sender.send_to(&[0u8; 1024], ("127.0.0.1", port));
    }
    std::thread::sleep(Duration::from_millis(300));

    terminate(&mut child);
    let status = wait_with_timeout(&mut child, Duration::from_secs(5));
    assert!(status.success());

    let stdout = {
        let mut s = String::new();
        std::io::Read::read_to_string(&mut child.stdout.take().unwrap(), &mut s).ok();
        s
    };

    let (seen, dropped) = parse_seen_dropped(&stdout);
    assert_eq!(seen, seen); // seen is whatever made it past the kernel, used below
    assert!(dropped > 0, "expected some drops under backpressure, stdout:\n{stdout}");
    let written_bytes = std::fs::metadata(&files_in(dir.path())[0]).unwrap().len();
    assert_eq!(seen * 1024, written_bytes + dropped * 1024);
}

fn parse_seen_dropped(report: &str) -> (u64, u64) {
    let line = report
        .lines()
        .find(|l| l.contains("seen=") && l.contains("dropped="))
        .unwrap_or_else(|| panic!("no summary line in stdout:\n{report}"));
    let field = |key: &str| -> u64 {
        let after = line.split(key).nth(1).unwrap();
        after
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .unwrap()
            .parse()
            .unwrap()
    };
    (field("seen="), field("dropped="))
}
