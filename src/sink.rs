//! The active output target: a raw file, or a compressor subprocess fed
//! through its stdin.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

enum Writer {
    Raw(File),
    Piped(Child),
}

/// An open output sink plus its byte accounting.
pub struct Sink {
    writer: Writer,
    pub path: PathBuf,
    pub bytes_written: u64,
    compressed: bool,
}

impl Sink {
    /// Opens a new sink. `seq` is `Some` for a split-file rollover.
    pub fn open(
        base: &Path,
        portlist: &str,
        now: DateTime<Utc>,
        seq: Option<u32>,
        compress: bool,
        compcommand: &str,
        path_override: Option<&str>,
    ) -> Result<Self> {
        let path = if base == Path::new("/dev/null") {
            base.to_path_buf()
        } else {
            build_filename(base, portlist, now, seq, compress)
        };

        let writer = if compress {
            let cmd = compcommand.replace("%s", &path.to_string_lossy());
            // Run through a shell, matching popen()'s actual semantics: the
            // default --compcommand relies on shell quoting (`--zstd='...'`)
            // to keep that option as one argument, which naive whitespace
            // splitting would break apart.
            let mut command = Command::new("sh");
            command.arg("-c").arg(&cmd).stdin(Stdio::piped());
            if let Some(p) = path_override {
                command.env("PATH", p);
            }
            let child = command.spawn().map_err(|source| Error::CompressorSpawn {
                command: cmd.clone(),
                source,
            })?;
            Writer::Piped(child)
        } else {
            let file = File::create(&path).map_err(|source| Error::SinkOpen {
                path: path.clone(),
                source,
            })?;
            Writer::Raw(file)
        };

        Ok(Self {
            writer,
            path,
            bytes_written: 0,
            compressed: compress,
        })
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let result = match &mut self.writer {
            Writer::Raw(f) => f.write_all(buf),
            Writer::Piped(child) => child
                .stdin
                .as_mut()
                .expect("compressor stdin piped at spawn")
                .write_all(buf),
        };
        result.map_err(|source| Error::io("write to sink", source))?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    /// Closes the sink, returning the compression ratio (compressed /
    /// uncompressed) if this was a compressed sink.
    pub fn close(mut self) -> Result<Option<f64>> {
        match &mut self.writer {
            Writer::Raw(f) => {
                f.flush().map_err(|source| Error::io("flush sink", source))?;
                Ok(None)
            }
            Writer::Piped(child) => {
                // Dropping stdin signals EOF to the compressor.
                drop(child.stdin.take());
                let status = child
                    .wait()
                    .map_err(|source| Error::io("wait for compressor", source))?;
                if !status.success() {
                    return Err(Error::CompressorSpawn {
                        command: self.path.to_string_lossy().into_owned(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("compressor exited with {status}"),
                        ),
                    });
                }
                let compressed_len = std::fs::metadata(&self.path)
                    .map(|m| m.len())
                    .unwrap_or(0);
                let ratio = if self.bytes_written == 0 {
                    0.0
                } else {
                    compressed_len as f64 / self.bytes_written as f64
                };
                Ok(Some(ratio))
            }
        }
    }
}

fn build_filename(
    base: &Path,
    portlist: &str,
    now: DateTime<Utc>,
    seq: Option<u32>,
    compressed: bool,
) -> PathBuf {
    let host = hostname();
    let ts = now.format("%Y-%m-%dT%H:%M:%S%.3f");
    let mut name = format!(
        "{}_{}.{}.{}",
        base.display(),
        portlist,
        host,
        ts
    );
    if let Some(n) = seq {
        name.push_str(&format!("_{n:04}"));
    }
    if compressed {
        name.push_str(".zst");
    }
    PathBuf::from(name)
}

fn hostname() -> String {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_matches_template() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = build_filename(Path::new("/tmp/udp"), "16011", now, None, false);
        let s = name.to_string_lossy();
        assert!(s.starts_with("/tmp/udp_16011."));
        assert!(s.ends_with("2024-01-02T03:04:05.000"));
    }

    #[test]
    fn split_filename_has_zero_padded_sequence_and_zst_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = build_filename(Path::new("/tmp/udp"), "16011", now, Some(3), true);
        let s = name.to_string_lossy();
        assert!(s.ends_with("_0003.zst"));
    }

    #[test]
    fn dev_null_passed_through_verbatim() {
        let mut sink = Sink::open(
            Path::new("/dev/null"),
            "16011",
            Utc::now(),
            None,
            false,
            "",
            None,
        )
        .unwrap();
        assert_eq!(sink.path, Path::new("/dev/null"));
        sink.write_all(b"discarded").unwrap();
        assert!(sink.close().unwrap().is_none());
    }
}
