//! Command-line parsing and validation.
//!
//! [`Cli`] is the raw `clap` surface; [`Config::from_cli`] turns it into a
//! validated, typed [`Config`] that the rest of the crate works with. Doing
//! the validation here, once, means nothing downstream has to re-check a
//! range or re-parse a timestamp.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::Parser;

use crate::error::{Error, Result};
use crate::stats::MIN_TIMEOUT;

const DEFAULT_COMPCOMMAND: &str =
    "zstd -1 --zstd='strategy=0,wlog=13,hlog=7,slog=1,slen=7' -q -f -T2 -o %s";

/// Forced fixed packet length when `--check` is set.
const BEAMFORMED_LEN: usize = 7824;

use crate::MAXLEN;

#[derive(Debug, Parser)]
#[command(
    name = "beamdump",
    about = "Capture UDP packet streams losslessly to disk",
    disable_help_flag = false
)]
pub struct Cli {
    /// Comma-separated port list; "N x k" expands to k ports from N; "0" selects stdin.
    #[arg(short = 'p', long = "ports", default_value = "4346")]
    pub ports: String,

    /// Base output path. Exact value `/dev/null` is used verbatim.
    #[arg(short = 'o', long = "out", default_value = "udp")]
    pub out: PathBuf,

    /// Fixed packet length; 0 = accept any length.
    #[arg(short = 'l', long = "len", default_value_t = 0)]
    pub len: usize,

    /// Prepend a 2-byte little-endian length to every stored packet.
    #[arg(short = 's', long = "sizehead")]
    pub sizehead: bool,

    /// VRB minimum capacity in bytes; accepts exponential notation.
    #[arg(short = 'b', long = "bufsize", default_value_t = 104_857_600.0)]
    pub bufsize: f64,

    /// Maximum bytes written per write syscall.
    #[arg(short = 'm', long = "maxwrite", default_value_t = 1_048_576)]
    pub maxwrite: usize,

    /// Idle timeout in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 10.0)]
    pub timeout: f64,

    /// Start instant: Unix-seconds float or `YYYY-MM-DDTHH:MM:SS` UTC.
    #[arg(short = 'S', long = "Start")]
    pub start: Option<String>,

    /// End instant; mutually exclusive with `--duration`.
    #[arg(short = 'E', long = "End", conflicts_with = "duration")]
    pub end: Option<String>,

    /// Duration in seconds; mutually exclusive with `--End`.
    #[arg(short = 'd', long = "duration", conflicts_with = "end")]
    pub duration: Option<f64>,

    /// Nonzero split size; positive = per-file stats, negative = combined.
    #[arg(short = 'M', long = "Maxfilesize")]
    pub maxfilesize: Option<f64>,

    /// Enable beamformed packet accounting; forces `--len 7824`.
    #[arg(short = 'c', long = "check")]
    pub check: bool,

    /// Pipe output through the configured compressor.
    #[arg(short = 'z', long = "compress")]
    pub compress: bool,

    /// Compressor command template; must contain `%s`.
    #[arg(short = 'Z', long = "compcommand", default_value = DEFAULT_COMPCOMMAND)]
    pub compcommand: String,

    /// Overrides PATH for spawned child processes.
    #[arg(short = 'P', long = "path")]
    pub path: Option<String>,

    /// Raise log verbosity from info to debug.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Alternate help flag, equivalent to --help.
    #[arg(short = 'H', long = "Help", action = clap::ArgAction::Help)]
    pub help_alt: Option<bool>,
}

/// A datagram source: a list of UDP ports, or standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Udp(Vec<u16>),
    Stdin,
}

/// Split-file sizing: positive reports stats per split, negative combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSize {
    pub bytes: u64,
    pub per_file_stats: bool,
}

/// Validated, typed configuration for a recording session.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: Source,
    pub out: PathBuf,
    pub len: usize,
    pub sizehead: bool,
    pub bufsize: usize,
    pub maxwrite: usize,
    pub timeout: Duration,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub maxfilesize: Option<SplitSize>,
    pub check: bool,
    pub compress: bool,
    pub compcommand: String,
    pub path_override: Option<String>,
    pub verbose: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let source = parse_ports(&cli.ports)?;

        let len = if cli.check { BEAMFORMED_LEN } else { cli.len };
        if len >= MAXLEN {
            return Err(Error::Config(format!(
                "--len must be less than {MAXLEN}, got {len}"
            )));
        }

        if !(1e4..=16e9).contains(&cli.bufsize) {
            return Err(Error::Config(format!(
                "--bufsize must be in (1e4, 16e9], got {}",
                cli.bufsize
            )));
        }

        if cli.maxwrite <= 1024 {
            return Err(Error::Config(format!(
                "--maxwrite must be greater than 1024, got {}",
                cli.maxwrite
            )));
        }

        if cli.timeout < MIN_TIMEOUT.as_secs_f64() {
            return Err(Error::Config(format!(
                "--timeout must be at least 1ms, got {}",
                cli.timeout
            )));
        }

        let start = cli.start.as_deref().map(parse_instant).transpose()?;
        let end = cli.end.as_deref().map(parse_instant).transpose()?;
        let duration = cli.duration.map(|secs| {
            if secs <= 0.0 {
                Err(Error::Config(format!(
                    "--duration must be positive, got {secs}"
                )))
            } else {
                Ok(Duration::from_secs_f64(secs))
            }
        }).transpose()?;

        let maxfilesize = cli.maxfilesize.map(|v| {
            if v == 0.0 {
                Err(Error::Config("--Maxfilesize must be nonzero".into()))
            } else {
                Ok(SplitSize {
                    bytes: v.abs() as u64,
                    per_file_stats: v > 0.0,
                })
            }
        }).transpose()?;

        if cli.compress && !cli.compcommand.contains("%s") {
            return Err(Error::Config(
                "--compcommand must contain %s for the output filename".into(),
            ));
        }

        Ok(Config {
            source,
            out: cli.out,
            len,
            sizehead: cli.sizehead,
            bufsize: cli.bufsize as usize,
            maxwrite: cli.maxwrite,
            timeout: Duration::from_secs_f64(cli.timeout),
            start,
            end,
            duration,
            maxfilesize,
            check: cli.check,
            compress: cli.compress,
            compcommand: cli.compcommand,
            path_override: cli.path,
            verbose: cli.verbose,
        })
    }
}

fn parse_ports(spec: &str) -> Result<Source> {
    let tokens: Vec<&str> = spec.split(',').map(str::trim).collect();
    if tokens == ["0"] {
        return Ok(Source::Stdin);
    }

    let mut ports = Vec::new();
    for tok in tokens {
        if let Some((base, count)) = tok.split_once('x') {
            let base: u16 = base.trim().parse().map_err(|_| {
                Error::Config(format!("invalid port token {tok:?}"))
            })?;
            let count: u16 = count.trim().parse().map_err(|_| {
                Error::Config(format!("invalid port token {tok:?}"))
            })?;
            for i in 0..count {
                ports.push(base + i);
            }
        } else {
            let port: u16 = tok
                .parse()
                .map_err(|_| Error::Config(format!("invalid port token {tok:?}")))?;
            if port == 0 {
                return Err(Error::Config(
                    "port 0 (stdin) cannot be combined with other ports".into(),
                ));
            }
            ports.push(port);
        }
    }
    if ports.is_empty() {
        return Err(Error::Config("--ports produced an empty port list".into()));
    }
    Ok(Source::Udp(ports))
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(secs) = s.parse::<f64>() {
        let whole = secs.trunc() as i64;
        let nanos = ((secs.fract()) * 1e9).round() as u32;
        return Utc
            .timestamp_opt(whole, nanos)
            .single()
            .ok_or_else(|| Error::Config(format!("out-of-range instant {s:?}")));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| Error::Config(format!("unrecognized instant {s:?}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}
