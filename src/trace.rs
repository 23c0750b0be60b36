//! Trace files record the traffic of a coupler or publisher, one record
//! per line:
//!
//! `{R|M}#<seq>#<ISO-timestamp>{>|<}<content>`
//!
//! `R` records carry the raw on-wire bytes (hex for binary protocols),
//! `M` records the canonical envelope rendering; `>` marks ingress and
//! `<` egress. The same format is read back by the replay coupler.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad trace record: {0}")]
    BadRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDirection {
    In,
    Out,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Writes trace records for one named component.
pub struct TraceWriter {
    writer: BufWriter<File>,
    sequence: u64,
    path: PathBuf,
}

impl TraceWriter {
    /// Create `TRACE-<name>-<timestamp>.log` in `trace_dir`.
    pub fn create(trace_dir: &Path, name: &str) -> Result<Self, TraceError> {
        std::fs::create_dir_all(trace_dir)?;
        let stamp = Local::now().format("%y%m%d-%H%M%S");
        let path = trace_dir.join(format!("TRACE-{}-{}.log", name, stamp));
        info!("opening trace file {}", path.display());
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            sequence: 0,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn direction_char(direction: TraceDirection) -> char {
        match direction {
            TraceDirection::In => '>',
            TraceDirection::Out => '<',
        }
    }

    /// Record raw on-wire content. Binary data must be hex encoded by
    /// the caller; text protocols pass the line as read.
    pub fn trace_raw(&mut self, direction: TraceDirection, content: &str) {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        if let Err(e) = writeln!(
            self.writer,
            "R#{}#{}{}{}",
            self.sequence,
            stamp,
            Self::direction_char(direction),
            content
        ) {
            error!("trace write failed: {}", e);
        }
        self.sequence += 1;
    }

    /// Record the canonical envelope rendering.
    pub fn trace_message(&mut self, direction: TraceDirection, content: &str) {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        if let Err(e) = writeln!(
            self.writer,
            "M#{}#{}{}{}",
            self.sequence,
            stamp,
            Self::direction_char(direction),
            content
        ) {
            error!("trace write failed: {}", e);
        }
        self.sequence += 1;
    }

    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// One parsed trace record.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub raw: bool,
    pub sequence: u64,
    pub timestamp: DateTime<Local>,
    pub direction: TraceDirection,
    pub content: String,
}

/// Parse one line of a trace file.
pub fn parse_record(line: &str) -> Result<TraceRecord, TraceError> {
    let bad = || TraceError::BadRecord(line.to_string());
    let raw = match line.chars().next() {
        Some('R') => true,
        Some('M') => false,
        _ => return Err(bad()),
    };
    let rest = &line[1..];
    let mut parts = rest.splitn(3, '#');
    if parts.next() != Some("") {
        return Err(bad());
    }
    let sequence: u64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let tail = parts.next().ok_or_else(bad)?;
    let split = tail
        .find(['>', '<'])
        .ok_or_else(bad)?;
    let direction = if tail.as_bytes()[split] == b'>' {
        TraceDirection::In
    } else {
        TraceDirection::Out
    };
    let naive = NaiveDateTime::parse_from_str(&tail[..split], TIMESTAMP_FORMAT)
        .map_err(|_| bad())?;
    let timestamp = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(bad)?;
    Ok(TraceRecord {
        raw,
        sequence,
        timestamp,
        direction,
        content: tail[split + 1..].to_string(),
    })
}

/// Reads the raw ingress records of a trace file, for replay.
pub struct TraceReader {
    reader: BufReader<File>,
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Next raw ingress record, skipping message records, egress and
    /// malformed lines. `None` at end of file.
    pub fn next_raw_in(&mut self) -> Option<TraceRecord> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    error!("trace read failed: {}", e);
                    return None;
                }
            }
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            match parse_record(line) {
                Ok(record) if record.raw && record.direction == TraceDirection::In => {
                    return Some(record)
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record = parse_record("R#12#2024-03-01 10:22:33.123456>$GPRMC,1,2,3*00").unwrap();
        assert!(record.raw);
        assert_eq!(record.sequence, 12);
        assert_eq!(record.direction, TraceDirection::In);
        assert_eq!(record.content, "$GPRMC,1,2,3*00");
    }

    #[test]
    fn test_parse_egress_message_record() {
        let record = parse_record("M#3#2024-03-01 10:22:33.000001<2K|129025|1F801|2|3|255|aa").unwrap();
        assert!(!record.raw);
        assert_eq!(record.direction, TraceDirection::Out);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_record("X#1#2024-03-01 10:22:33.000000>x").is_err());
        assert!(parse_record("R#notanumber#2024-03-01 10:22:33.000000>x").is_err());
        assert!(parse_record("R#1#garbage>x").is_err());
    }

    #[test]
    fn test_write_then_read() {
        let dir = std::env::temp_dir().join("n2k_router_trace_test");
        let mut writer = TraceWriter::create(&dir, "unit").unwrap();
        writer.trace_raw(TraceDirection::In, "$GPRMC,a,b*11");
        writer.trace_message(TraceDirection::Out, "2K|60928|...");
        writer.trace_raw(TraceDirection::In, "$GPGLL,c,d*22");
        writer.flush();
        let path = writer.path().to_path_buf();
        let mut reader = TraceReader::open(&path).unwrap();
        let first = reader.next_raw_in().unwrap();
        assert_eq!(first.content, "$GPRMC,a,b*11");
        // the message record is skipped
        let second = reader.next_raw_in().unwrap();
        assert_eq!(second.content, "$GPGLL,c,d*22");
        assert_eq!(second.sequence, 2);
        assert!(reader.next_raw_in().is_none());
        let _ = std::fs::remove_file(path);
    }
}
