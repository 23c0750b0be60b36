//! Log replay coupler: reads the raw ingress records of a previously
//! captured trace file and re-emits them, honoring the original
//! inter-arrival times.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use nmea2k::Dictionary;

use crate::config::CouplerConfig;
use crate::coupler::{Coupler, CouplerError, Direction, ProtocolDecoder, ProtocolMode};
use crate::envelope::Envelope;
use crate::stats::CouplerStats;
use crate::trace::{TraceReader, TraceRecord};

pub struct ReplayCoupler {
    name: String,
    path: PathBuf,
    decoder: ProtocolDecoder,
    reader: Option<TraceReader>,
    previous_stamp: Option<DateTime<Local>>,
    finished: bool,
}

impl ReplayCoupler {
    pub fn new(
        config: &CouplerConfig,
        dictionary: Arc<Dictionary>,
        stats: Arc<CouplerStats>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            path: PathBuf::from(&config.file),
            decoder: ProtocolDecoder::new(
                &config.name,
                ProtocolMode::parse(&config.protocol),
                dictionary,
                stats,
            ),
            reader: None,
            previous_stamp: None,
            finished: false,
        }
    }

    fn pace(&mut self, record: &TraceRecord) {
        if let Some(previous) = self.previous_stamp {
            let gap = record
                .timestamp
                .signed_duration_since(previous)
                .to_std()
                .unwrap_or(Duration::ZERO);
            // replay in real time, but never stall on a recording gap
            std::thread::sleep(gap.min(Duration::from_secs(2)));
        }
        self.previous_stamp = Some(record.timestamp);
    }
}

impl Coupler for ReplayCoupler {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> Direction {
        Direction::ReadOnly
    }

    fn open(&mut self) -> Result<(), CouplerError> {
        let reader =
            TraceReader::open(&self.path).map_err(|e| CouplerError::Open(e.to_string()))?;
        info!("coupler {}: replaying {}", self.name, self.path.display());
        self.reader = Some(reader);
        self.previous_stamp = None;
        self.finished = false;
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Envelope>, CouplerError> {
        if self.finished {
            // nothing more to produce, idle until stopped
            std::thread::sleep(Duration::from_millis(200));
            return Ok(Vec::new());
        }
        let record = match self.reader.as_mut().and_then(|r| r.next_raw_in()) {
            Some(record) => record,
            None => {
                warn!("coupler {}: replay file exhausted", self.name);
                self.finished = true;
                return Ok(Vec::new());
            }
        };
        self.pace(&record);
        Ok(self
            .decoder
            .decode_line(record.content.as_bytes())
            .into_iter()
            .collect())
    }

    fn send(&mut self, _envelope: &Envelope) -> Result<(), CouplerError> {
        Err(CouplerError::ReadOnly)
    }

    fn close(&mut self) {
        self.reader = None;
        info!("coupler {}: closed", self.name);
    }
}
