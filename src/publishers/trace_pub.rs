//! Trace publisher: renders each routed message as a decoded record on
//! stdout and, when configured, into a trace file.

use std::path::Path;

use crate::config::PublisherConfig;
use crate::envelope::Envelope;
use crate::publisher::PublisherSink;
use crate::trace::{TraceDirection, TraceWriter};

pub struct TracePublisher {
    name: String,
    writer: Option<TraceWriter>,
}

impl TracePublisher {
    pub fn new(config: &PublisherConfig, trace_dir: &Path) -> Result<Self, String> {
        let writer = if config.to_file {
            Some(
                TraceWriter::create(trace_dir, &config.name)
                    .map_err(|e| format!("publisher {}: {}", config.name, e))?,
            )
        } else {
            None
        };
        Ok(Self {
            name: config.name.clone(),
            writer,
        })
    }

    fn render(envelope: &Envelope) -> String {
        match envelope {
            Envelope::Decoded2000 { header, data } => {
                format!("PGN {} sa={} da={} {}", header.pgn, header.sa, header.da, data)
            }
            other => format!("{}", other),
        }
    }
}

impl PublisherSink for TracePublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, envelope: &Envelope) -> bool {
        let rendered = Self::render(envelope);
        println!("{}", rendered);
        if let Some(writer) = self.writer.as_mut() {
            writer.trace_message(TraceDirection::In, &rendered);
        }
        true
    }

    fn last_action(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush();
        }
    }
}
