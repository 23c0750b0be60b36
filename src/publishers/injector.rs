//! Injector publisher: loops routed messages back into another
//! coupler's output path, converting on the way out through the target
//! coupler's own wire codec.

use std::sync::mpsc::{SyncSender, TrySendError};

use tracing::{debug, warn};

use crate::config::PublisherConfig;
use crate::envelope::Envelope;
use crate::publisher::PublisherSink;

pub struct InjectorPublisher {
    name: String,
    target: String,
    sender: SyncSender<Envelope>,
    dropped: u64,
}

impl InjectorPublisher {
    pub fn new(config: &PublisherConfig, sender: SyncSender<Envelope>) -> Self {
        Self {
            name: config.name.clone(),
            target: config.target.clone(),
            sender,
            dropped: 0,
        }
    }
}

impl PublisherSink for InjectorPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, envelope: &Envelope) -> bool {
        match self.sender.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // the target coupler is saturated, dropping beats blocking
                self.dropped += 1;
                debug!(
                    "injector {}: target {} queue full ({} dropped)",
                    self.name, self.target, self.dropped
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("injector {}: target {} is gone", self.name, self.target);
                false
            }
        }
    }
}
