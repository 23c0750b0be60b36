//! Publisher side of the fabric: every publisher drains its own
//! bounded queue on its own worker thread, so a slow sink can never
//! stall a coupler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::envelope::Envelope;

/// A concrete sink behind a publisher queue.
pub trait PublisherSink: Send {
    fn name(&self) -> &str;

    /// Deliver one envelope. Returning false is a fatal sink error and
    /// stops the worker.
    fn process(&mut self, envelope: &Envelope) -> bool;

    /// Called once when the worker stops, for flushing and closing.
    fn last_action(&mut self) {}
}

/// Drains a publisher queue into its sink until shutdown or sink
/// failure. On shutdown the queue is flushed once, best effort.
pub fn spawn_worker(
    mut sink: Box<dyn PublisherSink>,
    receiver: Receiver<Arc<Envelope>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let name = sink.name().to_string();
    std::thread::Builder::new()
        .name(format!("pub-{name}"))
        .spawn(move || {
            info!("publisher {} started", name);
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    // drain what is already queued, then leave
                    while let Ok(envelope) = receiver.try_recv() {
                        if !sink.process(&envelope) {
                            break;
                        }
                    }
                    break;
                }
                match receiver.recv_timeout(Duration::from_millis(200)) {
                    Ok(envelope) => {
                        if !sink.process(&envelope) {
                            warn!("publisher {} sink error, stopping", name);
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            sink.last_action();
            info!("publisher {} stopped", name);
        })
        .expect("publisher thread spawn")
}

/// Drain a queue without blocking.
#[allow(dead_code)]
pub fn drain_pending(receiver: &Receiver<Arc<Envelope>>) -> Vec<Arc<Envelope>> {
    let mut out = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(envelope) => out.push(envelope),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    out
}
