//! The routing fabric: couplers push envelopes through the filter
//! chain onto per-publisher bounded queues, and a supervisor drives
//! every coupler through its lifecycle with reconnection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::coupler::{Coupler, CouplerState};
use crate::envelope::Envelope;
use crate::filters::FilterSet;
use crate::trace::{TraceDirection, TraceWriter};

/// One registered publisher as the router sees it: its queue, filters
/// and overflow accounting.
struct PublisherEntry {
    name: String,
    sender: SyncSender<Arc<Envelope>>,
    filters: FilterSet,
    filter_select: bool,
    consecutive_lost: u32,
    total_lost: u64,
    max_lost: u32,
    stopped: bool,
}

/// Coupler to publisher fan-out. One instance is shared by every
/// coupler worker; dispatch only does filter checks and non-blocking
/// queue pushes.
#[derive(Default)]
pub struct Router {
    publishers: Vec<PublisherEntry>,
    /// coupler name -> indexes of subscribed publishers
    routes: HashMap<String, Vec<usize>>,
}

pub type SharedRouter = Arc<Mutex<Router>>;

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn shared(self) -> SharedRouter {
        Arc::new(Mutex::new(self))
    }

    /// Register a publisher and build the inverted coupler map. The
    /// returned receiver is handed to the publisher worker.
    pub fn register_publisher(
        &mut self,
        name: &str,
        queue_size: usize,
        max_lost: u32,
        filters: FilterSet,
        filter_select: bool,
        sources: &[String],
    ) -> Receiver<Arc<Envelope>> {
        let (sender, receiver) = sync_channel(queue_size);
        let index = self.publishers.len();
        self.publishers.push(PublisherEntry {
            name: name.to_string(),
            sender,
            filters,
            filter_select,
            consecutive_lost: 0,
            total_lost: 0,
            max_lost,
            stopped: false,
        });
        for source in sources {
            self.routes.entry(source.clone()).or_default().push(index);
        }
        info!("router: publisher {} subscribed to {:?}", name, sources);
        receiver
    }

    /// Push one envelope from a coupler to every subscribed publisher.
    /// Never blocks: full queues drop and count.
    pub fn dispatch(&mut self, coupler: &str, envelope: Envelope) {
        let Some(indexes) = self.routes.get(coupler).cloned() else {
            return;
        };
        let envelope = Arc::new(envelope);
        let now = Instant::now();
        for index in indexes {
            let entry = &mut self.publishers[index];
            if entry.stopped {
                continue;
            }
            if entry.filters.discards(&envelope, entry.filter_select, now) {
                continue;
            }
            match entry.sender.try_send(envelope.clone()) {
                Ok(()) => {
                    entry.consecutive_lost = 0;
                }
                Err(TrySendError::Full(_)) => {
                    entry.consecutive_lost += 1;
                    entry.total_lost += 1;
                    warn!(
                        "router: publisher {} queue full, {} lost",
                        entry.name, entry.total_lost
                    );
                    if entry.consecutive_lost >= entry.max_lost {
                        error!(
                            "router: publisher {} lost {} consecutive messages, stopping it",
                            entry.name, entry.consecutive_lost
                        );
                        entry.stopped = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("router: publisher {} gone", entry.name);
                    entry.stopped = true;
                }
            }
        }
    }

    /// Console surface: whether a publisher was stopped for overflow.
    #[allow(dead_code)]
    pub fn publisher_stopped(&self, name: &str) -> bool {
        self.publishers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.stopped)
            .unwrap_or(true)
    }

    #[allow(dead_code)]
    pub fn lost_count(&self, name: &str) -> u64 {
        self.publishers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.total_lost)
            .unwrap_or(0)
    }
}

/// Options driving a coupler supervisor.
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    pub max_attempt: u32,
    pub open_delay: Duration,
    /// Failing for good shuts the whole process down.
    pub stop_system: bool,
    /// Trace the canonical envelopes crossing this coupler.
    pub trace_messages: bool,
    /// Trace the raw wire form where one exists (text protocols).
    pub trace_raw: bool,
}

/// Handle on a running coupler worker: lifecycle state for the
/// console, an injection queue for outbound traffic, and the join
/// handle for shutdown.
pub struct CouplerHandle {
    pub name: String,
    pub state: Arc<Mutex<CouplerState>>,
    pub injection: SyncSender<Envelope>,
    pub worker: JoinHandle<()>,
}

/// Minimum interval between two housekeeping ticks of a coupler.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Run a coupler through `NotReady -> Opening -> Connected -> Active`
/// with retries, dispatching everything it produces and writing
/// everything injected for it.
pub fn spawn_coupler(
    mut coupler: Box<dyn Coupler>,
    router: SharedRouter,
    options: SupervisorOptions,
    shutdown: Arc<AtomicBool>,
    tracer: Option<TraceWriter>,
) -> CouplerHandle {
    let name = coupler.name().to_string();
    let state = Arc::new(Mutex::new(CouplerState::NotReady));
    let (injection_tx, injection_rx) = sync_channel::<Envelope>(32);

    let thread_name = name.clone();
    let thread_state = state.clone();
    let worker = std::thread::Builder::new()
        .name(format!("coupler-{name}"))
        .spawn(move || {
            supervise(
                coupler.as_mut(),
                &thread_name,
                router,
                options,
                shutdown,
                thread_state,
                injection_rx,
                tracer,
            );
            coupler.close();
        })
        .expect("coupler thread spawn");

    CouplerHandle {
        name,
        state,
        injection: injection_tx,
        worker,
    }
}

fn set_state(slot: &Arc<Mutex<CouplerState>>, value: CouplerState) {
    if let Ok(mut state) = slot.lock() {
        *state = value;
    }
}

fn trace_envelope(
    tracer: &mut Option<TraceWriter>,
    options: &SupervisorOptions,
    direction: TraceDirection,
    envelope: &Envelope,
) {
    let Some(writer) = tracer.as_mut() else {
        return;
    };
    if options.trace_raw {
        match envelope {
            Envelope::Sentence0183(sentence) => {
                writer.trace_raw(direction, &sentence.to_string());
            }
            Envelope::Passthrough { data, .. } => {
                writer.trace_raw(direction, &String::from_utf8_lossy(data));
            }
            _ => {}
        }
    }
    if options.trace_messages {
        writer.trace_message(direction, &envelope.to_string());
    }
}

#[allow(clippy::too_many_arguments)]
fn supervise(
    coupler: &mut dyn Coupler,
    name: &str,
    router: SharedRouter,
    options: SupervisorOptions,
    shutdown: Arc<AtomicBool>,
    state: Arc<Mutex<CouplerState>>,
    injection: Receiver<Envelope>,
    mut tracer: Option<TraceWriter>,
) {
    let mut attempts = 0u32;
    let mut last_tick = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        set_state(&state, CouplerState::Opening);
        match coupler.open() {
            Ok(()) => {
                attempts = 0;
                set_state(&state, CouplerState::Open);
            }
            Err(e) => {
                attempts += 1;
                warn!(
                    "coupler {}: open attempt {}/{} failed: {}",
                    name, attempts, options.max_attempt, e
                );
                if attempts >= options.max_attempt {
                    error!("coupler {}: giving up after {} attempts", name, attempts);
                    set_state(&state, CouplerState::Failed);
                    if options.stop_system {
                        warn!("coupler {}: stop_system set, shutting the process down", name);
                        shutdown.store(true, Ordering::Relaxed);
                    }
                    return;
                }
                std::thread::sleep(options.open_delay);
                continue;
            }
        }

        // connected: pump until an error sends us back to open
        'connected: while !shutdown.load(Ordering::Relaxed) {
            // outbound traffic first, it is latency sensitive
            while let Ok(envelope) = injection.try_recv() {
                trace_envelope(&mut tracer, &options, TraceDirection::Out, &envelope);
                if let Err(e) = coupler.send(&envelope) {
                    warn!("coupler {}: send failed: {}", name, e);
                }
            }
            if !coupler.direction().readable() {
                // write only couplers just pump the injection queue
                set_state(&state, CouplerState::Connected);
                std::thread::sleep(TICK_INTERVAL);
            } else {
                match coupler.poll() {
                    Ok(envelopes) => {
                        set_state(
                            &state,
                            if envelopes.is_empty() {
                                CouplerState::Connected
                            } else {
                                CouplerState::Active
                            },
                        );
                        if !envelopes.is_empty() {
                            if let Ok(mut router) = router.lock() {
                                for envelope in envelopes {
                                    trace_envelope(
                                        &mut tracer,
                                        &options,
                                        TraceDirection::In,
                                        &envelope,
                                    );
                                    router.dispatch(name, envelope);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("coupler {}: read failed: {}, reopening", name, e);
                        break 'connected;
                    }
                }
            }
            if last_tick.elapsed() >= TICK_INTERVAL {
                last_tick = Instant::now();
                let produced = coupler.tick();
                if !produced.is_empty() {
                    if let Ok(mut router) = router.lock() {
                        for envelope in produced {
                            router.dispatch(name, envelope);
                        }
                    }
                }
            }
        }
        if !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(options.open_delay);
        }
    }
    if let Some(writer) = tracer.as_mut() {
        writer.flush();
    }
    set_state(&state, CouplerState::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::drain_pending;
    use nmea2k::Nmea2000Msg;

    fn envelope(pgn: u32) -> Envelope {
        Envelope::Raw2000(Nmea2000Msg::new(pgn, 2, 3, 255, vec![0; 8]))
    }

    #[test]
    fn test_dispatch_reaches_subscribed_publisher() {
        let mut router = Router::new();
        let rx = router.register_publisher(
            "clients",
            20,
            5,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        router.dispatch("can0", envelope(129025));
        router.dispatch("other", envelope(129026));
        let got = drain_pending(&rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].n2k().unwrap().pgn, 129025);
    }

    #[test]
    fn test_overflow_stops_publisher() {
        let mut router = Router::new();
        // queue of 5, stopped after 3 consecutive losses
        let rx = router.register_publisher(
            "slow",
            5,
            3,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        // worker blocked: 8 dispatches fill 5 slots and lose 3
        for i in 0..8 {
            router.dispatch("can0", envelope(129025 + i));
        }
        assert!(router.publisher_stopped("slow"));
        assert_eq!(router.lost_count("slow"), 3);
        // message 9 is not enqueued
        router.dispatch("can0", envelope(130000));
        assert_eq!(drain_pending(&rx).len(), 5);
    }

    #[test]
    fn test_lost_counter_resets_on_success() {
        let mut router = Router::new();
        let rx = router.register_publisher(
            "jittery",
            1,
            3,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        for _ in 0..5 {
            router.dispatch("can0", envelope(129025)); // fills the queue
            router.dispatch("can0", envelope(129025)); // lost, counter 1
            drain_pending(&rx); // consumer catches up
        }
        // never 3 consecutive losses
        assert!(!router.publisher_stopped("jittery"));
        assert_eq!(router.lost_count("jittery"), 5);
    }

    #[test]
    fn test_fanout_is_independent() {
        let mut router = Router::new();
        let rx_a = router.register_publisher(
            "a",
            1,
            1,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        let rx_b = router.register_publisher(
            "b",
            20,
            5,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        for _ in 0..4 {
            router.dispatch("can0", envelope(129025));
        }
        // a overflowed and stopped, b got everything
        assert!(router.publisher_stopped("a"));
        assert!(!router.publisher_stopped("b"));
        assert_eq!(drain_pending(&rx_a).len(), 1);
        assert_eq!(drain_pending(&rx_b).len(), 4);
    }

    #[test]
    fn test_ordering_per_publisher() {
        let mut router = Router::new();
        let rx = router.register_publisher(
            "ordered",
            50,
            5,
            FilterSet::default(),
            false,
            &["can0".to_string()],
        );
        for i in 0..20 {
            router.dispatch("can0", envelope(129000 + i));
        }
        let got = drain_pending(&rx);
        let pgns: Vec<u32> = got.iter().map(|e| e.n2k().unwrap().pgn).collect();
        assert_eq!(pgns, (129000..129020).collect::<Vec<u32>>());
    }

    #[test]
    fn test_filters_run_before_enqueue() {
        use crate::config::FilterConfig;
        use crate::filters::Filter;
        let config = FilterConfig {
            name: "drop-position".to_string(),
            kind: "nmea2000".to_string(),
            action: "discard".to_string(),
            pgns: vec![129025],
            ..Default::default()
        };
        let filters = FilterSet::new(vec![Filter::from_config(&config).unwrap()]);
        let mut router = Router::new();
        let rx =
            router.register_publisher("filtered", 20, 5, filters, false, &["can0".to_string()]);
        router.dispatch("can0", envelope(129025));
        router.dispatch("can0", envelope(129026));
        let got = drain_pending(&rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].n2k().unwrap().pgn, 129026);
    }
}
