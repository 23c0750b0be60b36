//! Concrete publisher sinks.

pub mod injector;
pub mod json_push;
pub mod tcp_stream;
pub mod trace_pub;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use crate::config::PublisherConfig;
use crate::envelope::Envelope;
use crate::publisher::PublisherSink;

/// Instantiate a publisher sink from configuration. `injections` maps
/// coupler names to their outbound queues, for injector publishers.
pub fn build_publisher(
    config: &PublisherConfig,
    trace_dir: &Path,
    injections: &HashMap<String, SyncSender<Envelope>>,
    shutdown: Arc<AtomicBool>,
) -> Result<Box<dyn PublisherSink>, String> {
    match config.class.as_str() {
        "tcp_server" => tcp_stream::TcpStreamPublisher::new(config, shutdown)
            .map(|p| Box::new(p) as Box<dyn PublisherSink>),
        "json_push" => Ok(Box::new(json_push::JsonPushPublisher::new(config))),
        "trace" => trace_pub::TracePublisher::new(config, trace_dir)
            .map(|p| Box::new(p) as Box<dyn PublisherSink>),
        "injector" => {
            let sender = injections
                .get(&config.target)
                .ok_or_else(|| format!("injector {}: unknown target {}", config.name, config.target))?
                .clone();
            Ok(Box::new(injector::InjectorPublisher::new(config, sender)))
        }
        other => Err(format!("unknown publisher class '{other}'")),
    }
}
