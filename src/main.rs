use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

mod config;
mod coupler;
mod couplers;
mod envelope;
mod filters;
mod nmea0183;
mod pseudo0183;
mod publisher;
mod publishers;
mod router;
mod stats;
mod trace;

use config::Config;
use filters::{Filter, FilterSet};
use nmea2k::iso_messages::ProductInformation;
use nmea2k::{AddressPool, ControllerApplication, Dictionary, IsoName};
use router::{Router, SupervisorOptions};
use stats::{CouplerStats, StatsReporter};

// ========== Logging Setup ==========

fn init_logging(log_config: &config::LogConfig) -> Result<(), Box<dyn Error>> {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    std::fs::create_dir_all(&log_config.directory)?;

    let file_appender = rolling::daily(&log_config.directory, &log_config.file_prefix);

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
            fmt::time::OffsetTime::new(
                time::UtcOffset::UTC,
                time::format_description::well_known::Rfc3339,
            )
        }));

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| {
            fmt::time::OffsetTime::new(
                time::UtcOffset::UTC,
                time::format_description::well_known::Rfc3339,
            )
        }));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

// ========== Local Controller Applications ==========

fn build_applications(config: &Config) -> Vec<ControllerApplication> {
    config
        .applications
        .iter()
        .map(|app| {
            let name = IsoName::builder()
                .identity_number(app.identity_number)
                .manufacturer_code(app.manufacturer_id)
                .function(app.function)
                .vehicle_system(25)
                .industry_group(nmea2k::name::INDUSTRY_GROUP_MARINE)
                .arbitrary_address_capable(true)
                .build();
            let pool = AddressPool::new(app.first_address, app.max_applications);
            let mut product = ProductInformation {
                nmea2000_version: 2100,
                product_code: 1226,
                certification_level: 1,
                load_equivalency: 1,
                ..Default::default()
            };
            let model_id = if app.model_id.is_empty() {
                "NMEA MESSAGE ROUTER"
            } else {
                &app.model_id
            };
            product.set_product_information(
                model_id,
                concat!("Version ", env!("CARGO_PKG_VERSION")),
                "ROUTER",
                "00001",
            );
            ControllerApplication::new(name, app.preferred_address, pool)
                .with_heartbeat_interval(Duration::from_secs(app.heartbeat_seconds))
                .with_product_information(product)
        })
        .collect()
}

fn build_filter_set(names: &[String], config: &Config) -> FilterSet {
    let filters = names
        .iter()
        .filter_map(|name| {
            let filter_config = config.filters.iter().find(|f| &f.name == name)?;
            Filter::from_config(filter_config)
        })
        .collect();
    FilterSet::new(filters)
}

// ========== Main Application ==========

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        println!("NMEA2000/NMEA0183 message router");
        println!();
        println!("USAGE:");
        println!("    n2k_router [OPTIONS]");
        println!();
        println!("OPTIONS:");
        println!("    --validate-config, --validate, -v    Validate configuration and exit");
        println!("    --help, -h                           Show this help message");
        println!();
        println!("Configuration file:");
        println!("  Checked in order: /etc/n2k_router/config.json, ./config.json");
        std::process::exit(0);
    }

    let validate_only = args.contains(&"--validate-config".to_string())
        || args.contains(&"--validate".to_string())
        || args.contains(&"-v".to_string());

    let config_path = if Path::new("/etc/n2k_router/config.json").exists() {
        "/etc/n2k_router/config.json"
    } else {
        "config.json"
    };

    let config = match Config::from_file(config_path) {
        Ok(cfg) => {
            if validate_only {
                println!("✓ Configuration validation successful");
                println!("  Couplers: {}", cfg.couplers.len());
                println!("  Publishers: {}", cfg.publishers.len());
                println!("  Filters: {}", cfg.filters.len());
                println!("  Applications: {}", cfg.applications.len());
                std::process::exit(0);
            }
            cfg
        }
        Err(e) => {
            if validate_only {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            eprintln!("Warning: could not load {}: {}", config_path, e);
            eprintln!("Using default configuration");
            Config::default_config()
        }
    };

    init_logging(&config.logging)?;
    info!("NMEA router starting, configuration from {}", config_path);

    // the dictionary is fatal at startup only; once running, unknown
    // PGNs are simply forwarded raw
    let dictionary = Arc::new(match &config.nmea2000_xml {
        Some(path) => match Dictionary::load(path) {
            Ok(dict) => dict,
            Err(e) => {
                error!("cannot load PGN dictionary {}: {}", path, e);
                return Err(e.into());
            }
        },
        None => {
            warn!("no PGN dictionary configured, native decoders only");
            Dictionary::empty()
        }
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })?;
    }

    let router = Router::new().shared();
    let mut reporter = StatsReporter::new(Duration::from_secs(60));

    // couplers first: publishers and injectors reference their queues;
    // the socketcan coupler takes the local applications on the way
    let mut applications = build_applications(&config);
    let mut coupler_handles = Vec::new();
    let mut injections = HashMap::new();
    for coupler_config in &config.couplers {
        let stats = CouplerStats::new();
        reporter.register(&coupler_config.name, stats.clone());
        let coupler = match couplers::build_coupler(
            coupler_config,
            dictionary.clone(),
            stats,
            &mut applications,
        ) {
            Ok(coupler) => coupler,
            Err(e) => {
                error!("coupler {}: {}", coupler_config.name, e);
                continue;
            }
        };
        let tracer = if coupler_config.trace_messages || coupler_config.trace_raw {
            match trace::TraceWriter::create(Path::new(&config.trace_dir), &coupler_config.name) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!("coupler {}: tracing disabled: {}", coupler_config.name, e);
                    None
                }
            }
        } else {
            None
        };
        let handle = router::spawn_coupler(
            coupler,
            router.clone(),
            SupervisorOptions {
                max_attempt: coupler_config.max_attempt,
                open_delay: coupler_config.open_delay(),
                stop_system: coupler_config.stop_system,
                trace_messages: coupler_config.trace_messages,
                trace_raw: coupler_config.trace_raw,
            },
            shutdown.clone(),
            tracer,
        );
        injections.insert(handle.name.clone(), handle.injection.clone());
        coupler_handles.push(handle);
    }
    if !applications.is_empty() {
        warn!(
            "{} local applications configured but no socketcan coupler to host them",
            applications.len()
        );
    }

    let mut publisher_handles = Vec::new();
    for publisher_config in &config.publishers {
        let sink = match publishers::build_publisher(
            publisher_config,
            Path::new(&config.trace_dir),
            &injections,
            shutdown.clone(),
        ) {
            Ok(sink) => sink,
            Err(e) => {
                error!("{}", e);
                continue;
            }
        };
        let filter_set = build_filter_set(&publisher_config.filters, &config);
        let receiver = router.lock().unwrap().register_publisher(
            &publisher_config.name,
            publisher_config.queue_size,
            publisher_config.max_lost,
            filter_set,
            publisher_config.filter_select,
            &publisher_config.couplers,
        );
        publisher_handles.push(publisher::spawn_worker(sink, receiver, shutdown.clone()));
    }

    info!(
        "router running: {} couplers, {} publishers",
        coupler_handles.len(),
        publisher_handles.len()
    );

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(500));
        if reporter.check_and_log(Instant::now()) {
            for handle in &coupler_handles {
                if let Ok(state) = handle.state.lock() {
                    info!("coupler {}: state {:?}", handle.name, *state);
                }
            }
        }
    }

    info!("shutdown requested, stopping workers");
    for handle in coupler_handles {
        if handle.worker.join().is_err() {
            warn!("coupler {} worker panicked", handle.name);
        }
    }
    for handle in publisher_handles {
        let _ = handle.join();
    }
    info!("router stopped");
    Ok(())
}
