use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LogConfig,
    /// Directory receiving coupler and publisher trace files.
    #[serde(default = "default_trace_dir")]
    pub trace_dir: String,
    /// Path of the PGN dictionary. Decoding falls back to the typed
    /// records only when absent.
    #[serde(default)]
    pub nmea2000_xml: Option<String>,
    #[serde(default)]
    pub couplers: Vec<CouplerConfig>,
    #[serde(default)]
    pub publishers: Vec<PublisherConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// Local controller applications activated on the CAN coupler.
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
}

fn default_trace_dir() -> String {
    "/var/log/n2k_router".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "/var/log/n2k_router".to_string(),
            file_prefix: "n2k_router".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplerConfig {
    pub name: String,
    /// Driver class: serial, tcp, udp, socketcan, shipmodul, ikonvert,
    /// replay.
    pub class: String,
    /// Serial device path for serial couplers.
    #[serde(default)]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Remote host for TCP couplers, bind address for UDP.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    /// CAN interface name for socketcan couplers.
    #[serde(default = "default_can_interface")]
    pub interface: String,
    /// Trace file to replay for replay couplers.
    #[serde(default)]
    pub file: String,
    /// nmea0183, nmea2000, nmea_mix or transparent.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// bidirectional, read_only or write_only.
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_coupler_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_attempt")]
    pub max_attempt: u32,
    #[serde(default = "default_open_delay")]
    pub open_delay_seconds: f64,
    /// Shut the whole process down when this coupler fails for good.
    #[serde(default)]
    pub stop_system: bool,
    #[serde(default)]
    pub trace_raw: bool,
    #[serde(default)]
    pub trace_messages: bool,
}

fn default_baud() -> u32 {
    4800
}

fn default_can_interface() -> String {
    "can0".to_string()
}

fn default_protocol() -> String {
    "nmea0183".to_string()
}

fn default_direction() -> String {
    "bidirectional".to_string()
}

fn default_coupler_timeout() -> f64 {
    10.0
}

fn default_max_attempt() -> u32 {
    20
}

fn default_open_delay() -> f64 {
    2.0
}

impl CouplerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn open_delay(&self) -> Duration {
        Duration::from_secs_f64(self.open_delay_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub name: String,
    /// Driver class: tcp_server, json_push, trace, injector.
    pub class: String,
    /// Source couplers this publisher subscribes to.
    #[serde(default)]
    pub couplers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    /// When true only messages selected by a filter pass.
    #[serde(default)]
    pub filter_select: bool,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_max_lost")]
    pub max_lost: u32,
    /// Listen port for tcp_server, peer port for json_push.
    #[serde(default)]
    pub port: u16,
    /// Peer host for json_push.
    #[serde(default)]
    pub address: String,
    /// Serialization for tcp_server: transparent, dyfmt or stfmt.
    #[serde(default = "default_format")]
    pub format: String,
    /// Clients silent beyond this are disconnected.
    #[serde(default = "default_max_silent")]
    pub max_silent_seconds: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    /// Trace publisher: also write to a file in trace_dir.
    #[serde(default)]
    pub to_file: bool,
    /// Injector target coupler.
    #[serde(default)]
    pub target: String,
}

fn default_queue_size() -> usize {
    20
}

fn default_max_lost() -> u32 {
    5
}

fn default_format() -> String {
    "dyfmt".to_string()
}

fn default_max_silent() -> u64 {
    60
}

fn default_retry_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterConfig {
    pub name: String,
    /// nmea0183, nmea2000 or nmea2000_time.
    #[serde(default)]
    pub kind: String,
    /// select or discard.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub talkers: Vec<String>,
    #[serde(default)]
    pub formatters: Vec<String>,
    #[serde(default)]
    pub sources: Vec<u8>,
    #[serde(default)]
    pub pgns: Vec<u32>,
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
    #[serde(default)]
    pub period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_preferred_address")]
    pub preferred_address: u8,
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,
    #[serde(default)]
    pub identity_number: u32,
    #[serde(default = "default_function")]
    pub function: u8,
    #[serde(default = "default_first_address")]
    pub first_address: u8,
    #[serde(default = "default_max_applications")]
    pub max_applications: u8,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,
    #[serde(default)]
    pub model_id: String,
}

fn default_preferred_address() -> u8 {
    128
}

fn default_manufacturer_id() -> u16 {
    999
}

fn default_function() -> u8 {
    130
}

fn default_first_address() -> u8 {
    128
}

fn default_max_applications() -> u8 {
    8
}

fn default_heartbeat() -> u64 {
    60
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross reference checks that must hold before startup.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        for publisher in &self.publishers {
            if publisher.class != "injector" && publisher.couplers.is_empty() {
                return Err(format!("publisher {} has no couplers", publisher.name).into());
            }
            for coupler in &publisher.couplers {
                if !self.couplers.iter().any(|c| &c.name == coupler) {
                    return Err(format!(
                        "publisher {} references unknown coupler {}",
                        publisher.name, coupler
                    )
                    .into());
                }
            }
            for filter in &publisher.filters {
                if !self.filters.iter().any(|f| &f.name == filter) {
                    return Err(format!(
                        "publisher {} references unknown filter {}",
                        publisher.name, filter
                    )
                    .into());
                }
            }
            if publisher.class == "injector"
                && !self.couplers.iter().any(|c| c.name == publisher.target)
            {
                return Err(format!(
                    "injector {} references unknown target {}",
                    publisher.name, publisher.target
                )
                .into());
            }
        }
        // two local applications contesting each other is a configuration
        // error, not something the claim machine should arbitrate
        for (i, a) in self.applications.iter().enumerate() {
            for b in &self.applications[i + 1..] {
                if a.preferred_address == b.preferred_address {
                    return Err(format!(
                        "two applications share preferred address {}",
                        a.preferred_address
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Config {
            logging: LogConfig::default(),
            trace_dir: default_trace_dir(),
            nmea2000_xml: None,
            couplers: Vec::new(),
            publishers: Vec::new(),
            filters: Vec::new(),
            applications: Vec::new(),
        }
    }
}
