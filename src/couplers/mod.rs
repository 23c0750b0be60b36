//! Concrete coupler drivers.

pub mod can;
pub mod replay;
pub mod serial;
pub mod tcp;
pub mod udp;
pub mod ydn2k;

use std::sync::Arc;

use nmea2k::{ControllerApplication, Dictionary};

use crate::config::CouplerConfig;
use crate::coupler::{Coupler, CouplerError, WireCodec};
use crate::stats::CouplerStats;

/// Instantiate a coupler driver from its configuration entry. The
/// class names are the stable external surface of the configuration.
///
/// `applications` holds the local controller applications; the first
/// socketcan coupler takes ownership of them, since the CAs live on
/// the bus that coupler drives.
pub fn build_coupler(
    config: &CouplerConfig,
    dictionary: Arc<Dictionary>,
    stats: Arc<CouplerStats>,
    applications: &mut Vec<ControllerApplication>,
) -> Result<Box<dyn Coupler>, CouplerError> {
    match config.class.as_str() {
        "serial" => Ok(Box::new(serial::SerialCoupler::new(config, dictionary, stats))),
        "tcp" => Ok(Box::new(tcp::TcpClientCoupler::new(
            config,
            dictionary,
            stats,
            WireCodec::Plain0183,
        ))),
        // adapter specific byte protocols are the TCP driver with the
        // matching wire codec
        "ikonvert" => Ok(Box::new(tcp::TcpClientCoupler::new(
            config,
            dictionary,
            stats,
            WireCodec::Pdgy,
        ))),
        "shipmodul" => Ok(Box::new(tcp::TcpClientCoupler::new(
            config,
            dictionary,
            stats,
            WireCodec::Mxpgn,
        ))),
        "ydn2k" => Ok(Box::new(ydn2k::Ydn2kCoupler::new(config, dictionary, stats))),
        "udp" => Ok(Box::new(udp::UdpCoupler::new(config, dictionary, stats))),
        "socketcan" => Ok(Box::new(
            can::SocketCanCoupler::new(config, dictionary, stats)
                .with_applications(std::mem::take(applications)),
        )),
        "replay" => Ok(Box::new(replay::ReplayCoupler::new(config, dictionary, stats))),
        other => Err(CouplerError::Open(format!("unknown coupler class '{other}'"))),
    }
}
