//! View of the devices present on the bus, built from observed address
//! claims and data traffic.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::iso_messages::{
    AddressClaim, ConfigurationInformation, Heartbeat, ProductInformation, PGN_ADDRESS_CLAIM,
    PGN_CONFIGURATION_INFORMATION, PGN_HEARTBEAT, PGN_PRODUCT_INFORMATION,
};
use crate::message::Nmea2000Msg;
use crate::name::IsoName;

/// Devices silent for longer than this are dropped from the table.
pub const DEFAULT_MAX_SILENT: Duration = Duration::from_secs(60);

/// Table change notifications delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(u8),
    Changed(u8),
    Expired(u8),
}

/// One device observed on the bus, keyed by its source address.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub address: u8,
    pub iso_name: Option<IsoName>,
    pub product_information: Option<ProductInformation>,
    pub configuration_information: Option<ConfigurationInformation>,
    pub heartbeat: Option<Heartbeat>,
    pub last_seen: Instant,
    /// PGN -> number of messages seen from this device.
    pub pgn_counts: HashMap<u32, u64>,
}

impl DeviceRecord {
    fn new(address: u8, now: Instant) -> Self {
        Self {
            address,
            iso_name: None,
            product_information: None,
            configuration_information: None,
            heartbeat: None,
            last_seen: now,
            pgn_counts: HashMap::new(),
        }
    }

    pub fn manufacturer_code(&self) -> Option<u16> {
        self.iso_name.map(|n| n.manufacturer_code())
    }
}

/// The device table. Single writer: the CAN coupler thread feeds it,
/// everyone else reads snapshots or subscribes to events.
pub struct DeviceTable {
    devices: HashMap<u8, DeviceRecord>,
    max_silent: Duration,
    listeners: Vec<Sender<DeviceEvent>>,
}

impl DeviceTable {
    pub fn new(max_silent: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            max_silent,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Sender<DeviceEvent>) {
        self.listeners.push(listener);
    }

    fn notify(&mut self, event: DeviceEvent) {
        self.listeners.retain(|l| l.send(event).is_ok());
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: u8) -> Option<&DeviceRecord> {
        self.devices.get(&address)
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.devices.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Record a message observed on the bus. Creates or refreshes the
    /// entry for its source address; a new NAME at a known address
    /// resets the record (the previous device left the bus).
    pub fn observe(&mut self, msg: &Nmea2000Msg, now: Instant) {
        // 254 (cannot claim) and 255 never identify a device
        if msg.sa >= 254 {
            return;
        }
        let mut event = None;
        let record = self.devices.entry(msg.sa).or_insert_with(|| {
            info!("device table: new device at address {}", msg.sa);
            event = Some(DeviceEvent::Added(msg.sa));
            DeviceRecord::new(msg.sa, now)
        });
        record.last_seen = now;
        *record.pgn_counts.entry(msg.pgn).or_insert(0) += 1;

        match msg.pgn {
            PGN_ADDRESS_CLAIM => {
                if let Ok(claim) = AddressClaim::decode(msg) {
                    match record.iso_name {
                        Some(previous) if previous != claim.name => {
                            warn!(
                                "device table: address {} claimed by a new NAME, resetting entry",
                                msg.sa
                            );
                            let mut fresh = DeviceRecord::new(msg.sa, now);
                            fresh.iso_name = Some(claim.name);
                            fresh.pgn_counts.insert(msg.pgn, 1);
                            *record = fresh;
                            event = event.or(Some(DeviceEvent::Changed(msg.sa)));
                        }
                        Some(_) => {}
                        None => {
                            debug!(
                                "device table: address {} name {:016X}",
                                msg.sa, claim.name.0
                            );
                            record.iso_name = Some(claim.name);
                            event = event.or(Some(DeviceEvent::Changed(msg.sa)));
                        }
                    }
                }
            }
            PGN_PRODUCT_INFORMATION => {
                if let Ok(info) = ProductInformation::decode(msg) {
                    if record.product_information.as_ref() != Some(&info) {
                        record.product_information = Some(info);
                        event = event.or(Some(DeviceEvent::Changed(msg.sa)));
                    }
                }
            }
            PGN_CONFIGURATION_INFORMATION => {
                if let Ok(info) = ConfigurationInformation::decode(msg) {
                    record.configuration_information = Some(info);
                }
            }
            PGN_HEARTBEAT => {
                if let Ok(hb) = Heartbeat::decode(msg) {
                    record.heartbeat = Some(hb);
                }
            }
            _ => {}
        }
        if let Some(event) = event {
            self.notify(event);
        }
    }

    /// Drop devices not heard from within `max_silent`. Returns the
    /// addresses removed by this pass.
    pub fn expire(&mut self, now: Instant) -> Vec<u8> {
        let max_silent = self.max_silent;
        let expired: Vec<u8> = self
            .devices
            .iter()
            .filter(|(_, d)| now.duration_since(d.last_seen) > max_silent)
            .map(|(a, _)| *a)
            .collect();
        for address in &expired {
            info!("device table: address {} silent, removing", address);
            self.devices.remove(address);
            self.notify(DeviceEvent::Expired(*address));
        }
        expired
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SILENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::INDUSTRY_GROUP_MARINE;
    use std::sync::mpsc::channel;

    fn name(id: u32) -> IsoName {
        IsoName::builder()
            .identity_number(id)
            .manufacturer_code(999)
            .industry_group(INDUSTRY_GROUP_MARINE)
            .build()
    }

    fn data_msg(sa: u8) -> Nmea2000Msg {
        Nmea2000Msg::new(129025, 2, sa, 255, vec![0; 8])
    }

    #[test]
    fn test_entry_created_on_data_message() {
        let mut table = DeviceTable::default();
        let now = Instant::now();
        table.observe(&data_msg(0x42), now);
        assert_eq!(table.len(), 1);
        let record = table.get(0x42).unwrap();
        assert_eq!(record.pgn_counts.get(&129025), Some(&1));
        assert!(record.iso_name.is_none());
    }

    #[test]
    fn test_claim_records_name() {
        let mut table = DeviceTable::default();
        let now = Instant::now();
        table.observe(&AddressClaim::new(name(1)).message(0x42), now);
        assert_eq!(table.get(0x42).unwrap().iso_name, Some(name(1)));
    }

    #[test]
    fn test_new_name_resets_entry() {
        let mut table = DeviceTable::default();
        let now = Instant::now();
        table.observe(&AddressClaim::new(name(1)).message(0x42), now);
        table.observe(&data_msg(0x42), now);
        assert_eq!(table.get(0x42).unwrap().pgn_counts.len(), 2);
        // a different device claims the same address
        table.observe(&AddressClaim::new(name(2)).message(0x42), now);
        let record = table.get(0x42).unwrap();
        assert_eq!(record.iso_name, Some(name(2)));
        assert_eq!(record.pgn_counts.len(), 1);
    }

    #[test]
    fn test_null_and_global_sources_ignored() {
        let mut table = DeviceTable::default();
        let now = Instant::now();
        table.observe(&data_msg(254), now);
        table.observe(&data_msg(255), now);
        assert!(table.is_empty());
    }

    #[test]
    fn test_expiry() {
        let mut table = DeviceTable::new(Duration::from_secs(60));
        let start = Instant::now();
        table.observe(&data_msg(0x42), start);
        table.observe(&data_msg(0x43), start + Duration::from_secs(30));
        let expired = table.expire(start + Duration::from_secs(65));
        assert_eq!(expired, vec![0x42]);
        assert!(table.get(0x42).is_none());
        assert!(table.get(0x43).is_some());
    }

    #[test]
    fn test_events() {
        let mut table = DeviceTable::new(Duration::from_secs(60));
        let (tx, rx) = channel();
        table.subscribe(tx);
        let start = Instant::now();
        table.observe(&data_msg(0x42), start);
        assert_eq!(rx.try_recv(), Ok(DeviceEvent::Added(0x42)));
        table.observe(&AddressClaim::new(name(1)).message(0x42), start);
        assert_eq!(rx.try_recv(), Ok(DeviceEvent::Changed(0x42)));
        table.expire(start + Duration::from_secs(120));
        assert_eq!(rx.try_recv(), Ok(DeviceEvent::Expired(0x42)));
    }
}
