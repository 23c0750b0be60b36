//! J1939 network management for a local controller application: address
//! claim, contention resolution, and the request/response traffic a
//! claimed device must serve.
//!
//! The state machine is driven by `(message, now)` pairs and a periodic
//! tick; every transition returns the messages to transmit so the CAN
//! coupler stays the only component touching the bus.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::identifier::{ADDRESS_GLOBAL, ADDRESS_NULL};
use crate::iso_messages::{
    AddressClaim, CommandedAddress, ConfigurationInformation, GroupFunction, Heartbeat,
    IsoRequest, PgnList, ProductInformation, PGN_ADDRESS_CLAIM, PGN_COMMANDED_ADDRESS,
    PGN_CONFIGURATION_INFORMATION, PGN_GROUP_FUNCTION, PGN_ISO_REQUEST, PGN_PGN_LIST,
    PGN_PRODUCT_INFORMATION,
};
use crate::message::Nmea2000Msg;
use crate::name::IsoName;

/// Contention listening window after sending a claim.
pub const CLAIM_WAIT: Duration = Duration::from_millis(250);
/// Default heartbeat period once claimed.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle of a controller application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaState {
    Inactive,
    /// Claim sent, waiting out the contention window.
    Claiming,
    Claimed,
    /// A conflicting claim is being arbitrated.
    Contesting,
    /// No address could be obtained; the application is offline.
    Unusable,
}

/// Reserved address range the ECU draws from when the preferred address
/// is lost.
#[derive(Debug, Clone)]
pub struct AddressPool {
    start: u8,
    size: u8,
    next_index: u8,
}

impl AddressPool {
    /// Pool of `2 * max_applications` addresses starting at `start`.
    pub fn new(start: u8, max_applications: u8) -> Self {
        Self {
            start,
            size: max_applications.saturating_mul(2),
            next_index: 0,
        }
    }

    /// Next pool address not present in `in_use`, if any remains.
    pub fn next_free(&mut self, in_use: &HashSet<u8>) -> Option<u8> {
        while self.next_index < self.size {
            let address = self.start.checked_add(self.next_index)?;
            self.next_index += 1;
            if !in_use.contains(&address) {
                return Some(address);
            }
        }
        None
    }
}

/// One local controller application (J1939 CA) on the ECU.
pub struct ControllerApplication {
    name: IsoName,
    address: u8,
    state: CaState,
    pool: AddressPool,
    claim_deadline: Option<Instant>,
    heartbeat_interval: Duration,
    next_heartbeat: Option<Instant>,
    sequence: u8,
    product_information: ProductInformation,
    configuration_information: ConfigurationInformation,
    produced_pgns: Vec<u32>,
    /// Addresses seen claimed by other devices, excluded from the pool.
    observed: HashSet<u8>,
}

impl ControllerApplication {
    pub fn new(name: IsoName, preferred_address: u8, pool: AddressPool) -> Self {
        Self {
            name,
            address: preferred_address,
            state: CaState::Inactive,
            pool,
            claim_deadline: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            next_heartbeat: None,
            sequence: 0,
            product_information: ProductInformation::default(),
            configuration_information: ConfigurationInformation::default(),
            produced_pgns: Vec::new(),
            observed: HashSet::new(),
        }
    }

    pub fn with_product_information(mut self, info: ProductInformation) -> Self {
        self.product_information = info;
        self
    }

    pub fn with_configuration_information(mut self, info: ConfigurationInformation) -> Self {
        self.configuration_information = info;
        self
    }

    pub fn with_produced_pgns(mut self, pgns: Vec<u32>) -> Self {
        self.produced_pgns = pgns;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn state(&self) -> CaState {
        self.state
    }

    /// The claimed address; meaningless before the state is `Claimed`.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn name(&self) -> IsoName {
        self.name
    }

    pub fn is_claimed(&self) -> bool {
        self.state == CaState::Claimed
    }

    /// Send the initial claim for the preferred address.
    pub fn start(&mut self, now: Instant) -> Vec<Nmea2000Msg> {
        info!(
            "CA {:016X}: claiming address {}",
            self.name.0, self.address
        );
        self.state = CaState::Claiming;
        self.claim_deadline = Some(now + CLAIM_WAIT);
        vec![self.claim_message()]
    }

    fn claim_message(&self) -> Nmea2000Msg {
        AddressClaim::new(self.name).message(self.address)
    }

    fn cannot_claim_message(&self) -> Nmea2000Msg {
        AddressClaim::new(self.name).message(ADDRESS_NULL)
    }

    /// Timer driven transitions: end of the contention window and
    /// heartbeat emission.
    pub fn tick(&mut self, now: Instant) -> Vec<Nmea2000Msg> {
        let mut out = Vec::new();
        if self.state == CaState::Claiming {
            if let Some(deadline) = self.claim_deadline {
                if now >= deadline {
                    info!("CA {:016X}: address {} claimed", self.name.0, self.address);
                    self.state = CaState::Claimed;
                    self.claim_deadline = None;
                    self.next_heartbeat = Some(now);
                    // announce ourselves and discover the bus
                    out.push(IsoRequest::new(PGN_ADDRESS_CLAIM).message(self.address, ADDRESS_GLOBAL));
                }
            }
        }
        if self.state == CaState::Claimed {
            if let Some(due) = self.next_heartbeat {
                if now >= due {
                    out.push(self.heartbeat_message());
                    self.next_heartbeat = Some(now + self.heartbeat_interval);
                }
            }
        }
        out
    }

    fn heartbeat_message(&mut self) -> Nmea2000Msg {
        let msg = Heartbeat {
            interval_ms: self.heartbeat_interval.as_millis() as u32,
            sequence: self.sequence,
        }
        .message(self.address);
        self.sequence = if self.sequence >= 252 {
            0
        } else {
            self.sequence + 1
        };
        msg
    }

    /// Process a bus management message. Data PGNs are not routed here.
    pub fn on_message(&mut self, msg: &Nmea2000Msg, now: Instant) -> Vec<Nmea2000Msg> {
        if self.state == CaState::Inactive || self.state == CaState::Unusable {
            return Vec::new();
        }
        match msg.pgn {
            PGN_ADDRESS_CLAIM => self.on_address_claim(msg, now),
            PGN_ISO_REQUEST => self.on_iso_request(msg),
            PGN_COMMANDED_ADDRESS => self.on_commanded_address(msg, now),
            PGN_GROUP_FUNCTION => self.on_group_function(msg),
            _ => Vec::new(),
        }
    }

    fn on_address_claim(&mut self, msg: &Nmea2000Msg, now: Instant) -> Vec<Nmea2000Msg> {
        let claim = match AddressClaim::decode(msg) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        if msg.sa < ADDRESS_NULL {
            self.observed.insert(msg.sa);
        }
        if msg.sa != self.address || claim.name == self.name {
            return Vec::new();
        }
        // somebody else claims our address
        self.state = CaState::Contesting;
        warn!(
            "CA {:016X}: address {} contested by NAME {:016X}",
            self.name.0, self.address, claim.name.0
        );
        if self.name < claim.name {
            // our NAME wins, defend the address
            debug!("CA {:016X}: defending address {}", self.name.0, self.address);
            self.state = CaState::Claimed;
            return vec![self.claim_message()];
        }
        if self.name.arbitrary_address_capable() {
            let mut in_use = self.observed.clone();
            in_use.insert(self.address);
            match self.pool.next_free(&in_use) {
                Some(address) => {
                    info!(
                        "CA {:016X}: lost address {}, re-claiming {}",
                        self.name.0, self.address, address
                    );
                    self.address = address;
                    self.state = CaState::Claiming;
                    self.claim_deadline = Some(now + CLAIM_WAIT);
                    return vec![self.claim_message()];
                }
                None => {
                    warn!("CA {:016X}: address pool exhausted", self.name.0);
                }
            }
        }
        warn!("CA {:016X}: cannot claim an address, going offline", self.name.0);
        self.state = CaState::Unusable;
        vec![self.cannot_claim_message()]
    }

    fn on_iso_request(&mut self, msg: &Nmea2000Msg) -> Vec<Nmea2000Msg> {
        if msg.da != self.address && msg.da != ADDRESS_GLOBAL {
            return Vec::new();
        }
        let request = match IsoRequest::decode(msg) {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };
        self.respond_to_request(request.request_pgn)
    }

    fn respond_to_request(&mut self, pgn: u32) -> Vec<Nmea2000Msg> {
        match pgn {
            PGN_ADDRESS_CLAIM => vec![self.claim_message()],
            PGN_PRODUCT_INFORMATION => vec![self.product_information.message(self.address)],
            PGN_CONFIGURATION_INFORMATION => {
                vec![self.configuration_information.message(self.address)]
            }
            PGN_PGN_LIST => {
                vec![PgnList::transmitted(self.produced_pgns.clone())
                    .message(self.address, ADDRESS_GLOBAL)]
            }
            other => {
                debug!("CA {:016X}: unsupported ISO request for PGN {}", self.name.0, other);
                Vec::new()
            }
        }
    }

    fn on_commanded_address(&mut self, msg: &Nmea2000Msg, now: Instant) -> Vec<Nmea2000Msg> {
        let command = match CommandedAddress::decode(msg) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        if command.name != self.name {
            debug!(
                "CA {:016X}: commanded address for another NAME, ignored",
                self.name.0
            );
            return Vec::new();
        }
        info!(
            "CA {:016X}: commanded to address {}",
            self.name.0, command.address
        );
        self.address = command.address;
        self.state = CaState::Claiming;
        self.claim_deadline = Some(now + CLAIM_WAIT);
        vec![self.claim_message()]
    }

    fn on_group_function(&mut self, msg: &Nmea2000Msg) -> Vec<Nmea2000Msg> {
        if msg.da != self.address && msg.da != ADDRESS_GLOBAL {
            return Vec::new();
        }
        match GroupFunction::decode(msg) {
            Ok(GroupFunction::Request { pgn }) => self.respond_to_request(pgn),
            Ok(GroupFunction::Command { pgn, .. }) => {
                // commands are not applied, only acknowledged
                let error_code = 1;
                vec![GroupFunction::Acknowledge { pgn, error_code }.message(self.address, msg.sa)]
            }
            Ok(GroupFunction::Acknowledge { .. }) | Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::INDUSTRY_GROUP_MARINE;

    fn make_name(id: u32, aac: bool) -> IsoName {
        IsoName::builder()
            .identity_number(id)
            .manufacturer_code(999)
            .function(130)
            .industry_group(INDUSTRY_GROUP_MARINE)
            .arbitrary_address_capable(aac)
            .build()
    }

    fn make_ca(id: u32, aac: bool, preferred: u8) -> ControllerApplication {
        ControllerApplication::new(make_name(id, aac), preferred, AddressPool::new(128, 8))
    }

    #[test]
    fn test_uncontested_claim() {
        let mut ca = make_ca(1, true, 128);
        let start = Instant::now();
        let out = ca.start(start);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pgn, PGN_ADDRESS_CLAIM);
        assert_eq!(out[0].sa, 128);
        assert_eq!(ca.state(), CaState::Claiming);
        // nothing happens before the window closes
        assert!(ca.tick(start + Duration::from_millis(100)).is_empty());
        assert_eq!(ca.state(), CaState::Claiming);
        let out = ca.tick(start + CLAIM_WAIT);
        assert_eq!(ca.state(), CaState::Claimed);
        // the CA announces itself with an ISO request for claims
        assert!(out.iter().any(|m| m.pgn == PGN_ISO_REQUEST));
    }

    #[test]
    fn test_lost_contention_moves_to_next_pool_address() {
        // preferred 128 against a strictly smaller NAME
        let mut ca = make_ca(500, true, 128);
        let start = Instant::now();
        ca.start(start);
        let contender = AddressClaim::new(make_name(1, true)).message(128);
        let out = ca.on_message(&contender, start + Duration::from_millis(50));
        // the CA re-claims the next free address from the pool
        assert_eq!(ca.state(), CaState::Claiming);
        assert_eq!(ca.address(), 129);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sa, 129);
        // and becomes claimed after an uncontested window
        ca.tick(start + Duration::from_millis(350));
        assert_eq!(ca.state(), CaState::Claimed);
    }

    #[test]
    fn test_won_contention_defends_address() {
        let mut ca = make_ca(1, true, 128);
        let start = Instant::now();
        ca.start(start);
        ca.tick(start + CLAIM_WAIT);
        assert_eq!(ca.state(), CaState::Claimed);
        let contender = AddressClaim::new(make_name(500, true)).message(128);
        let out = ca.on_message(&contender, start + Duration::from_secs(1));
        assert_eq!(ca.state(), CaState::Claimed);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sa, 128);
        assert_eq!(
            AddressClaim::decode(&out[0]).unwrap().name,
            make_name(1, true)
        );
    }

    #[test]
    fn test_non_arbitrary_loser_goes_unusable() {
        let mut ca = make_ca(500, false, 128);
        let start = Instant::now();
        ca.start(start);
        let contender = AddressClaim::new(make_name(1, true)).message(128);
        let out = ca.on_message(&contender, start + Duration::from_millis(50));
        assert_eq!(ca.state(), CaState::Unusable);
        // cannot claim is sent from the null address
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sa, ADDRESS_NULL);
        // an unusable CA stays silent
        let request = IsoRequest::new(PGN_ADDRESS_CLAIM).message(0x10, ADDRESS_GLOBAL);
        assert!(ca.on_message(&request, start + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_pool_skips_observed_addresses() {
        let mut ca = make_ca(500, true, 128);
        let start = Instant::now();
        ca.start(start);
        // 129 is already claimed by somebody else
        let other = AddressClaim::new(make_name(7, true)).message(129);
        ca.on_message(&other, start);
        let contender = AddressClaim::new(make_name(1, true)).message(128);
        ca.on_message(&contender, start + Duration::from_millis(10));
        assert_eq!(ca.address(), 130);
    }

    #[test]
    fn test_iso_request_answers() {
        let mut ca = make_ca(1, true, 140).with_produced_pgns(vec![129025, 129029]);
        let start = Instant::now();
        ca.start(start);
        ca.tick(start + CLAIM_WAIT);
        for (pgn, expected) in [
            (PGN_ADDRESS_CLAIM, PGN_ADDRESS_CLAIM),
            (PGN_PRODUCT_INFORMATION, PGN_PRODUCT_INFORMATION),
            (PGN_CONFIGURATION_INFORMATION, PGN_CONFIGURATION_INFORMATION),
            (PGN_PGN_LIST, PGN_PGN_LIST),
        ] {
            let request = IsoRequest::new(pgn).message(0x10, 140);
            let out = ca.on_message(&request, start + Duration::from_secs(1));
            assert_eq!(out.len(), 1, "no answer for PGN {pgn}");
            assert_eq!(out[0].pgn, expected);
            assert_eq!(out[0].sa, 140);
        }
        // requests addressed elsewhere are ignored
        let request = IsoRequest::new(PGN_ADDRESS_CLAIM).message(0x10, 141);
        assert!(ca.on_message(&request, start + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_commanded_address() {
        let mut ca = make_ca(1, true, 140);
        let start = Instant::now();
        ca.start(start);
        ca.tick(start + CLAIM_WAIT);
        let command = CommandedAddress {
            name: make_name(1, true),
            address: 77,
        }
        .message(0x10);
        let out = ca.on_message(&command, start + Duration::from_secs(1));
        assert_eq!(ca.address(), 77);
        assert_eq!(ca.state(), CaState::Claiming);
        assert_eq!(out[0].sa, 77);
        // a command for another NAME is ignored
        let other = CommandedAddress {
            name: make_name(2, true),
            address: 99,
        }
        .message(0x10);
        assert!(ca.on_message(&other, start + Duration::from_secs(2)).is_empty());
        assert_eq!(ca.address(), 77);
    }

    #[test]
    fn test_heartbeat_after_claim() {
        let mut ca = make_ca(1, true, 140).with_heartbeat_interval(Duration::from_secs(60));
        let start = Instant::now();
        ca.start(start);
        let out = ca.tick(start + CLAIM_WAIT);
        // first heartbeat comes with the claim confirmation tick
        let hb: Vec<_> = out
            .iter()
            .filter(|m| m.pgn == crate::iso_messages::PGN_HEARTBEAT)
            .collect();
        assert_eq!(hb.len(), 1);
        let decoded = Heartbeat::decode(hb[0]).unwrap();
        assert_eq!(decoded.sequence, 0);
        // next one is due an interval later
        assert!(ca.tick(start + Duration::from_secs(30)).is_empty());
        let out = ca.tick(start + CLAIM_WAIT + Duration::from_secs(60));
        assert_eq!(out.len(), 1);
        assert_eq!(Heartbeat::decode(&out[0]).unwrap().sequence, 1);
    }

    #[test]
    fn test_group_function_request_and_command() {
        let mut ca = make_ca(1, true, 140);
        let start = Instant::now();
        ca.start(start);
        ca.tick(start + CLAIM_WAIT);
        let request = GroupFunction::Request { pgn: PGN_ADDRESS_CLAIM }.message(0x10, 140);
        let out = ca.on_message(&request, start + Duration::from_secs(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pgn, PGN_ADDRESS_CLAIM);
        let command = GroupFunction::Command {
            pgn: PGN_CONFIGURATION_INFORMATION,
            parameters: vec![0x01],
        }
        .message(0x10, 140);
        let out = ca.on_message(&command, start + Duration::from_secs(1));
        assert_eq!(out.len(), 1);
        assert_eq!(
            GroupFunction::decode(&out[0]).unwrap(),
            GroupFunction::Acknowledge {
                pgn: PGN_CONFIGURATION_INFORMATION,
                error_code: 1
            }
        );
    }
}
