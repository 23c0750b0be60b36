//! Typed records for the navigation PGNs the router decodes natively.
//! Everything else goes through the dictionary driven codec or stays raw.

pub mod pgn126992;
pub mod pgn127245;
pub mod pgn127250;
pub mod pgn127488;
pub mod pgn127505;
pub mod pgn129025;
pub mod pgn129026;
pub mod pgn129029;
pub mod pgn129540;
pub mod pgn130306;
pub mod pgn130312;

pub use pgn126992::SystemTime;
pub use pgn127245::Rudder;
pub use pgn127250::VesselHeading;
pub use pgn127488::EngineRapidUpdate;
pub use pgn127505::FluidLevel;
pub use pgn129025::PositionRapidUpdate;
pub use pgn129026::CogSogRapidUpdate;
pub use pgn129029::GnssPositionData;
pub use pgn129540::GnssSatsInView;
pub use pgn130306::WindData;
pub use pgn130312::Temperature;

use std::fmt;

/// A decoded PGN record. `from_pgn` returns `None` when the PGN has no
/// typed decoder or the payload does not parse; the caller keeps the
/// message raw in that case.
#[derive(Debug, Clone, PartialEq)]
pub enum N2kData {
    SystemTime(SystemTime),
    Rudder(Rudder),
    VesselHeading(VesselHeading),
    EngineRapidUpdate(EngineRapidUpdate),
    FluidLevel(FluidLevel),
    PositionRapidUpdate(PositionRapidUpdate),
    CogSogRapidUpdate(CogSogRapidUpdate),
    GnssPositionData(GnssPositionData),
    GnssSatsInView(GnssSatsInView),
    WindData(WindData),
    Temperature(Temperature),
}

impl N2kData {
    pub fn from_pgn(pgn: u32, data: &[u8]) -> Option<Self> {
        match pgn {
            126992 => SystemTime::from_bytes(data).map(N2kData::SystemTime),
            127245 => Rudder::from_bytes(data).map(N2kData::Rudder),
            127250 => VesselHeading::from_bytes(data).map(N2kData::VesselHeading),
            127488 => EngineRapidUpdate::from_bytes(data).map(N2kData::EngineRapidUpdate),
            127505 => FluidLevel::from_bytes(data).map(N2kData::FluidLevel),
            129025 => PositionRapidUpdate::from_bytes(data).map(N2kData::PositionRapidUpdate),
            129026 => CogSogRapidUpdate::from_bytes(data).map(N2kData::CogSogRapidUpdate),
            129029 => GnssPositionData::from_bytes(data).map(N2kData::GnssPositionData),
            129540 => GnssSatsInView::from_bytes(data).map(N2kData::GnssSatsInView),
            130306 => WindData::from_bytes(data).map(N2kData::WindData),
            130312 => Temperature::from_bytes(data).map(N2kData::Temperature),
            _ => None,
        }
    }

    pub fn pgn(&self) -> u32 {
        match self {
            N2kData::SystemTime(_) => 126992,
            N2kData::Rudder(_) => 127245,
            N2kData::VesselHeading(_) => 127250,
            N2kData::EngineRapidUpdate(_) => 127488,
            N2kData::FluidLevel(_) => 127505,
            N2kData::PositionRapidUpdate(_) => 129025,
            N2kData::CogSogRapidUpdate(_) => 129026,
            N2kData::GnssPositionData(_) => 129029,
            N2kData::GnssSatsInView(_) => 129540,
            N2kData::WindData(_) => 130306,
            N2kData::Temperature(_) => 130312,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            N2kData::SystemTime(msg) => msg.to_bytes(),
            N2kData::Rudder(msg) => msg.to_bytes(),
            N2kData::VesselHeading(msg) => msg.to_bytes(),
            N2kData::EngineRapidUpdate(msg) => msg.to_bytes(),
            N2kData::FluidLevel(msg) => msg.to_bytes(),
            N2kData::PositionRapidUpdate(msg) => msg.to_bytes(),
            N2kData::CogSogRapidUpdate(msg) => msg.to_bytes(),
            N2kData::GnssPositionData(msg) => msg.to_bytes(),
            N2kData::GnssSatsInView(msg) => msg.to_bytes(),
            N2kData::WindData(msg) => msg.to_bytes(),
            N2kData::Temperature(msg) => msg.to_bytes(),
        }
    }
}

impl fmt::Display for N2kData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            N2kData::SystemTime(msg) => write!(f, "{}", msg),
            N2kData::Rudder(msg) => write!(f, "{}", msg),
            N2kData::VesselHeading(msg) => write!(f, "{}", msg),
            N2kData::EngineRapidUpdate(msg) => write!(f, "{}", msg),
            N2kData::FluidLevel(msg) => write!(f, "{}", msg),
            N2kData::PositionRapidUpdate(msg) => write!(f, "{}", msg),
            N2kData::CogSogRapidUpdate(msg) => write!(f, "{}", msg),
            N2kData::GnssPositionData(msg) => write!(f, "{}", msg),
            N2kData::GnssSatsInView(msg) => write!(f, "{}", msg),
            N2kData::WindData(msg) => write!(f, "{}", msg),
            N2kData::Temperature(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_roundtrip() {
        let wind = WindData {
            sid: 1,
            speed: Some(5.0),
            angle: Some(1.0),
            reference: pgn130306::WindReference::Apparent,
        };
        let bytes = wind.to_bytes();
        let data = N2kData::from_pgn(130306, &bytes).unwrap();
        assert_eq!(data.pgn(), 130306);
        assert_eq!(data.to_bytes(), bytes);
    }

    #[test]
    fn test_unknown_pgn_stays_raw() {
        assert!(N2kData::from_pgn(65281, &[1, 2, 3, 4, 5, 6, 7, 8]).is_none());
    }
}
