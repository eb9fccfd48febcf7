use super::bds::{bds05, bds06, bds08, bds09, bds61};
use super::{Capability, ICAO};
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * An ADS-B frame is 112 bits long and consists of five main parts,
 * shown as follows:
 *
 * +----------+----------+-------------+------------------------+-----------+
 * |  DF (5)  |  CA (3)  |  ICAO (24)  |         ME (56)        |  PI (24)  |
 * +----------+----------+-------------+------------------------+-----------+
 */
#[derive(Debug, PartialEq, DekuRead, Clone, Serialize)]
pub struct ADSB {
    /// Transponder Capability
    #[serde(skip)]
    pub capability: Capability,

    /// ICAO aircraft address
    pub icao24: ICAO,

    /// ME (Typecode)
    #[serde(flatten)]
    pub message: ME,

    /// Parity/Interrogator ID
    #[serde(skip)]
    pub parity: ICAO,
}

impl fmt::Display for ADSB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " DF17. Extended Squitter")?;
        writeln!(f, "  Address:       {}", &self.icao24)?;
        writeln!(f, "  Air/Ground:    {}", &self.capability)?;
        write!(f, "{}", &self.message)
    }
}

/*
* |  `ME`               |  Name                               |
* | ------------------- | ----------------------------------- |
* | 0                   | [`ME::NoPosition`]                  |
* | 1..=4               | [`bds08::AircraftIdentification`]   |
* | 5..=8               | [`bds06::SurfacePosition`]          |
* | 9..=18, 20..=22     | [`bds05::AirbornePosition`]         |
* | 19                  | [`bds09::AirborneVelocity`]         |
* | 28                  | [`bds61::AircraftStatus`]           |
* | others              | [`ME::Unsupported`]                 |
*/
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(id_type = "u8", bits = "5")]
#[serde(tag = "BDS")]
pub enum ME {
    #[deku(id_pat = "0")]
    #[serde(skip)]
    NoPosition([u8; 7]),

    #[deku(id_pat = "1..=4")]
    #[serde(rename = "0,8")]
    BDS08(bds08::AircraftIdentification),

    #[deku(id_pat = "5..=8")]
    #[serde(rename = "0,6")]
    BDS06(bds06::SurfacePosition),

    #[deku(id_pat = "9..=18 | 20..=22")]
    #[serde(rename = "0,5")]
    BDS05(bds05::AirbornePosition),

    #[deku(id = "19")]
    #[serde(rename = "0,9")]
    BDS09(bds09::AirborneVelocity),

    #[deku(id = "28")]
    #[serde(rename = "6,1")]
    BDS61(bds61::AircraftStatus),

    /// Status typecodes (23..=27, 29..=31) with no field used downstream
    #[deku(id_pat = "_")]
    #[serde(skip)]
    Unsupported([u8; 7]),
}

impl fmt::Display for ME {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ME::NoPosition(_) | ME::Unsupported(_) => Ok(()),
            ME::BDS05(me) => write!(f, "{me}"),
            ME::BDS06(me) => write!(f, "{me}"),
            ME::BDS08(me) => write!(f, "{me}"),
            ME::BDS09(me) => write!(f, "{me}"),
            ME::BDS61(me) => write!(f, "{me}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::{Message, DF};
    use hexlit::hex;

    #[test]
    fn test_icao24() {
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        let msg = Message::from_frame(&bytes).unwrap();
        if let DF::ExtendedSquitterADSB(msg) = msg.df {
            assert_eq!(format!("{}", msg.icao24), "406b90");
            return;
        }
        unreachable!();
    }
}
