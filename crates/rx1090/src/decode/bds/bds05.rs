use crate::decode::cpr::{CPRFormat, CprHalf};
use crate::decode::{decode_id13, gray2alt};
use deku::prelude::*;
use deku::reader::Reader;
use serde::Serialize;
use std::fmt;

/**
 * ## Airborne Position (BDS 0,5)
 *
 * with barometric altitude (TC=9..=18) or geometric height (TC=20..=22)
 *
 * | TC | SS | SAF | ALT | T | F | LAT-CPR | LON-CPR |
 * | -- | -- | --- | --- | - | - | ------- | ------- |
 * | 5  | 2  |  1  | 12  | 1 | 1 |   17    |   17    |
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AirbornePosition {
    #[deku(bits = "5")]
    #[serde(skip)]
    /// The typecode value (between 9 and 18 or between 20 and 22)
    pub tc: u8,

    #[deku(skip, default = "nuc_p(*tc)")]
    #[serde(rename = "NUCp")]
    /// The Navigation Uncertainty Category Position (NUCp)
    /// (directly based on the typecode)
    pub nuc_p: u8,

    #[serde(skip)]
    /// Decode the surveillance status
    pub ss: SurveillanceStatus,

    #[deku(bits = "1")]
    #[serde(skip)]
    /// Single Antenna Flag in ADSB v0 or v1,
    /// Navigation Integrity Category Supplement-b (NICb) in ADSB v2
    pub saf_or_nicb: u8,

    #[deku(reader = "decode_ac12(deku::reader)")]
    #[serde(rename = "altitude", skip_serializing_if = "Option::is_none")]
    /// Decode the altitude in feet, encoded on 12 bits.
    /// None if not available.
    pub alt: Option<i32>,

    #[deku(skip, default = "Source::from_tc(*tc)")]
    /// The altitude source (GNSS or barometric),
    /// most commonly equal to barometric
    pub source: Source,

    #[deku(bits = "1")]
    #[serde(skip)]
    // UTC sync or not
    pub t: bool,

    pub parity: CPRFormat,

    #[deku(bits = "17", endian = "big")]
    pub lat_cpr: u32,

    #[deku(bits = "17", endian = "big")]
    pub lon_cpr: u32,

    #[deku(skip, default = "None")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[deku(skip, default = "None")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl From<&AirbornePosition> for CprHalf {
    fn from(msg: &AirbornePosition) -> Self {
        CprHalf {
            parity: msg.parity,
            lat_cpr: msg.lat_cpr,
            lon_cpr: msg.lon_cpr,
        }
    }
}

fn nuc_p(tc: u8) -> u8 {
    match tc {
        t if t < 19 => 18 - t,
        20 | 21 => 29 - tc,
        _ => 0,
    }
}

/// Decode altitude value encoded on 12 bits
fn decode_ac12<R: deku::no_std_io::Read + std::io::Seek>(
    reader: &mut Reader<R>,
) -> Result<Option<i32>, DekuError> {
    let num = u16::from_reader_with_ctx(
        reader,
        (deku::ctx::Endian::Big, deku::ctx::BitSize(12)),
    )?;

    if num == 0 {
        return Ok(None);
    }

    let q = num & 0x10;

    if q > 0 {
        let n = ((num & 0x0fe0) >> 1) | (num & 0x000f);
        Ok(Some(i32::from(n) * 25 - 1000))
    } else {
        let n = ((num & 0x0fc0) << 1) | (num & 0x003f);
        match gray2alt(decode_id13(n)) {
            Ok(n) => Ok(Some(n * 100)),
            Err(_) => Ok(None),
        }
    }
}

impl fmt::Display for AirbornePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Airborne position (BDS 0,5)")?;
        let altitude = self.alt.map_or_else(
            || "None".to_string(),
            |altitude| format!("{altitude} ft"),
        );
        writeln!(f, "  Altitude:      {} {}", altitude, self.source)?;
        writeln!(f, "  CPR type:      Airborne")?;
        writeln!(f, "  CPR parity:    {}", self.parity)?;
        writeln!(f, "  CPR latitude:  ({})", self.lat_cpr)?;
        writeln!(f, "  CPR longitude: ({})", self.lon_cpr)?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "2")]
pub enum SurveillanceStatus {
    NoCondition = 0,
    PermanentAlert = 1,
    TemporaryAlert = 2,
    SPICondition = 3,
}

#[derive(Debug, PartialEq, Eq, Serialize, Copy, Clone)]
pub enum Source {
    #[serde(rename = "barometric")]
    Barometric,
    #[serde(rename = "GNSS")]
    Gnss,
}

impl Source {
    fn from_tc(tc: u8) -> Self {
        if tc < 19 {
            Self::Barometric
        } else {
            Self::Gnss
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Barometric => "barometric",
                Self::Gnss => "GNSS",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::cpr::CPRFormat;
    use crate::prelude::*;
    use hexlit::hex;

    #[test]
    fn test_airborne_position() {
        let bytes = hex!("8D40058B58C901375147EFD09357");
        let msg = Message::from_frame(&bytes).unwrap();
        if let ExtendedSquitterADSB(adsb) = msg.df {
            if let ME::BDS05(position) = adsb.message {
                assert_eq!(position.tc, 11);
                assert_eq!(position.nuc_p, 7);
                assert_eq!(position.parity, CPRFormat::Even);
                assert_eq!(position.lat_cpr, 39848);
                assert_eq!(position.lon_cpr, 83951);
                assert_eq!(position.alt, Some(39000));
                return;
            }
        }
        unreachable!();
    }
}
