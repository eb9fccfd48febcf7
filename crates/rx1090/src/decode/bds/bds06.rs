use crate::decode::cpr::{CPRFormat, CprHalf};
use deku::prelude::*;
use deku::reader::Reader;
use serde::Serialize;
use std::fmt;

/**
 * ## Surface Position (BDS 0,6)
 *
 * Extended squitter message broadcast by aircraft on the ground. Instead
 * of an altitude, the message carries the ground speed (movement) and the
 * ground track of the aircraft.
 *
 * | TC  | MOV | S   | TRK | T   | F   | LAT-CPR | LON-CPR |
 * | --- | --- | --- | --- | --- | --- | ------- | ------- |
 * | 5   | 7   | 1   | 7   | 1   | 1   | 17      | 17      |
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Copy, Clone)]
pub struct SurfacePosition {
    #[deku(bits = "5")]
    #[serde(skip)]
    /// The typecode value (between 5 and 8)
    pub tc: u8,

    #[deku(skip, default = "14 - tc")]
    #[serde(rename = "NUCp")]
    /// Navigation Uncertainty Category (position), based on the typecode
    pub nuc_p: u8,

    #[deku(reader = "read_groundspeed(deku::reader)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Ground speed in kts, on a 7-bit non-linear scale.
    /// None if no information (0) or reserved (125..=127)
    pub groundspeed: Option<f64>,

    #[deku(bits = "1")]
    #[serde(skip)]
    /// Ground track status: false means invalid
    pub track_status: bool,

    #[deku(
        bits = "7",
        map = "|value: u8| -> Result<_, DekuError> {
            if *track_status {
                Ok(Some(value as f64 * 360. / 128.))
            } else {
                Ok(None)
            }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Ground track angle in degrees clockwise from true north,
    /// by steps of 360/128 degrees. None if the status bit is unset.
    pub track: Option<f64>,

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

impl From<&SurfacePosition> for CprHalf {
    fn from(msg: &SurfacePosition) -> Self {
        CprHalf {
            parity: msg.parity,
            lat_cpr: msg.lat_cpr,
            lon_cpr: msg.lon_cpr,
        }
    }
}

/**
 * Decode the ground speed from the 7-bit movement field.
 *
 * The encoding is non-linear, with a higher precision at lower speeds:
 *
 * | Code    | Meaning                          | Quantization        |
 * |---------|----------------------------------|---------------------|
 * | 0       | No information available         |                     |
 * | 1       | Aircraft stopped (< 0.125 kt)    |                     |
 * | 2-8     | [0.125, 1.0) kt                  | 0.125 kt steps      |
 * | 9-12    | [1.0, 2.0) kt                    | 0.25 kt steps       |
 * | 13-38   | [2.0, 15.0) kt                   | 0.5 kt steps        |
 * | 39-93   | [15.0, 70.0) kt                  | 1.0 kt steps        |
 * | 94-108  | [70.0, 100.0) kt                 | 2.0 kt steps        |
 * | 109-123 | [100.0, 175.0) kt                | 5.0 kt steps        |
 * | 124     | >= 175 kt                        |                     |
 * | 125-127 | Reserved                         |                     |
 */
fn read_groundspeed<R: deku::no_std_io::Read + std::io::Seek>(
    reader: &mut Reader<R>,
) -> Result<Option<f64>, DekuError> {
    let mov = u8::from_reader_with_ctx(
        reader,
        (deku::ctx::Endian::Big, deku::ctx::BitSize(7)),
    )?;
    let value = match mov {
        0 => None,
        1 => Some(0.),
        2..=8 => Some(0.125 + f64::from(mov - 2) * 0.125),
        9..=12 => Some(1. + f64::from(mov - 9) * 0.25),
        13..=38 => Some(2. + f64::from(mov - 13) * 0.5),
        39..=93 => Some(15. + f64::from(mov - 39) * 1.),
        94..=108 => Some(70. + f64::from(mov - 94) * 2.),
        109..=123 => Some(100. + f64::from(mov - 109) * 5.),
        124 => Some(175.),
        125..=u8::MAX => None, // reserved
    };
    Ok(value)
}

impl fmt::Display for SurfacePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Surface position (BDS 0,6)")?;
        let groundspeed = self.groundspeed.map_or_else(
            || "None".to_string(),
            |gs| format!("{gs} kts"),
        );
        let track = self
            .track
            .map_or_else(|| "None".to_string(), |trk| format!("{trk}°"));
        writeln!(f, "  Groundspeed:   {groundspeed}")?;
        writeln!(f, "  Track angle:   {track}")?;
        writeln!(f, "  CPR type:      Surface")?;
        writeln!(f, "  CPR parity:    {}", self.parity)?;
        writeln!(f, "  CPR latitude:  ({})", self.lat_cpr)?;
        writeln!(f, "  CPR longitude: ({})", self.lon_cpr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::decode::cpr::CPRFormat;
    use crate::prelude::*;
    use hexlit::hex;

    #[test]
    fn test_surface_position() {
        let bytes = hex!("8c4841753aab238733c8cd4020b1");
        let msg = Message::from_frame(&bytes).unwrap();
        if let ExtendedSquitterADSB(adsb) = msg.df {
            if let ME::BDS06(position) = adsb.message {
                assert_eq!(position.tc, 7);
                assert_eq!(position.nuc_p, 7);
                assert_eq!(position.parity, CPRFormat::Even);
                assert_eq!(position.groundspeed, Some(18.0));
                assert_eq!(position.track, Some(50. * 360. / 128.));
                return;
            }
        }
        unreachable!();
    }
}
