/**
* The position information is encoded in a Compact Position Reporting (CPR)
* format, which requires fewer bits to encode positions with higher
* resolution. The CPR offers a trade-off between global position ambiguity
* and local position accuracy. Two types of position messages (identified
* by the odd and even frame bit) are broadcast alternately.
*
* There are two different ways to decode a position:
*
*  - globally unambiguous decoding: without a known position to start with,
*    using an even and an odd message received within 10 seconds;
*  - locally unambiguous decoding: knowing a reference position from
*    previous sets of messages, using only one message.
*
* Surface positions use quarter-scale zones, so even a global decode is
* ambiguous between four longitude quadrants (and two latitude bands); the
* quadrant closest to a reference position is selected.
*
* Decoded candidates then pass two plausibility gates: a maximum distance
* from the receiver, and a maximum speed implied by the displacement since
* the previous fix.
*/
use deku::prelude::*;
use libm::{fabs, floor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A flag to qualify a CPR position as odd or even
#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum CPRFormat {
    Even = 0,
    Odd = 1,
}

impl fmt::Display for CPRFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Even => "even",
                Self::Odd => "odd",
            }
        )
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();

        if parts.len() != 2 {
            return Err("Invalid number of coordinates".to_string());
        }

        let latitude: f64 = parts[0]
            .parse()
            .map_err(|e| format!("Latitude parse error: {e}"))?;
        let longitude: f64 = parts[1]
            .parse()
            .map_err(|e| format!("Longitude parse error: {e}"))?;

        if !(-90. ..=90.).contains(&latitude)
            || !(-180. ..=180.).contains(&longitude)
        {
            return Err("Coordinates out of range".to_string());
        }

        Ok(Position {
            latitude,
            longitude,
        })
    }
}

/// One raw CPR half, as carried by an airborne or surface position message
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct CprHalf {
    pub parity: CPRFormat,
    pub lat_cpr: u32,
    pub lon_cpr: u32,
}

/// NZ represents the number of latitude zones between the equator and a
/// pole. In Mode S, it is defined to be 15.
const NZ: f64 = 15.0;

/// CPR_MAX is 2^17 since CPR lat and lon values are encoded on 17 bits
const CPR_MAX: f64 = 131_072.0;

const D_LAT_EVEN: f64 = 360.0 / (4.0 * NZ);
const D_LAT_ODD: f64 = 360.0 / (4.0 * NZ - 1.0);

/// Given the latitude, this function yields the number of longitude zones
/// between 1 and 59.
/// The nl function uses the precomputed table from 1090-WP-9-14
#[rustfmt::skip]
pub fn nl(lat: f64) -> u64 {
    let mut lat = lat;
    if lat < 0.0 { lat = -lat; }
    if lat < 29.911_356_86 {
        if lat < 10.470_471_30 { return 59; }
        if lat < 14.828_174_37 { return 58; }
        if lat < 18.186_263_57 { return 57; }
        if lat < 21.029_394_93 { return 56; }
        if lat < 23.545_044_87 { return 55; }
        if lat < 25.829_247_07 { return 54; }
        if lat < 27.938_987_10 { return 53; }
        // < 29.91135686
        return 52;
    }
    if lat < 44.194_549_51 {
        if lat < 31.772_097_08 { return 51; }
        if lat < 33.539_934_36 { return 50; }
        if lat < 35.228_995_98 { return 49; }
        if lat < 36.850_251_08 { return 48; }
        if lat < 38.412_418_92 { return 47; }
        if lat < 39.922_566_84 { return 46; }
        if lat < 41.386_518_32 { return 45; }
        if lat < 42.809_140_12 { return 44; }
        // < 44.19454951
        return 43;
    }
    if lat < 59.954_592_77 {
        if lat < 45.546_267_23 { return 42; }
        if lat < 46.867_332_52 { return 41; }
        if lat < 48.160_391_28 { return 40; }
        if lat < 49.427_764_39 { return 39; }
        if lat < 50.671_501_66 { return 38; }
        if lat < 51.893_424_69 { return 37; }
        if lat < 53.095_161_53 { return 36; }
        if lat < 54.278_174_72 { return 35; }
        if lat < 55.443_784_44 { return 34; }
        if lat < 56.593_187_56 { return 33; }
        if lat < 57.727_473_54 { return 32; }
        if lat < 58.847_637_76 { return 31; }
        // < 59.95459277
        return 30;
    }
    if lat < 61.049_177_74 { return 29; }
    if lat < 62.132_166_59 { return 28; }
    if lat < 63.204_274_79 { return 27; }
    if lat < 64.266_165_23 { return 26; }
    if lat < 65.318_453_10 { return 25; }
    if lat < 66.361_710_08 { return 24; }
    if lat < 67.396_467_74 { return 23; }
    if lat < 68.423_220_22 { return 22; }
    if lat < 69.442_426_31 { return 21; }
    if lat < 70.454_510_75 { return 20; }
    if lat < 71.459_864_73 { return 19; }
    if lat < 72.458_845_45 { return 18; }
    if lat < 73.451_774_42 { return 17; }
    if lat < 74.438_934_16 { return 16; }
    if lat < 75.420_562_57 { return 15; }
    if lat < 76.396_843_91 { return 14; }
    if lat < 77.367_894_61 { return 13; }
    if lat < 78.333_740_83 { return 12; }
    if lat < 79.294_282_25 { return 11; }
    if lat < 80.249_232_13 { return 10; }
    if lat < 81.198_013_49 { return 9; }
    if lat < 82.139_569_81 { return 8; }
    if lat < 83.071_994_45 { return 7; }
    if lat < 83.991_735_63 { return 6; }
    if lat < 84.891_661_91 { return 5; }
    if lat < 85.755_416_21 { return 4; }
    if lat < 86.535_369_98 { return 3; }
    if lat < 87.000_000_00 { return 2; }
    1
}

// Main difference for % between Python and Rust is that in Rust, the sign
// of the result matches the sign of the dividend.
fn modulo(a: f64, b: f64) -> f64 {
    if a >= 0. {
        a % b
    } else {
        a % b + fabs(b)
    }
}

fn sort_pair<'a>(
    oldest: &'a CprHalf,
    latest: &'a CprHalf,
) -> Option<(&'a CprHalf, &'a CprHalf)> {
    match (oldest.parity, latest.parity) {
        (CPRFormat::Even, CPRFormat::Odd) => Some((oldest, latest)),
        (CPRFormat::Odd, CPRFormat::Even) => Some((latest, oldest)),
        _ => None,
    }
}

/**
 * Decode an airborne position from a pair of even and odd messages,
 * without any reference position.
 */
pub fn airborne_position(
    oldest: &CprHalf,
    latest: &CprHalf,
) -> Option<Position> {
    let (even_frame, odd_frame) = sort_pair(oldest, latest)?;

    let cpr_lat_even = f64::from(even_frame.lat_cpr) / CPR_MAX;
    let cpr_lon_even = f64::from(even_frame.lon_cpr) / CPR_MAX;
    let cpr_lat_odd = f64::from(odd_frame.lat_cpr) / CPR_MAX;
    let cpr_lon_odd = f64::from(odd_frame.lon_cpr) / CPR_MAX;

    let j = floor(59.0 * cpr_lat_even - 60.0 * cpr_lat_odd + 0.5);

    let mut lat_even = D_LAT_EVEN * (modulo(j, 60.) + cpr_lat_even);
    let mut lat_odd = D_LAT_ODD * (modulo(j, 59.) + cpr_lat_odd);

    if lat_even >= 270.0 {
        lat_even -= 360.0;
    }

    if lat_odd >= 270.0 {
        lat_odd -= 360.0;
    }

    if !(-90. ..=90.).contains(&lat_even) || !(-90. ..=90.).contains(&lat_odd)
    {
        return None;
    }
    // Both halves must see the same number of longitude zones,
    // otherwise a zone boundary was crossed between the two messages.
    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let lat = if latest.parity == CPRFormat::Even {
        lat_even
    } else {
        lat_odd
    };

    let (p, c) = if latest.parity == CPRFormat::Even {
        (0, cpr_lon_even)
    } else {
        (1, cpr_lon_odd)
    };
    let ni = std::cmp::max(nl(lat) - p, 1) as f64;
    let m = floor(
        cpr_lon_even * (nl(lat) - 1) as f64 - cpr_lon_odd * nl(lat) as f64
            + 0.5,
    );

    let r = modulo(m, ni);

    let mut lon = (360.0 / ni) * (r + c);
    if lon >= 180.0 {
        lon -= 360.0;
    }

    Some(Position {
        latitude: lat,
        longitude: lon,
    })
}

/// Angular distance between two longitudes, wrap-around aware
fn lon_delta(a: f64, b: f64) -> f64 {
    let d = modulo(a - b, 360.);
    if d > 180. {
        360. - d
    } else {
        d
    }
}

/**
 * Decode a surface position from a pair of even and odd messages.
 *
 * Surface zones span a quarter of the airborne ones, so the pair only
 * resolves the latitude within a 90-degree band and the longitude within a
 * 90-degree quadrant. The band and quadrant whose values are closest to
 * `reference` (the previous known position of the aircraft, or the
 * receiver location) are selected.
 */
pub fn surface_position(
    oldest: &CprHalf,
    latest: &CprHalf,
    reference: &Position,
) -> Option<Position> {
    let (even_frame, odd_frame) = sort_pair(oldest, latest)?;

    let cpr_lat_even = f64::from(even_frame.lat_cpr) / CPR_MAX;
    let cpr_lon_even = f64::from(even_frame.lon_cpr) / CPR_MAX;
    let cpr_lat_odd = f64::from(odd_frame.lat_cpr) / CPR_MAX;
    let cpr_lon_odd = f64::from(odd_frame.lon_cpr) / CPR_MAX;

    let j = floor(59.0 * cpr_lat_even - 60.0 * cpr_lat_odd + 0.5);

    // Northern band solutions, in [0, 90)
    let lat_even = 90. / 60. * (modulo(j, 60.) + cpr_lat_even);
    let lat_odd = 90. / 59. * (modulo(j, 59.) + cpr_lat_odd);

    // The southern solution sits one band below
    let band = |lat: f64| -> f64 {
        if fabs(lat - reference.latitude) < fabs(lat - 90. - reference.latitude)
        {
            lat
        } else {
            lat - 90.
        }
    };
    let lat_even = band(lat_even);
    let lat_odd = band(lat_odd);

    if !(-90. ..=90.).contains(&lat_even) || !(-90. ..=90.).contains(&lat_odd)
    {
        return None;
    }
    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let lat = if latest.parity == CPRFormat::Even {
        lat_even
    } else {
        lat_odd
    };

    let (p, c) = if latest.parity == CPRFormat::Even {
        (0, cpr_lon_even)
    } else {
        (1, cpr_lon_odd)
    };
    let ni = std::cmp::max(nl(lat) - p, 1) as f64;
    let m = floor(
        cpr_lon_even * (nl(lat) - 1) as f64 - cpr_lon_odd * nl(lat) as f64
            + 0.5,
    );

    // In [0, 90): three more quadrants are possible
    let base = (90.0 / ni) * (modulo(m, ni) + c);

    let lon = [-180., -90., 0., 90.]
        .iter()
        .map(|shift| base + shift)
        .min_by(|a, b| {
            lon_delta(*a, reference.longitude)
                .partial_cmp(&lon_delta(*b, reference.longitude))
                .unwrap()
        })?;

    Some(Position {
        latitude: lat,
        longitude: lon,
    })
}

/**
 * Decode an airborne position with only one message, knowing a reference
 * nearby location, such as a previously decoded position or the receiver
 * location. The reference must be within half a cell (180 NM) of the true
 * position, otherwise the decode is rejected.
 */
pub fn airborne_position_with_reference(
    msg: &CprHalf,
    latitude_ref: f64,
    longitude_ref: f64,
) -> Option<Position> {
    position_with_reference(msg, latitude_ref, longitude_ref, 360.)
}

/**
 * Decode a surface position with only one message, knowing a reference
 * nearby location. The reference must be within half a cell (45 NM) of
 * the true position, otherwise the decode is rejected.
 */
pub fn surface_position_with_reference(
    msg: &CprHalf,
    latitude_ref: f64,
    longitude_ref: f64,
) -> Option<Position> {
    position_with_reference(msg, latitude_ref, longitude_ref, 90.)
}

fn position_with_reference(
    msg: &CprHalf,
    latitude_ref: f64,
    longitude_ref: f64,
    span: f64,
) -> Option<Position> {
    let cpr_lat = f64::from(msg.lat_cpr) / CPR_MAX;
    let cpr_lon = f64::from(msg.lon_cpr) / CPR_MAX;

    let d_lat = if msg.parity == CPRFormat::Even {
        span / 60.
    } else {
        span / 59.
    };

    let j = floor(latitude_ref / d_lat)
        + floor(0.5 + modulo(latitude_ref, d_lat) / d_lat - cpr_lat);

    let lat = d_lat * (j + cpr_lat);

    if !(-90. ..=90.).contains(&lat) {
        return None;
    }
    // Check that the answer is not more than half a cell away
    if fabs(lat - latitude_ref) > d_lat / 2. {
        return None;
    }

    let ni = if msg.parity == CPRFormat::Even {
        nl(lat)
    } else {
        nl(lat) - 1
    };
    let d_lon = if ni > 0 { span / ni as f64 } else { span };
    let m = floor(longitude_ref / d_lon)
        + floor(0.5 + modulo(longitude_ref, d_lon) / d_lon - cpr_lon);
    let lon = d_lon * (m + cpr_lon);

    // Check that the answer is not more than half a cell away
    if fabs(lon - longitude_ref) > d_lon / 2. {
        return None;
    }

    Some(Position {
        latitude: lat,
        longitude: lon,
    })
}

/// Great-circle distance in meters
pub fn haversine_m(pos1: &Position, pos2: &Position) -> f64 {
    let d_lat = (pos2.latitude - pos1.latitude).to_radians();
    let d_lon = (pos2.longitude - pos1.longitude).to_radians();
    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + pos1.latitude.to_radians().cos()
            * pos2.latitude.to_radians().cos()
            * (d_lon / 2.0).sin()
            * (d_lon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    const R: f64 = 6_371_000.0; // Earth's radius in meters
    R * c
}

const METERS_PER_KNOT_SECOND: f64 = 0.514_444;

/// Half the airborne CPR ambiguity cell, about 180 NM. A local decode
/// relative to the receiver is only unambiguous when the aircraft is
/// guaranteed (by the distance limit) to sit within this radius.
pub const AIRBORNE_CELL_M: f64 = 333_360.0;

/// Distance gate: candidate positions further than `max_dist_m` from the
/// receiver are rejected. A zero limit disables the gate.
pub fn within_range(
    home: &Position,
    candidate: &Position,
    max_dist_m: f64,
) -> bool {
    max_dist_m <= 0.0 || haversine_m(home, candidate) <= max_dist_m
}

/// Speed gate: reject a candidate position whose displacement since the
/// previous fix implies an implausible ground speed. The threshold is
/// 4/3 of the last reported speed (or a conservative guess when none was
/// reported), clamped to [20, 150] kt on the surface and to at least
/// 200 kt airborne, plus a fixed slack absorbing CPR quantization.
pub fn plausible_speed(
    previous: &Position,
    candidate: &Position,
    elapsed_s: f64,
    reported_speed_kt: Option<f64>,
    surface: bool,
) -> bool {
    let guess = if surface { 40.0 } else { 300.0 };
    let mut limit_kt = 4. / 3. * reported_speed_kt.unwrap_or(guess).max(guess);
    limit_kt = if surface {
        limit_kt.clamp(20.0, 150.0)
    } else {
        limit_kt.max(200.0)
    };
    let slack_m = if surface { 100.0 } else { 500.0 };

    let allowed_m =
        limit_kt * METERS_PER_KNOT_SECOND * elapsed_s.max(0.0) + slack_m;
    haversine_m(previous, candidate) <= allowed_m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn half(parity: CPRFormat, lat_cpr: u32, lon_cpr: u32) -> CprHalf {
        CprHalf {
            parity,
            lat_cpr,
            lon_cpr,
        }
    }

    /// Encode a position as one airborne CPR half, for inverse testing
    fn encode_airborne(lat: f64, lon: f64, parity: CPRFormat) -> CprHalf {
        let d_lat = match parity {
            CPRFormat::Even => D_LAT_EVEN,
            CPRFormat::Odd => D_LAT_ODD,
        };
        let yz = floor(CPR_MAX * modulo(lat, d_lat) / d_lat + 0.5);
        let rlat = d_lat * (yz / CPR_MAX + floor(lat / d_lat));
        let p = match parity {
            CPRFormat::Even => 0,
            CPRFormat::Odd => 1,
        };
        let ni = std::cmp::max(nl(rlat) - p, 1) as f64;
        let d_lon = 360. / ni;
        let xz = floor(CPR_MAX * modulo(lon, d_lon) / d_lon + 0.5);
        half(
            parity,
            (yz as i64).rem_euclid(131_072) as u32,
            (xz as i64).rem_euclid(131_072) as u32,
        )
    }

    #[test]
    fn airborne_global_pair() {
        let even = half(CPRFormat::Even, 80536, 9432);
        let odd = half(CPRFormat::Odd, 61720, 9192);

        // latest is odd
        let pos = airborne_position(&even, &odd).unwrap();
        assert_relative_eq!(pos.latitude, 51.686763, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.701294, epsilon = 1e-5);

        // latest is even
        let pos = airborne_position(&odd, &even).unwrap();
        assert_relative_eq!(pos.latitude, 51.686646, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.700156, epsilon = 1e-5);
    }

    #[test]
    fn airborne_global_is_idempotent() {
        let even = half(CPRFormat::Even, 80536, 9432);
        let odd = half(CPRFormat::Odd, 61720, 9192);

        let first = airborne_position(&even, &odd).unwrap();
        let again = airborne_position(&even, &odd).unwrap();
        assert_relative_eq!(first.latitude, again.latitude, epsilon = 1e-6);
        assert_relative_eq!(first.longitude, again.longitude, epsilon = 1e-6);
    }

    #[test]
    fn airborne_global_requires_both_parities() {
        let even = half(CPRFormat::Even, 80536, 9432);
        assert!(airborne_position(&even, &even).is_none());
    }

    #[test]
    fn surface_global_pair_with_reference() {
        let reference = Position {
            latitude: 52.,
            longitude: 0.,
        };
        let even = half(CPRFormat::Even, 105730, 9259);
        let odd = half(CPRFormat::Odd, 29693, 8997);

        let pos = surface_position(&even, &odd, &reference).unwrap();
        assert_relative_eq!(pos.latitude, 52.209976, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.176507, epsilon = 1e-5);

        // Same halves seen from the antimeridian: shifted one quadrant
        let reference = Position {
            latitude: 52.,
            longitude: -180.,
        };
        let pos = surface_position(&even, &odd, &reference).unwrap();
        assert_relative_eq!(pos.latitude, 52.209976, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.176507 - 180., epsilon = 1e-5);
    }

    #[test]
    fn local_airborne_with_reference() {
        let msg = half(CPRFormat::Even, 80536, 9432);

        let pos =
            airborne_position_with_reference(&msg, 52.0, 0.0).unwrap();
        assert_relative_eq!(pos.latitude, 51.686646, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.700156, epsilon = 1e-5);

        // Any reference within half a cell yields the same position
        let pos =
            airborne_position_with_reference(&msg, 48.7, 0.0).unwrap();
        assert_relative_eq!(pos.latitude, 51.686646, epsilon = 1e-5);
        assert_relative_eq!(pos.longitude, 0.700156, epsilon = 1e-5);

        // A reference more than half a cell from the true position
        // aliases into the neighbouring latitude zone; such candidates
        // are indistinguishable here and die on the speed gate instead
        let aliased =
            airborne_position_with_reference(&msg, 44.0, 0.0).unwrap();
        assert_relative_eq!(aliased.latitude, 45.686646, epsilon = 1e-5);
        let previous = Position {
            latitude: 44.0,
            longitude: 0.0,
        };
        assert!(!plausible_speed(&previous, &aliased, 10.0, None, false));
    }

    #[test]
    fn local_decode_inverts_encode() {
        for &(lat, lon) in &[
            (51.686646, 0.700156),
            (-34.6, 18.4),
            (35.68, 139.76),
            (-23.43, -46.47),
        ] {
            for parity in [CPRFormat::Even, CPRFormat::Odd] {
                let msg = encode_airborne(lat, lon, parity);
                let pos =
                    airborne_position_with_reference(&msg, lat, lon).unwrap();
                assert_relative_eq!(pos.latitude, lat, epsilon = 1e-6);
                assert_relative_eq!(pos.longitude, lon, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn speed_gate_rejects_teleportation() {
        // one degree of latitude in ten seconds, about 21 600 kt
        let previous = Position {
            latitude: 51.5,
            longitude: 0.0,
        };
        let candidate = Position {
            latitude: 52.5,
            longitude: 0.0,
        };
        assert!(!plausible_speed(&previous, &candidate, 10.0, None, false));

        // a sane displacement passes: 480 kt for 10 s is about 2.5 km
        let candidate = Position {
            latitude: 51.522,
            longitude: 0.0,
        };
        assert!(plausible_speed(
            &previous,
            &candidate,
            10.0,
            Some(480.),
            false
        ));
    }

    #[test]
    fn distance_gate() {
        let home = Position {
            latitude: 52.0,
            longitude: 0.0,
        };
        let near = Position {
            latitude: 52.2,
            longitude: 0.2,
        };
        let far = Position {
            latitude: 45.0,
            longitude: 10.0,
        };
        assert!(within_range(&home, &near, 50_000.));
        assert!(!within_range(&home, &far, 50_000.));
        // zero disables the gate
        assert!(within_range(&home, &far, 0.));
    }
}
