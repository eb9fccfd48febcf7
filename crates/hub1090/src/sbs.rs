//! SBS (BaseStation) CSV lines, 22 comma-separated fields terminated by
//! `\r\n`:
//!
//! ```text
//! MSG,<type>,<session>,<aircraft>,<hex>,<flight_id>,<date_gen>,<time_gen>,
//! <date_log>,<time_log>,<callsign>,<alt>,<gs>,<trk>,<lat>,<lon>,<vr>,
//! <squawk>,<alert>,<emerg>,<spi>,<ground>
//! ```
//!
//! Timestamps are UTC, `YYYY/MM/DD` and `HH:MM:SS.mmm`.

use crate::registry::Aircraft;
use chrono::{DateTime, Utc};
use rx1090::decode::adsb::ME;
use rx1090::decode::{FlightStatus, Message, DF};

/// A partial aircraft state parsed from an inbound SBS line
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SbsUpdate {
    pub icao24: u32,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub groundspeed: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i16>,
    pub squawk: Option<String>,
    pub on_ground: Option<bool>,
}

fn timestamp_fields(timestamp: f64) -> (String, String) {
    let datetime = DateTime::<Utc>::from_timestamp(
        timestamp as i64,
        ((timestamp.fract()) * 1e9) as u32,
    )
    .unwrap_or_default();
    (
        datetime.format("%Y/%m/%d").to_string(),
        datetime.format("%H:%M:%S%.3f").to_string(),
    )
}

fn flag(value: bool) -> &'static str {
    if value {
        "-1"
    } else {
        "0"
    }
}

fn squawk_flags(squawk: Option<&str>) -> &'static str {
    match squawk {
        Some("7500") | Some("7600") | Some("7700") => "-1",
        _ => "0",
    }
}

struct Line {
    kind: u8,
    callsign: String,
    altitude: String,
    groundspeed: String,
    track: String,
    latitude: String,
    longitude: String,
    vertical_rate: String,
    squawk: String,
    alert: &'static str,
    emergency: &'static str,
    spi: &'static str,
    ground: &'static str,
}

impl Line {
    fn new(kind: u8) -> Self {
        Self {
            kind,
            callsign: String::new(),
            altitude: String::new(),
            groundspeed: String::new(),
            track: String::new(),
            latitude: String::new(),
            longitude: String::new(),
            vertical_rate: String::new(),
            squawk: String::new(),
            alert: "0",
            emergency: "0",
            spi: "0",
            ground: "0",
        }
    }

    fn surveillance_flags(&mut self, fs: &FlightStatus, squawk: Option<&str>) {
        self.alert = flag(fs.alert());
        self.spi = flag(fs.spi());
        self.ground = flag(fs.on_ground());
        self.emergency = squawk_flags(squawk);
    }

    fn build(&self, icao24: u32, timestamp: f64) -> String {
        let (date, time) = timestamp_fields(timestamp);
        format!(
            "MSG,{},,,{:06X},,{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\r\n",
            self.kind,
            icao24,
            date,
            time,
            date,
            time,
            self.callsign,
            self.altitude,
            self.groundspeed,
            self.track,
            self.latitude,
            self.longitude,
            self.vertical_rate,
            self.squawk,
            self.alert,
            self.emergency,
            self.spi,
            self.ground,
        )
    }
}

/// Serialize one accepted message as an SBS line, using the registry
/// record for the fields the frame itself does not carry. Messages with
/// no SBS counterpart yield None.
pub fn format(
    msg: &Message,
    aircraft: &Aircraft,
    timestamp: f64,
) -> Option<String> {
    let squawk = aircraft.squawk.as_deref();
    let mut line = match &msg.df {
        DF::ShortAirAirSurveillance { ac, .. }
        | DF::LongAirAirSurveillance { ac, .. } => {
            let mut line = Line::new(5);
            if let Some(altitude) = ac.0 {
                line.altitude = altitude.to_string();
            }
            line.ground = flag(aircraft.on_ground);
            line
        }
        DF::SurveillanceAltitudeReply { fs, ac, .. }
        | DF::CommBAltitudeReply { fs, ac, .. } => {
            let mut line = Line::new(5);
            if let Some(altitude) = ac.0 {
                line.altitude = altitude.to_string();
            }
            line.surveillance_flags(fs, squawk);
            line
        }
        DF::SurveillanceIdentityReply { fs, id, .. }
        | DF::CommBIdentityReply { fs, id, .. } => {
            let mut line = Line::new(6);
            line.squawk = id.to_string();
            line.surveillance_flags(fs, Some(&id.to_string()));
            line
        }
        DF::AllCallReply { .. } => Line::new(8),
        DF::ExtendedSquitterADSB(adsb) => {
            es_line(&adsb.message, aircraft, timestamp)?
        }
        DF::ExtendedSquitterTisB { cf, .. } => {
            es_line(&cf.me, aircraft, timestamp)?
        }
        DF::CommDExtended { .. } => return None,
    };

    if line.kind == 5 || line.kind == 8 {
        line.ground = flag(aircraft.on_ground);
    }
    Some(line.build(msg.icao24(), timestamp))
}

fn es_line(me: &ME, aircraft: &Aircraft, timestamp: f64) -> Option<Line> {
    match me {
        ME::BDS08(identification) => {
            let mut line = Line::new(1);
            line.callsign = identification.callsign.clone();
            Some(line)
        }
        ME::BDS06(_) => {
            let mut line = Line::new(2);
            if let Some(groundspeed) = aircraft.groundspeed {
                line.groundspeed = format!("{groundspeed:.1}");
            }
            if let Some(track) = aircraft.track {
                line.track = format!("{track:.1}");
            }
            if let Some(position) = aircraft
                .position
                .filter(|_| aircraft.position_time == timestamp)
            {
                line.latitude = format!("{:.5}", position.latitude);
                line.longitude = format!("{:.5}", position.longitude);
            }
            line.ground = "-1";
            Some(line)
        }
        ME::BDS05(position) => {
            let mut line = Line::new(3);
            if let Some(altitude) = position.alt {
                line.altitude = altitude.to_string();
            }
            if let Some(position) = aircraft
                .position
                .filter(|_| aircraft.position_time == timestamp)
            {
                line.latitude = format!("{:.5}", position.latitude);
                line.longitude = format!("{:.5}", position.longitude);
            }
            Some(line)
        }
        ME::BDS09(_) => {
            let mut line = Line::new(4);
            if let Some(groundspeed) = aircraft.groundspeed {
                line.groundspeed = format!("{groundspeed:.1}");
            }
            if let Some(track) = aircraft.track {
                line.track = format!("{track:.1}");
            }
            if let Some(vertical_rate) = aircraft.vertical_rate {
                line.vertical_rate = vertical_rate.to_string();
            }
            Some(line)
        }
        ME::BDS61(status) => {
            let mut line = Line::new(6);
            line.squawk = status.squawk.to_string();
            line.emergency = squawk_flags(Some(&status.squawk.to_string()));
            Some(line)
        }
        _ => None,
    }
}

/// Parse one inbound SBS line into a partial update. Lines that are not
/// `MSG` records with a valid hex identifier yield None.
pub fn parse_line(line: &str) -> Option<SbsUpdate> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < 11 || fields[0] != "MSG" {
        return None;
    }

    let icao24 = u32::from_str_radix(fields[4].trim(), 16).ok()?;
    if icao24 == 0 {
        return None;
    }

    let field = |i: usize| -> Option<&str> {
        fields.get(i).map(|f| f.trim()).filter(|f| !f.is_empty())
    };

    Some(SbsUpdate {
        icao24,
        callsign: field(10).map(|f| f.trim_end().to_string()),
        altitude: field(11).and_then(|f| f.parse().ok()),
        groundspeed: field(12).and_then(|f| f.parse().ok()),
        track: field(13).and_then(|f| f.parse().ok()),
        latitude: field(14).and_then(|f| f.parse().ok()),
        longitude: field(15).and_then(|f| f.parse().ok()),
        vertical_rate: field(16).and_then(|f| f.parse().ok()),
        squawk: field(17).map(|f| f.to_string()),
        on_ground: field(21).map(|f| f != "0"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx1090::decode::crc::IcaoCache;
    use rx1090::decode::{accept_frame, Message};
    use crate::registry::Registry;
    use hexlit::hex;

    fn decode(frame: &[u8]) -> Message {
        let mut cache = IcaoCache::new();
        accept_frame(frame, &mut cache, 1000.).unwrap()
    }

    #[test]
    fn identification_line() {
        let msg = decode(&hex!("8d406b902015a678d4d220aa4bda"));
        let mut registry = Registry::new(None, 0., false);
        let aircraft = registry.update(&msg, 1700000000.25, None).unwrap();

        let line = format(&msg, &aircraft, 1700000000.25).unwrap();
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 22);
        assert_eq!(fields[0], "MSG");
        assert_eq!(fields[1], "1");
        assert_eq!(fields[4], "406B90");
        assert_eq!(fields[6], "2023/11/14");
        assert!(fields[7].starts_with("22:13:20.2"));
        assert_eq!(fields[10], "EZY85MH");
        assert!(line.ends_with("\r\n"));
    }

    #[test]
    fn velocity_line() {
        let msg = decode(&hex!("8D485020994409940838175B284F"));
        let mut registry = Registry::new(None, 0., false);
        let aircraft = registry.update(&msg, 1000., None).unwrap();

        let line = format(&msg, &aircraft, 1000.).unwrap();
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields[1], "4");
        assert!(fields[12].starts_with("159."));
        assert_eq!(fields[16], "-832");
    }

    #[test]
    fn inbound_line_updates() {
        let line = "MSG,3,1,1,4840D6,1,2023/11/14,22:13:20.598,\
                    2023/11/14,22:13:20.598,,34000,480.0,,51.68676,0.70129,\
                    ,,0,0,0,0";
        let update = parse_line(line).unwrap();
        assert_eq!(update.icao24, 0x4840d6);
        assert_eq!(update.altitude, Some(34000));
        assert_eq!(update.groundspeed, Some(480.));
        assert_eq!(update.latitude, Some(51.68676));
        assert_eq!(update.on_ground, Some(false));
        assert_eq!(update.squawk, None);

        assert!(parse_line("garbage").is_none());
        assert!(parse_line("MSG,3,1,1,ZZZZZZ,1").is_none());
    }
}
