//! JSON views of the registry: the legacy flat `data.json`, the
//! `aircraft.json` envelope, the receiver descriptor and the service
//! statistics.

use crate::feed::Stats;
use crate::registry::Aircraft;
use rx1090::decode::cpr::Position;
use serde::Serialize;
use serde_json::{json, Value};

/// One entry of the `aircraft.json` envelope; fields absent from the
/// record are omitted
#[derive(Debug, Serialize)]
struct AircraftEntry {
    hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    flight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_baro: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_m: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ias: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tas: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    baro_rate: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nucp: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seen_pos: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r_dst: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    emergency: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    rotorcraft: bool,
    ground: bool,
    seen: f64,
    messages: u64,
}

fn entry(aircraft: &Aircraft, now: f64, metric: bool) -> AircraftEntry {
    let position = aircraft.position;
    AircraftEntry {
        hex: format!("{:06x}", aircraft.icao24),
        flight: aircraft.callsign.clone(),
        squawk: aircraft.squawk.clone(),
        category: aircraft.category.clone(),
        alt_baro: aircraft.altitude,
        alt_m: aircraft
            .altitude
            .filter(|_| metric)
            .map(|ft| (f64::from(ft) / 3.28084) as i32),
        gs: aircraft.groundspeed,
        track: aircraft.track,
        true_heading: aircraft.heading,
        ias: aircraft.ias,
        tas: aircraft.tas,
        baro_rate: aircraft.vertical_rate,
        lat: position.map(|p| p.latitude),
        lon: position.map(|p| p.longitude),
        nucp: position.map(|_| aircraft.position_nuc),
        seen_pos: position.map(|_| now - aircraft.position_time),
        r_dst: aircraft.distance_m.map(|d| d / 1852.), // NM
        rssi: aircraft.rssi,
        emergency: aircraft.emergency,
        rotorcraft: aircraft.rotorcraft,
        ground: aircraft.on_ground,
        seen: now - aircraft.last_seen,
        messages: aircraft.messages,
    }
}

/// The tar1090-compatible envelope served on `/data/aircraft.json`
pub fn aircraft_json(
    snapshot: &[Aircraft],
    now: f64,
    total_messages: u64,
    metric: bool,
) -> Value {
    let aircraft: Vec<AircraftEntry> =
        snapshot.iter().map(|a| entry(a, now, metric)).collect();
    json!({
        "now": now,
        "messages": total_messages,
        "aircraft": aircraft,
    })
}

/// The legacy flat array served on `/data.json`
pub fn legacy_json(snapshot: &[Aircraft], now: f64) -> Value {
    let aircraft: Vec<Value> = snapshot
        .iter()
        .map(|a| {
            json!({
                "hex": format!("{:06x}", a.icao24),
                "flight": a.callsign.clone().unwrap_or_default(),
                "lat": a.position.map(|p| p.latitude).unwrap_or(0.),
                "lon": a.position.map(|p| p.longitude).unwrap_or(0.),
                "altitude": a.altitude.unwrap_or(0),
                "track": a.track.unwrap_or(0.) as i32,
                "speed": a.groundspeed.unwrap_or(0.) as i32,
                "messages": a.messages,
                "seen": (now - a.last_seen) as u64,
            })
        })
        .collect();
    Value::Array(aircraft)
}

/// The receiver descriptor served on `/data/receiver.json`
pub fn receiver_json(home: Option<Position>, refresh_ms: u64) -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "refresh": refresh_ms,
        "history": 0,
        "lat": home.map(|h| h.latitude),
        "lon": home.map(|h| h.longitude),
    })
}

/// Per-service counters served on `/data/stats.json`
pub fn stats_json(stats: &Stats, aircraft_count: usize) -> Value {
    json!({
        "aircraft": aircraft_count,
        "decode": stats.decode.to_json(),
        "services": {
            "raw_in": stats.raw_in.to_json(),
            "raw_out": stats.raw_out.to_json(),
            "sbs_in": stats.sbs_in.to_json(),
            "sbs_out": stats.sbs_out.to_json(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use rx1090::decode::crc::IcaoCache;
    use rx1090::decode::accept_frame;
    use hexlit::hex;

    #[test]
    fn aircraft_envelope() {
        let mut registry = Registry::new(None, 0., false);
        let mut cache = IcaoCache::new();
        let msg = accept_frame(
            &hex!("8d406b902015a678d4d220aa4bda"),
            &mut cache,
            1000.,
        )
        .unwrap();
        registry.update(&msg, 1000., Some(-12.5));

        let value =
            aircraft_json(&registry.snapshot(), 1002., registry.messages(), false);
        assert_eq!(value["messages"], 1);
        let aircraft = value["aircraft"].as_array().unwrap();
        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0]["hex"], "406b90");
        assert_eq!(aircraft[0]["flight"], "EZY85MH");
        assert_eq!(aircraft[0]["seen"], 2.0);
        // no position yet: the coordinates are absent, not null
        assert!(aircraft[0].get("lat").is_none());
    }

    #[test]
    fn receiver_descriptor() {
        let home = Some(Position {
            latitude: 43.6,
            longitude: 1.43,
        });
        let value = receiver_json(home, 1000);
        assert_eq!(value["lat"], 43.6);
        assert_eq!(value["refresh"], 1000);
    }
}
