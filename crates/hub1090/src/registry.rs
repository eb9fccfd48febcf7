//! The live aircraft registry.
//!
//! One record per ICAO address, fused from every accepted message. CPR
//! halves are kept in an even/odd scratchpad and resolved into a position
//! as soon as possible: global decode when the other half is fresh, local
//! decode against the previous fix or the receiver location otherwise.
//! Candidate positions pass the distance and speed gates before being
//! published. Records idle for more than [`TTL`] are swept out.

use crate::sbs::SbsUpdate;
use rx1090::decode::adsb::ME;
use rx1090::decode::bds::bds09::AirborneVelocitySubType;
use rx1090::decode::cpr::{self, CprHalf, Position};
use rx1090::decode::{Capability, Message, DF};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Seconds after which an idle record is removed
pub const TTL: f64 = 60.0;

/// Maximum age difference for an even/odd pair to decode globally
pub const CPR_PAIR_WINDOW: f64 = 10.0;

/// How long a previous fix remains a valid reference for local decodes
const REL_DECODE_WINDOW: f64 = 180.0;

/// Observations kept for the rotorcraft predicate
const VR_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy)]
struct CprSlot {
    half: CprHalf,
    surface: bool,
    nuc: u8,
    ts: f64,
}

/// One tracked aircraft
#[derive(Debug, Clone)]
pub struct Aircraft {
    pub icao24: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    /// Last time a position message was received
    pub last_seen_pos: f64,
    /// Time of the last successful position decode
    pub position_time: f64,
    pub messages: u64,

    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub category: Option<String>,
    pub emergency: bool,

    pub altitude: Option<i32>,
    pub groundspeed: Option<f64>,
    pub track: Option<f64>,
    pub heading: Option<f64>,
    pub ias: Option<u16>,
    pub tas: Option<u16>,
    pub vertical_rate: Option<i16>,

    pub position: Option<Position>,
    pub position_nuc: u8,
    /// The last fix came from a reference-relative (local) decode
    pub rel_ok: bool,
    pub distance_m: Option<f64>,
    pub on_ground: bool,
    pub rotorcraft: bool,
    pub rssi: Option<f32>,

    even: Option<CprSlot>,
    odd: Option<CprSlot>,
    vr_history: VecDeque<i16>,
}

impl Aircraft {
    fn new(icao24: u32, now: f64) -> Self {
        Self {
            icao24,
            first_seen: now,
            last_seen: now,
            last_seen_pos: 0.,
            position_time: 0.,
            messages: 0,
            callsign: None,
            squawk: None,
            category: None,
            emergency: false,
            altitude: None,
            groundspeed: None,
            track: None,
            heading: None,
            ias: None,
            tas: None,
            vertical_rate: None,
            position: None,
            position_nuc: 0,
            rel_ok: false,
            distance_m: None,
            on_ground: false,
            rotorcraft: false,
            rssi: None,
            even: None,
            odd: None,
            vr_history: VecDeque::with_capacity(VR_HISTORY),
        }
    }
}

/// Slow and oscillating vertically: probably not a fixed-wing aircraft.
///
/// True when the ground speed is below 80 kt and the vertical rate
/// spanned more than 1500 ft/min over the last [`VR_HISTORY`]
/// observations.
pub fn is_rotorcraft(
    groundspeed: Option<f64>,
    vr_history: &VecDeque<i16>,
) -> bool {
    const VR_SPAN: i32 = 1500;
    let Some(speed) = groundspeed else {
        return false;
    };
    if speed >= 80. || vr_history.len() < VR_HISTORY {
        return false;
    }
    let max = vr_history.iter().max().copied().unwrap_or(0);
    let min = vr_history.iter().min().copied().unwrap_or(0);
    i32::from(max) - i32::from(min) > VR_SPAN
}

pub struct Registry {
    aircraft: BTreeMap<u32, Aircraft>,
    home: Option<Position>,
    max_dist_m: f64,
    cpr_trace: bool,
    messages: u64,
}

impl Registry {
    pub fn new(
        home: Option<Position>,
        max_dist_m: f64,
        cpr_trace: bool,
    ) -> Self {
        Self {
            aircraft: BTreeMap::new(),
            home,
            max_dist_m,
            cpr_trace,
            messages: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Total number of messages merged since startup
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Copy out a consistent view of the registry. Readers never hold
    /// the registry lock across I/O.
    pub fn snapshot(&self) -> Vec<Aircraft> {
        self.aircraft.values().cloned().collect()
    }

    /// Remove records idle for more than [`TTL`]
    pub fn sweep(&mut self, now: f64) -> usize {
        let before = self.aircraft.len();
        self.aircraft.retain(|_, a| a.last_seen + TTL > now);
        before - self.aircraft.len()
    }

    /// Merge all fields present in `msg` into the record, creating it on
    /// first sight, and resolve CPR halves into a position when
    /// possible. Returns the updated record.
    pub fn update(
        &mut self,
        msg: &Message,
        now: f64,
        rssi: Option<f32>,
    ) -> Option<Aircraft> {
        let icao24 = msg.icao24();
        if icao24 == 0 {
            return None;
        }

        let home = self.home;
        let max_dist_m = self.max_dist_m;
        let cpr_trace = self.cpr_trace;

        let aircraft = self
            .aircraft
            .entry(icao24)
            .or_insert_with(|| Aircraft::new(icao24, now));
        if now > aircraft.last_seen {
            aircraft.last_seen = now;
        }
        aircraft.messages += 1;
        self.messages += 1;
        if rssi.is_some() {
            aircraft.rssi = rssi;
        }

        match &msg.df {
            DF::ShortAirAirSurveillance { vs, ac, .. }
            | DF::LongAirAirSurveillance { vs, ac, .. } => {
                if let Some(altitude) = ac.0 {
                    aircraft.altitude = Some(altitude);
                }
                aircraft.on_ground = *vs == 1;
            }
            DF::SurveillanceAltitudeReply { fs, ac, .. }
            | DF::CommBAltitudeReply { fs, ac, .. } => {
                if let Some(altitude) = ac.0 {
                    aircraft.altitude = Some(altitude);
                }
                aircraft.on_ground = fs.on_ground();
            }
            DF::SurveillanceIdentityReply { fs, id, .. }
            | DF::CommBIdentityReply { fs, id, .. } => {
                aircraft.squawk = Some(id.to_string());
                aircraft.on_ground = fs.on_ground();
            }
            DF::AllCallReply { capability, .. } => {
                aircraft.on_ground =
                    matches!(capability, Capability::AG_GROUND);
            }
            DF::ExtendedSquitterADSB(adsb) => {
                merge_es(aircraft, &adsb.message, now, home, max_dist_m, cpr_trace)
            }
            DF::ExtendedSquitterTisB { cf, .. } => {
                merge_es(aircraft, &cf.me, now, home, max_dist_m, cpr_trace)
            }
            DF::CommDExtended { .. } => {}
        }

        Some(aircraft.clone())
    }

    /// Merge a cooked SBS update (inbound BaseStation feed)
    pub fn apply_sbs(&mut self, update: &SbsUpdate, now: f64) {
        let aircraft = self
            .aircraft
            .entry(update.icao24)
            .or_insert_with(|| Aircraft::new(update.icao24, now));
        if now > aircraft.last_seen {
            aircraft.last_seen = now;
        }
        aircraft.messages += 1;
        self.messages += 1;

        if let Some(callsign) = &update.callsign {
            aircraft.callsign = Some(callsign.clone());
        }
        if update.altitude.is_some() {
            aircraft.altitude = update.altitude;
        }
        if update.groundspeed.is_some() {
            aircraft.groundspeed = update.groundspeed;
        }
        if update.track.is_some() {
            aircraft.track = update.track;
        }
        if update.vertical_rate.is_some() {
            aircraft.vertical_rate = update.vertical_rate;
        }
        if let Some(squawk) = &update.squawk {
            aircraft.squawk = Some(squawk.clone());
        }
        if let Some(on_ground) = update.on_ground {
            aircraft.on_ground = on_ground;
        }
        if let (Some(latitude), Some(longitude)) =
            (update.latitude, update.longitude)
        {
            if (-90. ..=90.).contains(&latitude)
                && (-180. ..=180.).contains(&longitude)
            {
                let position = Position {
                    latitude,
                    longitude,
                };
                aircraft.position = Some(position);
                aircraft.position_time = now;
                aircraft.last_seen_pos = now;
                aircraft.rel_ok = false;
                aircraft.distance_m = self
                    .home
                    .map(|home| cpr::haversine_m(&home, &position));
            }
        }
    }
}

fn merge_es(
    aircraft: &mut Aircraft,
    me: &ME,
    now: f64,
    home: Option<Position>,
    max_dist_m: f64,
    cpr_trace: bool,
) {
    match me {
        ME::BDS08(identification) => {
            if !identification.callsign.is_empty() {
                aircraft.callsign = Some(identification.callsign.clone());
            }
            aircraft.category = Some(format!(
                "{}{}",
                identification.tc, identification.ca
            ));
        }
        ME::BDS05(position) => {
            if position.alt.is_some() {
                aircraft.altitude = position.alt;
            }
            aircraft.on_ground = false;
            let slot = CprSlot {
                half: position.into(),
                surface: false,
                nuc: position.nuc_p,
                ts: now,
            };
            resolve_position(
                aircraft, slot, now, home, max_dist_m, cpr_trace,
            );
        }
        ME::BDS06(position) => {
            if position.groundspeed.is_some() {
                aircraft.groundspeed = position.groundspeed;
            }
            if position.track.is_some() {
                aircraft.track = position.track;
            }
            aircraft.on_ground = true;
            aircraft.altitude = None;
            let slot = CprSlot {
                half: position.into(),
                surface: true,
                nuc: position.nuc_p,
                ts: now,
            };
            resolve_position(
                aircraft, slot, now, home, max_dist_m, cpr_trace,
            );
        }
        ME::BDS09(velocity) => {
            if let Some(vr) = velocity.vertical_rate {
                aircraft.vertical_rate = Some(vr);
                if aircraft.vr_history.len() == VR_HISTORY {
                    aircraft.vr_history.pop_front();
                }
                aircraft.vr_history.push_back(vr);
            }
            match &velocity.velocity {
                AirborneVelocitySubType::GroundSpeedDecoding(gs) => {
                    aircraft.groundspeed = Some(gs.groundspeed);
                    aircraft.track = Some(gs.track);
                }
                AirborneVelocitySubType::AirspeedSubsonic(airspeed) => {
                    match airspeed.airspeed_type {
                        rx1090::decode::bds::bds09::AirspeedType::IAS => {
                            aircraft.ias = airspeed.airspeed
                        }
                        rx1090::decode::bds::bds09::AirspeedType::TAS => {
                            aircraft.tas = airspeed.airspeed
                        }
                    }
                    aircraft.heading = airspeed.heading;
                }
                AirborneVelocitySubType::AirspeedSupersonic(airspeed) => {
                    match airspeed.airspeed_type {
                        rx1090::decode::bds::bds09::AirspeedType::IAS => {
                            aircraft.ias = airspeed.airspeed
                        }
                        rx1090::decode::bds::bds09::AirspeedType::TAS => {
                            aircraft.tas = airspeed.airspeed
                        }
                    }
                    aircraft.heading = airspeed.heading;
                }
                _ => {}
            }
            aircraft.rotorcraft =
                is_rotorcraft(aircraft.groundspeed, &aircraft.vr_history);
        }
        ME::BDS61(status) => {
            aircraft.squawk = Some(status.squawk.to_string());
            aircraft.emergency = !matches!(
                status.emergency_state,
                rx1090::decode::bds::bds61::EmergencyState::None
            );
        }
        _ => {}
    }
}

/// Store a CPR half and attempt, in order: global decode when the other
/// half is fresh, local decode when a reference is permitted, nothing
/// otherwise. Successful candidates pass the distance and speed gates
/// before the position is published.
fn resolve_position(
    aircraft: &mut Aircraft,
    slot: CprSlot,
    now: f64,
    home: Option<Position>,
    max_dist_m: f64,
    cpr_trace: bool,
) {
    use rx1090::decode::cpr::CPRFormat;

    aircraft.last_seen_pos = now;
    match slot.half.parity {
        CPRFormat::Even => aircraft.even = Some(slot),
        CPRFormat::Odd => aircraft.odd = Some(slot),
    }
    let other = match slot.half.parity {
        CPRFormat::Even => aircraft.odd.as_ref(),
        CPRFormat::Odd => aircraft.even.as_ref(),
    };

    // (position, nuc, relative decode)
    let mut candidate: Option<(Position, u8, bool)> = None;

    if let Some(other) = other.filter(|other| {
        other.surface == slot.surface
            && (now - other.ts) >= 0.
            && (now - other.ts) < CPR_PAIR_WINDOW
    }) {
        let decoded = if slot.surface {
            // quadrant disambiguation needs a reference: the previous
            // position when it came from a relative decode, the
            // receiver location otherwise
            let reference = aircraft
                .position
                .filter(|_| aircraft.rel_ok)
                .or(home);
            reference.and_then(|reference| {
                cpr::surface_position(&other.half, &slot.half, &reference)
            })
        } else {
            cpr::airborne_position(&other.half, &slot.half)
        };
        candidate =
            decoded.map(|pos| (pos, slot.nuc.min(other.nuc), false));
        if cpr_trace && candidate.is_none() {
            debug!(
                "icao24={:06x}: global {} decode failed",
                aircraft.icao24,
                if slot.surface { "surface" } else { "airborne" },
            );
        }
    }

    if candidate.is_none() {
        let previous = aircraft
            .position
            .filter(|_| now - aircraft.position_time < REL_DECODE_WINDOW);
        let reference = match previous {
            Some(position) => Some(position),
            // the receiver location only disambiguates airborne
            // decodes, and only when the distance limit keeps the
            // aircraft within the CPR cell
            None if !slot.surface => home.filter(|_| {
                max_dist_m > 0. && max_dist_m <= cpr::AIRBORNE_CELL_M
            }),
            None => None,
        };
        if let Some(reference) = reference {
            let decoded = if slot.surface {
                cpr::surface_position_with_reference(
                    &slot.half,
                    reference.latitude,
                    reference.longitude,
                )
            } else {
                cpr::airborne_position_with_reference(
                    &slot.half,
                    reference.latitude,
                    reference.longitude,
                )
            };
            candidate = decoded.map(|pos| (pos, slot.nuc, true));
        }
    }

    let Some((position, nuc, relative)) = candidate else {
        return;
    };

    if let Some(home) = home {
        if !cpr::within_range(&home, &position, max_dist_m) {
            if cpr_trace {
                debug!(
                    "icao24={:06x}: position discarded by distance gate",
                    aircraft.icao24
                );
            }
            return;
        }
    }
    if let Some(previous) = aircraft.position {
        let elapsed = now - aircraft.position_time;
        if !cpr::plausible_speed(
            &previous,
            &position,
            elapsed,
            aircraft.groundspeed,
            slot.surface,
        ) {
            if cpr_trace {
                debug!(
                    "icao24={:06x}: position discarded by speed gate",
                    aircraft.icao24
                );
            }
            return;
        }
    }

    aircraft.position = Some(position);
    aircraft.position_nuc = nuc;
    aircraft.rel_ok = relative;
    aircraft.position_time = now;
    aircraft.distance_m =
        home.map(|home| cpr::haversine_m(&home, &position));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx1090::decode::adsb::ADSB;
    use rx1090::decode::bds::bds05::AirbornePosition;
    use rx1090::decode::bds::bds08::{
        AircraftIdentification, Typecode, WakeVortex,
    };
    use rx1090::decode::cpr::CPRFormat;
    use rx1090::decode::ICAO;

    fn es(icao24: u32, me: ME) -> Message {
        Message {
            crc: 0,
            df: DF::ExtendedSquitterADSB(ADSB {
                capability: Capability::AG_AIRBORNE,
                icao24: ICAO(icao24),
                message: me,
                parity: ICAO(0),
            }),
        }
    }

    fn identification(callsign: &str) -> ME {
        ME::BDS08(AircraftIdentification {
            tc: Typecode::A,
            ca: 3,
            wake_vortex: WakeVortex::Medium1,
            callsign: callsign.to_string(),
        })
    }

    fn airborne_cpr(
        parity: CPRFormat,
        lat_cpr: u32,
        lon_cpr: u32,
    ) -> ME {
        ME::BDS05(AirbornePosition {
            tc: 11,
            nuc_p: 7,
            ss: rx1090::decode::bds::bds05::SurveillanceStatus::NoCondition,
            saf_or_nicb: 0,
            alt: Some(38000),
            source: rx1090::decode::bds::bds05::Source::Barometric,
            t: false,
            parity,
            lat_cpr,
            lon_cpr,
            latitude: None,
            longitude: None,
        })
    }

    #[test]
    fn merge_keeps_disjoint_fields() {
        let mut registry = Registry::new(None, 0., false);

        let first = es(0x4840d6, identification("BAW123"));
        registry.update(&first, 1000.0, None).unwrap();

        let second = SbsUpdate {
            icao24: 0x4840d6,
            altitude: Some(34000),
            groundspeed: Some(480.),
            ..Default::default()
        };
        registry.apply_sbs(&second, 1001.0);

        let aircraft = &registry.snapshot()[0];
        assert_eq!(aircraft.callsign.as_deref(), Some("BAW123"));
        assert_eq!(aircraft.altitude, Some(34000));
        assert_eq!(aircraft.groundspeed, Some(480.));
        assert_eq!(aircraft.messages, 2);
        assert!(aircraft.last_seen >= aircraft.first_seen);
    }

    #[test]
    fn sweep_removes_idle_records() {
        let mut registry = Registry::new(None, 0., false);
        registry.update(&es(0x4840d6, identification("BAW123")), 1000., None);
        registry.update(&es(0x406b90, identification("EZY85MH")), 1055., None);

        assert_eq!(registry.sweep(1059.), 0);
        assert_eq!(registry.len(), 2);

        // 0x4840d6 was last seen more than TTL ago
        assert_eq!(registry.sweep(1061.), 1);
        let survivors = registry.snapshot();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].icao24, 0x406b90);
    }

    #[test]
    fn global_decode_from_an_even_odd_pair() {
        let mut registry = Registry::new(None, 0., false);
        let icao24 = 0x4840d6;

        registry.update(
            &es(icao24, airborne_cpr(CPRFormat::Even, 80536, 9432)),
            1000.,
            None,
        );
        let aircraft = registry
            .update(
                &es(icao24, airborne_cpr(CPRFormat::Odd, 61720, 9192)),
                1002.,
                None,
            )
            .unwrap();

        let position = aircraft.position.unwrap();
        assert!((position.latitude - 51.686763).abs() < 1e-5);
        assert!((position.longitude - 0.701294).abs() < 1e-5);
        assert_eq!(aircraft.position_nuc, 7);
        assert!(!aircraft.rel_ok);
        assert!((-90. ..=90.).contains(&position.latitude));
        assert!((-180. ..=180.).contains(&position.longitude));
    }

    #[test]
    fn expired_halves_never_pair() {
        let mut registry = Registry::new(None, 0., false);
        let icao24 = 0x4840d6;

        registry.update(
            &es(icao24, airborne_cpr(CPRFormat::Even, 80536, 9432)),
            1000.,
            None,
        );
        // the even half is 11 s old: outside the pair window
        let aircraft = registry
            .update(
                &es(icao24, airborne_cpr(CPRFormat::Odd, 61720, 9192)),
                1011.,
                None,
            )
            .unwrap();
        assert!(aircraft.position.is_none());
    }

    #[test]
    fn speed_gate_discards_teleportation() {
        let mut registry = Registry::new(None, 0., false);
        let icao24 = 0x4840d6;

        // a first fix near (51.6868, 0.7013)
        registry.update(
            &es(icao24, airborne_cpr(CPRFormat::Even, 80536, 9432)),
            1000.,
            None,
        );
        registry.update(
            &es(icao24, airborne_cpr(CPRFormat::Odd, 61720, 9192)),
            1002.,
            None,
        );

        // ten seconds later, a pair decoding about one degree north
        let (even, odd) = (
            cpr_pair_near(52.6868, 0.7013, CPRFormat::Even),
            cpr_pair_near(52.6868, 0.7013, CPRFormat::Odd),
        );
        registry.update(&es(icao24, even), 1012., None);
        let aircraft = registry
            .update(&es(icao24, odd), 1012.5, None)
            .unwrap();

        let position = aircraft.position.unwrap();
        assert!((position.latitude - 51.686763).abs() < 1e-5);
    }

    /// Encode a position into an airborne CPR half (test helper)
    fn cpr_pair_near(lat: f64, lon: f64, parity: CPRFormat) -> ME {
        let (nz, p) = match parity {
            CPRFormat::Even => (60., 0u64),
            CPRFormat::Odd => (59., 1u64),
        };
        let d_lat = 360. / nz;
        let yz = (131_072. * (lat.rem_euclid(d_lat)) / d_lat + 0.5).floor();
        let rlat = d_lat * (yz / 131_072. + (lat / d_lat).floor());
        let nl = rx1090::decode::cpr::nl(rlat) - p;
        let d_lon = if nl > 0 { 360. / nl as f64 } else { 360. };
        let xz = (131_072. * (lon.rem_euclid(d_lon)) / d_lon + 0.5).floor();
        airborne_cpr(
            parity,
            (yz as i64).rem_euclid(131_072) as u32,
            (xz as i64).rem_euclid(131_072) as u32,
        )
    }

    #[test]
    fn rotorcraft_predicate() {
        let slow = Some(60.);
        let oscillating: VecDeque<i16> =
            [800, -900, 700, -800, 900].into_iter().collect();
        let steady: VecDeque<i16> =
            [-100, 0, 100, 0, -100].into_iter().collect();
        let short: VecDeque<i16> = [800, -900].into_iter().collect();

        assert!(is_rotorcraft(slow, &oscillating));
        assert!(!is_rotorcraft(Some(200.), &oscillating));
        assert!(!is_rotorcraft(slow, &steady));
        assert!(!is_rotorcraft(slow, &short));
        assert!(!is_rotorcraft(None, &oscillating));
    }
}
