use crate::decode::IdentityCode;
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * ## Aircraft Status (BDS 6,1, TC=28)
 *
 * Emergency/priority status and the current Mode A code (squawk).
 *
 * | TYPE | SUBTYPE | EMERGENCY | SQUAWK | RESERVED |
 * |------|---------|-----------|--------|----------|
 * | 5    | 3       | 3         | 13     | 32       |
 *
 * The emergency state mirrors the conventional squawk codes: 7700 sets
 * General, 7600 sets NoCommunication, 7500 sets UnlawfulInterference.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AircraftStatus {
    /// Subtype: 1 for emergency/priority status, 2 for ACAS RA broadcast
    pub subtype: AircraftStatusType,

    /// Emergency state (valid for subtype 1)
    pub emergency_state: EmergencyState,

    /// Mode A code (squawk), Gillham encoded
    pub squawk: IdentityCode,

    #[deku(bits = "32")]
    #[serde(skip)]
    pub reserved: u32,
}

impl fmt::Display for AircraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Aircraft status (BDS 6,1)")?;
        writeln!(f, "  Squawk:        {}", &self.squawk)?;
        writeln!(f, "  Emergency/priority:    {}", &self.emergency_state)?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum AircraftStatusType {
    #[deku(id = "0")]
    NoInformation,

    #[deku(id = "1")]
    #[serde(rename = "emergency_priority")]
    EmergencyPriorityStatus,

    /// Takes priority over subtype 1 for transmission
    #[deku(id = "2")]
    #[serde(rename = "acas_ra")]
    ACASRaBroadcast,

    // the matched bits are not consumed with id_pat: re-read them
    #[deku(id_pat = "_")]
    Reserved(#[deku(bits = "3")] u8),
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum EmergencyState {
    /// No emergency condition
    None = 0,

    /// General emergency (Mode A code 7700)
    General = 1,

    /// Lifeguard/Medical emergency
    Medical = 2,

    /// Minimum fuel condition
    MinimumFuel = 3,

    /// No communications (Mode A code 7600)
    NoCommunication = 4,

    /// Unlawful interference (Mode A code 7500)
    UnlawfulInterference = 5,

    /// Downed aircraft
    DownedAircraft = 6,

    /// Reserved for future use
    Reserved = 7,
}

impl fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "No emergency",
            Self::General => "General emergency (7700)",
            Self::Medical => "Lifeguard/Medical emergency",
            Self::MinimumFuel => "Minimum fuel",
            Self::NoCommunication => "No communication (7600)",
            Self::UnlawfulInterference => "Unlawful interference (7500)",
            Self::DownedAircraft => "Downed aircraft",
            Self::Reserved => "Reserved",
        };
        write!(f, "{s}")
    }
}
