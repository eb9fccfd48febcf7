pub mod adsb;
pub mod bds;
pub mod cpr;
pub mod crc;
pub mod time;

use adsb::ADSB;
use crc::IcaoCache;
use deku::error::NeedSize;
use deku::no_std_io::Cursor;
use deku::prelude::*;
use deku::reader::Reader;
use serde::ser::{Serialize, Serializer};
use serde::Serialize as DeriveSerialize;
use std::fmt;

/**
 * DF stands for Downlink Format.
 *
 * A number between 0 and 31 encoding the type of the message, and whether
 * it is short (56 bits) or long (112 bits).
 *
 * |  [`DF`]  |  Name                               |  Section    |
 * | -------- | ----------------------------------- | ----------- |
 * | 0        | [`DF::ShortAirAirSurveillance`]     | 3.1.2.8.2   |
 * | 4        | [`DF::SurveillanceAltitudeReply`]   | 3.1.2.6.5   |
 * | 5        | [`DF::SurveillanceIdentityReply`]   | 3.1.2.6.7   |
 * | 11       | [`DF::AllCallReply`]                | 2.1.2.5.2.2 |
 * | 16       | [`DF::LongAirAirSurveillance`]      | 3.1.2.8.3   |
 * | 17       | [`DF::ExtendedSquitterADSB`]        | 3.1.2.8.6   |
 * | 18       | [`DF::ExtendedSquitterTisB`]        | 3.1.2.8.7   |
 * | 20       | [`DF::CommBAltitudeReply`]          | 3.1.2.6.6   |
 * | 21       | [`DF::CommBIdentityReply`]          | 3.1.2.6.8   |
 * | 24       | [`DF::CommDExtended`]               | 3.1.2.7.3   |
 */
#[derive(Debug, PartialEq, DeriveSerialize, DekuRead, Clone)]
#[deku(id_type = "u8", bits = "5", ctx = "crc: u32")]
#[serde(tag = "DF")]
pub enum DF {
    /// DF=0: Short Air-Air Surveillance (3.1.2.8.2)
    #[deku(id = "0")]
    #[serde(rename = "DF0")]
    ShortAirAirSurveillance {
        /// Vertical status (airborne: 0, on ground: 1)
        #[deku(bits = "1")]
        vs: u8,
        /// Cross-link capability
        #[deku(bits = "1")]
        #[serde(skip)]
        cc: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        unused: u8,
        /// Sensitivity level, ACAS
        #[deku(bits = "3")]
        #[serde(skip)]
        sl: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        unused1: u8,
        /// Reply information
        #[deku(bits = "4")]
        #[serde(skip)]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        unused2: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// ICAO address recovered from the address/parity field
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=4: Surveillance Altitude Reply (3.1.2.6.5)
    #[deku(id = "4")]
    #[serde(rename = "DF4")]
    SurveillanceAltitudeReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink Request
        #[serde(skip)]
        dr: DownlinkRequest,
        /// Utility Message
        #[serde(skip)]
        um: UtilityMessage,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=5: Surveillance Identity Reply (3.1.2.6.7)
    #[deku(id = "5")]
    #[serde(rename = "DF5")]
    SurveillanceIdentityReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink Request
        #[serde(skip)]
        dr: DownlinkRequest,
        /// Utility Message
        #[serde(skip)]
        um: UtilityMessage,
        /// Identity code (squawk)
        #[serde(rename = "squawk")]
        id: IdentityCode,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=11: All-call reply (2.1.2.5.2.2)
    #[deku(id = "11")]
    #[serde(rename = "DF11")]
    AllCallReply {
        /// Capability
        capability: Capability,
        /// Address Announced
        #[serde(rename = "icao24")]
        icao: ICAO,
        /// Parity/Interrogator identifier
        #[serde(skip)]
        p_icao: ICAO,
    },

    /// DF=16: Long Air-Air Surveillance (3.1.2.8.3)
    #[deku(id = "16")]
    #[serde(rename = "DF16")]
    LongAirAirSurveillance {
        /// Vertical Status (airborne: 0, on ground: 1)
        #[deku(bits = "1")]
        vs: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved1: u8,
        /// Sensitivity Level (inoperative: 0)
        #[deku(bits = "3")]
        #[serde(skip)]
        sl: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved2: u8,
        /// Reply information
        #[deku(bits = "4")]
        #[serde(skip)]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved3: u8,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// Message, ACAS (56 bits)
        #[deku(count = "7")]
        #[serde(skip)]
        mv: Vec<u8>,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=17: Extended Squitter ADS-B (3.1.2.8.6)
    #[deku(id = "17")]
    #[serde(rename = "ADSB")]
    ExtendedSquitterADSB(ADSB),

    /// DF=18: Extended Squitter Supplementary (3.1.2.8.7)
    ///
    /// Non-Transponder-based ADS-B transmitting subsystems and TIS-B
    /// transmitting equipment, i.e. equipment that cannot be interrogated.
    #[deku(id = "18")]
    #[serde(rename = "TISB")]
    ExtendedSquitterTisB {
        /// Enum containing the message
        cf: ControlField,
        /// Parity/interrogator identifier
        #[serde(skip)]
        pi: ICAO,
    },

    /// DF=20: Comm-B Altitude Reply (3.1.2.6.6)
    #[deku(id = "20")]
    #[serde(rename = "DF20")]
    CommBAltitudeReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink Request
        #[serde(skip)]
        dr: DownlinkRequest,
        /// Utility Message
        #[serde(skip)]
        um: UtilityMessage,
        /// Altitude code on 13 bits
        #[serde(rename = "altitude")]
        ac: AC13Field,
        /// Message, Comm-B (content negotiated out of band)
        #[deku(count = "7")]
        #[serde(skip)]
        mb: Vec<u8>,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=21: Comm-B Identity Reply (3.1.2.6.8)
    #[deku(id = "21")]
    #[serde(rename = "DF21")]
    CommBIdentityReply {
        /// Flight Status
        fs: FlightStatus,
        /// Downlink Request
        #[serde(skip)]
        dr: DownlinkRequest,
        /// Utility Message
        #[serde(skip)]
        um: UtilityMessage,
        /// Identity code (squawk)
        #[serde(rename = "squawk")]
        id: IdentityCode,
        /// Message, Comm-B (content negotiated out of band)
        #[deku(count = "7")]
        #[serde(skip)]
        mb: Vec<u8>,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=24: Comm-D Extended Length Message (3.1.2.7.3)
    #[deku(id_pat = "24..=31")]
    #[serde(rename = "DF24")]
    CommDExtended {
        #[deku(bits = "2")]
        #[serde(skip)]
        df: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        spare: u8,
        /// Control, ELM
        #[serde(skip)]
        ke: KE,
        /// Number of D-segment
        #[deku(bits = "4")]
        nd: u8,
        /// Message, Comm-D, 80 bits
        #[deku(count = "10")]
        #[serde(skip)]
        md: Vec<u8>,
        /// Address/Parity
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },
}

/// The entry point to Mode S and ADS-B decoding
///
/// Use as [`Message::from_frame`] once the CRC has been verified or
/// repaired, or go through [`accept_frame`] which performs the whole
/// acceptance logic.
#[derive(Debug, PartialEq, DeriveSerialize, Clone)]
pub struct Message {
    /// Syndrome of the whole frame: zero for ADS-B, icao24 otherwise
    #[serde(skip)]
    pub crc: u32,

    /// The Downlink Format encoded in the first 5 bits
    #[serde(flatten)]
    pub df: DF,
}

impl Message {
    /// Decode a 7- or 14-byte frame.
    ///
    /// The syndrome is computed first and threaded into the parser so that
    /// the address/parity formats expose their recovered ICAO address.
    /// Extended squitters (DF 17/18) with a non-zero syndrome are refused.
    pub fn from_frame(frame: &[u8]) -> Result<Message, DekuError> {
        let df = frame
            .first()
            .map(|b| b >> 3)
            .ok_or(DekuError::Incomplete(NeedSize::new(8)))?;

        let expected = crc::frame_bytes(df);
        if frame.len() != expected {
            return Err(DekuError::Incomplete(NeedSize::new(expected * 8)));
        }

        let crc = crc::syndrome(frame);
        if matches!(df, 17 | 18) && crc != 0 {
            return Err(DekuError::Assertion(
                format!("Invalid CRC in ADS-B message: {crc}").into(),
            ));
        }

        let mut cursor = Cursor::new(frame);
        let mut reader = Reader::new(&mut cursor);
        let df = DF::from_reader_with_ctx(&mut reader, crc)?;
        Ok(Message { crc, df })
    }

    /// The ICAO address announced or recovered from the parity overlay
    pub fn icao24(&self) -> u32 {
        match &self.df {
            DF::ShortAirAirSurveillance { ap, .. } => ap.0,
            DF::SurveillanceAltitudeReply { ap, .. } => ap.0,
            DF::SurveillanceIdentityReply { ap, .. } => ap.0,
            DF::AllCallReply { icao, .. } => icao.0,
            DF::LongAirAirSurveillance { ap, .. } => ap.0,
            DF::ExtendedSquitterADSB(adsb) => adsb.icao24.0,
            DF::ExtendedSquitterTisB { cf, .. } => cf.aa.0,
            DF::CommBAltitudeReply { ap, .. } => ap.0,
            DF::CommBIdentityReply { ap, .. } => ap.0,
            DF::CommDExtended { ap, .. } => ap.0,
        }
    }
}

/// A frame refused by the acceptance logic of [`accept_frame`]
#[derive(Debug, PartialEq)]
pub enum FrameError {
    /// Non-zero syndrome on a format whose parity is stored in clear
    Crc(u32),
    /// Address/parity frame whose address was never confirmed in clear
    UnknownIcao(u32),
    /// Downlink format outside the decoded set
    UnknownDF(u8),
    /// Frame length does not match the downlink format
    Length { expected: usize, found: usize },
    /// Bit-level decoding error
    Deku(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc(s) => write!(f, "CRC syndrome {s:06x}"),
            Self::UnknownIcao(icao) => {
                write!(f, "unconfirmed ICAO address {icao:06x}")
            }
            Self::UnknownDF(df) => write!(f, "unknown downlink format {df}"),
            Self::Length { expected, found } => {
                write!(f, "expected {expected} bytes, found {found}")
            }
            Self::Deku(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<DekuError> for FrameError {
    fn from(e: DekuError) -> Self {
        FrameError::Deku(e.to_string())
    }
}

/// Full acceptance logic for a raw frame, local or network-fed.
///
/// DF 11, 17 and 18 verify against a zero syndrome and confirm their
/// address in `cache`; the address/parity overlay formats are accepted
/// only when the recovered address is fresh in `cache`.
pub fn accept_frame(
    frame: &[u8],
    cache: &mut IcaoCache,
    now: f64,
) -> Result<Message, FrameError> {
    let df = frame.first().map(|b| b >> 3).ok_or(FrameError::Length {
        expected: crc::MODES_SHORT_MSG_BYTES,
        found: 0,
    })?;
    let expected = crc::frame_bytes(df);
    if frame.len() != expected {
        return Err(FrameError::Length {
            expected,
            found: frame.len(),
        });
    }

    let syndrome = crc::syndrome(frame);
    match df {
        11 | 17 | 18 => {
            if syndrome != 0 {
                return Err(FrameError::Crc(syndrome));
            }
            let msg = Message::from_frame(frame)?;
            cache.record(msg.icao24(), now);
            Ok(msg)
        }
        0 | 4 | 5 | 16 | 20 | 21 | 24..=31 => {
            if !cache.recent(syndrome, now) {
                return Err(FrameError::UnknownIcao(syndrome));
            }
            Ok(Message::from_frame(frame)?)
        }
        df => Err(FrameError::UnknownDF(df)),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let crc = self.crc;
        match &self.df {
            DF::ShortAirAirSurveillance { vs, ac, .. } => {
                writeln!(f, " DF0. Short Air-Air Surveillance")?;
                writeln!(f, "  ICAO Address:  {crc:06x} (Mode S / ADS-B)")?;
                if *vs == 0 {
                    writeln!(f, "  Air/Ground:    airborne")?;
                } else {
                    writeln!(f, "  Air/Ground:    ground")?;
                }
                if let AC13Field(Some(altitude)) = ac {
                    writeln!(f, "  Altitude:      {altitude} ft barometric")?;
                }
            }
            DF::SurveillanceAltitudeReply { fs, ac, .. } => {
                writeln!(f, " DF4. Surveillance, Altitude Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x} (Mode S / ADS-B)")?;
                writeln!(f, "  Air/Ground:    {fs}")?;
                if let AC13Field(Some(altitude)) = ac {
                    writeln!(f, "  Altitude:      {altitude} ft barometric")?;
                }
            }
            DF::SurveillanceIdentityReply { fs, id, .. } => {
                writeln!(f, " DF5. Surveillance, Identity Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x} (Mode S / ADS-B)")?;
                writeln!(f, "  Air/Ground:    {fs}")?;
                writeln!(f, "  Squawk:        {id}")?;
            }
            DF::AllCallReply {
                capability, icao, ..
            } => {
                writeln!(f, " DF11. All Call Reply")?;
                writeln!(f, "  ICAO Address:  {icao} (Mode S / ADS-B)")?;
                writeln!(f, "  Air/Ground:    {capability}")?;
            }
            DF::LongAirAirSurveillance { vs, ac, .. } => {
                writeln!(f, " DF16. Long Air-Air ACAS")?;
                writeln!(f, "  ICAO Address:  {crc:06x} (Mode S / ADS-B)")?;
                if *vs == 0 {
                    writeln!(f, "  Air/Ground:    airborne")?;
                } else {
                    writeln!(f, "  Air/Ground:    ground")?;
                }
                if let AC13Field(Some(altitude)) = ac {
                    writeln!(f, "  Baro altitude: {altitude} ft")?;
                }
            }
            DF::ExtendedSquitterADSB(msg) => {
                write!(f, "{msg}")?;
            }
            DF::ExtendedSquitterTisB { cf, .. } => {
                writeln!(f, " DF18. Extended Squitter {}", cf.t)?;
                writeln!(f, "  Address:       {}", cf.aa)?;
                write!(f, "{}", cf.me)?;
            }
            DF::CommBAltitudeReply { ac, .. } => {
                writeln!(f, " DF20. Comm-B, Altitude Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                if let AC13Field(Some(altitude)) = ac {
                    writeln!(f, "  Altitude:      {altitude} ft")?;
                }
            }
            DF::CommBIdentityReply { id, .. } => {
                writeln!(f, " DF21. Comm-B, Identity Reply")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
                writeln!(f, "  Squawk:        {id}")?;
            }
            DF::CommDExtended { .. } => {
                writeln!(f, " DF24. Comm-D Extended Length Message")?;
                writeln!(f, "  ICAO Address:  {crc:06x}")?;
            }
        }
        Ok(())
    }
}

/// ICAO 24-bit address recovered from an address/parity field
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
#[deku(ctx = "crc: u32")]
pub struct IcaoParity(
    // The final bits were already consumed when computing the syndrome,
    // so the raw value is discarded in favour of the context.
    #[deku(bits = "24", map = "|_v: u32| -> Result<_, DekuError> { Ok(crc) }")]
    pub u32,
);

impl fmt::Debug for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for IcaoParity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let icao = format!("{:06x}", &self.0);
        serializer.serialize_str(&icao)
    }
}

/// ICAO 24-bit address, commonly used to reference airframes
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
pub struct ICAO(#[deku(bits = "24", endian = "big")] pub u32);

impl fmt::Debug for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for ICAO {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for ICAO {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let icao = format!("{:06x}", &self.0);
        serializer.serialize_str(&icao)
    }
}

impl core::str::FromStr for ICAO {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let num = u32::from_str_radix(s, 16)?;
        Ok(Self(num))
    }
}

/// 13 bit identity code (squawk code), a 4-octal digit identifier
#[derive(PartialEq, Eq, DekuRead, Copy, Clone)]
pub struct IdentityCode(#[deku(reader = "Self::read(deku::reader)")] pub u16);

impl IdentityCode {
    fn read<R: deku::no_std_io::Read + std::io::Seek>(
        reader: &mut Reader<R>,
    ) -> Result<u16, DekuError> {
        let num = u16::from_reader_with_ctx(
            reader,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(13)),
        )?;
        Ok(decode_id13(num))
    }
}

impl fmt::Debug for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for IdentityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for IdentityCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let squawk = format!("{:04x}", &self.0);
        serializer.serialize_str(&squawk)
    }
}

/// 13 bit encoded altitude in ft, with the M (metric) and Q (25 ft
/// granularity) bits handled, Gillham coding otherwise
#[derive(Debug, PartialEq, Eq, DeriveSerialize, DekuRead, Copy, Clone)]
pub struct AC13Field(
    #[deku(reader = "Self::read(deku::reader)")] pub Option<i32>,
);

impl AC13Field {
    fn read<R: deku::no_std_io::Read + std::io::Seek>(
        reader: &mut Reader<R>,
    ) -> Result<Option<i32>, DekuError> {
        let num = u16::from_reader_with_ctx(
            reader,
            (deku::ctx::Endian::Big, deku::ctx::BitSize(13)),
        )?;
        Ok(decode_ac13(num))
    }
}

fn decode_ac13(ac13field: u16) -> Option<i32> {
    if ac13field == 0 {
        return None;
    }
    let m_bit = ac13field & 0x0040;
    let q_bit = ac13field & 0x0010;

    if m_bit != 0 {
        let meters = ((ac13field & 0x1f80) >> 2) | (ac13field & 0x003f);
        Some((f64::from(meters) * 3.28084) as i32)
    } else if q_bit != 0 {
        // 11 bit integer resulting from the removal of bits Q and M
        let n = ((ac13field & 0x1f80) >> 2)
            | ((ac13field & 0x0020) >> 1)
            | (ac13field & 0x000f);
        Some(i32::from(n) * 25 - 1000) // 25 ft interval
    } else {
        // 11 bit Gillham coded altitude
        gray2alt(decode_id13(ac13field)).map(|n| n * 100).ok()
    }
}

/// Transponder level and additional information (3.1.2.5.2.2.1)
#[derive(Debug, PartialEq, DeriveSerialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[allow(non_camel_case_types)]
pub enum Capability {
    /// Level 1 transponder (surveillance only)
    #[deku(id = "0")]
    #[serde(rename = "level1")]
    AG_LEVEL1,
    // the matched bits are not consumed with id_pat: re-read them
    #[deku(id_pat = "1..=3")]
    AG_RESERVED(#[deku(bits = "3")] u8),
    /// Level 2 or above transponder, on ground
    #[deku(id = "4")]
    #[serde(rename = "ground")]
    AG_GROUND,
    /// Level 2 or above transponder, airborne
    #[deku(id = "5")]
    #[serde(rename = "airborne")]
    AG_AIRBORNE,
    /// Level 2 or above transponder, either airborne or on ground
    #[deku(id = "6")]
    #[serde(rename = "ground/airborne")]
    AG_GROUND_AIRBORNE,
    /// DR field is not equal to 0, or FS field equals 2, 3, 4 or 5
    #[deku(id = "7")]
    AG_DR0,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::AG_LEVEL1 => "Level 1",
                Self::AG_RESERVED(_) => "reserved",
                Self::AG_GROUND => "ground",
                Self::AG_AIRBORNE => "airborne",
                Self::AG_GROUND_AIRBORNE => "ground/airborne",
                Self::AG_DR0 => "DR0",
            }
        )
    }
}

/// Airborne or Ground and SPI (used in DF=4, 5, 20 or 21)
#[derive(Debug, PartialEq, DeriveSerialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    NoAlertNoSpiAirborne = 0b000,
    NoAlertNoSpiOnGround = 0b001,
    AlertNoSpiAirborne = 0b010,
    AlertNoSpiOnGround = 0b011,
    AlertSpiAirborneGround = 0b100,
    NoAlertSpiAirborneGround = 0b101,
    Reserved = 0b110,
    NotAssigned = 0b111,
}

impl FlightStatus {
    pub fn on_ground(&self) -> bool {
        matches!(
            self,
            Self::NoAlertNoSpiOnGround | Self::AlertNoSpiOnGround
        )
    }

    pub fn alert(&self) -> bool {
        matches!(
            self,
            Self::AlertNoSpiAirborne
                | Self::AlertNoSpiOnGround
                | Self::AlertSpiAirborneGround
        )
    }

    pub fn spi(&self) -> bool {
        matches!(
            self,
            Self::AlertSpiAirborneGround | Self::NoAlertSpiAirborneGround
        )
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::NoAlertNoSpiAirborne => "airborne",
                Self::AlertSpiAirborneGround
                | Self::NoAlertSpiAirborneGround => "airborne/ground",
                Self::NoAlertNoSpiOnGround => "ground",
                Self::AlertNoSpiAirborne => "airborne",
                Self::AlertNoSpiOnGround => "ground",
                _ => "reserved",
            }
        )
    }
}

/// The downlink request (used in DF=4, 5, 20 or 21)
#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "5")]
pub enum DownlinkRequest {
    #[deku(id = "0b00000")]
    None,
    #[deku(id = "0b00001")]
    RequestSendCommB,
    #[deku(id = "0b00100")]
    CommBBroadcastMsg1,
    #[deku(id = "0b00101")]
    CommBBroadcastMsg2,
    // the matched bits are not consumed with id_pat: re-read them
    #[deku(id_pat = "_")]
    Unknown(#[deku(bits = "5")] u8),
}

/// The utility message (used in DF=4, 5, 20 or 21)
#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
pub struct UtilityMessage {
    #[deku(bits = "4")]
    pub iis: u8,
    pub ids: UtilityMessageType,
}

/// The utility message type (used in DF=4, 5, 20 or 21)
#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "2")]
pub enum UtilityMessageType {
    NoInformation = 0b00,
    CommB = 0b01,
    CommC = 0b10,
    CommD = 0b11,
}

/// The control field in TIS-B messages (DF=18)
#[derive(Debug, PartialEq, DeriveSerialize, DekuRead, Clone)]
pub struct ControlField {
    #[serde(skip)]
    pub t: ControlFieldType,
    /// AA: Address, Announced
    #[serde(rename = "icao24")]
    pub aa: ICAO,
    /// ME: message, extended squitter
    #[serde(flatten)]
    pub me: adsb::ME,
}

/// The control field type in TIS-B messages (DF=18)
#[derive(Debug, PartialEq, DeriveSerialize, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "3")]
#[allow(non_camel_case_types)]
pub enum ControlFieldType {
    /// ADS-B Message from a non-transponder device
    #[deku(id = "0")]
    ADSB_ES_NT,

    /// Reserved for ADS-B for ES/NT devices with an alternate address space
    #[deku(id = "1")]
    ADSB_ES_NT_ALT,

    /// Code 2, Fine Format TIS-B Message
    #[deku(id = "2")]
    TISB_FINE,

    /// Code 3, Coarse Format TIS-B Message
    #[deku(id = "3")]
    TISB_COARSE,

    /// Code 4, Coarse Format TIS-B Message
    #[deku(id = "4")]
    TISB_MANAGE,

    /// Code 5, TIS-B Message relaying ADS-B messages (anonymous addresses)
    #[deku(id = "5")]
    TISB_ADSB_RELAY,

    /// Code 6, TIS-B Message, same as DF=17
    #[deku(id = "6")]
    TISB_ADSB,

    /// Code 7, Reserved
    #[deku(id = "7")]
    Reserved,
}

impl fmt::Display for ControlFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s_type = match self {
            Self::ADSB_ES_NT | Self::ADSB_ES_NT_ALT => "(ADS-B)",
            Self::TISB_COARSE | Self::TISB_ADSB_RELAY | Self::TISB_FINE => {
                "(TIS-B)"
            }
            Self::TISB_MANAGE | Self::TISB_ADSB => "(ADS-R)",
            Self::Reserved => "(unknown addressing scheme)",
        };
        write!(f, "{s_type}")
    }
}

/// Uplink / Downlink (DF=24)
#[derive(Debug, PartialEq, Eq, DekuRead, Copy, Clone)]
#[deku(id_type = "u8", bits = "1")]
pub enum KE {
    DownlinkELMTx = 0,
    UplinkELMAck = 1,
}

/// Decode a [Gillham code](https://en.wikipedia.org/wiki/Gillham_code)
///
/// In the squawk (identity) field bits are interleaved as follows
/// (message bit 20 to bit 32):
///
/// C1-A1-C2-A2-C4-A4-ZERO-B1-D1-B2-D2-B4-D4
///
/// So every group of three bits A, B, C, D represents an integer from 0
/// to 7. The actual meaning is just 4 octal numbers, converted into a hex
/// number that happens to display as the four octal digits.
#[rustfmt::skip]
pub fn decode_id13(id13_field: u16) -> u16 {
    let mut hex_gillham: u16 = 0;

    if id13_field & 0x1000 != 0 { hex_gillham |= 0x0010; } // Bit 12 = C1
    if id13_field & 0x0800 != 0 { hex_gillham |= 0x1000; } // Bit 11 = A1
    if id13_field & 0x0400 != 0 { hex_gillham |= 0x0020; } // Bit 10 = C2
    if id13_field & 0x0200 != 0 { hex_gillham |= 0x2000; } // Bit  9 = A2
    if id13_field & 0x0100 != 0 { hex_gillham |= 0x0040; } // Bit  8 = C4
    if id13_field & 0x0080 != 0 { hex_gillham |= 0x4000; } // Bit  7 = A4
    // if id13_field & 0x0040 != 0 {hex_gillham |= 0x0800;} // Bit  6 = X or M
    if id13_field & 0x0020 != 0 { hex_gillham |= 0x0100; } // Bit  5 = B1
    if id13_field & 0x0010 != 0 { hex_gillham |= 0x0001; } // Bit  4 = D1 or Q
    if id13_field & 0x0008 != 0 { hex_gillham |= 0x0200; } // Bit  3 = B2
    if id13_field & 0x0004 != 0 { hex_gillham |= 0x0002; } // Bit  2 = D2
    if id13_field & 0x0002 != 0 { hex_gillham |= 0x0400; } // Bit  1 = B4
    if id13_field & 0x0001 != 0 { hex_gillham |= 0x0004; } // Bit  0 = D4

    hex_gillham
}

/// Convert a [Gillham code](https://en.wikipedia.org/wiki/Gillham_code) to
/// an altitude in hundreds of feet.
#[rustfmt::skip]
pub fn gray2alt(gray: u16) -> Result<i32, &'static str> {
    let mut five_hundreds: u32 = 0;
    let mut one_hundreds: u32 = 0;

    // check zero bits are zero, D1 set is illegal; C1..C4 cannot be zero
    if (gray & 0x8889) != 0 || (gray & 0x00f0) == 0 {
        return Err("Invalid altitude");
    }

    if gray & 0x0010 != 0 { one_hundreds ^= 0x007; } // C1
    if gray & 0x0020 != 0 { one_hundreds ^= 0x003; } // C2
    if gray & 0x0040 != 0 { one_hundreds ^= 0x001; } // C4

    // Remove 7s from one_hundreds (Make 7->5, and 5->7).
    if (one_hundreds & 5) == 5 { one_hundreds ^= 2; }

    // Check for invalid codes, only 1 to 5 are valid
    if one_hundreds > 5 { return Err("Invalid altitude"); }

    // if gray & 0x0001 {five_hundreds ^= 0x1FF;} // D1 never used for altitude
    if gray & 0x0002 != 0 { five_hundreds ^= 0x0ff; } // D2
    if gray & 0x0004 != 0 { five_hundreds ^= 0x07f; } // D4
    if gray & 0x1000 != 0 { five_hundreds ^= 0x03f; } // A1
    if gray & 0x2000 != 0 { five_hundreds ^= 0x01f; } // A2
    if gray & 0x4000 != 0 { five_hundreds ^= 0x00f; } // A4
    if gray & 0x0100 != 0 { five_hundreds ^= 0x007; } // B1
    if gray & 0x0200 != 0 { five_hundreds ^= 0x003; } // B2
    if gray & 0x0400 != 0 { five_hundreds ^= 0x001; } // B4

    // Correct order of one_hundreds.
    if five_hundreds & 1 != 0 && one_hundreds <= 6 {
        one_hundreds = 6 - one_hundreds;
    }

    let n = (five_hundreds * 5) + one_hundreds;
    if n >= 13 {
        Ok(n as i32 - 13)
    } else {
        Err("Invalid altitude")
    }
}

/// A raw frame with its reception context, possibly decoded.
///
/// The RAW output serializes the frame bytes; the SBS and JSON outputs
/// read the decoded message.
#[derive(Debug, PartialEq, DeriveSerialize, Clone)]
pub struct TimedMessage {
    /// Seconds since the Unix epoch at reception
    pub timestamp: f64,

    /// The raw frame, 7 or 14 bytes
    #[serde(serialize_with = "frame_as_hex")]
    pub frame: Vec<u8>,

    /// The decoded message, None before the decoding stage
    #[serde(flatten)]
    pub message: Option<Message>,

    /// Index of the source that produced the frame
    #[serde(skip)]
    pub idx: usize,

    /// Frame came in MLAT-flagged (`@` prefix on a RAW feed)
    #[serde(skip)]
    pub mlat: bool,

    /// Number of bits flipped by the CRC repair
    #[serde(skip)]
    pub repaired: u8,

    /// Signal strength estimate in dB, local demodulation only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f32>,
}

fn frame_as_hex<S>(frame: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(frame))
}

#[cfg(test)]
mod tests {

    use super::*;
    use hexlit::hex;

    #[test]
    fn test_ac13field() {
        let bytes = hex!("a0001910cc300030aa0000eae004");
        let msg = Message::from_frame(&bytes).unwrap();
        match msg.df {
            DF::CommBAltitudeReply { ac, .. } => {
                assert_eq!(ac.0, Some(39000));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_invalid_crc() {
        let bytes = hex!("8d4ca251204994b1c36e60a5343d");
        let msg = Message::from_frame(&bytes);
        match msg {
            Err(DekuError::Assertion(_)) => (),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_squawk() {
        let bytes = hex!("2a00516d492b80");
        let msg = Message::from_frame(&bytes).unwrap();
        match msg.df {
            DF::SurveillanceIdentityReply { id, .. } => {
                assert_eq!(format!("{id}"), "0356");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn altitude_q_bit_roundtrip() {
        // inverse of the 25 ft granularity decoding
        fn encode_ac13(altitude: i32) -> u16 {
            let n = ((altitude + 1000) / 25) as u16;
            ((n & 0x7e0) << 2) | 0x10 | ((n & 0x010) << 1) | (n & 0x00f)
        }

        for altitude in (-1000..=50175).step_by(25) {
            assert_eq!(decode_ac13(encode_ac13(altitude)), Some(altitude));
        }
    }

    #[test]
    fn accept_rejects_unknown_df() {
        let mut cache = IcaoCache::new();
        let frame = [0x18, 0, 0, 0, 0, 0, 0];
        match accept_frame(&frame, &mut cache, 0.) {
            Err(FrameError::UnknownDF(3)) => (),
            _ => unreachable!(),
        }
    }

    #[test]
    fn accept_surveillance_frames_against_recent_addresses() {
        let mut cache = IcaoCache::new();
        let frame = hex!("a0001910cc300030aa0000eae004");
        let icao = crc::syndrome(&frame);

        // never seen in clear: refused
        match accept_frame(&frame, &mut cache, 1000.) {
            Err(FrameError::UnknownIcao(found)) => assert_eq!(found, icao),
            _ => unreachable!(),
        }

        // confirmed by an all-call or an extended squitter: accepted
        cache.record(icao, 990.);
        let msg = accept_frame(&frame, &mut cache, 1000.).unwrap();
        assert_eq!(msg.icao24(), icao);
    }

    #[test]
    fn accept_confirms_adsb_addresses() {
        let mut cache = IcaoCache::new();
        let frame = hex!("8d406b902015a678d4d220aa4bda");
        let msg = accept_frame(&frame, &mut cache, 1000.).unwrap();
        assert_eq!(msg.icao24(), 0x406b90);
        assert!(cache.recent(0x406b90, 1010.));
    }
}
