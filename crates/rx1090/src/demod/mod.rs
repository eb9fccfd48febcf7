/**
 * Mode S signal demodulation.
 *
 * The preamble of a Mode S frame lasts 8 µs, i.e. 16 samples at 2 MS/s,
 * with high pulses at sample indices 0, 2, 7 and 9. The 112 data bits
 * follow, pulse-position modulated over 2 samples per bit.
 *
 * The slicer records a confidence value for each bit (the magnitude
 * difference between the two samples of the bit interval). The positions
 * with the lowest confidence are the only candidates handed to the CRC
 * repair stage.
 */
use crate::decode::crc::{
    self, frame_bytes, repair, syndrome, IcaoCache, MODES_LONG_MSG_BITS,
};
use tracing::trace;

/// Preamble duration, in microseconds (and samples: 2 MS/s)
pub const MODES_PREAMBLE_US: usize = 8;
/// Samples spanned by the preamble
pub const PREAMBLE_SAMPLES: usize = MODES_PREAMBLE_US * 2;
/// Samples spanned by a whole long frame, preamble included
pub const FULL_FRAME_SAMPLES: usize =
    PREAMBLE_SAMPLES + MODES_LONG_MSG_BITS * 2;

/// How many low-confidence bit positions are remembered per frame.
/// CRC repair may only flip bits drawn from this set.
pub const WEAK_BITS: usize = 8;

/// Precomputed lookup from an `(i, q)` byte pair to a 16-bit magnitude.
///
/// The table must match `round(sqrt((i-127.5)² + (q-127.5)²) * 360)`
/// bit-exactly: the detector thresholds are calibrated against it.
pub struct MagnitudeLut(Box<[u16]>);

impl MagnitudeLut {
    pub fn new() -> Self {
        let mut table = vec![0u16; 1 << 16];
        for i in 0..256usize {
            for q in 0..256usize {
                let fi = i as f64 - 127.5;
                let fq = q as f64 - 127.5;
                table[(i << 8) | q] =
                    libm::round(libm::sqrt(fi * fi + fq * fq) * 360.) as u16;
            }
        }
        Self(table.into_boxed_slice())
    }

    #[inline]
    pub fn lookup(&self, i: u8, q: u8) -> u16 {
        self.0[((i as usize) << 8) | q as usize]
    }

    /// One magnitude per IQ pair
    pub fn magnitude(&self, iq: &[u8]) -> Vec<u16> {
        iq.chunks_exact(2).map(|c| self.lookup(c[0], c[1])).collect()
    }
}

impl Default for MagnitudeLut {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame sliced out of the magnitude stream, CRC verified or repaired
#[derive(Debug, Clone, PartialEq)]
pub struct DemodFrame {
    pub bytes: [u8; 14],
    pub bits: usize,
    /// Average preamble level, normalized to [0, 1]
    pub signal_level: f64,
    /// Number of bits flipped by the CRC repair
    pub repaired: u8,
}

impl DemodFrame {
    pub fn frame(&self) -> &[u8] {
        &self.bytes[..self.bits / 8]
    }

    /// Signal strength estimate in dB full scale
    pub fn rssi(&self) -> f32 {
        10. * libm::log10(self.signal_level * self.signal_level) as f32
    }
}

/// Counters accumulated while scanning magnitude buffers
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub preambles: u64,
    pub accepted: u64,
    pub repaired_single: u64,
    pub repaired_double: u64,
    pub crc_dropped: u64,
    pub unknown_icao: u64,
    pub unknown_df: u64,
}

/// CRC repair policy
#[derive(Debug, Clone, Copy)]
pub struct FixConfig {
    /// Attempt single-bit repairs
    pub fix_errors: bool,
    /// Also attempt two-bit repairs over low-confidence pairs
    pub aggressive: bool,
}

impl FixConfig {
    fn max_fix(&self) -> usize {
        match (self.fix_errors, self.aggressive) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        }
    }
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            fix_errors: true,
            aggressive: false,
        }
    }
}

pub struct Demodulator {
    pub lut: MagnitudeLut,
    pub fix: FixConfig,
    pub stats: ScanStats,
}

impl Demodulator {
    pub fn new(fix: FixConfig) -> Self {
        Self {
            lut: MagnitudeLut::new(),
            fix,
            stats: ScanStats::default(),
        }
    }

    /// Convert an IQ buffer and scan it for frames
    pub fn process_iq(
        &mut self,
        iq: &[u8],
        cache: &mut IcaoCache,
        now: f64,
    ) -> Vec<DemodFrame> {
        let magnitude = self.lut.magnitude(iq);
        self.demodulate(&magnitude, cache, now)
    }

    /// Scan a magnitude buffer for Mode S frames.
    ///
    /// A rejected candidate advances the scan by a single sample so that
    /// overlapping candidates are considered; an accepted frame skips
    /// over the consumed samples.
    pub fn demodulate(
        &mut self,
        m: &[u16],
        cache: &mut IcaoCache,
        now: f64,
    ) -> Vec<DemodFrame> {
        let mut frames = Vec::new();
        if m.len() < FULL_FRAME_SAMPLES {
            return frames;
        }

        let mut j = 0;
        while j < m.len() - FULL_FRAME_SAMPLES {
            let Some(high) = preamble_at(&m[j..]) else {
                j += 1;
                continue;
            };
            self.stats.preambles += 1;

            let (msg, confidence) = slice_bits(&m[j + PREAMBLE_SAMPLES..]);

            let df = msg[0] >> 3;
            let bits = frame_bytes(df) * 8;
            let mut frame = msg;

            match self.check_frame(&mut frame[..bits / 8], &confidence, cache, now)
            {
                Some(repaired) => {
                    let signal_level = f64::from(high) / f64::from(u16::MAX);
                    trace!("frame accepted at offset {}", j);
                    frames.push(DemodFrame {
                        bytes: frame,
                        bits,
                        signal_level,
                        repaired,
                    });
                    self.stats.accepted += 1;
                    j += PREAMBLE_SAMPLES + bits * 2;
                }
                None => j += 1,
            }
        }
        frames
    }

    /// CRC acceptance on a sliced frame: verify, repair against the
    /// low-confidence bits, or resolve the address/parity overlay
    /// against recently confirmed addresses. Returns the number of
    /// repaired bits on acceptance.
    fn check_frame(
        &mut self,
        frame: &mut [u8],
        confidence: &[u16],
        cache: &mut IcaoCache,
        now: f64,
    ) -> Option<u8> {
        let df = frame[0] >> 3;
        match df {
            11 | 17 | 18 => {
                if syndrome(frame) == 0 {
                    cache.record(icao_announced(frame), now);
                    return Some(0);
                }
                let weak = weakest_bits(confidence, frame.len() * 8);
                match repair(frame, &weak, self.fix.max_fix()) {
                    Some(r) => {
                        match r.bits.len() {
                            1 => self.stats.repaired_single += 1,
                            _ => self.stats.repaired_double += 1,
                        }
                        cache.record(icao_announced(frame), now);
                        Some(r.bits.len() as u8)
                    }
                    None => {
                        self.stats.crc_dropped += 1;
                        None
                    }
                }
            }
            0 | 4 | 5 | 16 | 20 | 21 | 24..=31 => {
                let icao = syndrome(frame);
                if icao != 0 && cache.recent(icao, now) {
                    Some(0)
                } else {
                    self.stats.unknown_icao += 1;
                    None
                }
            }
            _ => {
                self.stats.unknown_df += 1;
                None
            }
        }
    }
}

fn icao_announced(frame: &[u8]) -> u32 {
    (u32::from(frame[1]) << 16)
        | (u32::from(frame[2]) << 8)
        | u32::from(frame[3])
}

/// Check the Mode S preamble shape at the start of `m` and return the
/// average level of the four high pulses when it matches.
///
/// Acceptance requires:
/// - the pulse up/down relations at samples 0..=3 and 7..=9;
/// - the high average to exceed twice the average of the low samples;
/// - every low sample (1, 3, 4, 5, 6, 8) below the high average;
/// - the 4 samples before the data phase to stay below the high average.
fn preamble_at(m: &[u16]) -> Option<u16> {
    if !(m[0] > m[1]
        && m[1] < m[2]
        && m[2] > m[3]
        && m[3] < m[0]
        && m[4] < m[0]
        && m[5] < m[0]
        && m[6] < m[0]
        && m[7] > m[8]
        && m[8] < m[9]
        && m[9] > m[6])
    {
        return None;
    }

    let high = ((u32::from(m[0])
        + u32::from(m[2])
        + u32::from(m[7])
        + u32::from(m[9]))
        / 4) as u16;
    let low_samples = [m[1], m[3], m[4], m[5], m[6], m[8]];
    let low =
        (low_samples.iter().map(|&s| u32::from(s)).sum::<u32>() / 6) as u16;

    if u32::from(high) < 2 * u32::from(low) {
        return None;
    }
    if low_samples.iter().any(|&s| s >= high) {
        return None;
    }

    // The space between the preamble and the data phase must stay quiet
    if m[11] >= high || m[12] >= high || m[13] >= high || m[14] >= high {
        return None;
    }

    Some(high)
}

/// PPM decoding of 112 bit intervals of 2 samples each, with a per-bit
/// confidence equal to the magnitude difference over the interval.
/// Equal samples inherit the previous bit with zero confidence.
fn slice_bits(m: &[u16]) -> ([u8; 14], [u16; MODES_LONG_MSG_BITS]) {
    let mut bits = [0u8; MODES_LONG_MSG_BITS];
    let mut confidence = [0u16; MODES_LONG_MSG_BITS];

    for i in 0..MODES_LONG_MSG_BITS {
        let first = m[2 * i];
        let second = m[2 * i + 1];
        if first == second {
            bits[i] = if i > 0 { bits[i - 1] } else { 0 };
            confidence[i] = 0;
        } else {
            bits[i] = u8::from(first > second);
            confidence[i] = first.abs_diff(second);
        }
    }

    let mut msg = [0u8; crc::MODES_LONG_MSG_BYTES];
    for (i, byte) in msg.iter_mut().enumerate() {
        *byte = (0..8).fold(0, |acc, k| (acc << 1) | bits[i * 8 + k]);
    }
    (msg, confidence)
}

/// The `WEAK_BITS` positions with the lowest slicing confidence,
/// weakest first, restricted to the actual frame length
fn weakest_bits(confidence: &[u16], bits: usize) -> Vec<usize> {
    let mut indexed: Vec<(u16, usize)> = confidence[..bits]
        .iter()
        .enumerate()
        .map(|(i, &c)| (c, i))
        .collect();
    indexed.sort();
    indexed
        .into_iter()
        .take(WEAK_BITS)
        .map(|(_, i)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    /// Synthesize the magnitude trace of a transmitted frame
    fn synthesize(frame: &[u8]) -> Vec<u16> {
        let high = 4000u16;
        let low = 400u16;
        let offset = 37; // arbitrary position in the buffer
        let mut m =
            vec![low; offset + PREAMBLE_SAMPLES + frame.len() * 8 * 2];
        for (k, &sample) in
            [high, low, high, low, low, low, low, high, low, high]
                .iter()
                .enumerate()
        {
            m[offset + k] = sample;
        }
        for (i, byte) in frame.iter().enumerate() {
            for k in 0..8 {
                let bit = (byte >> (7 - k)) & 1;
                let base = offset + PREAMBLE_SAMPLES + (i * 8 + k) * 2;
                if bit == 1 {
                    m[base] = high;
                    m[base + 1] = low;
                } else {
                    m[base] = low;
                    m[base + 1] = high;
                }
            }
        }
        m.extend(std::iter::repeat(low).take(FULL_FRAME_SAMPLES));
        m
    }

    #[test]
    fn magnitude_lut_is_bit_exact() {
        let lut = MagnitudeLut::new();
        assert_eq!(lut.lookup(127, 127), 255); // sqrt(0.5)*360
        assert_eq!(lut.lookup(128, 128), 255);
        assert_eq!(lut.lookup(255, 127), 45900); // 127.5*360
        assert_eq!(
            lut.lookup(0, 0),
            libm::round(libm::sqrt(2. * 127.5 * 127.5) * 360.) as u16
        );
        assert_eq!(lut.magnitude(&[127, 127, 255, 127]), vec![255, 45900]);
    }

    #[test]
    fn demodulate_a_clean_frame() {
        let frame = hex!("8d406b902015a678d4d220aa4bda");
        let m = synthesize(&frame);

        let mut demod = Demodulator::new(FixConfig::default());
        let mut cache = IcaoCache::new();
        let frames = demod.demodulate(&m, &mut cache, 0.);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bits, 112);
        assert_eq!(frames[0].frame(), &frame);
        assert_eq!(frames[0].repaired, 0);
        assert!(cache.recent(0x406b90, 1.));
    }

    #[test]
    fn demodulate_repairs_a_corrupted_bit() {
        let frame = hex!("8d406b902015a678d4d220aa4bda");
        let mut m = synthesize(&frame);

        // Bit 42 is transmitted as a zero; drown it in noise so that it
        // reads as a one, with a far lower confidence than its neighbours
        let offset = 37 + PREAMBLE_SAMPLES + 42 * 2;
        assert!(m[offset] < m[offset + 1]);
        m[offset] = m[offset + 1] + 50;

        let mut demod = Demodulator::new(FixConfig::default());
        let mut cache = IcaoCache::new();
        let frames = demod.demodulate(&m, &mut cache, 0.);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame(), &frame);
        assert_eq!(frames[0].repaired, 1);
        assert_eq!(demod.stats.repaired_single, 1);
    }

    #[test]
    fn surveillance_frames_require_a_recent_address() {
        let frame = hex!("a0001910cc300030aa0000eae004");
        let m = synthesize(&frame);
        let icao = syndrome(&frame);

        let mut demod = Demodulator::new(FixConfig::default());
        let mut cache = IcaoCache::new();
        assert!(demod.demodulate(&m, &mut cache, 100.).is_empty());
        assert_eq!(demod.stats.unknown_icao, 1);

        cache.record(icao, 99.);
        let frames = demod.demodulate(&m, &mut cache, 100.);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame(), &frame);
    }
}
