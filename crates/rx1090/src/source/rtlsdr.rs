use std::sync::{Arc, Mutex};
use std::thread;

use rtl_sdr_rs::{RtlSdr, TunerGain, DEFAULT_BUF_LENGTH};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::decode::crc::IcaoCache;
use crate::decode::time::now;
use crate::decode::TimedMessage;
use crate::demod::{Demodulator, FixConfig};

pub const MODES_FREQ: u32 = 1_090_000_000;
pub const RTLSDR_RATE: u32 = 2_000_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceConfig {
    /// Device index, for setups with several dongles
    pub index: usize,
    /// Tuner gain in tenths of dB, automatic gain control when None
    pub gain: Option<i32>,
    /// Frequency correction in ppm
    pub ppm: i32,
    /// Power the bias tee for an external amplifier
    pub bias_tee: bool,
}

/// Stream frames demodulated from an RTL-SDR dongle.
///
/// The device handle is not Send-compatible, so a dedicated thread owns
/// it and runs the whole DSP chain (magnitude, preamble scan, slicing,
/// CRC); only validated frames cross over to the async side. An error
/// before the first buffer is reported to the caller; a later device
/// loss ends the stream.
pub async fn receiver(
    config: DeviceConfig,
    tx: mpsc::Sender<TimedMessage>,
    idx: usize,
    fix: FixConfig,
    cache: Arc<Mutex<IcaoCache>>,
) -> Result<(), String> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (internal_tx, mut internal_rx) = mpsc::channel(32);

    let _handle = thread::spawn(move || {
        let setup = || -> Result<RtlSdr, String> {
            let mut sdr = RtlSdr::open(config.index)
                .map_err(|e| format!("failed to open device: {e:?}"))?;
            sdr.set_center_freq(MODES_FREQ)
                .map_err(|e| format!("failed to set frequency: {e:?}"))?;
            sdr.set_sample_rate(RTLSDR_RATE)
                .map_err(|e| format!("failed to set sample rate: {e:?}"))?;
            let gain = match config.gain {
                Some(tenths) => TunerGain::Manual(tenths),
                None => TunerGain::Auto,
            };
            sdr.set_tuner_gain(gain)
                .map_err(|e| format!("failed to set tuner gain: {e:?}"))?;
            sdr.set_bias_tee(config.bias_tee)
                .map_err(|e| format!("failed to set bias-tee: {e:?}"))?;
            if config.ppm != 0 {
                sdr.set_freq_correction(config.ppm).map_err(|e| {
                    format!("failed to set frequency correction: {e:?}")
                })?;
            }
            sdr.reset_buffer()
                .map_err(|e| format!("failed to reset buffer: {e:?}"))?;
            Ok(sdr)
        };

        let mut sdr = match setup() {
            Ok(sdr) => {
                let _ = ready_tx.send(Ok(()));
                sdr
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let mut demod = Demodulator::new(fix);
        let mut buf = vec![0u8; DEFAULT_BUF_LENGTH];

        'receive: loop {
            let n = match sdr.read_sync(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    error!("failed to read samples: {e:?}");
                    break 'receive;
                }
            };

            if n < DEFAULT_BUF_LENGTH {
                info!("short read ({n}), samples lost, exiting!");
                break 'receive;
            }

            let frames = {
                let mut cache = cache.lock().expect("poisoned ICAO cache");
                demod.process_iq(&buf[..n], &mut cache, now())
            };

            for frame in frames {
                if internal_tx.blocking_send(frame).is_err() {
                    break 'receive;
                }
            }
        }
        drop(sdr);
    });

    match ready_rx.await {
        Ok(Ok(())) => info!("RTL-SDR device ready on 1090 MHz"),
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err("device thread died during setup".to_string()),
    }

    while let Some(frame) = internal_rx.recv().await {
        let tmsg = TimedMessage {
            timestamp: now(),
            frame: frame.frame().to_vec(),
            message: None,
            idx,
            mlat: false,
            repaired: frame.repaired,
            rssi: Some(frame.rssi()),
        };
        if tx.send(tmsg).await.is_err() {
            break;
        }
    }
    Ok(())
}
