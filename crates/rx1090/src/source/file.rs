use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::decode::crc::IcaoCache;
use crate::decode::time::now;
use crate::decode::TimedMessage;
use crate::demod::{Demodulator, FixConfig, FULL_FRAME_SAMPLES};
use crate::source::DATA_LEN;

/// Replay a raw 8-bit IQ capture (`-` for stdin) through the demodulator.
///
/// Buffers are processed with a one-frame overlap carried over from the
/// previous read, so that frames crossing a buffer boundary are not lost.
pub async fn receiver(
    path: String,
    tx: mpsc::Sender<TimedMessage>,
    idx: usize,
    fix: FixConfig,
    cache: Arc<Mutex<IcaoCache>>,
) -> Result<(), String> {
    let (internal_tx, mut internal_rx) = mpsc::channel(32);

    let reader: Box<dyn Read + Send> = if path == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(
            File::open(&path)
                .map_err(|e| format!("cannot open {path}: {e}"))?,
        )
    };

    let _handle = thread::spawn(move || {
        let mut reader = BufReader::with_capacity(DATA_LEN, reader);
        let mut demod = Demodulator::new(fix);

        // one long frame of overlap, in IQ bytes
        let overlap = (FULL_FRAME_SAMPLES - 1) * 2;
        let mut data = vec![127u8; DATA_LEN + overlap];

        loop {
            data.copy_within(DATA_LEN..DATA_LEN + overlap, 0);

            let read = match reader.read(&mut data[overlap..overlap + DATA_LEN])
            {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    error!("read error on {path}: {e}");
                    break;
                }
            };

            if read < DATA_LEN {
                data[overlap + read..].fill(127);
            }

            let frames = {
                let mut cache = cache.lock().expect("poisoned ICAO cache");
                demod.process_iq(&data[..overlap + read], &mut cache, now())
            };

            for frame in frames {
                if internal_tx.blocking_send(frame).is_err() {
                    return;
                }
            }
        }
        info!(
            "end of capture {path}: {} frames accepted, {} repaired",
            demod.stats.accepted,
            demod.stats.repaired_single + demod.stats.repaired_double,
        );
    });

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
