#![doc = include_str!("../readme.md")]

mod cli;
mod feed;
mod json;
mod raw;
mod registry;
mod sbs;
mod web;

use clap::Parser;
use cli::Config;
use registry::Registry;
use rx1090::decode::crc::IcaoCache;
use rx1090::decode::time::now;
use rx1090::decode::{accept_frame, FrameError, TimedMessage};
use rx1090::source;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum AppError {
    /// Bad configuration, exit code 1
    Config(String),
    /// Sample source failure, exit code 2
    Device(String),
}

fn main() -> ExitCode {
    let options = cli::Options::parse();

    let default_level = match options.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::try_from(options) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start the runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Config(e)) => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(AppError::Device(e)) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let registry = Arc::new(Mutex::new(Registry::new(
        config.home,
        config.max_dist_m,
        config.cpr_trace,
    )));
    let cache = Arc::new(std::sync::Mutex::new(IcaoCache::new()));
    let stats = Arc::new(feed::Stats::default());
    let token = CancellationToken::new();

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
                token.cancel();
            }
        });
    }

    // frames from every source (device, file, RAW feeds) meet here
    let (frame_tx, frame_rx) = mpsc::channel::<TimedMessage>(100);
    let (raw_tx, _) = broadcast::channel::<Arc<str>>(feed::OUT_QUEUE);
    let (sbs_tx, _) = broadcast::channel::<Arc<str>>(feed::OUT_QUEUE);

    if config.net {
        start_services(
            &config,
            &registry,
            &stats,
            &frame_tx,
            &raw_tx,
            &sbs_tx,
            &token,
        )
        .await?;
    }

    // the local sample source, unless running network-only
    let source_handle: Option<JoinHandle<Result<(), String>>> =
        if config.net_only {
            None
        } else {
            Some(start_source(&config, &frame_tx, &cache)?)
        };
    drop(frame_tx);

    {
        let registry = registry.clone();
        let cache = cache.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = registry.lock().await.sweep(now());
                        if swept > 0 {
                            debug!("swept {swept} stale aircraft");
                        }
                        cache.lock().expect("poisoned ICAO cache")
                            .prune(now());
                    }
                }
            }
        });
    }

    if config.interactive {
        let registry = registry.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let registry = registry.lock().await;
                        info!(
                            "{} aircraft tracked, {} messages",
                            registry.len(),
                            registry.messages(),
                        );
                    }
                }
            }
        });
    }

    let decode_handle = {
        let registry = registry.clone();
        let cache = cache.clone();
        let stats = stats.clone();
        let raw_tx = raw_tx.clone();
        let sbs_tx = sbs_tx.clone();
        let token = token.clone();
        tokio::spawn(decode_loop(
            frame_rx, registry, cache, stats, raw_tx, sbs_tx, token,
        ))
    };

    // wait for the end of the local source, or for a shutdown request
    let result = match source_handle {
        Some(handle) => tokio::select! {
            _ = token.cancelled() => Ok(()),
            joined = handle => match joined {
                Ok(Ok(())) => {
                    info!("sample source exhausted");
                    Ok(())
                }
                Ok(Err(e)) => Err(AppError::Device(e)),
                Err(e) => Err(AppError::Device(e.to_string())),
            },
        },
        None => {
            token.cancelled().await;
            Ok(())
        }
    };

    // bounded teardown: drain the decoding stage, then force
    token.cancel();
    let _ = tokio::time::timeout(Duration::from_millis(10), decode_handle)
        .await;

    stats.log_summary();
    result
}

/// Start the network listeners (or the active feed) and the HTTP server
#[allow(clippy::too_many_arguments)]
async fn start_services(
    config: &Config,
    registry: &Arc<Mutex<Registry>>,
    stats: &Arc<feed::Stats>,
    frame_tx: &mpsc::Sender<TimedMessage>,
    raw_tx: &broadcast::Sender<Arc<str>>,
    sbs_tx: &broadcast::Sender<Arc<str>>,
    token: &CancellationToken,
) -> Result<(), AppError> {
    let raw_in_stats = stats.raw_in.clone();
    let raw_out_stats = stats.raw_out.clone();
    let sbs_in_stats = stats.sbs_in.clone();
    let sbs_out_stats = stats.sbs_out.clone();

    if config.raw_out_port != 0 {
        tokio::spawn(feed::serve_output(
            config.raw_out_port,
            raw_tx.clone(),
            raw_out_stats.clone(),
            token.clone(),
        ));
        tokio::spawn(feed::heartbeat(raw_tx.clone(), token.clone()));
    }
    if config.sbs_port != 0 {
        tokio::spawn(feed::serve_output(
            config.sbs_port,
            sbs_tx.clone(),
            sbs_out_stats.clone(),
            token.clone(),
        ));
    }

    match &config.net_active {
        Some(address) => {
            // the first connection is part of the startup sequence
            let address = address.clone();
            let frame_tx = frame_tx.clone();
            let stats = raw_in_stats.clone();
            let token = token.clone();
            let probe =
                rx1090::source::net::connect(&address, feed::CONNECT_TIMEOUT)
                    .await
                    .map_err(|e| {
                        AppError::Config(format!(
                            "cannot reach {address}: {e}"
                        ))
                    })?;
            drop(probe);
            tokio::spawn(feed::active_raw_in(
                address, frame_tx, stats, token,
            ));
        }
        None => {
            if config.raw_in_port != 0 {
                tokio::spawn(feed::serve_raw_in(
                    config.raw_in_port,
                    frame_tx.clone(),
                    raw_in_stats.clone(),
                    token.clone(),
                ));
            }
        }
    }

    if let Some(port) = config.sbs_in_port {
        tokio::spawn(feed::serve_sbs_in(
            port,
            registry.clone(),
            sbs_in_stats.clone(),
            token.clone(),
        ));
    }

    if config.http_port != 0 {
        let state = Arc::new(web::WebState {
            registry: registry.clone(),
            stats: stats.clone(),
            home: config.home,
            metric: config.metric,
        });
        let routes = web::routes(
            state,
            config.web_page.clone(),
            config.web_root.clone(),
        );
        let token = token.clone();
        let (_, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(
                ([0, 0, 0, 0], config.http_port),
                async move { token.cancelled().await },
            )
            .map_err(|e| {
                AppError::Config(format!(
                    "cannot serve HTTP on port {}: {e}",
                    config.http_port
                ))
            })?;
        info!("HTTP service listening on port {}", config.http_port);
        tokio::spawn(server);
    }

    Ok(())
}

/// Spawn the local sample source (RTL-SDR device or IQ capture)
fn start_source(
    config: &Config,
    frame_tx: &mpsc::Sender<TimedMessage>,
    cache: &Arc<std::sync::Mutex<IcaoCache>>,
) -> Result<JoinHandle<Result<(), String>>, AppError> {
    if let Some(path) = &config.iq_file {
        let path = path.clone();
        let frame_tx = frame_tx.clone();
        let cache = cache.clone();
        let fix = config.fix;
        return Ok(tokio::spawn(source::file::receiver(
            path, frame_tx, 0, fix, cache,
        )));
    }
    local_device(config, frame_tx, cache)
}

#[cfg(feature = "rtlsdr")]
fn local_device(
    config: &Config,
    frame_tx: &mpsc::Sender<TimedMessage>,
    cache: &Arc<std::sync::Mutex<IcaoCache>>,
) -> Result<JoinHandle<Result<(), String>>, AppError> {
    let device = source::rtlsdr::DeviceConfig {
        index: config.device_index,
        gain: config.gain_tenths,
        ppm: config.ppm,
        bias_tee: config.bias_tee,
    };
    let frame_tx = frame_tx.clone();
    let cache = cache.clone();
    let fix = config.fix;
    Ok(tokio::spawn(source::rtlsdr::receiver(
        device, frame_tx, 0, fix, cache,
    )))
}

#[cfg(not(feature = "rtlsdr"))]
fn local_device(
    _config: &Config,
    _frame_tx: &mpsc::Sender<TimedMessage>,
    _cache: &Arc<std::sync::Mutex<IcaoCache>>,
) -> Result<JoinHandle<Result<(), String>>, AppError> {
    Err(AppError::Config(
        "no sample source: use --iq-file, --net-only, or build with \
         the rtlsdr feature"
            .to_string(),
    ))
}

/// The decoding stage: accept frames, merge them into the registry,
/// and fan the RAW and SBS serializations out
async fn decode_loop(
    mut frame_rx: mpsc::Receiver<TimedMessage>,
    registry: Arc<Mutex<Registry>>,
    cache: Arc<std::sync::Mutex<IcaoCache>>,
    stats: Arc<feed::Stats>,
    raw_tx: broadcast::Sender<Arc<str>>,
    sbs_tx: broadcast::Sender<Arc<str>>,
    token: CancellationToken,
) {
    loop {
        let tmsg = tokio::select! {
            _ = token.cancelled() => break,
            tmsg = frame_rx.recv() => match tmsg {
                Some(tmsg) => tmsg,
                None => break,
            },
        };

        let accepted = {
            let mut cache = cache.lock().expect("poisoned ICAO cache");
            accept_frame(&tmsg.frame, &mut cache, tmsg.timestamp)
        };

        let msg = match accepted {
            Ok(msg) => msg,
            Err(e) => {
                match e {
                    FrameError::Crc(_) => {
                        stats.decode.crc_dropped.fetch_add(1, Ordering::Relaxed)
                    }
                    FrameError::UnknownIcao(_) => stats
                        .decode
                        .unknown_icao
                        .fetch_add(1, Ordering::Relaxed),
                    FrameError::UnknownDF(_) => stats
                        .decode
                        .unknown_df
                        .fetch_add(1, Ordering::Relaxed),
                    _ => stats
                        .decode
                        .bad_length
                        .fetch_add(1, Ordering::Relaxed),
                };
                debug!("frame dropped: {e}");
                continue;
            }
        };

        stats.decode.accepted.fetch_add(1, Ordering::Relaxed);
        if tmsg.repaired > 0 {
            stats.decode.repaired.fetch_add(1, Ordering::Relaxed);
        }

        let aircraft =
            registry.lock().await.update(&msg, tmsg.timestamp, tmsg.rssi);

        // canonical re-broadcast, MLAT timestamps are not re-emitted
        let _ = raw_tx.send(Arc::from(raw::to_line(&tmsg.frame)));

        if let Some(aircraft) = aircraft {
            if let Some(line) = sbs::format(&msg, &aircraft, tmsg.timestamp)
            {
                let _ = sbs_tx.send(Arc::from(line));
            }
        }
    }
    warn!("decoding stage stopped");
}
