use clap::Parser;
use rx1090::decode::cpr::Position;
use rx1090::demod::FixConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "hub1090",
    version,
    about = "Mode S / ADS-B receiver hub serving RAW, SBS and HTTP clients"
)]
pub struct Options {
    /// Enable the network services
    #[arg(long, default_value = "false")]
    pub net: bool,

    /// Network services only, do not open any sample source
    #[arg(long, default_value = "false")]
    pub net_only: bool,

    /// Fetch the RAW input feed from host:port instead of listening
    #[arg(long, value_name = "HOST:PORT")]
    pub net_active: Option<String>,

    /// Port listening for RAW input frames (0 disables)
    #[arg(long, default_value = "30001")]
    pub raw_in_port: u16,

    /// Port serving RAW output frames (0 disables)
    #[arg(long, default_value = "30002")]
    pub raw_out_port: u16,

    /// Port serving SBS (BaseStation) output lines (0 disables)
    #[arg(long, default_value = "30003")]
    pub sbs_port: u16,

    /// Port listening for SBS input lines
    #[arg(long)]
    pub sbs_in_port: Option<u16>,

    /// Port serving the HTTP and WebSocket endpoints (0 disables)
    #[arg(long, default_value = "8080")]
    pub http_port: u16,

    /// Directory served for static HTTP requests
    #[arg(long, default_value = "public_html")]
    pub web_root: String,

    /// Page the HTTP root redirects to
    #[arg(long, default_value = "gmap.html")]
    pub web_page: String,

    /// Latitude of the receiver, in decimal degrees
    #[arg(long)]
    pub lat: Option<f64>,

    /// Longitude of the receiver, in decimal degrees
    #[arg(long)]
    pub lon: Option<f64>,

    /// Maximum plausible distance from the receiver in km (0: unlimited)
    #[arg(long, default_value = "0")]
    pub max_dist: f64,

    /// Periodically log a one-line summary of the registry
    #[arg(short, long, default_value = "false")]
    pub interactive: bool,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Log every CPR decoding attempt
    #[arg(long, default_value = "false")]
    pub cpr_trace: bool,

    /// Also report altitudes in meters in the JSON outputs
    #[arg(long, default_value = "false")]
    pub metric: bool,

    /// Tuner gain in dB (automatic gain control when absent)
    #[arg(long)]
    pub gain: Option<f64>,

    /// Tuner frequency correction in ppm
    #[arg(long, default_value = "0")]
    pub ppm: i32,

    /// RTL-SDR device index
    #[arg(long, default_value = "0")]
    pub device_index: usize,

    /// Power the bias tee for an external amplifier
    #[arg(long, default_value = "false")]
    pub bias_tee: bool,

    /// Replay a raw 8-bit IQ capture instead of a device (- for stdin)
    #[arg(long, value_name = "FILE")]
    pub iq_file: Option<String>,

    /// Disable single-bit CRC repair
    #[arg(long, default_value = "false")]
    pub no_fix: bool,

    /// Enable two-bit CRC repair (CPU intensive)
    #[arg(long, default_value = "false")]
    pub aggressive: bool,
}

/// Validated configuration derived from the command line
#[derive(Debug, Clone)]
pub struct Config {
    pub net: bool,
    pub net_only: bool,
    pub net_active: Option<String>,
    pub raw_in_port: u16,
    pub raw_out_port: u16,
    pub sbs_port: u16,
    pub sbs_in_port: Option<u16>,
    pub http_port: u16,
    pub web_root: PathBuf,
    pub web_page: String,
    pub home: Option<Position>,
    pub max_dist_m: f64,
    pub interactive: bool,
    pub debug: u8,
    pub cpr_trace: bool,
    pub metric: bool,
    pub gain_tenths: Option<i32>,
    pub ppm: i32,
    pub device_index: usize,
    pub bias_tee: bool,
    pub iq_file: Option<String>,
    pub fix: FixConfig,
}

impl TryFrom<Options> for Config {
    type Error = String;

    fn try_from(options: Options) -> Result<Config, String> {
        let home = match (options.lat, options.lon) {
            (Some(lat), Some(lon)) => {
                if !(-90. ..=90.).contains(&lat) {
                    return Err(format!("invalid latitude: {lat}"));
                }
                if !(-180. ..=180.).contains(&lon) {
                    return Err(format!("invalid longitude: {lon}"));
                }
                Some(Position {
                    latitude: lat,
                    longitude: lon,
                })
            }
            (None, None) => None,
            _ => {
                return Err(
                    "both --lat and --lon are required for a receiver \
                     location"
                        .to_string(),
                )
            }
        };

        if options.max_dist < 0. {
            return Err(format!("invalid distance: {}", options.max_dist));
        }
        if options.max_dist > 0. && home.is_none() {
            return Err(
                "--max-dist requires the receiver location (--lat, --lon)"
                    .to_string(),
            );
        }

        let net = options.net || options.net_only;
        if options.net_active.is_some() && !net {
            return Err("--net-active requires --net".to_string());
        }

        let web_root = PathBuf::from(&options.web_root);
        if net && options.http_port != 0 {
            if !web_root.is_dir() {
                return Err(format!(
                    "web root not found: {}",
                    web_root.display()
                ));
            }
            if format!("/{}", options.web_page)
                .parse::<warp::http::Uri>()
                .is_err()
            {
                return Err(format!(
                    "invalid web page: {}",
                    options.web_page
                ));
            }
        }

        if options.net_only && options.iq_file.is_some() {
            return Err(
                "--net-only and --iq-file are mutually exclusive".to_string()
            );
        }

        Ok(Config {
            net,
            net_only: options.net_only,
            net_active: options.net_active,
            raw_in_port: options.raw_in_port,
            raw_out_port: options.raw_out_port,
            sbs_port: options.sbs_port,
            sbs_in_port: options.sbs_in_port,
            http_port: options.http_port,
            web_root,
            web_page: options.web_page,
            home,
            max_dist_m: options.max_dist * 1000.,
            interactive: options.interactive,
            debug: options.debug,
            cpr_trace: options.cpr_trace,
            metric: options.metric,
            gain_tenths: options.gain.map(|db| (db * 10.).round() as i32),
            ppm: options.ppm,
            device_index: options.device_index,
            bias_tee: options.bias_tee,
            iq_file: options.iq_file,
            fix: FixConfig {
                fix_errors: !options.no_fix,
                aggressive: options.aggressive,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, String> {
        let mut argv = vec!["hub1090"];
        argv.extend(args);
        Config::try_from(Options::parse_from(argv))
    }

    #[test]
    fn receiver_location_needs_both_coordinates() {
        assert!(parse(&["--lat", "43.6"]).is_err());
        assert!(parse(&["--lat", "43.6", "--lon", "1.43"]).is_ok());
        assert!(parse(&["--lat", "91.0", "--lon", "0.0"]).is_err());
    }

    #[test]
    fn max_dist_needs_a_location() {
        assert!(parse(&["--max-dist", "450"]).is_err());
        let config = parse(&[
            "--lat", "43.6", "--lon", "1.43", "--max-dist", "450",
        ])
        .unwrap();
        assert_eq!(config.max_dist_m, 450_000.);
    }

    #[test]
    fn net_active_needs_net() {
        assert!(parse(&["--net-active", "host:30002"]).is_err());
    }

    #[test]
    fn gain_is_converted_to_tenths() {
        let config = parse(&["--gain", "49.6"]).unwrap();
        assert_eq!(config.gain_tenths, Some(496));
    }
}
