//! Start-up configuration.
//!
//! Invocation mirrors the driver convention: EAL-style arguments may
//! precede a `--` separator, the application arguments follow it.
//! Defaults embed the deployment constants; a config file overrides the
//! defaults and the command line overrides both. Any validation failure
//! is fatal with a non-zero exit.

use crate::Result;
use clap::{App, Arg};
use config::{Config, File};
use failure::Fail;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Fail)]
#[fail(display = "Invalid configuration: {}", _0)]
pub struct ConfigError(pub String);

/// Which stage of the path this node plays.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Ingress,
    Transit,
    Egress,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Role::Ingress => "ingress",
            Role::Transit => "transit",
            Role::Egress => "egress",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingress" => Ok(Role::Ingress),
            "transit" => Ok(Role::Transit),
            "egress" => Ok(Role::Egress),
            other => Err(ConfigError(format!("unknown role '{}'", other))),
        }
    }
}

/// The operation bypass modes of the processors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bypass {
    /// Full proof-of-transit processing.
    Off,
    /// Forward without touching the extensions.
    All,
    /// Strip-only; reserved, packets are dropped and counted.
    StripOnly,
}

impl Bypass {
    pub fn from_bit(bit: u8) -> std::result::Result<Bypass, ConfigError> {
        match bit {
            0 => Ok(Bypass::Off),
            1 => Ok(Bypass::All),
            2 => Ok(Bypass::StripOnly),
            other => Err(ConfigError(format!(
                "operation bypass bit must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NextHopConfig {
    pub ipv6: String,
    pub mac: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub role: Role,
    pub log_level: String,
    #[serde(alias = "operation_bypass_bit")]
    pub bypass: u8,
    pub num_transit_nodes: usize,
    /// Source address the ingress authenticates the path under.
    pub ingress_addr: String,
    /// segment 0 = first transit, segment 1 = egress.
    pub sid_list: Vec<String>,
    /// Local delivery at the egress; the server behind it.
    pub server_mac: String,
    pub next_hops: Vec<NextHopConfig>,
    /// Hex-encoded 32-byte keys; index 0 is the ingress/egress pair key.
    pub keys: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> AppSettings {
        AppSettings {
            role: Role::Ingress,
            log_level: "info".to_owned(),
            bypass: 0,
            num_transit_nodes: 1,
            ingress_addr: "2a05:d014:dc7:127a:fe22:97ab:a0a8:ff18".to_owned(),
            sid_list: vec![
                "2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3".to_owned(),
                "2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4".to_owned(),
            ],
            server_mac: "02:cc:ef:38:4b:25".to_owned(),
            next_hops: vec![
                NextHopConfig {
                    ipv6: "2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3".to_owned(),
                    mac: "02:5f:68:c7:cc:cd".to_owned(),
                },
                NextHopConfig {
                    ipv6: "2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4".to_owned(),
                    mac: "02:f5:27:51:bc:1d".to_owned(),
                },
            ],
            keys: vec![
                "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_owned(),
                "202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f".to_owned(),
            ],
        }
    }
}

/// Loads settings from the process arguments.
pub fn load() -> Result<AppSettings> {
    let args: Vec<String> = env::args().collect();
    load_from(&args)
}

pub fn load_from(argv: &[String]) -> Result<AppSettings> {
    let program = argv.get(0).map(String::as_str).unwrap_or("srv6-pot");
    let mut app_args: Vec<&str> = vec![program];
    match argv.iter().position(|arg| arg == "--") {
        Some(split) => app_args.extend(argv[split + 1..].iter().map(String::as_str)),
        None => app_args.extend(argv.iter().skip(1).map(String::as_str)),
    }

    let matches = App::new("srv6-pot")
        .arg(
            Arg::with_name("role")
                .long("role")
                .takes_value(true)
                .required(true)
                .possible_values(&["ingress", "transit", "egress"]),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .takes_value(true)
                .possible_values(&["debug", "info", "warning", "error"]),
        )
        .arg(Arg::with_name("config").long("config").takes_value(true))
        .get_matches_from_safe(app_args)
        .map_err(|err| ConfigError(err.to_string()))?;

    let mut settings = match matches.value_of("config") {
        Some(path) => {
            let mut merged = Config::new();
            merged
                .merge(File::with_name(path))
                .map_err(|err| ConfigError(err.to_string()))?;
            merged
                .try_into::<AppSettings>()
                .map_err(|err| ConfigError(err.to_string()))?
        }
        None => AppSettings::default(),
    };

    if let Some(role) = matches.value_of("role") {
        settings.role = role.parse()?;
    }
    if let Some(level) = matches.value_of("log-level") {
        settings.log_level = level.to_owned();
    }

    Ok(settings)
}

/// Decodes a 32-byte key from its hex form.
pub(crate) fn parse_key(hex: &str) -> std::result::Result<[u8; 32], ConfigError> {
    let hex = hex.trim();
    if !hex.is_ascii() || hex.len() != 64 {
        return Err(ConfigError(format!(
            "key must be 64 hex characters, got {} bytes",
            hex.len()
        )));
    }

    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        let pair = &hex[2 * i..2 * i + 2];
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| ConfigError(format!("invalid hex '{}' in key", pair)))?;
    }
    Ok(key)
}
