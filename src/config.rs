use crate::error::{Result, SolarMaxError};
use ini::{Ini, Properties};
use log::LevelFilter;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "solarmax.conf";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_DEVICE: u8 = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: f32 = 10.0; //secs between polling
pub const DEFAULT_STATS_INTERVAL_SECS: f32 = 3600.0; //secs between showing stats
pub const DEFAULT_READ_TIMEOUT_SECS: f32 = 30.0; //give up on a silent inverter

const INVERTER_SECTION_PREFIX: &str = "inverter";

#[derive(Clone, Debug, PartialEq)]
pub struct General {
    pub log: Option<String>,
    pub log_level: LevelFilter,
    pub poll_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for General {
    fn default() -> Self {
        Self {
            log: None,
            log_level: LevelFilter::Debug,
            poll_interval: Duration::from_secs_f32(DEFAULT_POLL_INTERVAL_SECS),
            stats_interval: Duration::from_secs_f32(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InverterConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub device: u8,
    /// `None` waits forever for an answer
    pub read_timeout: Option<Duration>,
    /// ICMP check before connecting; switch off for hosts dropping pings
    pub ping: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub general: General,
    pub inverters: Vec<InverterConfig>,
}

fn parse_value<T: FromStr>(section: &str, props: &Properties, key: &str) -> Result<Option<T>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            SolarMaxError::config(format!("[{}] {}: invalid value {:?}", section, key, raw))
        }),
    }
}

fn parse_bool(section: &str, props: &Properties, key: &str) -> Result<Option<bool>> {
    match props.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(SolarMaxError::config(format!(
                "[{}] {}: expected a boolean, got {:?}",
                section, key, v
            ))),
        },
    }
}

fn parse_secs(section: &str, props: &Properties, key: &str) -> Result<Option<Duration>> {
    match parse_value::<f32>(section, props, key)? {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(SolarMaxError::config(format!(
            "[{}] {}: invalid interval {}",
            section, key, secs
        ))),
        Some(secs) => Duration::try_from_secs_f32(secs).map(Some).map_err(|e| {
            SolarMaxError::config(format!("[{}] {}: invalid interval {}: {}", section, key, secs, e))
        }),
        None => Ok(None),
    }
}

impl General {
    fn from_section(props: &Properties) -> Result<Self> {
        let defaults = General::default();
        Ok(Self {
            log: props.get("log").map(String::from),
            log_level: parse_value("general", props, "log_level")?
                .unwrap_or(defaults.log_level),
            poll_interval: parse_secs("general", props, "poll_interval")?
                .unwrap_or(defaults.poll_interval),
            stats_interval: parse_secs("general", props, "stats_interval")?
                .unwrap_or(defaults.stats_interval),
        })
    }
}

impl InverterConfig {
    fn from_section(section: &str, props: &Properties) -> Result<Self> {
        let name = match section.split_once('.') {
            Some((_, name)) if !name.is_empty() => name.to_string(),
            _ => section.to_string(),
        };
        let host = props
            .get("host")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SolarMaxError::config(format!("[{}]: missing host", section)))?
            .to_string();

        let read_timeout = match parse_secs(section, props, "read_timeout")? {
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
            None => Some(Duration::from_secs_f32(DEFAULT_READ_TIMEOUT_SECS)),
        };

        Ok(Self {
            name,
            host,
            port: parse_value(section, props, "port")?.unwrap_or(DEFAULT_PORT),
            device: parse_value(section, props, "device")?.unwrap_or(DEFAULT_DEVICE),
            read_timeout,
            ping: parse_bool(section, props, "ping")?.unwrap_or(true),
        })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conf = Ini::load_from_file(path).map_err(|e| {
            SolarMaxError::config(format!("cannot open {}: {}", path.display(), e))
        })?;
        Config::from_ini(&conf)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let conf = Ini::load_from_str(text).map_err(|e| SolarMaxError::config(e.to_string()))?;
        Config::from_ini(&conf)
    }

    fn from_ini(conf: &Ini) -> Result<Self> {
        let general = match conf.section(Some("general")) {
            Some(props) => General::from_section(props)?,
            None => General::default(),
        };

        let mut inverters: Vec<InverterConfig> = vec![];
        for (section, props) in conf.iter() {
            let section = match section {
                Some(s) if s.starts_with(INVERTER_SECTION_PREFIX) => s,
                _ => continue,
            };
            let inverter = InverterConfig::from_section(section, props)?;
            if inverters.iter().any(|i| i.name == inverter.name) {
                return Err(SolarMaxError::config(format!(
                    "duplicate inverter name: {}",
                    inverter.name
                )));
            }
            inverters.push(inverter);
        }

        Ok(Config { general, inverters })
    }
}
