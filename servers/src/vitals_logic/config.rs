use clap::Parser;
use lib_vitals::constants::{
    ACTIVITY_PERIOD, ALARM_PERIOD, DEFAULT_ENDPOINT, DEFAULT_SERVER_PORT, DEFAULT_SUBJECT,
    ECG_STREAM_PERIOD, SUMMARY_PERIOD,
};
use lib_vitals::generator::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "vitals.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid endpoint url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint url '{0}' must use ws:// or wss://")]
    UnsupportedScheme(String),
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
}

/// Raw settings as they arrive from one source. Every field is optional so
/// sources can be layered with [`Config::merge`].
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Vital-sign telemetry broadcast server and subscriber", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "VITALS_PORT", help = "Port the broadcast server listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "VITALS_WS_URL", help = "WebSocket endpoint the client connects to.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "VITALS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "VITALS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "VITALS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "VITALS_ECG_STREAM_MS", help = "Period of ecg_stream messages in milliseconds.")]
    pub ecg_stream_ms: Option<u64>,

    #[clap(long, env = "VITALS_ACTIVITY_MS", help = "Period of activity messages in milliseconds.")]
    pub activity_ms: Option<u64>,

    #[clap(long, env = "VITALS_SUMMARY_MS", help = "Period of ecg_update/temp_update messages in milliseconds.")]
    pub summary_ms: Option<u64>,

    #[clap(long, env = "VITALS_ALARM_MS", help = "Period of the alarm/alarm_clear toggle in milliseconds.")]
    pub alarm_ms: Option<u64>,

    #[clap(long, env = "VITALS_SUBJECT", help = "Subject id the generator reports for.")]
    pub subject: Option<String>,

    #[clap(long, env = "VITALS_LOCAL", help = "Client only: run the generator in-process instead of connecting.")]
    #[serde(default)]
    pub local: bool,
}

impl Config {
    fn defaults() -> Config {
        Config {
            port: Some(DEFAULT_SERVER_PORT),
            ws_url: Some(DEFAULT_ENDPOINT.to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ecg_stream_ms: Some(millis(ECG_STREAM_PERIOD)),
            activity_ms: Some(millis(ACTIVITY_PERIOD)),
            summary_ms: Some(millis(SUMMARY_PERIOD)),
            alarm_ms: Some(millis(ALARM_PERIOD)),
            subject: Some(DEFAULT_SUBJECT.to_string()),
            ..Default::default()
        }
    }

    // 'other' overrides 'self' wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            ws_url: other.ws_url.or(self.ws_url),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ecg_stream_ms: other.ecg_stream_ms.or(self.ecg_stream_ms),
            activity_ms: other.activity_ms.or(self.activity_ms),
            summary_ms: other.summary_ms.or(self.summary_ms),
            alarm_ms: other.alarm_ms.or(self.alarm_ms),
            subject: other.subject.or(self.subject),
            local: other.local || self.local,
        }
    }
}

fn millis(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX)
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub ws_url: Url,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub local: bool,
    pub generator: GeneratorConfig,
}

impl TryFrom<Config> for Settings {
    type Error = ConfigError;

    fn try_from(config: Config) -> Result<Self, Self::Error> {
        let defaults = Config::defaults();
        let config = defaults.merge(config);

        let raw_url = config.ws_url.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let ws_url = validate_ws_url(&raw_url)?;

        let generator = GeneratorConfig {
            subject: config.subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            ecg_stream_period: period("ecgStreamMs", config.ecg_stream_ms, ECG_STREAM_PERIOD)?,
            activity_period: period("activityMs", config.activity_ms, ACTIVITY_PERIOD)?,
            summary_period: period("summaryMs", config.summary_ms, SUMMARY_PERIOD)?,
            alarm_period: period("alarmMs", config.alarm_ms, ALARM_PERIOD)?,
            seed: None,
        };

        Ok(Settings {
            port: config.port.unwrap_or(DEFAULT_SERVER_PORT),
            ws_url,
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            local: config.local,
            generator,
        })
    }
}

fn period(name: &'static str, ms: Option<u64>, fallback: Duration) -> Result<Duration, ConfigError> {
    match ms {
        Some(0) => Err(ConfigError::ZeroPeriod(name)),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(fallback),
    }
}

pub fn validate_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme(raw.to_string())),
    }
}

fn read_config_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return Ok(None);
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str::<Config>(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(config))
}

/// Layers defaults < config file < environment/CLI. `cli` is what clap parsed.
pub fn resolve(cli: Config) -> Result<Settings, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    current_config = current_config.merge(cli);

    Settings::try_from(current_config)
}

pub fn load_config() -> Result<Settings, ConfigError> {
    // .env values become environment variables before clap reads them.
    dotenvy::dotenv().ok();
    resolve(Config::parse())
}
