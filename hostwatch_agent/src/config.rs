//! Runtime configuration: environment variables (optionally from `.env`),
//! then command-line flags on top.

use crate::alert::Thresholds;
use crate::remote::S3Config;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const USAGE: &str = "Usage: hostwatch_agent [--data-dir DIR|-d DIR] [--interval SECS|-i SECS] \
[--rotate SECS|-r SECS] [--once] [--local-only]";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: String, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("unexpected argument {0:?}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackConfig {
    pub token: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub tick: Duration,
    pub rotation: Duration,
    pub settle: Duration,
    pub s3: Option<S3Config>,
    pub database_url: Option<String>,
    pub slack: Option<SlackConfig>,
    pub thresholds: Thresholds,
    pub host_override: Option<u64>,
    pub once: bool,
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn secs(name: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(name));
    }
    Ok(Duration::from_secs(value))
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let num_or = |k: &'static str, default: u64| -> Result<u64, ConfigError> {
            get(k).map_or(Ok(default), |v| parse_num(k, &v))
        };
        let pct_or = |k: &'static str, default: f64| -> Result<f64, ConfigError> {
            get(k).map_or(Ok(default), |v| parse_num(k, &v))
        };

        let s3 = get("BUCKET_NAME").map(|bucket| S3Config {
            bucket,
            region: get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: get("HOSTWATCH_S3_ENDPOINT"),
        });
        let slack = match (get("SLACK_BOT_TOKEN"), get("SLACK_CHANNEL")) {
            (Some(token), Some(channel)) => Some(SlackConfig { token, channel }),
            _ => None,
        };
        let defaults = Thresholds::default();

        Ok(Self {
            data_dir: get("HOSTWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dados_monitoramento")),
            tick: secs("HOSTWATCH_TICK_SECS", num_or("HOSTWATCH_TICK_SECS", 10)?)?,
            rotation: secs("HOSTWATCH_ROTATION_SECS", num_or("HOSTWATCH_ROTATION_SECS", 300)?)?,
            settle: Duration::from_millis(num_or("HOSTWATCH_SETTLE_MS", 1000)?),
            s3,
            database_url: get("HOSTWATCH_DATABASE_URL"),
            slack,
            thresholds: Thresholds {
                cpu: pct_or("HOSTWATCH_LIMIT_CPU", defaults.cpu)?,
                ram: pct_or("HOSTWATCH_LIMIT_RAM", defaults.ram)?,
                disk: pct_or("HOSTWATCH_LIMIT_DISK", defaults.disk)?,
            },
            host_override: get("HOSTWATCH_HOST_ID")
                .map(|v| parse_num("HOSTWATCH_HOST_ID", &v))
                .transpose()?,
            once: false,
        })
    }

    /// Flags override whatever the environment said.
    pub fn apply(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(v) = args.interval {
            self.tick = secs("--interval", v)?;
        }
        if let Some(v) = args.rotate {
            self.rotation = secs("--rotate", v)?;
        }
        if args.local_only {
            self.s3 = None;
        }
        self.once = args.once;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub data_dir: Option<PathBuf>,
    pub interval: Option<u64>,
    pub rotate: Option<u64>,
    pub once: bool,
    pub local_only: bool,
    pub help: bool,
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, ConfigError> {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut out = CliArgs::default();

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, ConfigError> {
            inline
                .clone()
                .or_else(|| it.next())
                .ok_or_else(|| ConfigError::MissingValue(name.to_string()))
        };
        match flag.as_str() {
            "-h" | "--help" => out.help = true,
            "--once" => out.once = true,
            "--local-only" => out.local_only = true,
            "--data-dir" | "-d" => out.data_dir = Some(PathBuf::from(value("--data-dir")?)),
            "--interval" | "-i" => {
                out.interval = Some(parse_num("--interval", &value("--interval")?)?)
            }
            "--rotate" | "-r" => out.rotate = Some(parse_num("--rotate", &value("--rotate")?)?),
            _ => return Err(ConfigError::Unexpected(arg)),
        }
    }
    Ok(out)
}
