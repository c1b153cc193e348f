//! Process configuration, read once from `BOOKHUB_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::timefmt;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Password every pgwire connection must present.
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Certificate and key paths; TLS is off when absent.
    pub tls: Option<(PathBuf, PathBuf)>,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub local_offset: FixedOffset,
    pub admin: Option<AdminSeed>,
}

#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
    Incomplete(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Incomplete(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("BOOKHUB_JWT_SECRET").ok_or(ConfigError::Missing("BOOKHUB_JWT_SECRET"))?;

        let tls = match (get("BOOKHUB_TLS_CERT"), get("BOOKHUB_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => {
                return Err(ConfigError::Incomplete(
                    "both BOOKHUB_TLS_CERT and BOOKHUB_TLS_KEY must be set, or neither",
                ));
            }
        };

        let admin = match (get("BOOKHUB_ADMIN_EMAIL"), get("BOOKHUB_ADMIN_PASSWORD")) {
            (None, None) => None,
            (Some(email), Some(password)) => Some(AdminSeed { email, password }),
            _ => {
                return Err(ConfigError::Incomplete(
                    "both BOOKHUB_ADMIN_EMAIL and BOOKHUB_ADMIN_PASSWORD must be set, or neither",
                ));
            }
        };

        let local_offset = match get("BOOKHUB_LOCAL_OFFSET") {
            None => timefmt::utc(),
            Some(value) => timefmt::parse_offset(&value).map_err(|_| ConfigError::Invalid {
                var: "BOOKHUB_LOCAL_OFFSET",
                value,
            })?,
        };

        let token_ttl_minutes: i64 = parsed(&get, "BOOKHUB_TOKEN_TTL_MINUTES")?.unwrap_or(15);
        if token_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "BOOKHUB_TOKEN_TTL_MINUTES",
                value: token_ttl_minutes.to_string(),
            });
        }

        Ok(Config {
            bind: get("BOOKHUB_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&get, "BOOKHUB_PORT")?.unwrap_or(5433),
            data_dir: get("BOOKHUB_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            password: get("BOOKHUB_PASSWORD").unwrap_or_else(|| "bookhub".into()),
            max_connections: parsed(&get, "BOOKHUB_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&get, "BOOKHUB_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&get, "BOOKHUB_METRICS_PORT")?,
            tls,
            jwt_secret,
            token_ttl_minutes,
            local_offset,
            admin,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookhub.wal")
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
