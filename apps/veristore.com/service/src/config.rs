use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8791";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_ALLOWED_ORIGIN: &str = "*";
const DEFAULT_HISTORY_PAGE_SIZE: u64 = 10;

const ENV_BIND_ADDR: &str = "VERISTORE_BIND_ADDR";
const ENV_LOG_FILTER: &str = "VERISTORE_LOG_FILTER";
const ENV_PAYMENT_STORE_PATH: &str = "VERISTORE_PAYMENT_STORE_PATH";
const ENV_ALLOWED_ORIGIN: &str = "VERISTORE_ALLOWED_ORIGIN";
const ENV_HISTORY_PAGE_SIZE: &str = "VERISTORE_HISTORY_PAGE_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    /// JSON snapshot the payment store boots from and persists to. `None`
    /// keeps the store in memory only.
    pub payment_store_path: Option<PathBuf>,
    /// Origin echoed in CORS headers; `*` allows any caller.
    pub allowed_origin: String,
    /// Page size applied when the request omits `pageSize`.
    pub default_page_size: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env_or(ENV_BIND_ADDR, DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::Invalid {
                key: ENV_BIND_ADDR,
                message: error.to_string(),
            })?;

        let default_page_size = match env_non_empty(ENV_HISTORY_PAGE_SIZE) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|size| *size >= 1)
                .ok_or_else(|| ConfigError::Invalid {
                    key: ENV_HISTORY_PAGE_SIZE,
                    message: format!("expected a positive integer, got {raw:?}"),
                })?,
            None => DEFAULT_HISTORY_PAGE_SIZE,
        };

        Ok(Self {
            bind_addr,
            log_filter: env_or(ENV_LOG_FILTER, DEFAULT_LOG_FILTER),
            payment_store_path: env_non_empty(ENV_PAYMENT_STORE_PATH).map(PathBuf::from),
            allowed_origin: env_or(ENV_ALLOWED_ORIGIN, DEFAULT_ALLOWED_ORIGIN),
            default_page_size,
        })
    }

    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            payment_store_path: None,
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            default_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env_non_empty(key).unwrap_or_else(|| default.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
