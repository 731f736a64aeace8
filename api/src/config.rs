use application::{IndexConfig, StoreLayout};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Identity connected at startup, if any.
    pub writer_identity: Option<String>,
    pub layout: StoreLayout,
    pub index: IndexConfig,
    /// Back the in-memory store with compare-and-swap.
    pub conditional_writes: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults_layout = StoreLayout::default();
        let defaults_index = IndexConfig::default();
        Self {
            port: parse_or("PORT", lookup("PORT"), DEFAULT_PORT),
            writer_identity: lookup("WRITER_IDENTITY")
                .map(|raw| raw.trim().to_string())
                .filter(|identity| !identity.is_empty()),
            layout: StoreLayout {
                index_key: non_empty_or(
                    "RECORD_INDEX_KEY",
                    lookup("RECORD_INDEX_KEY"),
                    defaults_layout.index_key,
                ),
                record_key_prefix: non_empty_or(
                    "RECORD_KEY_PREFIX",
                    lookup("RECORD_KEY_PREFIX"),
                    defaults_layout.record_key_prefix,
                ),
            },
            index: IndexConfig {
                max_cas_attempts: parse_or(
                    "INDEX_MAX_CAS_ATTEMPTS",
                    lookup("INDEX_MAX_CAS_ATTEMPTS"),
                    defaults_index.max_cas_attempts,
                )
                .max(1),
            },
            conditional_writes: parse_or(
                "STORE_CONDITIONAL_WRITES",
                lookup("STORE_CONDITIONAL_WRITES"),
                false,
            ),
        }
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match raw {
        Some(value) => match T::from_str(value.trim()) {
            Ok(parsed) => {
                info!("Using {} = {} from environment.", name, parsed);
                parsed
            }
            Err(_) => {
                warn!(
                    "Invalid {} value '{}' in environment. Using default {}.",
                    name, value, default
                );
                default
            }
        },
        None => default,
    }
}

fn non_empty_or(name: &str, raw: Option<String>, default: String) -> String {
    match raw.map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => {
            info!("Using {} = {} from environment.", name, value);
            value
        }
        Some(_) => {
            warn!("Empty {} in environment. Using default '{}'.", name, default);
            default
        }
        None => default,
    }
}
