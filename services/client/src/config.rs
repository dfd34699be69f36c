//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

use crate::cache::CacheConfig;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub log_level: Level,
    pub session_path: PathBuf,
    pub placeholder_cover: String,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost/digital_books".to_string(),
            log_level: Level::INFO,
            session_path: PathBuf::from("./.library-session.json"),
            placeholder_cover: "/placeholder-book.jpg".to_string(),
            request_timeout: Duration::from_secs(30),
            page_size: 12,
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        // --- Remote API ---
        let api_base_url = lookup("LIBRARY_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "LIBRARY_API_URL".to_string(),
                format!("'{}' is not an http(s) URL", api_base_url),
            ));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Local State ---
        let session_path = lookup("LIBRARY_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.session_path);
        let placeholder_cover =
            lookup("LIBRARY_PLACEHOLDER_COVER").unwrap_or(defaults.placeholder_cover);

        let request_timeout = seconds(&lookup, "LIBRARY_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?;
        let page_size = number(&lookup, "LIBRARY_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "LIBRARY_PAGE_SIZE".to_string(),
                "page size must be positive".to_string(),
            ));
        }

        // --- Query Cache ---
        let cache_defaults = defaults.cache;
        let cache = CacheConfig {
            books_stale_after: seconds(&lookup, "LIBRARY_BOOKS_STALE_SECS", cache_defaults.books_stale_after)?,
            bookmarks_stale_after: seconds(
                &lookup,
                "LIBRARY_BOOKMARKS_STALE_SECS",
                cache_defaults.bookmarks_stale_after,
            )?,
            categories_stale_after: seconds(
                &lookup,
                "LIBRARY_CATEGORIES_STALE_SECS",
                cache_defaults.categories_stale_after,
            )?,
            users_stale_after: seconds(&lookup, "LIBRARY_USERS_STALE_SECS", cache_defaults.users_stale_after)?,
            gc_after: seconds(&lookup, "LIBRARY_CACHE_GC_SECS", cache_defaults.gc_after)?,
            retries: number(&lookup, "LIBRARY_QUERY_RETRIES", cache_defaults.retries)?,
        };

        Ok(Self {
            api_base_url,
            log_level,
            session_path,
            placeholder_cover,
            request_timeout,
            page_size,
            cache,
        })
    }
}

fn number<F>(lookup: &F, name: &str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn seconds<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
