use std::str::FromStr;
use std::time::Duration;

/// Default time to wait for the readiness selector, in milliseconds.
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;
/// Default budget for a whole extraction (navigation through last field).
pub const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 120_000;
/// Default bound on closing a session once the outcome is known.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    pub headless: bool,
    pub proxy_url: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub ready_timeout: Duration,
    pub scrape_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            scrape_timeout: Duration::from_millis(DEFAULT_SCRAPE_TIMEOUT_MS),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
        }
    }
}

/// Process configuration, read once from the environment at startup.
///
/// | variable                         | default |
/// |----------------------------------|---------|
/// | `PORT`                           | 3000    |
/// | `REDIS_URL`                      | unset: histories kept in memory |
/// | `DATABASE_URL`                   | unset: sources kept in memory   |
/// | `PROXY_SERVER`                   | unset   |
/// | `SCRAPEHUB_HEADLESS`             | true    |
/// | `SCRAPEHUB_READY_TIMEOUT_MS`     | 30000   |
/// | `SCRAPEHUB_SCRAPE_TIMEOUT_MS`    | 120000  |
/// | `SCRAPEHUB_CLOSE_TIMEOUT_MS`     | 5000    |
/// | `SCRAPEHUB_MAX_CONFLICT_RETRIES` | 8       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeHubConfig {
    pub port: u16,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub browser: BrowserOptions,
    pub extract: ExtractOptions,
    pub max_conflict_retries: u32,
}

impl Default for ScrapeHubConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            redis_url: None,
            database_url: None,
            browser: BrowserOptions::default(),
            extract: ExtractOptions::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl ScrapeHubConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            redis_url: get("REDIS_URL"),
            database_url: get("DATABASE_URL"),
            browser: BrowserOptions {
                headless: parse_or(get("SCRAPEHUB_HEADLESS"), "SCRAPEHUB_HEADLESS", true)?,
                proxy_url: get("PROXY_SERVER"),
            },
            extract: ExtractOptions {
                ready_timeout: Duration::from_millis(parse_or(
                    get("SCRAPEHUB_READY_TIMEOUT_MS"),
                    "SCRAPEHUB_READY_TIMEOUT_MS",
                    DEFAULT_READY_TIMEOUT_MS,
                )?),
                scrape_timeout: Duration::from_millis(parse_or(
                    get("SCRAPEHUB_SCRAPE_TIMEOUT_MS"),
                    "SCRAPEHUB_SCRAPE_TIMEOUT_MS",
                    DEFAULT_SCRAPE_TIMEOUT_MS,
                )?),
                close_timeout: Duration::from_millis(parse_or(
                    get("SCRAPEHUB_CLOSE_TIMEOUT_MS"),
                    "SCRAPEHUB_CLOSE_TIMEOUT_MS",
                    DEFAULT_CLOSE_TIMEOUT_MS,
                )?),
            },
            max_conflict_retries: parse_or(
                get("SCRAPEHUB_MAX_CONFLICT_RETRIES"),
                "SCRAPEHUB_MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            )?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, value, e)),
        None => Ok(default),
    }
}
