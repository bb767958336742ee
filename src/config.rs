use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

// Keeps window arithmetic on epoch milliseconds inside i64
pub const MAX_WINDOW_MS: u64 = i64::MAX as u64 / 4;

// Which document store backs the counters and stored leads
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "lead-gateway")]
#[command(about = "Lead intake endpoint with fixed-window rate limiting and sink fan-out")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Rate limit window in milliseconds (0 disables limiting)
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_MS",
        default_value_t = 60_000,
        value_parser = clap::value_parser!(u64).range(..=MAX_WINDOW_MS)
    )]
    pub rate_limit_window_ms: u64,

    // Admissions per window per client (0 disables limiting)
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 5)]
    pub rate_limit_max: u32,

    #[arg(long, env = "RATE_LIMIT_COLLECTION", default_value = "rateLimits")]
    pub rate_limit_collection: String,

    #[arg(long, env = "LEADS_COLLECTION", default_value = "contactMessages")]
    pub leads_collection: String,

    #[arg(long, env = "DEFAULT_LANGUAGE", default_value = "he")]
    pub default_language: String,

    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::Sqlite)]
    pub store: StoreBackend,

    #[arg(long, env = "SQLITE_PATH", default_value = "lead-gateway.db")]
    pub sqlite_path: PathBuf,

    // Per-sink timeout in milliseconds (0 disables)
    #[arg(long, env = "SINK_TIMEOUT_MS", default_value_t = 10_000)]
    pub sink_timeout_ms: u64,

    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 64 * 1024)]
    pub max_body_bytes: usize,

    // Expired counter sweep interval in seconds (0 disables)
    #[arg(long, env = "REAP_INTERVAL_SECS", default_value_t = 300)]
    pub reap_interval_secs: u64,

    #[arg(long, env = "SHEETS_ID")]
    pub sheets_id: Option<String>,

    #[arg(long, env = "SHEETS_CLIENT_EMAIL")]
    pub sheets_client_email: Option<String>,

    #[arg(long, env = "SHEETS_PRIVATE_KEY", hide_env_values = true)]
    pub sheets_private_key: Option<String>,

    #[arg(long, env = "SHEETS_RANGE")]
    pub sheets_range: Option<String>,

    #[arg(long, env = "MAIL_TO")]
    pub mail_to: Option<String>,

    #[arg(long, env = "MAIL_USER")]
    pub mail_user: Option<String>,

    #[arg(long, env = "MAIL_PASS", hide_env_values = true)]
    pub mail_pass: Option<String>,

    #[arg(long, env = "MAIL_HOST")]
    pub mail_host: Option<String>,

    #[arg(long, env = "MAIL_PORT")]
    pub mail_port: Option<u16>,

    #[arg(long, env = "MAIL_FROM")]
    pub mail_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max: 5,
        }
    }
}

impl RateLimitConfig {
    // window_ms = 0 or max = 0 turns the limiter off
    pub fn is_disabled(&self) -> bool {
        self.window_ms == 0 || self.max == 0
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub client_email: String,
    pub private_key: String,
    pub range: String,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub to: String,
    pub user: String,
    pub pass: String,
    pub host: String,
    pub port: u16,
    pub from: String,
}

pub const DEFAULT_MAIL_PORT: u16 = 465;

impl Args {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            window_ms: self.rate_limit_window_ms,
            max: self.rate_limit_max,
        }
    }

    pub fn sink_timeout(&self) -> Option<Duration> {
        (self.sink_timeout_ms > 0).then(|| Duration::from_millis(self.sink_timeout_ms))
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        (self.reap_interval_secs > 0).then(|| Duration::from_secs(self.reap_interval_secs))
    }

    // None unless all four spreadsheet settings are present
    pub fn sheets(&self) -> Option<SheetsConfig> {
        Some(SheetsConfig {
            spreadsheet_id: present(&self.sheets_id)?,
            client_email: present(&self.sheets_client_email)?,
            private_key: present(&self.sheets_private_key)?.replace("\\n", "\n"),
            range: present(&self.sheets_range)?,
        })
    }

    // None unless recipient, user, password and host are present
    pub fn mail(&self) -> Option<MailConfig> {
        let user = present(&self.mail_user)?;
        Some(MailConfig {
            to: present(&self.mail_to)?,
            pass: present(&self.mail_pass)?,
            host: present(&self.mail_host)?,
            port: self.mail_port.unwrap_or(DEFAULT_MAIL_PORT),
            from: present(&self.mail_from).unwrap_or_else(|| user.clone()),
            user,
        })
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
