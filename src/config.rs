use std::{convert::Infallible, str::FromStr, time::Duration};

use clap::{ArgAction, Args, Parser};

use crate::jsonlog::Level;

#[derive(Debug, Clone, Parser)]
#[command(name = "greenreel", version, about = "Movie catalogue JSON API")]
pub struct AppConfig {
    /// API server port
    #[arg(long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Environment (development|staging|production)
    #[arg(
        long,
        env = "APP_ENV",
        default_value = "development",
        value_parser = ["development", "staging", "production"]
    )]
    pub env: String,

    #[command(flatten)]
    pub db: DbConfig,

    #[command(flatten)]
    pub limiter: LimiterConfig,

    #[command(flatten)]
    pub smtp: SmtpConfig,

    #[command(flatten)]
    pub cors: CorsConfig,

    /// Count requests and expose /debug/vars
    #[arg(
        long = "metrics",
        alias = "metrics-enabled",
        env = "METRICS_ENABLED",
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub metrics: bool,

    /// Minimum log level (info|error|fatal|off)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

#[derive(Debug, Clone, Args)]
pub struct DbConfig {
    /// PostgreSQL DSN
    #[arg(long = "db-dsn", env = "DATABASE_URL")]
    pub dsn: String,

    /// PostgreSQL max open connections
    #[arg(long = "db-max-open-conns", env = "DB_MAX_OPEN_CONNS", default_value_t = 25)]
    pub max_open_conns: u32,

    /// PostgreSQL max idle connections
    #[arg(long = "db-max-idle-conns", env = "DB_MAX_IDLE_CONNS", default_value_t = 25)]
    pub max_idle_conns: u32,

    /// PostgreSQL max connection idle time
    #[arg(
        long = "db-max-idle-time",
        env = "DB_MAX_IDLE_TIME",
        default_value = "15m",
        value_parser = humantime::parse_duration
    )]
    pub max_idle_time: Duration,
}

#[derive(Debug, Clone, Args)]
pub struct LimiterConfig {
    /// Rate limiter maximum requests per second
    #[arg(long = "limiter-rps", env = "LIMITER_RPS", default_value_t = 2.0)]
    pub rps: f64,

    /// Rate limiter maximum burst
    #[arg(long = "limiter-burst", env = "LIMITER_BURST", default_value_t = 4)]
    pub burst: u32,

    /// Enable rate limiter
    #[arg(
        long = "limiter-enabled",
        env = "LIMITER_ENABLED",
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub enabled: bool,
}

#[derive(Clone, Args)]
pub struct SmtpConfig {
    /// SMTP host
    #[arg(long = "smtp-host", env = "SMTP_HOST", default_value = "localhost")]
    pub host: String,

    /// SMTP port
    #[arg(id = "smtp_port", long = "smtp-port", env = "SMTP_PORT", default_value_t = 25)]
    pub port: u16,

    /// SMTP username
    #[arg(long = "smtp-username", env = "SMTP_USERNAME", default_value = "")]
    pub username: String,

    /// SMTP password
    #[arg(long = "smtp-password", env = "SMTP_PASSWORD", default_value = "")]
    pub password: String,

    /// SMTP sender
    #[arg(
        long = "smtp-sender",
        env = "SMTP_SENDER",
        default_value = "Greenreel <no-reply@greenreel.local>"
    )]
    pub sender: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("sender", &self.sender)
            .finish()
    }
}

#[derive(Debug, Clone, Args)]
pub struct CorsConfig {
    /// Trusted CORS origins (space separated)
    #[arg(long = "cors-trusted-origins", env = "CORS_TRUSTED_ORIGINS", default_value = "")]
    pub trusted_origins: TrustedOrigins,
}

/// Exact-match list of origins allowed to make cross-origin requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedOrigins(Vec<String>);

impl TrustedOrigins {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.0.iter().any(|o| o == origin)
    }
}

impl FromStr for TrustedOrigins {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.split_whitespace().map(str::to_owned).collect()))
    }
}
