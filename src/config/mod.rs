//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration as StdDuration,
};

use apalis_cron::Schedule;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use time::Duration;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::scoring::{
    DEFAULT_COMMENT_WEIGHT, DEFAULT_DOWNLOAD_WEIGHT, DEFAULT_HALF_LIFE_HOURS, DEFAULT_LIKE_WEIGHT,
    ScoreWeights,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "crunevo";
const ENV_PREFIX: &str = "CRUNEVO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_OPS_PORT: u16 = 3100;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_BLOCK_LIMIT: u32 = 5;
const DEFAULT_BLOCK_WINDOW_SECS: u64 = 900;
const DEFAULT_PREVIEW_TTL_SECS: u64 = 6 * 60 * 60;
const DEFAULT_PREVIEW_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PREVIEW_MAX_BODY_BYTES: u64 = 512 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("crunevo-preview/", env!("CARGO_PKG_VERSION"));
const DEFAULT_WEATHER_TTL_SECS: u64 = 600;
const DEFAULT_WEATHER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WEATHER_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
const DEFAULT_PRESENCE_TTL_SECS: u64 = 300;
const DEFAULT_QUERY_CAPACITY: u64 = 2_000;
const DEFAULT_QUERY_TTL_SECS: u64 = 300;
const DEFAULT_PREVIEW_CAPACITY: u64 = 1_000;
const DEFAULT_WEATHER_CAPACITY: u64 = 500;
const DEFAULT_PRESENCE_CAPACITY: u64 = 10_000;
const DEFAULT_PROFILER_SAMPLE_WINDOW: u64 = 1_000;
const DEFAULT_SLOW_QUERY_THRESHOLD_SECS: f64 = 0.1;
const DEFAULT_RECENT_DAYS: u32 = 7;
const DEFAULT_SEARCH_LIMIT: u32 = 20;
const DEFAULT_RESCORE_CRON: &str = "0 0 * * * *";
const DEFAULT_SWEEP_CRON: &str = "0 */5 * * * *";

/// Command-line arguments for the CRUNEVO core binary.
#[derive(Debug, Parser)]
#[command(name = "crunevo", version, about = "CRUNEVO feed, cache and throttling core")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CRUNEVO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run background jobs and the ops HTTP listener.
    Serve(Box<ServeArgs>),
    /// Recompute and persist feed scores once, then exit.
    Rescore(RescoreArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RescoreArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the retention window in days.
    #[arg(long = "retention-days", value_name = "DAYS")]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the ops listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the ops listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the number of failed logins that blocks a username.
    #[arg(long = "login-block-limit", value_name = "COUNT")]
    pub login_block_limit: Option<u32>,

    /// Override the failed-login window.
    #[arg(long = "login-block-window-seconds", value_name = "SECONDS")]
    pub login_block_window_seconds: Option<u64>,

    /// Override the query-cache capacity.
    #[arg(long = "cache-query-capacity", value_name = "COUNT")]
    pub cache_query_capacity: Option<u64>,

    /// Override the rescore cron expression (with seconds field).
    #[arg(long = "scheduler-rescore-cron", value_name = "CRON")]
    pub scheduler_rescore_cron: Option<String>,

    /// Override the cache sweep cron expression (with seconds field).
    #[arg(long = "scheduler-sweep-cron", value_name = "CRON")]
    pub scheduler_sweep_cron: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub scoring: ScoringSettings,
    pub login: LoginSettings,
    pub link_preview: LinkPreviewSettings,
    pub weather: WeatherSettings,
    pub presence: PresenceSettings,
    pub cache: CacheSettings,
    pub profiler: ProfilerSettings,
    pub queries: QuerySettings,
    pub scheduler: SchedulerSettings,
    /// Keys that were absent and fell back to their defaults.
    pub defaulted: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub ops_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct ScoringSettings {
    pub weights: ScoreWeights,
    pub retention: Duration,
}

#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub block_limit: NonZeroU32,
    pub block_window: Duration,
}

#[derive(Debug, Clone)]
pub struct LinkPreviewSettings {
    pub ttl: Duration,
    pub timeout: StdDuration,
    pub max_body_bytes: NonZeroUsize,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub ttl: Duration,
    pub timeout: StdDuration,
    pub base_url: Url,
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub query_capacity: NonZeroUsize,
    pub query_ttl: Duration,
    pub preview_capacity: NonZeroUsize,
    pub weather_capacity: NonZeroUsize,
    pub presence_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ProfilerSettings {
    pub sample_window: NonZeroUsize,
    pub slow_query_threshold: StdDuration,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub blocks_recent_days: u32,
    pub search_limit: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub rescore: Schedule,
    pub sweep: Schedule,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Rescore(args)) => raw.apply_rescore_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    scoring: RawScoringSettings,
    login: RawLoginSettings,
    link_preview: RawLinkPreviewSettings,
    weather: RawWeatherSettings,
    presence: RawPresenceSettings,
    cache: RawCacheSettings,
    profiler: RawProfilerSettings,
    queries: RawQuerySettings,
    scheduler: RawSchedulerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(limit) = overrides.login_block_limit {
            self.login.block_limit = Some(limit);
        }
        if let Some(window) = overrides.login_block_window_seconds {
            self.login.block_window_seconds = Some(window);
        }
        if let Some(capacity) = overrides.cache_query_capacity {
            self.cache.query_capacity = Some(capacity);
        }
        if let Some(cron) = overrides.scheduler_rescore_cron.as_ref() {
            self.scheduler.rescore_cron = Some(cron.clone());
        }
        if let Some(cron) = overrides.scheduler_sweep_cron.as_ref() {
            self.scheduler.sweep_cron = Some(cron.clone());
        }
    }

    fn apply_rescore_overrides(&mut self, args: &RescoreArgs) {
        self.apply_database_override(&args.database);
        if let Some(days) = args.retention_days {
            self.scoring.retention_days = Some(days);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

/// Records which keys fell back to their defaults.
#[derive(Debug, Default)]
struct Defaults {
    keys: Vec<&'static str>,
}

impl Defaults {
    fn or<T>(&mut self, value: Option<T>, default: T, key: &'static str) -> T {
        value.unwrap_or_else(|| {
            self.keys.push(key);
            default
        })
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            scoring,
            login,
            link_preview,
            weather,
            presence,
            cache,
            profiler,
            queries,
            scheduler,
        } = raw;

        let mut defaults = Defaults::default();
        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let scoring = build_scoring_settings(scoring, &mut defaults)?;
        let login = build_login_settings(login, &mut defaults)?;
        let link_preview = build_link_preview_settings(link_preview, &mut defaults)?;
        let weather = build_weather_settings(weather, &mut defaults)?;
        let presence = build_presence_settings(presence, &mut defaults)?;
        let cache = build_cache_settings(cache)?;
        let profiler = build_profiler_settings(profiler, &mut defaults)?;
        let queries = build_query_settings(queries)?;
        let scheduler = build_scheduler_settings(scheduler)?;

        Ok(Self {
            server,
            logging,
            database,
            scoring,
            login,
            link_preview,
            weather,
            presence,
            cache,
            profiler,
            queries,
            scheduler,
            defaulted: defaults.keys,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_OPS_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let ops_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.ops_addr", reason))?;

    Ok(ServerSettings { ops_addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_scoring_settings(
    scoring: RawScoringSettings,
    defaults: &mut Defaults,
) -> Result<ScoringSettings, LoadError> {
    let like = defaults.or(scoring.like_weight, DEFAULT_LIKE_WEIGHT, "scoring.like_weight");
    let download = defaults.or(
        scoring.download_weight,
        DEFAULT_DOWNLOAD_WEIGHT,
        "scoring.download_weight",
    );
    let comment = defaults.or(
        scoring.comment_weight,
        DEFAULT_COMMENT_WEIGHT,
        "scoring.comment_weight",
    );
    let half_life = defaults.or(
        scoring.half_life_hours,
        DEFAULT_HALF_LIFE_HOURS,
        "scoring.half_life_hours",
    );
    let weights = ScoreWeights::new(like, download, comment, half_life)
        .map_err(|err| LoadError::invalid("scoring", err.to_string()))?;

    let retention_days = defaults.or(
        scoring.retention_days,
        DEFAULT_RETENTION_DAYS,
        "scoring.retention_days",
    );
    if retention_days == 0 {
        return Err(LoadError::invalid(
            "scoring.retention_days",
            "must be greater than zero",
        ));
    }

    Ok(ScoringSettings {
        weights,
        retention: Duration::days(i64::from(retention_days)),
    })
}

fn build_login_settings(
    login: RawLoginSettings,
    defaults: &mut Defaults,
) -> Result<LoginSettings, LoadError> {
    let limit = defaults.or(login.block_limit, DEFAULT_BLOCK_LIMIT, "login.block_limit");
    let window = defaults.or(
        login.block_window_seconds,
        DEFAULT_BLOCK_WINDOW_SECS,
        "login.block_window_seconds",
    );

    Ok(LoginSettings {
        block_limit: non_zero_u32(limit.into(), "login.block_limit")?,
        block_window: positive_seconds(window, "login.block_window_seconds")?,
    })
}

fn build_link_preview_settings(
    preview: RawLinkPreviewSettings,
    defaults: &mut Defaults,
) -> Result<LinkPreviewSettings, LoadError> {
    let ttl = defaults.or(
        preview.ttl_seconds,
        DEFAULT_PREVIEW_TTL_SECS,
        "link_preview.ttl_seconds",
    );
    let timeout = defaults.or(
        preview.timeout_seconds,
        DEFAULT_PREVIEW_TIMEOUT_SECS,
        "link_preview.timeout_seconds",
    );
    if timeout == 0 {
        return Err(LoadError::invalid(
            "link_preview.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = non_zero_usize(
        preview
            .max_body_bytes
            .unwrap_or(DEFAULT_PREVIEW_MAX_BODY_BYTES),
        "link_preview.max_body_bytes",
    )?;
    let user_agent = preview
        .user_agent
        .filter(|agent| !agent.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    Ok(LinkPreviewSettings {
        ttl: positive_seconds(ttl, "link_preview.ttl_seconds")?,
        timeout: StdDuration::from_secs(timeout),
        max_body_bytes,
        user_agent,
    })
}

fn build_weather_settings(
    weather: RawWeatherSettings,
    defaults: &mut Defaults,
) -> Result<WeatherSettings, LoadError> {
    let ttl = defaults.or(
        weather.ttl_seconds,
        DEFAULT_WEATHER_TTL_SECS,
        "weather.ttl_seconds",
    );
    let timeout = weather.timeout_seconds.unwrap_or(DEFAULT_WEATHER_TIMEOUT_SECS);
    if timeout == 0 {
        return Err(LoadError::invalid(
            "weather.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let raw_url = weather
        .base_url
        .unwrap_or_else(|| DEFAULT_WEATHER_BASE_URL.to_string());
    let base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("weather.base_url", format!("invalid URL: {err}")))?;

    Ok(WeatherSettings {
        ttl: positive_seconds(ttl, "weather.ttl_seconds")?,
        timeout: StdDuration::from_secs(timeout),
        base_url,
    })
}

fn build_presence_settings(
    presence: RawPresenceSettings,
    defaults: &mut Defaults,
) -> Result<PresenceSettings, LoadError> {
    let ttl = defaults.or(
        presence.ttl_seconds,
        DEFAULT_PRESENCE_TTL_SECS,
        "presence.ttl_seconds",
    );
    Ok(PresenceSettings {
        ttl: positive_seconds(ttl, "presence.ttl_seconds")?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        query_capacity: non_zero_usize(
            cache.query_capacity.unwrap_or(DEFAULT_QUERY_CAPACITY),
            "cache.query_capacity",
        )?,
        query_ttl: positive_seconds(
            cache.query_ttl_seconds.unwrap_or(DEFAULT_QUERY_TTL_SECS),
            "cache.query_ttl_seconds",
        )?,
        preview_capacity: non_zero_usize(
            cache.preview_capacity.unwrap_or(DEFAULT_PREVIEW_CAPACITY),
            "cache.preview_capacity",
        )?,
        weather_capacity: non_zero_usize(
            cache.weather_capacity.unwrap_or(DEFAULT_WEATHER_CAPACITY),
            "cache.weather_capacity",
        )?,
        presence_capacity: non_zero_usize(
            cache.presence_capacity.unwrap_or(DEFAULT_PRESENCE_CAPACITY),
            "cache.presence_capacity",
        )?,
    })
}

fn build_profiler_settings(
    profiler: RawProfilerSettings,
    defaults: &mut Defaults,
) -> Result<ProfilerSettings, LoadError> {
    let window = defaults.or(
        profiler.sample_window,
        DEFAULT_PROFILER_SAMPLE_WINDOW,
        "profiler.sample_window",
    );
    let threshold = defaults.or(
        profiler.slow_query_threshold_seconds,
        DEFAULT_SLOW_QUERY_THRESHOLD_SECS,
        "profiler.slow_query_threshold_seconds",
    );
    let slow_query_threshold = StdDuration::try_from_secs_f64(threshold)
        .ok()
        .filter(|threshold| !threshold.is_zero())
        .ok_or_else(|| {
            LoadError::invalid(
                "profiler.slow_query_threshold_seconds",
                "must be a finite positive number of seconds",
            )
        })?;

    Ok(ProfilerSettings {
        sample_window: non_zero_usize(window, "profiler.sample_window")?,
        slow_query_threshold,
    })
}

fn build_query_settings(queries: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    let search_limit = queries.search_limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Ok(QuerySettings {
        blocks_recent_days: queries.blocks_recent_days.unwrap_or(DEFAULT_RECENT_DAYS),
        search_limit: non_zero_u32(search_limit.into(), "queries.search_limit")?,
    })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let rescore = parse_schedule(
        scheduler.rescore_cron.as_deref().unwrap_or(DEFAULT_RESCORE_CRON),
        "scheduler.rescore_cron",
    )?;
    let sweep = parse_schedule(
        scheduler.sweep_cron.as_deref().unwrap_or(DEFAULT_SWEEP_CRON),
        "scheduler.sweep_cron",
    )?;
    Ok(SchedulerSettings { rescore, sweep })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawScoringSettings {
    like_weight: Option<f64>,
    download_weight: Option<f64>,
    comment_weight: Option<f64>,
    half_life_hours: Option<f64>,
    retention_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoginSettings {
    block_limit: Option<u32>,
    block_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLinkPreviewSettings {
    ttl_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWeatherSettings {
    ttl_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPresenceSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    query_capacity: Option<u64>,
    query_ttl_seconds: Option<u64>,
    preview_capacity: Option<u64>,
    weather_capacity: Option<u64>,
    presence_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProfilerSettings {
    sample_window: Option<u64>,
    slow_query_threshold_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    blocks_recent_days: Option<u32>,
    search_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    rescore_cron: Option<String>,
    sweep_cron: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_schedule(expression: &str, key: &'static str) -> Result<Schedule, LoadError> {
    Schedule::from_str(expression)
        .map_err(|err| LoadError::invalid(key, format!("invalid cron `{expression}`: {err}")))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let seconds: i64 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range"))?;
    Ok(Duration::seconds(seconds))
}
