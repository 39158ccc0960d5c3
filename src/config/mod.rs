//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shiftcache";
const ENV_PREFIX: &str = "SHIFTCACHE";
const DEFAULT_MAX_ENTRIES: usize = 256;
const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_REFETCH_CONCURRENCY: usize = 4;

/// Command-line arguments for the shiftcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "shiftcache",
    version,
    about = "Client-side query cache with optimistic mutations"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SHIFTCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a scripted session against the in-process backend.
    Simulate(SimulateArgs),
    /// Print the resolved settings.
    Config(ConfigArgs),
}

/// Scripted sessions the simulator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Withdraw a pending application; the server accepts.
    WithdrawOk,
    /// Withdraw while the network is down.
    WithdrawNetwork,
    /// Withdraw an application the server already closed.
    WithdrawValidation,
    /// Withdraw while another device changed the application.
    WithdrawConflict,
    /// Apply to a job shown in a cached listing.
    ApplyOk,
    /// Bookmark a job while the server hangs past the mutation timeout.
    BookmarkTimeout,
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::WithdrawOk => "withdraw-ok",
            Scenario::WithdrawNetwork => "withdraw-network",
            Scenario::WithdrawValidation => "withdraw-validation",
            Scenario::WithdrawConflict => "withdraw-conflict",
            Scenario::ApplyOk => "apply-ok",
            Scenario::BookmarkTimeout => "bookmark-timeout",
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Scenario to run.
    #[arg(long, value_enum, default_value_t = Scenario::WithdrawOk)]
    pub scenario: Scenario,

    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
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

    /// Override the number of cached entries kept before eviction.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the remote mutation timeout.
    #[arg(long = "cache-mutation-timeout-ms", value_name = "MILLIS")]
    pub cache_mutation_timeout_ms: Option<u64>,

    /// Override the number of background refetches allowed at once.
    #[arg(long = "cache-refetch-concurrency", value_name = "COUNT")]
    pub cache_refetch_concurrency: Option<u64>,

    /// Toggle developer diagnostics in failure logs.
    #[arg(
        long = "cache-developer-diagnostics",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_developer_diagnostics: Option<bool>,
}

/// Fully resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

impl Settings {
    /// Render the resolved settings in the same shape the config files use.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        let view = SettingsView {
            logging: LoggingView {
                level: self.logging.level.to_string().to_lowercase(),
                json: matches!(self.logging.format, LogFormat::Json),
            },
            cache: CacheView {
                max_entries: self.cache.max_entries.get() as u64,
                mutation_timeout_ms: self.cache.mutation_timeout_ms.get(),
                refetch_concurrency: self.cache.refetch_concurrency.get() as u64,
                developer_diagnostics: self.cache.developer_diagnostics,
            },
        };
        toml::to_string(&view)
    }
}

#[derive(Serialize)]
struct SettingsView {
    logging: LoggingView,
    cache: CacheView,
}

#[derive(Serialize)]
struct LoggingView {
    level: String,
    json: bool,
}

#[derive(Serialize)]
struct CacheView {
    max_entries: u64,
    mutation_timeout_ms: u64,
    refetch_concurrency: u64,
    developer_diagnostics: bool,
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
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub mutation_timeout_ms: NonZeroU64,
    pub refetch_concurrency: NonZeroUsize,
    pub developer_diagnostics: bool,
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
        Some(Command::Simulate(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Config(args)) => raw.apply_overrides(&args.overrides),
        None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(count) = overrides.cache_max_entries {
            self.cache.max_entries = Some(count);
        }
        if let Some(millis) = overrides.cache_mutation_timeout_ms {
            self.cache.mutation_timeout_ms = Some(millis);
        }
        if let Some(count) = overrides.cache_refetch_concurrency {
            self.cache.refetch_concurrency = Some(count);
        }
        if let Some(enabled) = overrides.cache_developer_diagnostics {
            self.cache.developer_diagnostics = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            cache: build_cache_settings(raw.cache)?,
        })
    }
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES as u64),
        "cache.max_entries",
    )?;
    let mutation_timeout_ms = NonZeroU64::new(
        cache
            .mutation_timeout_ms
            .unwrap_or(DEFAULT_MUTATION_TIMEOUT_MS),
    )
    .ok_or_else(|| LoadError::invalid("cache.mutation_timeout_ms", "must be greater than zero"))?;
    let refetch_concurrency = non_zero_usize(
        cache
            .refetch_concurrency
            .unwrap_or(DEFAULT_REFETCH_CONCURRENCY as u64),
        "cache.refetch_concurrency",
    )?;

    Ok(CacheSettings {
        max_entries,
        mutation_timeout_ms,
        refetch_concurrency,
        developer_diagnostics: cache
            .developer_diagnostics
            .unwrap_or(cfg!(debug_assertions)),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<u64>,
    mutation_timeout_ms: Option<u64>,
    refetch_concurrency: Option<u64>,
    developer_diagnostics: Option<bool>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
