//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::{document::DEFAULT_FONT_SIZE, render::DEFAULT_REMOTE_CONCURRENCY};
use crate::cache::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ITEMS};
use crate::domain::bitmap::Color;

mod cli;

pub use cli::{CliArgs, Command, DocumentArgs, LoggingOverrides, RenderArgs, RenderOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "mathmark";
const DEFAULT_MATH_CONCURRENCY: usize = 0;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("mathmark/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MATH_CLI_PATH: &str = "tex2img";
const DEFAULT_MATH_CACHE_DIR: &str = "/tmp/mathmark-math";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
    pub resources: ResourceSettings,
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
pub struct RenderSettings {
    pub font_size: f32,
    pub text_color: Color,
    pub remote_concurrency: NonZeroUsize,
    /// `0` leaves math rendering unbounded.
    pub math_concurrency: usize,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub math_cli_path: PathBuf,
    pub math_cache_dir: PathBuf,
    pub katex_validation: bool,
    pub png_round_trip: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_items: NonZeroUsize,
    pub max_bytes: NonZeroUsize,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceSettings {
    /// Root for local image names; the document's own directory when unset.
    pub directory: Option<PathBuf>,
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

    builder = builder.add_source(Environment::with_prefix("MATHMARK").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_logging_overrides(&cli.logging);
    if let Command::Render(args) = &cli.command {
        raw.apply_render_overrides(&args.overrides);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
    resources: RawResourceSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(size) = overrides.font_size {
            self.render.font_size = Some(size);
        }
        if let Some(color) = overrides.text_color.as_ref() {
            self.render.text_color = Some(color.clone());
        }
        if let Some(value) = overrides.remote_concurrency {
            self.render.remote_concurrency = Some(value);
        }
        if let Some(value) = overrides.math_concurrency {
            self.render.math_concurrency = Some(value);
        }
        if let Some(path) = overrides.math_cli_path.as_ref() {
            self.render.math_cli_path = Some(path.clone());
        }
        if let Some(dir) = overrides.math_cache_dir.as_ref() {
            self.render.math_cache_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.resources_dir.as_ref() {
            self.resources.directory = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            cache,
            resources,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            cache: build_cache_settings(cache)?,
            resources: build_resource_settings(resources)?,
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

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let font_size = render.font_size.unwrap_or(DEFAULT_FONT_SIZE);
    if !font_size.is_finite() || font_size <= 0.0 {
        return Err(LoadError::invalid(
            "render.font_size",
            "must be a positive number",
        ));
    }

    let text_color = match render.text_color {
        Some(value) => Color::from_str(&value)
            .map_err(|err| LoadError::invalid("render.text_color", err.to_string()))?,
        None => Color::BLACK,
    };

    let remote_concurrency = non_zero_usize(
        render
            .remote_concurrency
            .unwrap_or(DEFAULT_REMOTE_CONCURRENCY),
        "render.remote_concurrency",
    )?;
    let math_concurrency = render.math_concurrency.unwrap_or(DEFAULT_MATH_CONCURRENCY);

    let fetch_timeout_secs = render
        .fetch_timeout_seconds
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    if fetch_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.fetch_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let user_agent = render
        .user_agent
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    let math_cli_path = render
        .math_cli_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MATH_CLI_PATH));
    if math_cli_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.math_cli_path",
            "path must not be empty",
        ));
    }

    let math_cache_dir = render
        .math_cache_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MATH_CACHE_DIR));
    if math_cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.math_cache_dir",
            "path must not be empty",
        ));
    }

    Ok(RenderSettings {
        font_size,
        text_color,
        remote_concurrency,
        math_concurrency,
        fetch_timeout: Duration::from_secs(fetch_timeout_secs),
        user_agent,
        math_cli_path,
        math_cache_dir,
        katex_validation: render.katex_validation.unwrap_or(true),
        png_round_trip: render.png_round_trip.unwrap_or(false),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        max_items: non_zero_usize(
            cache.max_items.unwrap_or(DEFAULT_MAX_ITEMS),
            "cache.max_items",
        )?,
        max_bytes: non_zero_usize(
            cache.max_bytes.unwrap_or(DEFAULT_MAX_BYTES),
            "cache.max_bytes",
        )?,
    })
}

fn build_resource_settings(resources: RawResourceSettings) -> Result<ResourceSettings, LoadError> {
    let directory = resources
        .directory
        .filter(|path| !path.as_os_str().is_empty());
    Ok(ResourceSettings { directory })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    font_size: Option<f32>,
    text_color: Option<String>,
    remote_concurrency: Option<usize>,
    math_concurrency: Option<usize>,
    fetch_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
    math_cli_path: Option<PathBuf>,
    math_cache_dir: Option<PathBuf>,
    katex_validation: Option<bool>,
    png_round_trip: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_items: Option<usize>,
    max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResourceSettings {
    directory: Option<PathBuf>,
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
