//! Logging setup for the supervisor, the CLI commands and the built-in worker.
//!
//! Each entry point starts from a preset ([`LogConfig::for_supervisor`],
//! [`LogConfig::for_cli`], [`LogConfig::for_worker`]), layers the environment
//! on top with [`LogConfig::with_env_overrides`], and finally applies `-v`/`-q`.
//!
//! # Environment Variables
//!
//! - `WARMPOOL_LOG` - Log filter directive (overrides RUST_LOG)
//! - `WARMPOOL_LOG_LEVEL` - Log level when no filter is set
//! - `WARMPOOL_LOG_FORMAT` - pretty, compact or json
//! - `WARMPOOL_LOG_FILE` - Also write to this file
//! - `WARMPOOL_LOG_ROTATION` - hourly, daily or never (default daily)
//! - `RUST_LOG` - Fallback filter

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One line per event; used where several processes share stderr.
    Compact,
    /// JSON lines for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!("unknown log rotation '{}'", s)),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// What [`init`] installs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Extra output next to stderr.
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Filter directive; replaces `level` when set.
    pub filter: Option<String>,
    pub show_target: bool,
}

impl LogConfig {
    /// `warmpool start`: INFO, pretty, module targets shown.
    pub fn for_supervisor() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file: None,
            rotation: LogRotation::Daily,
            filter: None,
            show_target: true,
        }
    }

    /// One-shot admin commands only report problems.
    pub fn for_cli() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            show_target: false,
            ..Self::for_supervisor()
        }
    }

    /// The built-in worker writes to the supervisor's stderr.
    pub fn for_worker() -> Self {
        Self {
            format: LogFormat::Compact,
            ..Self::for_supervisor()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Apply the `WARMPOOL_LOG*` variables and `RUST_LOG`.
    ///
    /// `-v`/`-q` go through [`LogConfig::with_level`] afterwards, which only
    /// wins when no filter directive is set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(filter) = var("WARMPOOL_LOG").or_else(|| var("RUST_LOG")) {
            self.filter = Some(filter);
        } else if let Some(level) = var("WARMPOOL_LOG_LEVEL").and_then(|l| parse_level(&l)) {
            self.level = level;
        }
        if let Some(format) = var("WARMPOOL_LOG_FORMAT").and_then(|f| f.parse().ok()) {
            self.format = format;
        }
        if let Some(path) = var("WARMPOOL_LOG_FILE") {
            self.file = Some(PathBuf::from(path));
        }
        if let Some(rotation) = var("WARMPOOL_LOG_ROTATION").and_then(|r| r.parse().ok()) {
            self.rotation = rotation;
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let by_level = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: invalid log filter '{}', using {}", filter, self.level);
                by_level()
            }),
            None => by_level(),
        }
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("warmpool.log");
    RollingFileAppender::new(rotation.into(), dir, name)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers = vec![fmt_layer(
        &config,
        std::io::stderr,
        std::io::stderr().is_terminal(),
    )];
    if let Some(path) = &config.file {
        layers.push(fmt_layer(&config, file_appender(path, config.rotation), false));
    }

    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(layers)
        .try_init();
}
