//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use warmpool::control::StatusFilter;
use warmpool::memory::parse_memory_limit;
use warmpool::settings::Settings;
use warmpool::version;
use warmpool::worker::WorkerState;

use crate::output::OutputFormat;

/// Keeps a pool of warm worker processes and routes HTTP requests to them.
#[derive(Parser, Debug)]
#[command(name = "warmpool")]
#[command(author, version = version::full_version(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Settings file (defaults to warmpool.json in the working directory).
    #[arg(short, long, env = "WARMPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Change to this directory before doing anything else.
    #[arg(short = 'C', long)]
    pub working_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the supervisor in the foreground.
    Start(StartArgs),

    /// Ask a running supervisor to drain its workers and exit.
    Stop(AdminArgs),

    /// Ask a running supervisor to replace every worker, one slot at a time.
    Reload(AdminArgs),

    /// Show the state of every worker slot.
    Status(StatusArgs),

    /// Show or write the effective configuration.
    Config(ConfigArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),

    /// Run the built-in worker (started by the supervisor).
    #[command(hide = true)]
    Worker,
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "warmpool",
            &mut std::io::stdout(),
        );
    }
}

/// Per-invocation overrides of the settings file.
///
/// Every flag can also come from a `WARMPOOL_*` environment variable; flags
/// win over the environment, which wins over the file.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Listen host.
    #[arg(long, env = "WARMPOOL_HOST")]
    pub host: Option<String>,

    /// Listen port (0 picks a free port).
    #[arg(short, long, env = "WARMPOOL_PORT")]
    pub port: Option<u16>,

    /// Number of worker slots.
    #[arg(short, long, env = "WARMPOOL_WORKERS")]
    pub workers: Option<usize>,

    /// Application environment handed to workers.
    #[arg(long, env = "WARMPOOL_APP_ENV")]
    pub app_env: Option<String>,

    /// Verbose logging and reload on file change.
    #[arg(long, env = "WARMPOOL_DEBUG")]
    pub debug: bool,

    /// Disable the HTTP access log.
    #[arg(long)]
    pub no_access_log: bool,

    /// Serve existing files under this directory without a worker.
    #[arg(long, env = "WARMPOOL_STATIC_DIRECTORY")]
    pub static_directory: Option<PathBuf>,

    /// Requests per worker before it is recycled (0 for unlimited).
    #[arg(long, env = "WARMPOOL_MAX_REQUESTS")]
    pub max_requests: Option<u64>,

    /// Seconds a request may run before its worker is killed (0 disables).
    #[arg(long, env = "WARMPOOL_MAX_EXECUTION_TIME", allow_negative_numbers = true)]
    pub max_execution_time: Option<i64>,

    /// Per-worker resident memory ceiling, e.g. 512M or 2G (-1 disables).
    #[arg(
        long,
        env = "WARMPOOL_MEMORY_LIMIT",
        value_parser = parse_memory_limit,
        allow_negative_numbers = true
    )]
    pub memory_limit: Option<i64>,

    /// Seconds a worker may live before it is recycled (0 disables).
    #[arg(long, env = "WARMPOOL_TTL", allow_negative_numbers = true)]
    pub ttl: Option<i64>,

    /// Application bootstrap identifier handed to workers.
    #[arg(long, env = "WARMPOOL_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// Worker program (defaults to this binary's built-in worker).
    #[arg(long, env = "WARMPOOL_WORKER_EXECUTABLE")]
    pub worker_executable: Option<PathBuf>,

    /// Extra argument for the worker program (repeatable).
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Directory for the controller and worker sockets.
    #[arg(long, env = "WARMPOOL_SOCKET_PATH")]
    pub socket_path: Option<PathBuf>,

    #[arg(long, env = "WARMPOOL_PIDFILE")]
    pub pidfile: Option<PathBuf>,

    /// Seconds a draining worker may finish its request before it is killed.
    #[arg(long, env = "WARMPOOL_RELOAD_TIMEOUT", allow_negative_numbers = true)]
    pub reload_timeout: Option<i64>,

    /// Seconds a new worker has to report ready.
    #[arg(long, env = "WARMPOOL_STARTUP_TIMEOUT")]
    pub startup_timeout: Option<u64>,

    /// Consecutive failed spawns tolerated per slot.
    #[arg(long, env = "WARMPOOL_SPAWN_ATTEMPTS")]
    pub spawn_attempts: Option<u32>,

    /// Requests allowed to wait for a free worker (0 rejects immediately).
    #[arg(long, env = "WARMPOOL_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Milliseconds a queued request may wait.
    #[arg(long, env = "WARMPOOL_QUEUE_TIMEOUT_MS")]
    pub queue_timeout_ms: Option<u64>,

    /// Request body limit in bytes.
    #[arg(long, env = "WARMPOOL_MAX_BODY_SIZE")]
    pub max_body_size: Option<usize>,

    /// Path watched for changes in debug mode (repeatable).
    #[arg(long = "watch")]
    pub watch: Vec<PathBuf>,
}

impl SettingsArgs {
    /// Overlay the flags that were given onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut settings.host, &self.host);
        set(&mut settings.port, &self.port);
        set(&mut settings.workers, &self.workers);
        set(&mut settings.app_env, &self.app_env);
        set(&mut settings.static_directory, &self.static_directory);
        set(&mut settings.max_requests, &self.max_requests);
        set(&mut settings.max_execution_time, &self.max_execution_time);
        set(&mut settings.memory_limit, &self.memory_limit);
        set(&mut settings.ttl, &self.ttl);
        set(&mut settings.bootstrap, &self.bootstrap);
        set(&mut settings.worker_executable, &self.worker_executable);
        set(&mut settings.socket_path, &self.socket_path);
        set(&mut settings.pidfile, &self.pidfile);
        set(&mut settings.reload_timeout, &self.reload_timeout);
        set(&mut settings.startup_timeout, &self.startup_timeout);
        set(&mut settings.spawn_attempts, &self.spawn_attempts);
        set(&mut settings.queue_capacity, &self.queue_capacity);
        set(&mut settings.queue_timeout_ms, &self.queue_timeout_ms);
        set(&mut settings.max_body_size, &self.max_body_size);

        if self.debug {
            settings.debug = true;
        }
        if self.no_access_log {
            settings.logging = false;
        }
        if !self.worker_args.is_empty() {
            settings.worker_args = self.worker_args.clone();
        }
        if !self.watch.is_empty() {
            settings.watch = self.watch.clone();
        }
    }
}

/// Arguments for the start command.
#[derive(Parser, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Arguments shared by commands that talk to a running supervisor.
#[derive(Args, Debug)]
pub struct AdminArgs {
    /// Socket directory of the supervisor (defaults to the configured one).
    #[arg(long, env = "WARMPOOL_SOCKET_PATH")]
    pub socket_path: Option<PathBuf>,

    /// Seconds to wait for the supervisor's reply.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub admin: AdminArgs,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Only show workers in this state.
    #[arg(long, value_enum)]
    pub state: Option<WorkerState>,

    /// Only show the worker in this slot.
    #[arg(long)]
    pub id: Option<usize>,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,
}

impl StatusArgs {
    pub fn filter(&self) -> Option<StatusFilter> {
        let filter = StatusFilter {
            state: self.state,
            id: self.id,
        };
        (!filter.is_empty()).then_some(filter)
    }
}

/// Arguments for the config command.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Print only the value of this option (kebab-case key).
    #[arg(long, value_name = "NAME")]
    pub show_option: Option<String>,

    /// Write the effective configuration to the settings file.
    #[arg(long)]
    pub write: bool,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormatArg {
    /// Colored table output.
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Plain text output (no colors).
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default for the command.
    Normal,
    /// -v
    Info,
    /// -vv
    Debug,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}
