//! warmpool - warm worker pool supervisor

mod cli;
mod output;
mod theme;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use tracing::Level;
use warmpool::control::AdminClient;
use warmpool::logging::{self, LogConfig};
use warmpool::settings::Settings;
use warmpool::{supervisor, worker};

use cli::{Cli, Commands, SettingsArgs, Verbosity};
use output::TableOptions;
use theme::Themed;

/// Parses the command line, runs the selected command, and on failure prints
/// the error chain and exits with status 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }

    let result = enter_working_dir(&cli).and_then(|()| match &cli.command {
        Commands::Start(args) => cmd_start(&cli, &args.settings),
        Commands::Stop(args) => cmd_stop(&cli, args),
        Commands::Reload(args) => cmd_reload(&cli, args),
        Commands::Status(args) => cmd_status(&cli, args),
        Commands::Config(args) => cmd_config(&cli, args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::Worker => cmd_worker(&cli),
    });

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn enter_working_dir(cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.working_dir {
        let dir = warmpool::paths::expand_tilde(dir);
        std::env::set_current_dir(&dir)
            .with_context(|| format!("cannot change to {}", dir.display()))?;
    }
    Ok(())
}

/// Initialize logging from `base`; `-v`/`-q` win over `WARMPOOL_LOG_LEVEL`.
fn init_logging(cli: &Cli, base: LogConfig, quiet_level: Level) {
    let config = base.with_env_overrides();
    let config = match cli.verbosity() {
        Verbosity::Quiet => config.with_level(quiet_level),
        Verbosity::Normal => config,
        Verbosity::Info => config.with_level(Level::INFO),
        Verbosity::Debug => config.with_level(Level::DEBUG),
    };
    logging::init(config);
}

/// Settings file plus overrides, not yet anchored to the working directory.
fn configured_settings(cli: &Cli, overrides: &SettingsArgs) -> Result<(Settings, PathBuf)> {
    let work_dir = std::env::current_dir().context("cannot determine the working directory")?;
    let mut settings = Settings::load(&work_dir, cli.config.as_deref())?;
    overrides.apply(&mut settings);
    Ok((settings, work_dir))
}

fn admin_client(cli: &Cli, args: &cli::AdminArgs) -> Result<AdminClient> {
    let socket_dir = match &args.socket_path {
        Some(dir) => dir.clone(),
        None => {
            let (mut settings, work_dir) = configured_settings(cli, &SettingsArgs::default())?;
            settings.anchor_paths(&work_dir);
            settings.socket_path
        }
    };
    Ok(AdminClient::new(socket_dir).with_timeout(Duration::from_secs(args.timeout)))
}

/// Single-threaded runtime for one-shot admin requests.
fn admin_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")
}

fn cmd_start(cli: &Cli, overrides: &SettingsArgs) -> Result<()> {
    let (mut settings, work_dir) = configured_settings(cli, overrides)?;
    settings.anchor_paths(&work_dir);

    let base = if settings.debug {
        LogConfig::for_supervisor().with_level(Level::DEBUG)
    } else {
        LogConfig::for_supervisor()
    };
    init_logging(cli, base, Level::WARN);

    let rt = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    rt.block_on(supervisor::run(settings))?;
    Ok(())
}

fn cmd_stop(cli: &Cli, args: &cli::AdminArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_cli(), Level::ERROR);
    let client = admin_client(cli, args)?;
    admin_runtime()?.block_on(client.stop())?;
    if !cli.quiet {
        println!("{}", "Supervisor is draining and will exit".success());
    }
    Ok(())
}

fn cmd_reload(cli: &Cli, args: &cli::AdminArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_cli(), Level::ERROR);
    let client = admin_client(cli, args)?;
    admin_runtime()?.block_on(client.reload())?;
    if !cli.quiet {
        println!("{}", "Rolling reload started".success());
    }
    Ok(())
}

fn cmd_status(cli: &Cli, args: &cli::StatusArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_cli(), Level::ERROR);
    let client = admin_client(cli, &args.admin)?;
    let report = admin_runtime()?.block_on(client.status(args.filter()))?;
    output::print_status(
        &report,
        args.format.into(),
        TableOptions { ascii: args.ascii },
    );
    Ok(())
}

fn cmd_config(cli: &Cli, args: &cli::ConfigArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_cli(), Level::ERROR);
    let (settings, work_dir) = configured_settings(cli, &args.settings)?;
    let entries = settings.entries();

    if let Some(name) = &args.show_option {
        let Some((_, value)) = entries.iter().find(|(key, _)| key == name) else {
            bail!(
                "unknown option '{}' (known options: {})",
                name,
                entries
                    .iter()
                    .map(|(k, _)| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        };
        println!("{}", value);
        return Ok(());
    }

    if args.write {
        let path = Settings::locate(&work_dir, cli.config.as_deref());
        settings.write(&path)?;
        if !cli.quiet {
            println!(
                "{} {}",
                "Wrote".success(),
                path.display().to_string().label()
            );
        }
        return Ok(());
    }

    let defaults = Settings::default().entries();
    println!(
        "{}",
        output::table::settings_table(&entries, &defaults, TableOptions { ascii: args.ascii })
    );
    Ok(())
}

fn cmd_worker(cli: &Cli) -> Result<()> {
    init_logging(cli, LogConfig::for_worker(), Level::WARN);
    worker::run_worker_main()?;
    Ok(())
}
