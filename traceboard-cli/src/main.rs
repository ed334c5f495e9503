//! traceboard CLI - supervisory console for serial sensor boards.
//!
//! ## Features
//!
//! - Continuous duty cycle: heartbeat, command dispatch, measurement readout
//! - Operator commands from flags or stdin
//! - Port auto-detection with interactive selection
//! - Layered configuration (flags, environment, TOML files)
//! - Shell completion generation

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
    traceboard::{Command, DEFAULT_BAUD_RATE},
};

mod commands;
mod config;
mod serial;

use {
    commands::run::{CycleArgs, RunPlan},
    config::Config,
    serial::{SerialOptions, select_serial_port},
};

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// CLI-level failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or a selection that needs operator input.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration.
    #[error("{0}")]
    Config(String),
    /// Interrupted by the operator.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
///
/// 1 generic, 2 usage, 3 configuration, 4 device or link, 130 cancelled.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<traceboard::Error>() {
            return match lib_err {
                traceboard::Error::Config(_) => 3,
                e if e.is_link_failure() => 4,
                _ => 1,
            };
        }
    }
    1
}

/// traceboard - supervise a sensor board over a serial link.
///
/// Environment variables:
///   TRACEBOARD_PORT              - Default serial port
///   TRACEBOARD_BAUD              - Default baud rate (default: 115200)
///   TRACEBOARD_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "traceboard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "TRACEBOARD_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(
        short,
        long,
        global = true,
        env = "TRACEBOARD_BAUD",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "TRACEBOARD_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the duty cycle and print readings until stopped.
    ///
    /// Commands (adc, timer, buzzer, reset, time or an Rxxxxx token) can be
    /// typed on stdin, one per line.
    Run {
        /// Queue a command before the first cycle (repeatable).
        #[arg(long = "send", value_name = "CMD")]
        send: Vec<Command>,

        /// Stop after this many cycles.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        cycles: Option<u64>,

        #[command(flatten)]
        cycle: CycleArgs,
    },

    /// Dispatch commands, one per cycle, then exit.
    Send {
        /// Commands to send (adc, timer, buzzer, reset, time or Rxxxxx).
        #[arg(required = true, value_name = "CMD")]
        commands: Vec<Command>,

        #[command(flatten)]
        cycle: CycleArgs,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Ctrl-C handler not installed: {e}");
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    debug!(
        "traceboard v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Run {
            send,
            cycles,
            cycle,
        } => commands::run::cmd_run(
            cli,
            &config,
            &RunPlan {
                commands: send,
                cycles: *cycles,
                read_stdin: true,
                cycle,
            },
        ),
        Commands::Send { commands, cycle } => {
            commands::run::cmd_send(cli, &config, commands, cycle)
        },
        Commands::ListPorts { json } => commands::list_ports::cmd_list_ports(&config, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve the serial port from flags, configuration or auto-detection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    Ok(select_serial_port(&options, config)?.name)
}

/// Resolve the baud rate from flags or configuration.
pub(crate) fn get_baud(cli: &Cli, config: &Config) -> Result<u32, CliError> {
    match cli.baud.or(config.connection.baud) {
        Some(0) => Err(CliError::Config("baud must be greater than zero".to_string())),
        Some(baud) => Ok(baud),
        None => Ok(DEFAULT_BAUD_RATE),
    }
}
