//! `run` and `send`: drive the duty cycle and print readings.

use {
    crate::{Cli, CliError, config::Config, get_baud, get_port, was_interrupted},
    anyhow::{Context, Result},
    clap::Args,
    console::style,
    log::{debug, info, warn},
    std::{
        io::{self, BufRead, Write},
        sync::mpsc::{Receiver, RecvTimeoutError},
        thread,
        time::Duration,
    },
    traceboard::{
        Command, CommandSender, ConnectionManager, Reading, StopReason, Worker, WorkerConfig,
        WorkerEvent, WorkerHandle,
    },
};

/// How often the event loop checks for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for the worker to wind down after the event stream ended.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cycle tuning shared by `run` and `send`.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct CycleArgs {
    /// Pause between cycles in milliseconds (default: 1000).
    #[arg(long, value_name = "MS")]
    pub cycle_delay_ms: Option<u64>,

    /// Response read window in milliseconds (default: 1000).
    #[arg(long, value_name = "MS")]
    pub read_timeout_ms: Option<u64>,

    /// Responses with this many tokens or fewer are noise (default: 300).
    #[arg(long, value_name = "TOKENS")]
    pub noise_threshold: Option<usize>,

    /// Print readings as JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// What a monitoring session should do.
pub(crate) struct RunPlan<'a> {
    /// Commands queued before the first cycle.
    pub commands: &'a [Command],
    /// Optional cycle budget.
    pub cycles: Option<u64>,
    /// Accept further commands on stdin.
    pub read_stdin: bool,
    /// Cycle tuning.
    pub cycle: &'a CycleArgs,
}

/// Build the worker settings. Flags win over the configuration file.
pub(crate) fn worker_config(
    port: String,
    baud: u32,
    config: &Config,
    args: &CycleArgs,
) -> WorkerConfig {
    let mut worker_config = WorkerConfig::new(port, baud);

    if let Some(ms) = args.cycle_delay_ms.or(config.cycle.delay_ms) {
        worker_config = worker_config.with_cycle_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = args.read_timeout_ms.or(config.cycle.read_timeout_ms) {
        worker_config = worker_config.with_read_timeout(Duration::from_millis(ms));
    }
    if let Some(threshold) = args.noise_threshold.or(config.cycle.noise_threshold) {
        worker_config = worker_config.with_noise_threshold(threshold);
    }

    worker_config
}

/// `send`: one cycle per command, then exit.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    commands: &[Command],
    cycle: &CycleArgs,
) -> Result<()> {
    let cycles = u64::try_from(commands.len()).unwrap_or(u64::MAX);
    cmd_run(
        cli,
        config,
        &RunPlan {
            commands,
            cycles: Some(cycles),
            read_stdin: false,
            cycle,
        },
    )
}

/// `run`: cycle until stopped, the budget is spent or the link drops.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, plan: &RunPlan<'_>) -> Result<()> {
    let port = get_port(cli, config)?;
    let baud = get_baud(cli, config)?;

    let mut worker_config = worker_config(port.clone(), baud, config, plan.cycle);
    if let Some(cycles) = plan.cycles {
        worker_config = worker_config.with_max_cycles(cycles);
    }

    let worker = Worker::new(ConnectionManager::native(), worker_config);
    let sender = worker.sender();
    for command in plan.commands {
        sender.submit(command.clone());
    }

    let (mut handle, events) = worker.start()?;
    if !cli.quiet {
        eprintln!(
            "{} Connected to {} at {baud} baud{}",
            style("✓").green(),
            style(&port).cyan(),
            if plan.read_stdin {
                " (Ctrl+C to stop)"
            } else {
                ""
            }
        );
    }
    if plan.read_stdin {
        spawn_stdin_commands(sender);
    }

    let mut out = io::stdout().lock();
    pump_events(&handle, &events, &mut out, plan.cycle.json)?;

    finish(cli, handle.await_stopped(SHUTDOWN_TIMEOUT))
}

/// Print readings until the worker reports that it stopped.
fn pump_events(
    handle: &WorkerHandle,
    events: &Receiver<WorkerEvent>,
    out: &mut impl Write,
    json: bool,
) -> Result<()> {
    loop {
        if was_interrupted() {
            handle.stop();
        }

        match events.recv_timeout(POLL_INTERVAL) {
            Ok(WorkerEvent::Reading(reading)) => write_reading(out, &reading, json)?,
            Ok(WorkerEvent::Stopped(reason)) => {
                debug!("Worker reported stop: {reason}");
                return Ok(());
            },
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Write one reading as `[hh:mm] value` or a JSON line.
pub(crate) fn write_reading(out: &mut impl Write, reading: &Reading, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(reading)?)?;
    } else {
        writeln!(out, "{reading}")?;
    }
    out.flush()?;
    Ok(())
}

fn finish(cli: &Cli, outcome: traceboard::Result<StopReason>) -> Result<()> {
    match outcome {
        Ok(StopReason::Requested) if was_interrupted() => {
            Err(CliError::Cancelled("Interrupted".to_string()).into())
        },
        Ok(reason) => {
            if !cli.quiet {
                eprintln!("{} Stopped: {reason}", style("■").dim());
            }
            Ok(())
        },
        Err(e) if e.is_link_failure() => Err(anyhow::Error::new(e).context("link lost")),
        Err(e) => Err(e).context("Worker did not shut down cleanly"),
    }
}

/// Forward operator commands typed on stdin to the worker.
fn spawn_stdin_commands(sender: CommandSender) {
    let spawned = thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        info!("Queued {command}");
                        sender.submit(command);
                    },
                    Err(e) => warn!("{e} (expected adc, timer, buzzer, reset, time or Rxxxxx)"),
                }
            }
            debug!("stdin closed");
        });

    if let Err(e) = spawned {
        warn!("Cannot read commands from stdin: {e}");
    }
}
