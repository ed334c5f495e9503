//! Duty-cycle worker.
//!
//! The worker owns a [`ConnectionManager`] and drives it from a dedicated
//! thread. Every cycle it:
//!
//! 1. sends the heartbeat (`Thh:mm`),
//! 2. dispatches at most one queued command,
//! 3. reads one response line (bounded by the read timeout),
//! 4. publishes a [`Reading`] on the event channel,
//! 5. pauses for the cycle delay.
//!
//! Steps 1-3 always happen in that order; the device relies on it.
//!
//! A quiet device or a noisy line yields an `N/A` reading and the loop goes
//! on. A write or read failure ends the run: the port is closed, a final
//! [`WorkerEvent::Stopped`] is published and [`WorkerHandle::await_stopped`]
//! returns the error. Workers are one-shot; build a new one to reconnect.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use traceboard::{ConnectionManager, Worker, WorkerConfig, WorkerEvent};
//!
//! fn main() -> traceboard::Result<()> {
//!     let config = WorkerConfig::new("/dev/ttyACM0", 115200);
//!     let worker = Worker::new(ConnectionManager::native(), config);
//!     let (mut handle, events) = worker.start()?;
//!
//!     handle.sender().read_sensor();
//!     for event in events.iter().take(3) {
//!         if let WorkerEvent::Reading(reading) = event {
//!             println!("{reading}");
//!         }
//!     }
//!
//!     handle.stop();
//!     handle.await_stopped(Duration::from_secs(5))?;
//!     Ok(())
//! }
//! ```

use {
    crate::{
        clock::{Clock, SystemClock},
        connection::ConnectionManager,
        error::{Error, Result},
        port::{PortOpener, SerialConfig},
        protocol::{self, Command, DEFAULT_NOISE_THRESHOLD, Reading},
    },
    log::{debug, error, info, trace, warn},
    std::{
        collections::VecDeque,
        fmt,
        sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc},
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Port to open.
    pub serial: SerialConfig,
    /// Pause between the end of one cycle and the start of the next.
    pub cycle_delay: Duration,
    /// How long each cycle waits for a response line.
    pub read_timeout: Duration,
    /// Responses with this many tokens or fewer are treated as noise.
    pub noise_threshold: usize,
    /// Stop after this many completed cycles.
    pub max_cycles: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            cycle_delay: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
            max_cycles: None,
        }
    }
}

impl WorkerConfig {
    /// Reference settings for `port` at `baud`.
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            serial: SerialConfig::new(port, baud),
            ..Default::default()
        }
    }

    /// Set the inter-cycle delay.
    #[must_use]
    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    /// Set the response read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self.serial.timeout = timeout;
        self
    }

    /// Set the noise threshold.
    #[must_use]
    pub fn with_noise_threshold(mut self, threshold: usize) -> Self {
        self.noise_threshold = threshold;
        self
    }

    /// Limit the run to `cycles` cycles.
    #[must_use]
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not running; both the initial and the terminal state.
    Stopped,
    /// Executing duty cycles.
    Running,
    /// Finishing the current cycle before teardown.
    Stopping,
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "reason", content = "detail", rename_all = "snake_case")
)]
pub enum StopReason {
    /// [`WorkerHandle::stop`] was called.
    Requested,
    /// The configured number of cycles completed.
    CycleLimit,
    /// The link failed.
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("stop requested"),
            Self::CycleLimit => f.write_str("cycle limit reached"),
            Self::Failed(reason) => write!(f, "link lost: {reason}"),
        }
    }
}

/// Event published by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum WorkerEvent {
    /// Result of one completed cycle.
    Reading(Reading),
    /// The worker stopped. Always the last event.
    Stopped(StopReason),
}

/// FIFO of pending commands, shared by any number of producers and the worker.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command.
    pub fn push(&self, command: Command) {
        self.lock().push_back(command);
    }

    /// Remove the oldest command.
    pub fn pop(&self) -> Option<Command> {
        self.lock().pop_front()
    }

    /// Number of pending commands.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no command is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Cloneable handle for submitting commands from any thread.
///
/// Submission never blocks on I/O; the worker sends at most one queued
/// command per cycle, oldest first.
#[derive(Debug, Clone)]
pub struct CommandSender {
    queue: CommandQueue,
}

impl CommandSender {
    /// Queue `command` for dispatch.
    pub fn submit(&self, command: Command) {
        debug!("Queued {command}");
        self.queue.push(command);
    }

    /// Parse and queue a command name or `Rxxxxx` token.
    pub fn submit_token(&self, token: &str) -> Result<()> {
        self.submit(token.parse()?);
        Ok(())
    }

    /// Queue `R00001` (read sensor value).
    pub fn read_sensor(&self) {
        self.submit(Command::ReadSensor);
    }

    /// Queue `R00002` (timer control).
    pub fn timer_control(&self) {
        self.submit(Command::TimerControl);
    }

    /// Queue `R00003` (buzzer / real-time control).
    pub fn buzzer_control(&self) {
        self.submit(Command::BuzzerControl);
    }

    /// Queue `R00004` (reset).
    pub fn reset(&self) {
        self.submit(Command::Reset);
    }

    /// Queue `R00005` (request device time).
    pub fn request_time(&self) {
        self.submit(Command::RequestTime);
    }

    /// Number of commands not yet dispatched.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// State shared between the worker thread and its handle.
#[derive(Debug)]
struct Control {
    state: Mutex<WorkerState>,
    changed: Condvar,
}

impl Control {
    fn new(state: WorkerState) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> WorkerState {
        *self.lock()
    }

    fn set(&self, state: WorkerState) {
        *self.lock() = state;
        self.changed.notify_all();
    }

    /// `Running -> Stopping`. Returns whether the transition happened.
    fn request_stop(&self) -> bool {
        let mut state = self.lock();
        if *state != WorkerState::Running {
            return false;
        }
        *state = WorkerState::Stopping;
        self.changed.notify_all();
        true
    }

    /// Wait up to `delay`, waking early on a state change.
    /// Returns whether the worker should keep running.
    fn pause(&self, delay: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, delay, |state| *state == WorkerState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == WorkerState::Running
    }

    /// Wait up to `timeout` for `Stopped`.
    fn wait_stopped(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| *state != WorkerState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == WorkerState::Stopped
    }
}

/// Marks the worker `Stopped` when the thread body exits, panics included.
struct StoppedOnExit(Arc<Control>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set(WorkerState::Stopped);
    }
}

/// A duty-cycle worker that has not been started yet.
pub struct Worker<O: PortOpener, C: Clock = SystemClock> {
    connection: ConnectionManager<O>,
    config: WorkerConfig,
    clock: C,
    queue: CommandQueue,
}

impl<O: PortOpener> Worker<O, SystemClock> {
    /// Worker using the local system clock for heartbeats.
    pub fn new(connection: ConnectionManager<O>, config: WorkerConfig) -> Self {
        Self::with_clock(connection, config, SystemClock)
    }
}

impl<O: PortOpener, C: Clock> Worker<O, C> {
    /// Worker using `clock` for heartbeats.
    pub fn with_clock(connection: ConnectionManager<O>, config: WorkerConfig, clock: C) -> Self {
        Self {
            connection,
            config,
            clock,
            queue: CommandQueue::new(),
        }
    }

    /// Command handle. Commands submitted before [`start`](Self::start) are
    /// dispatched from the first cycle on.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            queue: self.queue.clone(),
        }
    }
}

impl<O: PortOpener + 'static, C: Clock + 'static> Worker<O, C> {
    /// Open the port and start cycling on a background thread.
    ///
    /// Fails without starting anything if the port cannot be opened.
    pub fn start(mut self) -> Result<(WorkerHandle, mpsc::Receiver<WorkerEvent>)> {
        self.connection.open_with(&self.config.serial)?;

        let control = Arc::new(Control::new(WorkerState::Running));
        let (events, receiver) = mpsc::channel();
        let sender = self.sender();
        let port_name = self.config.serial.port_name.clone();

        let cycle = DutyCycle {
            connection: self.connection,
            config: self.config,
            clock: self.clock,
            queue: self.queue,
            events,
            control: Arc::clone(&control),
        };

        let thread = thread::Builder::new()
            .name("traceboard-worker".to_string())
            .spawn(move || cycle.run_to_completion())?;
        info!("Worker started on {port_name}");

        Ok((
            WorkerHandle {
                control,
                sender,
                thread: Some(thread),
            },
            receiver,
        ))
    }
}

/// The running side of a worker, owned by the background thread.
struct DutyCycle<O: PortOpener, C: Clock> {
    connection: ConnectionManager<O>,
    config: WorkerConfig,
    clock: C,
    queue: CommandQueue,
    events: mpsc::Sender<WorkerEvent>,
    control: Arc<Control>,
}

impl<O: PortOpener, C: Clock> DutyCycle<O, C> {
    fn run_to_completion(mut self) -> Result<StopReason> {
        let _stopped = StoppedOnExit(Arc::clone(&self.control));

        let outcome = self.run();
        self.control.set(WorkerState::Stopping);
        self.connection.close();

        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => StopReason::Failed(e.to_string()),
        };
        info!("Worker stopped ({reason})");
        self.publish(WorkerEvent::Stopped(reason));
        outcome
    }

    fn run(&mut self) -> Result<StopReason> {
        let mut completed: u64 = 0;

        loop {
            if self.control.state() != WorkerState::Running {
                return Ok(StopReason::Requested);
            }

            let reading = match self.cycle() {
                Ok(reading) => reading,
                Err(e) => {
                    error!("Duty cycle failed: {e}");
                    self.control.set(WorkerState::Stopping);
                    return Err(e);
                },
            };
            debug!("Reading {reading}");
            self.publish(WorkerEvent::Reading(reading));

            completed += 1;
            if self
                .config
                .max_cycles
                .is_some_and(|max| completed >= max)
            {
                return Ok(StopReason::CycleLimit);
            }
            if !self.control.pause(self.config.cycle_delay) {
                return Ok(StopReason::Requested);
            }
        }
    }

    fn cycle(&mut self) -> Result<Reading> {
        let time_label = protocol::heartbeat(self.clock.now());
        debug!("Heartbeat {time_label}");
        self.connection.write_line(time_label.as_bytes())?;

        if let Some(command) = self.queue.pop() {
            debug!("Dispatching {command}");
            self.connection.write_line(command.token().as_bytes())?;
        }

        let line = self.connection.read_line(self.config.read_timeout)?;
        let text = String::from_utf8_lossy(&line);
        let measurement = protocol::parse_measurement(&text, self.config.noise_threshold);
        if line.is_empty() {
            debug!("No response within {:?}", self.config.read_timeout);
        } else if !measurement.is_available() {
            debug!(
                "Discarded {} byte line below the noise threshold",
                line.len()
            );
        }

        Ok(Reading::new(time_label, measurement))
    }

    fn publish(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            trace!("No observer attached, event dropped");
        }
    }
}

/// Handle to a started worker.
///
/// Dropping the handle requests a stop and waits for the thread to finish.
pub struct WorkerHandle {
    control: Arc<Control>,
    sender: CommandSender,
    thread: Option<JoinHandle<Result<StopReason>>>,
}

impl WorkerHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    /// Cloneable command handle.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Queue `command` for dispatch.
    pub fn submit(&self, command: Command) {
        self.sender.submit(command);
    }

    /// Request a graceful stop after the current cycle.
    pub fn stop(&self) {
        if self.control.request_stop() {
            info!("Stop requested");
        }
    }

    /// Wait up to `timeout` for the worker to stop.
    ///
    /// Returns why it stopped, or the link error that ended the run. The
    /// outcome can be collected once; later calls fail with
    /// [`Error::AlreadyJoined`].
    pub fn await_stopped(&mut self, timeout: Duration) -> Result<StopReason> {
        let thread = self.thread.take().ok_or(Error::AlreadyJoined)?;

        if !self.control.wait_stopped(timeout) {
            self.thread = Some(thread);
            return Err(Error::Timeout(format!(
                "worker still running after {timeout:?}"
            )));
        }

        thread.join().map_err(|_| Error::WorkerPanicked)?
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.control.request_stop();
            if let Some(message) = unjoined_outcome(&thread.join()) {
                warn!("{message}");
            }
        }
    }
}

/// What a dropped, never-awaited handle should report, if anything.
fn unjoined_outcome(outcome: &thread::Result<Result<StopReason>>) -> Option<String> {
    match outcome {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("Worker handle dropped after the run failed: {e}")),
        Err(_) => Some("Worker handle dropped after the worker thread panicked".to_string()),
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("state", &self.state())
            .field("pending", &self.sender.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        port::mock::{IoOp, MockOpener, Script},
        protocol::Measurement,
    };
    use std::{
        collections::HashSet,
        io::{self, ErrorKind},
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn config() -> WorkerConfig {
        WorkerConfig::new("COM12", 115200)
            .with_cycle_delay(Duration::ZERO)
            .with_read_timeout(Duration::from_millis(50))
    }

    fn worker(script: &Script, config: WorkerConfig) -> Worker<MockOpener, FixedClock> {
        let _ = env_logger::builder().is_test(true).try_init();
        Worker::with_clock(
            ConnectionManager::new(script.opener()),
            config,
            FixedClock::at(14, 15).unwrap(),
        )
    }

    fn long_line(count: usize) -> String {
        (0..count)
            .map(|i| format!("x{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn measurements(events: &[WorkerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                WorkerEvent::Reading(reading) => Some(reading.measurement.to_string()),
                WorkerEvent::Stopped(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.serial.baud_rate, crate::port::DEFAULT_BAUD_RATE);
        assert_eq!(config.cycle_delay, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.noise_threshold, 300);
        assert!(config.max_cycles.is_none());
    }

    #[test]
    fn test_quiet_device_publishes_unavailable_and_keeps_running() {
        let script = Script::new();
        script.push_silence();
        let (mut handle, events) = worker(&script, config().with_max_cycles(1))
            .start()
            .unwrap();

        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::CycleLimit);
        let events: Vec<_> = events.iter().collect();
        assert_eq!(
            events,
            vec![
                WorkerEvent::Reading(Reading::new("T14:15", Measurement::Unavailable)),
                WorkerEvent::Stopped(StopReason::CycleLimit),
            ]
        );
    }

    #[test]
    fn test_soft_outcomes_and_valid_reading() {
        let script = Script::new();
        script
            .push_silence()
            .push_line("abc def")
            .push_line(&long_line(301));
        let (mut handle, events) = worker(&script, config().with_max_cycles(3))
            .start()
            .unwrap();

        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::CycleLimit);
        let events: Vec<_> = events.iter().collect();
        assert_eq!(measurements(&events), ["N/A", "N/A", "x1"]);
    }

    #[test]
    fn test_zero_read_timeout_polls_waiting_response() {
        let script = Script::new();
        script.push_line(&long_line(301)).push_silence();
        let config = config()
            .with_read_timeout(Duration::ZERO)
            .with_max_cycles(2);
        let (mut handle, events) = worker(&script, config).start().unwrap();

        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::CycleLimit);
        let events: Vec<_> = events.iter().collect();
        assert_eq!(measurements(&events), ["x1", "N/A"]);
    }

    #[test]
    fn test_cycle_order_is_heartbeat_command_read() {
        let script = Script::new();
        script.push_line(&long_line(301));
        let worker = worker(&script, config().with_max_cycles(1));
        worker.sender().read_sensor();
        let (mut handle, _events) = worker.start().unwrap();
        handle.await_stopped(WAIT).unwrap();

        let log = script.log();
        assert_eq!(
            log[..3],
            [
                IoOp::Write("T14:15".to_string()),
                IoOp::Write("R00001".to_string()),
                IoOp::Read,
            ]
        );
    }

    #[test]
    fn test_at_most_one_command_per_cycle() {
        let script = Script::new();
        let worker = worker(&script, config().with_max_cycles(2));
        let sender = worker.sender();
        sender.read_sensor();
        sender.timer_control();
        sender.reset();

        let (mut handle, _events) = worker.start().unwrap();
        handle.await_stopped(WAIT).unwrap();

        assert_eq!(script.writes(), ["T14:15", "R00001", "T14:15", "R00002"]);
        assert_eq!(sender.pending(), 1);
    }

    #[test]
    fn test_open_failure_never_starts_the_loop() {
        let script = Script::new();
        script.fail_open();

        let err = worker(&script, config()).start().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(script.opens(), 1);
        assert!(script.log().is_empty());
    }

    #[test]
    fn test_write_failure_stops_and_closes_once() {
        let script = Script::new();
        script.fail_writes_after(1);
        let (mut handle, events) = worker(&script, config()).start().unwrap();

        let err = handle.await_stopped(WAIT).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
        assert_eq!(handle.state(), WorkerState::Stopped);
        assert_eq!(script.closes(), 1);

        let events: Vec<_> = events.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WorkerEvent::Reading(_)));
        assert!(matches!(events[1], WorkerEvent::Stopped(StopReason::Failed(_))));

        drop(handle);
        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_first_heartbeat_failure_publishes_no_reading() {
        let script = Script::new();
        script.fail_writes_after(0);
        let (mut handle, events) = worker(&script, config()).start().unwrap();

        assert!(handle.await_stopped(WAIT).is_err());
        let events: Vec<_> = events.iter().collect();
        assert!(measurements(&events).is_empty());
        assert!(matches!(
            events.as_slice(),
            [WorkerEvent::Stopped(StopReason::Failed(_))]
        ));
    }

    #[test]
    fn test_read_failure_is_fatal() {
        let script = Script::new();
        script.push_read_failure(ErrorKind::BrokenPipe);
        let (mut handle, _events) = worker(&script, config()).start().unwrap();

        assert!(handle.await_stopped(WAIT).unwrap_err().is_link_failure());
        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_stop_ends_run_after_current_cycle() {
        let script = Script::new();
        let config = config().with_cycle_delay(Duration::from_secs(60));
        let (mut handle, events) = worker(&script, config).start().unwrap();

        let first = events.recv_timeout(WAIT).unwrap();
        assert!(matches!(first, WorkerEvent::Reading(_)));

        handle.stop();
        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::Requested);
        assert_eq!(handle.state(), WorkerState::Stopped);
        assert_eq!(script.closes(), 1);

        let rest: Vec<_> = events.iter().collect();
        assert_eq!(rest, vec![WorkerEvent::Stopped(StopReason::Requested)]);
    }

    #[test]
    fn test_await_stopped_times_out_while_running() {
        let script = Script::new();
        let config = config().with_cycle_delay(Duration::from_secs(60));
        let (mut handle, _events) = worker(&script, config).start().unwrap();

        let err = handle
            .await_stopped(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_ne!(handle.state(), WorkerState::Stopped);

        handle.stop();
        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::Requested);
        assert!(matches!(
            handle.await_stopped(WAIT),
            Err(Error::AlreadyJoined)
        ));
    }

    #[test]
    fn test_slow_observer_does_not_stall_the_loop() {
        let script = Script::new();
        let (mut handle, events) = worker(&script, config().with_max_cycles(5))
            .start()
            .unwrap();

        // Nothing is received until the run is over
        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::CycleLimit);
        let events: Vec<_> = events.iter().collect();
        assert_eq!(measurements(&events).len(), 5);
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Stopped(StopReason::CycleLimit))
        );
    }

    #[test]
    fn test_dropped_receiver_does_not_stop_worker() {
        let script = Script::new();
        let (mut handle, events) = worker(&script, config().with_max_cycles(3))
            .start()
            .unwrap();
        drop(events);

        assert_eq!(handle.await_stopped(WAIT).unwrap(), StopReason::CycleLimit);
        assert_eq!(script.writes().len(), 3);
    }

    #[test]
    fn test_dropping_failed_handle_reports_outcome() {
        let script = Script::new();
        script.fail_writes_after(1);
        let (handle, events) = worker(&script, config()).start().unwrap();

        let events: Vec<_> = events.iter().collect();
        assert!(matches!(events.last(), Some(WorkerEvent::Stopped(StopReason::Failed(_)))));
        drop(handle);
        assert_eq!(script.closes(), 1);

        let failed: thread::Result<Result<StopReason>> = Ok(Err(Error::Io(io::Error::new(
            ErrorKind::BrokenPipe,
            "device unplugged",
        ))));
        let message = unjoined_outcome(&failed).unwrap();
        assert!(message.contains("device unplugged"));

        let panicked: thread::Result<Result<StopReason>> =
            Err(Box::new("boom") as Box<dyn std::any::Any + Send>);
        assert!(unjoined_outcome(&panicked).unwrap().contains("panicked"));
        assert!(unjoined_outcome(&Ok(Ok(StopReason::Requested))).is_none());
    }

    #[test]
    fn test_dropping_handle_stops_worker() {
        let script = Script::new();
        let config = config().with_cycle_delay(Duration::from_secs(60));
        let (handle, events) = worker(&script, config).start().unwrap();
        events.recv_timeout(WAIT).unwrap();

        drop(handle);
        assert_eq!(script.closes(), 1);
        assert_eq!(
            events.iter().last(),
            Some(WorkerEvent::Stopped(StopReason::Requested))
        );
    }

    #[test]
    fn test_commands_submitted_while_running_are_dispatched() {
        let script = Script::new();
        let config = config().with_cycle_delay(Duration::from_millis(5));
        let (mut handle, events) = worker(&script, config).start().unwrap();

        handle.submit(Command::Reset);
        handle.sender().submit_token("R00042").unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        while handle.sender().pending() > 0 && std::time::Instant::now() < deadline {
            events.recv_timeout(WAIT).unwrap();
        }
        handle.stop();
        handle.await_stopped(WAIT).unwrap();

        let commands: Vec<String> = script
            .writes()
            .into_iter()
            .filter(|w| w.starts_with('R'))
            .collect();
        assert_eq!(commands, ["R00004", "R00042"]);
    }

    #[test]
    fn test_submit_token_rejects_garbage() {
        let script = Script::new();
        let worker = worker(&script, config());
        assert!(worker.sender().submit_token("hello").is_err());
        assert_eq!(worker.sender().pending(), 0);
    }

    #[test]
    fn test_queue_is_fifo_under_concurrent_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 100;

        let queue = CommandQueue::new();
        let threads: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(Command::custom(format!("R{p}{i:04}")));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let mut seen = HashSet::new();
        let mut last_per_producer = [None::<usize>; PRODUCERS];
        while let Some(command) = queue.pop() {
            let token = command.token();
            assert!(seen.insert(token.to_string()), "{token} dispatched twice");
            let producer: usize = token[1..2].parse().unwrap();
            let index: usize = token[2..].parse().unwrap();
            if let Some(last) = last_per_producer[producer] {
                assert!(index > last, "producer {producer} reordered");
            }
            last_per_producer[producer] = Some(index);
        }
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::Requested.to_string(), "stop requested");
        assert_eq!(
            StopReason::Failed("I/O error: gone".to_string()).to_string(),
            "link lost: I/O error: gone"
        );
    }
}
