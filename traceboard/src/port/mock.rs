//! Scripted in-memory port for unit tests.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortOpener, SerialConfig},
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex},
        time::Duration,
    },
};

/// One scripted response to a read call.
#[derive(Debug, Clone)]
pub(crate) enum ReadStep {
    Data(Vec<u8>),
    Silence,
    Fail(io::ErrorKind),
}

/// Observable I/O operation, in the order the port saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IoOp {
    Write(String),
    Read,
}

#[derive(Debug, Default)]
struct ScriptState {
    reads: VecDeque<ReadStep>,
    log: Vec<IoOp>,
    writes_before_failure: Option<usize>,
    fail_open: bool,
    opens: usize,
    closes: usize,
}

/// Shared script; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn push_line(&self, line: &str) -> &Self {
        self.push_bytes(format!("{line}\r\n").as_bytes())
    }

    pub(crate) fn push_bytes(&self, bytes: &[u8]) -> &Self {
        self.with(|s| s.reads.push_back(ReadStep::Data(bytes.to_vec())));
        self
    }

    pub(crate) fn push_silence(&self) -> &Self {
        self.with(|s| s.reads.push_back(ReadStep::Silence));
        self
    }

    pub(crate) fn push_read_failure(&self, kind: io::ErrorKind) -> &Self {
        self.with(|s| s.reads.push_back(ReadStep::Fail(kind)));
        self
    }

    /// Let `count` writes succeed, fail every write after that.
    pub(crate) fn fail_writes_after(&self, count: usize) -> &Self {
        self.with(|s| s.writes_before_failure = Some(count));
        self
    }

    pub(crate) fn fail_open(&self) -> &Self {
        self.with(|s| s.fail_open = true);
        self
    }

    pub(crate) fn log(&self) -> Vec<IoOp> {
        self.with(|s| s.log.clone())
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                IoOp::Write(text) => Some(text),
                IoOp::Read => None,
            })
            .collect()
    }

    pub(crate) fn opens(&self) -> usize {
        self.with(|s| s.opens)
    }

    pub(crate) fn closes(&self) -> usize {
        self.with(|s| s.closes)
    }

    pub(crate) fn opener(&self) -> MockOpener {
        MockOpener {
            script: self.clone(),
        }
    }
}

pub(crate) struct MockPort {
    script: Script,
    name: String,
    baud_rate: u32,
    timeout: Duration,
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.script.with(|s| {
            s.log.push(IoOp::Read);
            match s.reads.pop_front() {
                Some(ReadStep::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        s.reads.push_front(ReadStep::Data(data.split_off(n)));
                    }
                    Ok(n)
                },
                Some(ReadStep::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
                Some(ReadStep::Silence) | None => {
                    Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
                },
            }
        })
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.script.with(|s| {
            let written = s
                .log
                .iter()
                .filter(|op| matches!(op, IoOp::Write(_)))
                .count();
            if s.writes_before_failure.is_some_and(|limit| written >= limit) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            s.log.push(IoOp::Write(String::from_utf8_lossy(buf).into_owned()));
            Ok(buf.len())
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.script.with(|s| s.closes += 1);
        Ok(())
    }
}

pub(crate) struct MockOpener {
    script: Script,
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&mut self, config: &SerialConfig) -> Result<MockPort> {
        let fail = self.script.with(|s| {
            s.opens += 1;
            s.fail_open
        });
        if fail {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        Ok(MockPort {
            script: self.script.clone(),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
            timeout: config.timeout,
        })
    }
}
