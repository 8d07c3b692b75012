use crate::error::{Result, SolarMaxError};
use crate::probe::{IcmpProbe, ReachabilityProbe};
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const RECONNECT_BACKOFF_SECS: u64 = 60; //secs between reachability probes while waiting
pub const CONNECT_TIMEOUT_SECS: u64 = 5;
pub const RECV_BUFFER_SIZE: usize = 255;

const EMPTY_READ_PAUSE_MS: u64 = 30;
const CANCEL_CHECK_MS: u64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Source of the reconnect backoff delay.
pub trait Clock: Send {
    /// Waits for `duration`. Returns `false` if the cancel flag was raised meanwhile.
    fn sleep(&mut self, duration: Duration, cancel_flag: &AtomicBool) -> bool;
}

/// Real time, sliced so a raised cancel flag is noticed within `CANCEL_CHECK_MS`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&mut self, duration: Duration, cancel_flag: &AtomicBool) -> bool {
        let started = Instant::now();
        loop {
            if cancel_flag.load(Ordering::SeqCst) {
                return false;
            }
            let left = duration.saturating_sub(started.elapsed());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(Duration::from_millis(CANCEL_CHECK_MS)));
        }
    }
}

/// The TCP link to one inverter.
///
/// Owns at most one socket: acquired by `connect()`, released by
/// `disconnect()`, a failed exchange, or drop. One exchange at a time.
pub struct Connection {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    state: ConnectionState,
    read_timeout: Option<Duration>,
    probe: Box<dyn ReachabilityProbe>,
    clock: Box<dyn Clock>,
    cancel_flag: Arc<AtomicBool>,
}

impl Connection {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            state: ConnectionState::Disconnected,
            read_timeout: None,
            probe: Box::new(IcmpProbe::default()),
            clock: Box::new(SystemClock),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Raising this flag interrupts `reconnect()` and a pending `exchange()`.
    pub fn with_cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = cancel_flag;
        self
    }

    /// Bounds how long `exchange()` waits for the first byte of a response.
    /// Without it, a silent device stalls the exchange until cancelled.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn probe_reachable(&mut self) -> bool {
        self.probe.is_reachable(&self.host)
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, Duration::from_secs(CONNECT_TIMEOUT_SECS)) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(self.read_timeout)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("{}: connect to {} failed: {}", self.host, addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no address")
        }))
    }

    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.state = ConnectionState::Connecting;

        if !self.probe_reachable() {
            self.state = ConnectionState::Disconnected;
            return Err(SolarMaxError::Unreachable {
                host: self.host.clone(),
            });
        }

        info!("{}: connecting to port {}...", self.host, self.port);
        match self.open_stream() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                info!("{}: connected", self.host);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(SolarMaxError::ConnectFailed {
                    host: self.host.clone(),
                    port: self.port,
                    source: e,
                })
            }
        }
    }

    /// Drops the current socket, waits until the device answers a probe again
    /// (no attempt limit, `RECONNECT_BACKOFF_SECS` between probes) and connects.
    pub fn reconnect(&mut self) -> Result<()> {
        self.disconnect();

        let backoff = Duration::from_secs(RECONNECT_BACKOFF_SECS);
        let waiting_since = Instant::now();
        let mut failed_probes: u64 = 0;
        loop {
            if self.cancel_flag.load(Ordering::SeqCst) {
                return Err(SolarMaxError::Cancelled);
            }
            if self.probe_reachable() {
                break;
            }
            failed_probes += 1;
            warn!(
                "{}: not reachable (attempt {}), next probe in {}",
                self.host,
                failed_probes,
                humantime::format_duration(backoff)
            );
            if !self.clock.sleep(backoff, &self.cancel_flag) {
                return Err(SolarMaxError::Cancelled);
            }
        }

        if failed_probes > 0 {
            info!(
                "{}: reachable again after {} failed probes ({} waiting)",
                self.host,
                failed_probes,
                humantime::format_duration(Duration::from_secs(waiting_since.elapsed().as_secs()))
            );
        }
        self.connect()
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("{}: closing connection", self.host);
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Sends `frame` and blocks until at least one byte of the answer arrives.
    ///
    /// An I/O error means the link is gone: the socket is released and the
    /// state becomes `Disconnected`.
    pub fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let result = match self.stream.as_mut() {
            Some(stream) => transfer(stream, frame, self.read_timeout, &self.cancel_flag),
            None => Err(SolarMaxError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "not connected",
            ))),
        };

        if let Err(SolarMaxError::Io(ref e)) = result {
            if self.stream.is_some() {
                warn!("{}: connection lost: {}", self.host, e);
            }
            self.disconnect();
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn transfer(
    stream: &mut TcpStream,
    frame: &[u8],
    read_timeout: Option<Duration>,
    cancel_flag: &AtomicBool,
) -> Result<Vec<u8>> {
    stream.write_all(frame)?;
    stream.flush()?;

    let sent = Instant::now();
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buffer)?;
        if n > 0 {
            return Ok(buffer[..n].to_vec());
        }

        // the device sometimes returns empty reads before the data arrives
        if cancel_flag.load(Ordering::SeqCst) {
            return Err(SolarMaxError::Cancelled);
        }
        if let Some(timeout) = read_timeout {
            if sent.elapsed() >= timeout {
                return Err(SolarMaxError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data received within {}", humantime::format_duration(timeout)),
                )));
            }
        }
        trace!("empty read, waiting for data");
        thread::sleep(Duration::from_millis(EMPTY_READ_PAUSE_MS));
    }
}
