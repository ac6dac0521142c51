//! Line-oriented serial transport for the HP 33120A.
//!
//! Protocol Overview:
//! - Format: SCPI ASCII text over RS-232
//! - Baud: 9600, 8N1, no flow control, DTR/RTS asserted
//! - Terminator: LF (\n) on commands and replies
//! - Half duplex: one command or query in flight at a time
//!
//! [`Transport`] is the seam between the protocol layer and the wire.
//! [`SerialTransport`] talks to a real port through `tokio-serial`; tests
//! swap in `tokio::io::duplex` pipes or the simulated instrument in
//! [`crate::hardware::mock`].

use crate::error::{GenResult, GeneratorError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::spawn_blocking;
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, instrument, trace, warn};

/// Fixed line speed of the instrument's RS-232 interface.
pub const BAUD_RATE: u32 = 9600;

/// Longest a read waits for the first reply byte.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Appended to every command written.
pub const LINE_TERMINATOR: &str = "\n";

/// Silence after which a reply in progress is treated as complete.
const QUIET_GAP: Duration = Duration::from_millis(20);

/// Window used to drain stale bytes before a query.
const DISCARD_WINDOW: Duration = Duration::from_millis(20);

/// Blocking-style, half-duplex channel to the instrument.
///
/// Implementations are not reentrant; callers serialize access.
#[async_trait]
pub trait Transport: Send {
    /// Claim the named port. No-op if already open.
    async fn open(&mut self, port_name: &str) -> GenResult<()>;

    /// Release the port. No-op if already closed.
    async fn close(&mut self) -> GenResult<()>;

    /// Whether a port is currently held.
    fn is_open(&self) -> bool;

    /// Write `text` followed by [`LINE_TERMINATOR`].
    ///
    /// Returns [`GeneratorError::NotConnected`] when closed, so callers can
    /// tell "not sent" apart from "sent".
    async fn write_line(&mut self, text: &str) -> GenResult<()>;

    /// Drop any unread input. Returns the number of bytes discarded.
    async fn discard_input_buffer(&mut self) -> GenResult<usize>;

    /// Whatever has arrived, trimmed. Empty string on timeout.
    async fn read_available(&mut self) -> GenResult<String>;

    /// Read up to and including `\n`, bounded by [`READ_TIMEOUT`].
    ///
    /// On timeout returns whatever partial text arrived, trimmed.
    async fn read_line(&mut self) -> GenResult<String>;
}

/// Trait alias for async serial port I/O.
///
/// `tokio_serial::SerialStream` in production, `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// RS-232 transport backed by `tokio-serial`.
pub struct SerialTransport {
    port_name: Option<String>,
    stream: Option<DynSerial>,
    read_timeout: Duration,
    /// Bytes received after the first `\n` of a `read_line`, served next
    pending: Vec<u8>,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    /// A closed transport. The port is claimed on the first [`Transport::open`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            port_name: None,
            stream: None,
            read_timeout: READ_TIMEOUT,
            pending: Vec::new(),
        }
    }

    /// Wrap an already open stream.
    pub fn from_stream(port_name: impl Into<String>, stream: DynSerial) -> Self {
        Self {
            port_name: Some(port_name.into()),
            stream: Some(stream),
            read_timeout: READ_TIMEOUT,
            pending: Vec::new(),
        }
    }

    /// Name of the currently held port, if any.
    #[must_use]
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref().filter(|_| self.stream.is_some())
    }

    fn stream(&mut self) -> GenResult<&mut DynSerial> {
        self.stream.as_mut().ok_or(GeneratorError::NotConnected)
    }

    /// Collect bytes until a newline (if asked for), silence after data, or
    /// the read timeout.
    ///
    /// Starts from bytes left over by an earlier `read_line`. In line mode
    /// only the first line is returned and the rest is kept for the next read.
    async fn collect(&mut self, until_newline: bool) -> GenResult<String> {
        let read_timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(GeneratorError::NotConnected)?;
        let deadline = Instant::now() + read_timeout;
        let mut collected = std::mem::take(&mut self.pending);
        let mut buf = [0u8; 256];

        loop {
            if until_newline && collected.contains(&b'\n') {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let wait = if collected.is_empty() || until_newline {
                remaining
            } else {
                QUIET_GAP.min(remaining)
            };

            match timeout(wait, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                Ok(Err(e)) => return Err(GeneratorError::Io(e)),
                Err(_) => break,
            }
        }

        if until_newline {
            if let Some(end) = collected.iter().position(|&b| b == b'\n') {
                self.pending = collected.split_off(end + 1);
            }
        }
        if collected.is_empty() {
            trace!("no reply before read timeout");
        }
        Ok(String::from_utf8_lossy(&collected).trim().to_string())
    }
}

/// Open `port_name` at 9600 8N1 with DTR and RTS asserted.
async fn open_serial_port(port_name: &str) -> GenResult<tokio_serial::SerialStream> {
    let path = port_name.to_string();
    let connection_error = |reason: String| GeneratorError::Connection {
        port: port_name.to_string(),
        reason,
    };

    let mut port = spawn_blocking(move || {
        tokio_serial::new(&path, BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open_native_async()
    })
    .await
    .map_err(|e| connection_error(format!("open task failed: {e}")))?
    .map_err(|e| connection_error(e.to_string()))?;

    port.write_data_terminal_ready(true)
        .map_err(|e| connection_error(format!("cannot assert DTR: {e}")))?;
    port.write_request_to_send(true)
        .map_err(|e| connection_error(format!("cannot assert RTS: {e}")))?;

    Ok(port)
}

#[async_trait]
impl Transport for SerialTransport {
    #[instrument(skip(self), err)]
    async fn open(&mut self, port_name: &str) -> GenResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let port = open_serial_port(port_name).await?;
        self.stream = Some(Box::new(port));
        self.port_name = Some(port_name.to_string());
        info!(port = port_name, baud = BAUD_RATE, "serial port opened");
        Ok(())
    }

    async fn close(&mut self) -> GenResult<()> {
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                warn!(error = %e, "error while closing serial port");
            }
            info!(port = ?self.port_name, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_line(&mut self, text: &str) -> GenResult<()> {
        let stream = self.stream()?;
        let line = format!("{text}{LINE_TERMINATOR}");
        let write_error = |source| GeneratorError::TransportWrite {
            command: text.to_string(),
            source,
        };

        stream.write_all(line.as_bytes()).await.map_err(write_error)?;
        stream.flush().await.map_err(write_error)?;
        debug!(command = text, "sent");
        Ok(())
    }

    async fn discard_input_buffer(&mut self) -> GenResult<usize> {
        let stream = self.stream.as_mut().ok_or(GeneratorError::NotConnected)?;
        let mut discard = [0u8; 256];
        let deadline = Instant::now() + DISCARD_WINDOW;
        let mut total = self.pending.len();
        self.pending.clear();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, stream.read(&mut discard)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Ok(Err(e)) => return Err(GeneratorError::Io(e)),
                Err(_) => break,
            }
        }

        if total > 0 {
            debug!(bytes = total, "discarded stale input");
        }
        Ok(total)
    }

    async fn read_available(&mut self) -> GenResult<String> {
        let reply = self.collect(false).await?;
        debug!(reply = %reply, "received");
        Ok(reply)
    }

    async fn read_line(&mut self) -> GenResult<String> {
        let reply = self.collect(true).await?;
        debug!(reply = %reply, "received line");
        Ok(reply)
    }
}
