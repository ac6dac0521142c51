//! HP 33120A Function / Arbitrary Waveform Generator
//!
//! Reference: HP 33120A User's Guide, chapter 4 (Remote Interface Reference)
//!
//! Protocol Overview:
//! - Format: SCPI ASCII over RS-232
//! - Baud: 9600, 8N1, no flow control, DTR/RTS asserted
//! - Terminator: LF (\n)
//! - Commands: FUNC, FREQ, VOLT, PULSe:DCYCle, FUNC:ARB, FORM, DATA:ARB
//! - Queries: FUNC?, FREQ?, VOLT?, PULSe:DCYCle?
//!
//! [`SignalGenerator`] is the boundary for every user action. Each operation
//! opens the port on first use, sends its command sequence strictly in order,
//! and returns either a status string for display or a [`GeneratorError`].
//! A failure never closes the port, so a retry does not pay the open cost
//! again.
//!
//! # Example Usage
//!
//! ```no_run
//! use hp33120a::generator::SignalGenerator;
//! use hp33120a::hardware::SerialTransport;
//! use hp33120a::scpi::{OutputSetting, Waveform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut generator = SignalGenerator::new(SerialTransport::new(), "/dev/ttyUSB0");
//!
//!     let setting = OutputSetting::new(Waveform::Square, 20_000.0, 3.0, 30.0);
//!     println!("{}", generator.apply(&setting).await?);
//!     println!("{}", generator.query_status().await?);
//!
//!     generator.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::arb::{ArbWaveform, CHUNK_PACING, DEFAULT_ARB_NAME};
use crate::error::GenResult;
use crate::hardware::Transport;
use crate::scpi::commands::{apply_commands, CLEAR_STATUS};
use crate::scpi::{InstrumentStatus, OutputSetting, QueryEngine, ReplyStrategy};
use tracing::{debug, error, info, instrument};

/// Driver for the HP 33120A over a [`Transport`].
///
/// Not reentrant: each method takes `&mut self`, and callers that share a
/// generator between tasks go through [`crate::worker`].
pub struct SignalGenerator<T: Transport> {
    transport: T,
    port_name: String,
    arb_name: String,
    queries: QueryEngine,
}

impl<T: Transport> SignalGenerator<T> {
    /// Generator that will claim `port_name` on first use.
    pub fn new(transport: T, port_name: impl Into<String>) -> Self {
        Self {
            transport,
            port_name: port_name.into(),
            arb_name: DEFAULT_ARB_NAME.to_string(),
            queries: QueryEngine::default(),
        }
    }

    /// Use `name` for ARB selection and upload instead of `VOLATILE`.
    #[must_use]
    pub fn with_arb_name(mut self, name: impl Into<String>) -> Self {
        self.arb_name = name.into();
        self
    }

    /// Collect query replies with `strategy`.
    #[must_use]
    pub fn with_reply_strategy(mut self, strategy: ReplyStrategy) -> Self {
        self.queries = QueryEngine::new(strategy);
        self
    }

    /// Port this generator talks to.
    #[must_use]
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// ARB name used by apply and upload.
    #[must_use]
    pub fn arb_name(&self) -> &str {
        &self.arb_name
    }

    /// How query replies are collected.
    #[must_use]
    pub fn reply_strategy(&self) -> ReplyStrategy {
        self.queries.strategy()
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the port is held.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Claim the port if not already held.
    pub async fn connect(&mut self) -> GenResult<()> {
        if self.transport.is_open() {
            return Ok(());
        }
        self.transport.open(&self.port_name).await
    }

    async fn send(&mut self, command: &str) -> GenResult<()> {
        self.transport.write_line(command).await.inspect_err(|e| {
            error!(command, error = %e, "command sequence aborted");
        })
    }

    /// Send `*CLS` to clear the instrument's error queue.
    #[instrument(skip(self), fields(port = %self.port_name), err)]
    pub async fn clear_status(&mut self) -> GenResult<()> {
        self.connect().await?;
        self.send(CLEAR_STATUS).await
    }

    /// Send `setting` and return the status line to display.
    ///
    /// ARB selects the generator's ARB name; other waveforms send function,
    /// frequency, amplitude and (square only) duty cycle.
    #[instrument(skip(self, setting), fields(port = %self.port_name, waveform = %setting.waveform()), err)]
    pub async fn apply(&mut self, setting: &OutputSetting) -> GenResult<String> {
        self.connect().await?;
        for command in apply_commands(setting, &self.arb_name) {
            self.send(&command).await?;
        }
        let summary = setting.summary();
        info!("{summary}");
        Ok(summary)
    }

    /// Query function, frequency, amplitude and (square only) duty cycle.
    #[instrument(skip(self), fields(port = %self.port_name, reply = ?self.queries.strategy()), err)]
    pub async fn query_status(&mut self) -> GenResult<InstrumentStatus> {
        self.connect().await?;
        self.queries.query_status(&mut self.transport).await
    }

    /// Send one query and return its trimmed reply.
    #[instrument(skip(self), fields(port = %self.port_name, reply = ?self.queries.strategy()), err)]
    pub async fn query(&mut self, command: &str) -> GenResult<String> {
        self.connect().await?;
        self.queries.query(&mut self.transport, command).await
    }

    /// Parse `text` as ARB points under this generator's ARB name, then upload.
    ///
    /// A parse failure is reported before the port is touched.
    pub async fn upload_arb_text(&mut self, text: &str) -> GenResult<String> {
        let waveform = ArbWaveform::from_text(self.arb_name.clone(), text)?;
        self.upload_arb(&waveform).await
    }

    /// Send the upload preamble, then every data chunk 50 ms apart.
    ///
    /// Cannot be cancelled part-way. A write failure stops the loop and leaves
    /// whatever chunks were already sent on the instrument.
    #[instrument(skip(self, waveform), fields(port = %self.port_name, name = waveform.name(), points = waveform.len()), err)]
    pub async fn upload_arb(&mut self, waveform: &ArbWaveform) -> GenResult<String> {
        self.connect().await?;

        for command in waveform.preamble() {
            self.send(&command).await?;
        }

        if waveform.source_len() != waveform.len() {
            debug!(
                from = waveform.source_len(),
                to = waveform.len(),
                "waveform decimated"
            );
        }

        for (index, chunk) in waveform.data_commands().enumerate() {
            self.send(&chunk).await?;
            debug!(chunk = index, "ARB chunk sent");
            tokio::time::sleep(CHUNK_PACING).await;
        }

        let summary = waveform.summary();
        info!("{summary}");
        Ok(summary)
    }

    /// Release the port.
    pub async fn shutdown(&mut self) -> GenResult<()> {
        self.transport.close().await
    }
}
