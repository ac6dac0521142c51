//! Simulated HP 33120A for testing without hardware.
//!
//! [`SimulatedGenerator`] implements [`Transport`] entirely in memory. It
//! parses the same command vocabulary the real instrument accepts, tracks
//! function, frequency, amplitude, duty cycle and ARB data, and answers
//! queries in the instrument's reply format. Every line written is recorded in
//! a shareable [`CommandLog`] so tests can assert on exact command sequences
//! after the transport has been moved into a generator or worker.
//!
//! Faults can be scripted: [`SimulatedGenerator::refuse_open`] makes `open`
//! fail like a port held by another program, and
//! [`SimulatedGenerator::fail_after_writes`] breaks the link part-way through
//! a sequence.

use crate::error::{GenResult, GeneratorError};
use crate::hardware::Transport;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Shared record of every line written to a [`SimulatedGenerator`].
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, line: &str) {
        self.guard().push(line.to_string());
    }

    /// All lines written, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    /// Only the lines that were queries (ending in `?`).
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|l| l.ends_with('?'))
            .cloned()
            .collect()
    }

    /// Lines starting with `prefix`.
    #[must_use]
    pub fn starting_with(&self, prefix: &str) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|l| l.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.guard().clear();
    }
}

/// Instrument state as the simulated front panel would show it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedState {
    /// Function mnemonic (`SIN`, `SQU`, ...)
    pub function: String,
    /// Frequency in Hz
    pub frequency_hz: f64,
    /// Amplitude in Vpp
    pub amplitude_vpp: f64,
    /// Square-wave duty cycle in percent
    pub duty_percent: f64,
    /// Selected ARB name
    pub arb_name: String,
    /// Points received through `DATA:ARB` since the last upload preamble
    pub arb_points: usize,
    /// Data format set with `FORM`
    pub data_format: String,
}

impl Default for SimulatedState {
    /// Power-on defaults: 1 kHz sine, 100 mVpp, 50 % duty.
    fn default() -> Self {
        Self {
            function: "SIN".to_string(),
            frequency_hz: 1000.0,
            amplitude_vpp: 0.1,
            duty_percent: 50.0,
            arb_name: "VOLATILE".to_string(),
            arb_points: 0,
            data_format: "ASC".to_string(),
        }
    }
}

/// In-memory [`Transport`] that behaves like an HP 33120A.
#[derive(Debug, Default)]
pub struct SimulatedGenerator {
    open: bool,
    refuse_open: Option<String>,
    writes_before_failure: Option<usize>,
    state: Arc<Mutex<SimulatedState>>,
    pending: String,
    log: CommandLog,
}

/// Format like the instrument's `+d.dddE+dd` replies.
fn scpi_exponent(value: f64, digits: usize) -> String {
    let formatted = format!("{:.*E}", digits, value.abs());
    let (mantissa, exponent) = formatted.split_once('E').unwrap_or((&formatted, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    format!(
        "{}{}E{}{:02}",
        if value.is_sign_negative() { '-' } else { '+' },
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

impl SimulatedGenerator {
    /// A closed simulated instrument in its power-on state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `open` fail with `reason`.
    #[must_use]
    pub fn refuse_open(mut self, reason: impl Into<String>) -> Self {
        self.refuse_open = Some(reason.into());
        self
    }

    /// Accept `count` more writes, then fail every write after.
    #[must_use]
    pub fn fail_after_writes(mut self, count: usize) -> Self {
        self.writes_before_failure = Some(count);
        self
    }

    /// Handle on the record of written lines.
    #[must_use]
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Snapshot of the simulated front panel.
    #[must_use]
    pub fn state(&self) -> SimulatedState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shared handle on the simulated state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<Mutex<SimulatedState>> {
        self.state.clone()
    }

    /// Queue unsolicited text as if the instrument had sent it.
    pub fn inject_reply(&mut self, text: &str) {
        self.pending.push_str(text);
        self.pending.push('\n');
    }

    fn execute(&mut self, line: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (header, argument) = match line.split_once(' ') {
            Some((h, a)) => (h, a.trim()),
            None => (line, ""),
        };

        let reply = match header.to_ascii_uppercase().as_str() {
            "FUNC?" => Some(state.function.clone()),
            "FREQ?" => Some(scpi_exponent(state.frequency_hz, 12)),
            "VOLT?" => Some(scpi_exponent(state.amplitude_vpp, 6)),
            "PULSE:DCYCLE?" => Some(format!("{:+}", state.duty_percent)),
            "FUNC:ARB?" => Some(state.arb_name.clone()),
            "FUNC" => {
                state.function = argument.to_ascii_uppercase();
                None
            }
            "FREQ" => {
                if let Ok(v) = argument.parse() {
                    state.frequency_hz = v;
                }
                None
            }
            "VOLT" => {
                if let Ok(v) = argument.parse() {
                    state.amplitude_vpp = v;
                }
                None
            }
            "PULSE:DCYCLE" => {
                if let Ok(v) = argument.parse() {
                    state.duty_percent = v;
                }
                None
            }
            "FUNC:ARB" => {
                state.arb_name = argument.trim_matches('"').to_string();
                None
            }
            "FORM" => {
                state.data_format = argument.to_string();
                state.arb_points = 0;
                None
            }
            "DATA:ARB" => {
                let count = argument.split(',').skip(1).count();
                state.arb_points += count;
                None
            }
            "FORM:BORD" | "*CLS" => None,
            other => {
                warn!(header = other, "simulated generator ignoring unknown command");
                None
            }
        };

        if let Some(reply) = reply {
            debug!(query = line, reply = %reply, "simulated reply");
            self.pending.push_str(&reply);
            self.pending.push('\n');
        }
    }
}

#[async_trait]
impl Transport for SimulatedGenerator {
    async fn open(&mut self, port_name: &str) -> GenResult<()> {
        if self.open {
            return Ok(());
        }
        if let Some(reason) = &self.refuse_open {
            return Err(GeneratorError::Connection {
                port: port_name.to_string(),
                reason: reason.clone(),
            });
        }
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> GenResult<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn write_line(&mut self, text: &str) -> GenResult<()> {
        if !self.open {
            return Err(GeneratorError::NotConnected);
        }
        if let Some(remaining) = self.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(GeneratorError::TransportWrite {
                    command: text.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "simulated link failure",
                    ),
                });
            }
            *remaining -= 1;
        }

        self.log.push(text);
        self.execute(text);
        Ok(())
    }

    async fn discard_input_buffer(&mut self) -> GenResult<usize> {
        if !self.open {
            return Err(GeneratorError::NotConnected);
        }
        let discarded = self.pending.len();
        self.pending.clear();
        Ok(discarded)
    }

    async fn read_available(&mut self) -> GenResult<String> {
        if !self.open {
            return Err(GeneratorError::NotConnected);
        }
        let reply = std::mem::take(&mut self.pending);
        Ok(reply.trim().to_string())
    }

    async fn read_line(&mut self) -> GenResult<String> {
        if !self.open {
            return Err(GeneratorError::NotConnected);
        }
        let line = match self.pending.find('\n') {
            Some(end) => {
                let rest = self.pending.split_off(end + 1);
                std::mem::replace(&mut self.pending, rest)
            }
            None => std::mem::take(&mut self.pending),
        };
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scpi_exponent_matches_instrument_format() {
        assert_eq!(scpi_exponent(1000.0, 12), "+1.000000000000E+03");
        assert_eq!(scpi_exponent(0.1, 6), "+1.000000E-01");
        assert_eq!(scpi_exponent(20000.0, 12), "+2.000000000000E+04");
    }

    #[tokio::test]
    async fn tracks_applied_settings() -> anyhow::Result<()> {
        let mut sim = SimulatedGenerator::new();
        sim.open("SIM").await?;
        for cmd in ["FUNC SQU", "FREQ 20000", "VOLT 3", "PULSe:DCYCle 30"] {
            sim.write_line(cmd).await?;
        }

        let state = sim.state();
        assert_eq!(state.function, "SQU");
        assert_eq!(state.frequency_hz, 20000.0);
        assert_eq!(state.amplitude_vpp, 3.0);
        assert_eq!(state.duty_percent, 30.0);
        Ok(())
    }

    #[tokio::test]
    async fn counts_arb_points_per_upload() -> anyhow::Result<()> {
        let mut sim = SimulatedGenerator::new();
        sim.open("SIM").await?;
        sim.write_line("FORM REAL,32").await?;
        sim.write_line("DATA:ARB VOLATILE,0.100000,0.200000").await?;
        sim.write_line("DATA:ARB VOLATILE,0.300000").await?;
        assert_eq!(sim.state().arb_points, 3);

        sim.write_line("FORM REAL,32").await?;
        assert_eq!(sim.state().arb_points, 0);
        Ok(())
    }

    #[tokio::test]
    async fn read_line_takes_one_reply_at_a_time() -> anyhow::Result<()> {
        let mut sim = SimulatedGenerator::new();
        sim.open("SIM").await?;
        sim.write_line("FUNC?").await?;
        sim.write_line("FUNC:ARB?").await?;

        assert_eq!(sim.read_line().await?, "SIN");
        assert_eq!(sim.read_line().await?, "VOLATILE");
        assert_eq!(sim.read_line().await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn scripted_write_failure() -> anyhow::Result<()> {
        let mut sim = SimulatedGenerator::new().fail_after_writes(1);
        sim.open("SIM").await?;
        sim.write_line("FUNC SIN").await?;

        let err = sim.write_line("FREQ 1000").await;
        assert!(matches!(err, Err(GeneratorError::TransportWrite { .. })));
        assert_eq!(sim.command_log().lines(), vec!["FUNC SIN"]);
        assert!(sim.is_open());
        Ok(())
    }

    #[tokio::test]
    async fn refused_open_is_connection_error() {
        let mut sim = SimulatedGenerator::new().refuse_open("port busy");
        let err = sim.open("COM3").await;
        assert!(matches!(err, Err(GeneratorError::Connection { .. })));
        assert!(!sim.is_open());
    }
}
