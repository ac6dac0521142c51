//! Query engine: write a query, wait, read the single-line reply.
//!
//! The HP 33120A has no "reply ready" signal over RS-232, so the default
//! [`ReplyStrategy::Settle`] sleeps a fixed 100 ms after writing and then
//! takes whatever has arrived. [`ReplyStrategy::Terminator`] instead reads
//! up to the `\n` the instrument ends replies with, bounded by the transport's
//! read timeout.

use crate::error::{GenResult, GeneratorError};
use crate::hardware::Transport;
use crate::scpi::commands::{Waveform, DUTY_QUERY, FREQ_QUERY, FUNC_QUERY, VOLT_QUERY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Fixed wait between writing a query and reading its reply.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How the reply to a query is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStrategy {
    /// Sleep [`SETTLE_DELAY`], then read whatever arrived.
    #[default]
    Settle,
    /// Read until `\n`, bounded by the transport read timeout.
    Terminator,
}

/// Where the engine is in a query round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// No query outstanding.
    Idle,
    /// Query written, reply not yet read.
    AwaitingReply,
}

/// Raw instrument replies from a status query.
///
/// Kept as text: the instrument's own number formatting is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentStatus {
    /// Reply to `FUNC?`
    pub function: String,
    /// Reply to `FREQ?`
    pub frequency: String,
    /// Reply to `VOLT?`
    pub amplitude: String,
    /// Reply to `PULSe:DCYCle?`, only asked when the function is SQU
    pub duty: Option<String>,
}

impl fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Function: {}\nFrequency (Hz): {}\nAmplitude (Vpp): {}",
            self.function, self.frequency, self.amplitude
        )?;
        if let Some(duty) = &self.duty {
            write!(f, "\nDuty (%): {duty}")?;
        }
        Ok(())
    }
}

/// Sequential query round trips over a [`Transport`].
#[derive(Debug)]
pub struct QueryEngine {
    strategy: ReplyStrategy,
    state: QueryState,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(ReplyStrategy::default())
    }
}

impl QueryEngine {
    /// Engine using the given reply strategy.
    #[must_use]
    pub fn new(strategy: ReplyStrategy) -> Self {
        Self {
            strategy,
            state: QueryState::Idle,
        }
    }

    /// Current round-trip state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Reply strategy in use.
    #[must_use]
    pub fn strategy(&self) -> ReplyStrategy {
        self.strategy
    }

    /// Discard stale input, write `command`, collect the trimmed reply.
    ///
    /// Fails with [`GeneratorError::NotConnected`] before writing if the
    /// transport is closed. An empty reply is not an error.
    #[instrument(skip(self, transport), err)]
    pub async fn query<T>(&mut self, transport: &mut T, command: &str) -> GenResult<String>
    where
        T: Transport + ?Sized,
    {
        if !transport.is_open() {
            return Err(GeneratorError::NotConnected);
        }

        transport.discard_input_buffer().await?;
        transport.write_line(command).await?;
        self.state = QueryState::AwaitingReply;

        let reply = match self.strategy {
            ReplyStrategy::Settle => {
                tokio::time::sleep(SETTLE_DELAY).await;
                transport.read_available().await
            }
            ReplyStrategy::Terminator => transport.read_line().await,
        };
        self.state = QueryState::Idle;

        let reply = reply?;
        debug!(command, reply = %reply, "query complete");
        Ok(reply)
    }

    /// `FUNC?`, `FREQ?`, `VOLT?`, plus `PULSe:DCYCle?` only when the
    /// function reply is `SQU`.
    #[instrument(skip(self, transport), err)]
    pub async fn query_status<T>(&mut self, transport: &mut T) -> GenResult<InstrumentStatus>
    where
        T: Transport + ?Sized,
    {
        if !transport.is_open() {
            return Err(GeneratorError::NotConnected);
        }

        let function = self.query(transport, FUNC_QUERY).await?;
        let frequency = self.query(transport, FREQ_QUERY).await?;
        let amplitude = self.query(transport, VOLT_QUERY).await?;
        let duty = if function == Waveform::Square.mnemonic() {
            Some(self.query(transport, DUTY_QUERY).await?)
        } else {
            None
        };

        Ok(InstrumentStatus {
            function,
            frequency,
            amplitude,
            duty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedGenerator;
    use crate::hardware::Transport;

    async fn open_sim() -> GenResult<SimulatedGenerator> {
        let mut sim = SimulatedGenerator::new();
        sim.open("SIM").await?;
        Ok(sim)
    }

    #[tokio::test]
    async fn square_status_sends_four_queries() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        sim.write_line("FUNC SQU").await?;
        sim.write_line("PULSe:DCYCle 30").await?;
        let log = sim.command_log();
        log.clear();

        let status = QueryEngine::default().query_status(&mut sim).await?;

        assert_eq!(
            log.queries(),
            vec!["FUNC?", "FREQ?", "VOLT?", "PULSe:DCYCle?"]
        );
        assert_eq!(status.function, "SQU");
        assert_eq!(status.duty.as_deref(), Some("+30"));
        Ok(())
    }

    #[tokio::test]
    async fn other_status_sends_three_queries() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        sim.write_line("FUNC TRI").await?;
        let log = sim.command_log();
        log.clear();

        let status = QueryEngine::default().query_status(&mut sim).await?;

        assert_eq!(log.queries(), vec!["FUNC?", "FREQ?", "VOLT?"]);
        assert_eq!(status.duty, None);
        Ok(())
    }

    #[tokio::test]
    async fn closed_transport_sends_nothing() {
        let mut sim = SimulatedGenerator::new();
        let log = sim.command_log();
        let mut engine = QueryEngine::default();

        let result = engine.query_status(&mut sim).await;

        assert!(matches!(result, Err(GeneratorError::NotConnected)));
        assert!(log.lines().is_empty());
        assert_eq!(engine.state(), QueryState::Idle);
    }

    #[tokio::test]
    async fn state_returns_to_idle() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        let mut engine = QueryEngine::new(ReplyStrategy::Terminator);

        let reply = engine.query(&mut sim, "FUNC?").await?;

        assert_eq!(reply, "SIN");
        assert_eq!(engine.state(), QueryState::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn stale_input_is_discarded_before_query() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        sim.inject_reply("garbage from an earlier query");

        let reply = QueryEngine::default().query(&mut sim, "FUNC?").await?;
        assert_eq!(reply, "SIN");
        Ok(())
    }

    #[test]
    fn engine_reports_its_strategy() {
        assert_eq!(QueryEngine::default().strategy(), ReplyStrategy::Settle);
        assert_eq!(
            QueryEngine::new(ReplyStrategy::Terminator).strategy(),
            ReplyStrategy::Terminator
        );
    }

    #[tokio::test(start_paused = true)]
    async fn settle_query_waits_before_reading() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        let mut engine = QueryEngine::default();

        let started = tokio::time::Instant::now();
        engine.query(&mut sim, "FUNC?").await?;
        assert!(started.elapsed() >= SETTLE_DELAY);

        sim.write_line("FUNC TRI").await?;
        let started = tokio::time::Instant::now();
        engine.query_status(&mut sim).await?;
        assert!(started.elapsed() >= SETTLE_DELAY * 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn terminator_query_skips_settle_delay() -> anyhow::Result<()> {
        let mut sim = open_sim().await?;
        let mut engine = QueryEngine::new(ReplyStrategy::Terminator);

        let started = tokio::time::Instant::now();
        assert_eq!(engine.query(&mut sim, "FUNC?").await?, "SIN");
        assert!(started.elapsed() < SETTLE_DELAY);
        Ok(())
    }

    #[test]
    fn status_renders_duty_line_only_for_square() {
        let mut status = InstrumentStatus {
            function: "SQU".into(),
            frequency: "+2.000000000000E+04".into(),
            amplitude: "+3.000000E+00".into(),
            duty: Some("+30".into()),
        };
        assert_eq!(
            status.to_string(),
            "Function: SQU\nFrequency (Hz): +2.000000000000E+04\nAmplitude (Vpp): +3.000000E+00\nDuty (%): +30"
        );

        status.function = "SIN".into();
        status.duty = None;
        assert!(!status.to_string().contains("Duty"));
    }
}
