//! # HP 33120A Control Library
//!
//! SCPI control of an HP 33120A function / arbitrary waveform generator over
//! RS-232. The library builds command strings from user parameters, queries
//! and reports instrument state, and encodes and uploads arbitrary waveforms
//! within the instrument's buffering limits. Any front end (the bundled CLI, a
//! GUI) supplies parameters and displays the status strings returned.
//!
//! ## Crate Structure
//!
//! - **`units`**: magnitude + unit label to Hz and volts.
//! - **`hardware`**: the [`hardware::Transport`] trait, the serial
//!   implementation and a simulated instrument for tests and `--simulate`.
//! - **`scpi`**: command formatting ([`scpi::commands`]) and query round
//!   trips ([`scpi::query`]).
//! - **`arb`**: parse, normalize, decimate and chunk ARB point data.
//! - **`generator`**: [`generator::SignalGenerator`], one method per user
//!   action.
//! - **`worker`**: runs a generator on its own task behind a request queue.
//! - **`config`**: Figment configuration loading and validation.
//! - **`tracing_setup`**: subscriber initialization from configuration.
//! - **`error`**: the [`error::GeneratorError`] enum.

pub mod arb;
pub mod config;
pub mod error;
pub mod generator;
pub mod hardware;
pub mod scpi;
pub mod tracing_setup;
pub mod units;
pub mod worker;

pub use error::{GenResult, GeneratorError};
pub use generator::SignalGenerator;
