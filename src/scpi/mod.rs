//! SCPI command formatting and query round trips.

pub mod commands;
pub mod query;

pub use commands::{Capabilities, OutputSetting, UserInput, Waveform};
pub use query::{InstrumentStatus, QueryEngine, QueryState, ReplyStrategy, SETTLE_DELAY};
