//! Arbitrary waveform encoding.
//!
//! Raw point text goes through four steps before it reaches the instrument:
//!
//! 1. **Parse**: split on comma, space, CR and LF, drop empty tokens, parse
//!    every token as `f64`. One bad token rejects the whole batch.
//! 2. **Normalize**: if the largest magnitude exceeds 1.0, divide every point
//!    by it. Waveforms already inside [-1, 1] are left alone, never amplified.
//! 3. **Decimate**: above 8192 points keep every `ceil(len / 8192)`-th point,
//!    starting at index 0.
//! 4. **Serialize**: `DATA:ARB <name>,<csv>` commands of at most 200 values,
//!    six decimals each. The generator paces them 50 ms apart.

use crate::error::{GenResult, GeneratorError};
use crate::scpi::commands::{arb_data_command, arb_upload_preamble};
use std::time::Duration;

/// Waveform memory ceiling of the instrument.
pub const MAX_POINTS: usize = 8192;

/// Values per `DATA:ARB` command.
pub const CHUNK_SIZE: usize = 200;

/// Pause after each `DATA:ARB` command.
pub const CHUNK_PACING: Duration = Duration::from_millis(50);

/// Name of the instrument's volatile ARB slot.
pub const DEFAULT_ARB_NAME: &str = "VOLATILE";

const DELIMITERS: [char; 4] = [',', ' ', '\n', '\r'];

/// Parse delimited point text.
///
/// Non-finite values (`NaN`, `inf`) are rejected along with anything else
/// that is not a number.
pub fn parse_points(text: &str) -> GenResult<Vec<f64>> {
    text.split(&DELIMITERS[..])
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| GeneratorError::Parse {
                    token: token.to_string(),
                })
        })
        .collect()
}

/// Largest absolute value, 0.0 for an empty slice.
#[must_use]
pub fn max_abs(points: &[f64]) -> f64 {
    points.iter().fold(0.0_f64, |m, p| m.max(p.abs()))
}

/// Rescale into [-1, 1] when any point lies outside it.
pub fn normalize(points: &mut [f64]) {
    let peak = max_abs(points);
    // peak == 0.0 (all zeros) also lands here
    if peak <= 1.0 {
        return;
    }
    for p in points.iter_mut() {
        *p /= peak;
    }
}

/// Stride-subsample down to at most [`MAX_POINTS`].
#[must_use]
pub fn decimate(points: Vec<f64>) -> Vec<f64> {
    if points.len() <= MAX_POINTS {
        return points;
    }
    let factor = points.len().div_ceil(MAX_POINTS);
    points.into_iter().step_by(factor).collect()
}

/// A named waveform ready for upload: normalized and within the point ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbWaveform {
    name: String,
    points: Vec<f64>,
    source_len: usize,
}

impl ArbWaveform {
    /// Parse, normalize and decimate raw point text.
    pub fn from_text(name: impl Into<String>, text: &str) -> GenResult<Self> {
        Self::from_points(name, parse_points(text)?)
    }

    /// Normalize and decimate already-parsed points.
    pub fn from_points(name: impl Into<String>, mut points: Vec<f64>) -> GenResult<Self> {
        if points.is_empty() {
            return Err(GeneratorError::EmptyWaveform);
        }
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(GeneratorError::Parse {
                token: bad.to_string(),
            });
        }

        let source_len = points.len();
        normalize(&mut points);
        Ok(Self {
            name: name.into(),
            points: decimate(points),
            source_len,
        })
    }

    /// Instrument-side name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points as they will be sent.
    #[must_use]
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Number of points that will be sent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; empty waveforms are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point count before decimation.
    #[must_use]
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// The four setup commands sent before any data.
    #[must_use]
    pub fn preamble(&self) -> Vec<String> {
        arb_upload_preamble(&self.name)
    }

    /// One `DATA:ARB` command per window of [`CHUNK_SIZE`] points.
    pub fn data_commands(&self) -> impl Iterator<Item = String> + '_ {
        self.points
            .chunks(CHUNK_SIZE)
            .map(|chunk| arb_data_command(&self.name, chunk))
    }

    /// Status line shown after a completed upload.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "ARB waveform uploaded ({} points) as {}",
            self.points.len(),
            self.name
        )
    }
}
