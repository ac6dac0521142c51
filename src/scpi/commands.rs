//! SCPI command strings for the HP 33120A.
//!
//! Pure formatting. Nothing here touches the transport; the
//! [`crate::generator::SignalGenerator`] writes the strings in order.
//!
//! Numeric arguments for frequency, amplitude and duty use Rust's default
//! `f64` formatting (shortest round-trippable), so `20000.0` goes out as
//! `FREQ 20000` and `3.0` as `VOLT 3`.

use crate::units::{scale_frequency, scale_voltage};
use std::fmt;
use std::str::FromStr;

/// Function query.
pub const FUNC_QUERY: &str = "FUNC?";
/// Frequency query.
pub const FREQ_QUERY: &str = "FREQ?";
/// Amplitude query.
pub const VOLT_QUERY: &str = "VOLT?";
/// Square-wave duty cycle query.
pub const DUTY_QUERY: &str = "PULSe:DCYCle?";
/// Clear the instrument's status registers and error queue.
pub const CLEAR_STATUS: &str = "*CLS";

/// Lowest frequency the instrument accepts (Hz).
pub const MIN_FREQUENCY_HZ: f64 = 0.1;
/// Highest frequency the instrument accepts (Hz).
pub const MAX_FREQUENCY_HZ: f64 = 15e6;
/// Lowest amplitude (Vpp).
pub const MIN_AMPLITUDE_VPP: f64 = 0.0;
/// Highest amplitude (Vpp).
pub const MAX_AMPLITUDE_VPP: f64 = 10.0;

/// Used when the frequency text does not parse.
pub const DEFAULT_FREQUENCY: f64 = 1000.0;
/// Used when the amplitude text does not parse.
pub const DEFAULT_AMPLITUDE: f64 = 2.0;
/// Used when the duty text does not parse.
pub const DEFAULT_DUTY_PERCENT: f64 = 50.0;

/// Output function of the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    /// Sine
    Sine,
    /// Square, with adjustable duty cycle
    Square,
    /// Triangle
    Triangle,
    /// Ramp
    Ramp,
    /// Noise
    Noise,
    /// DC level
    Dc,
    /// User arbitrary waveform selected by name
    Arb,
}

/// Which controls make sense for a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Duty cycle can be set
    pub duty_editable: bool,
    /// ARB data can be uploaded
    pub arb_upload_enabled: bool,
}

impl Waveform {
    /// Every waveform, in the order the instrument's front panel lists them.
    pub const ALL: [Waveform; 7] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Triangle,
        Waveform::Ramp,
        Waveform::Noise,
        Waveform::Dc,
        Waveform::Arb,
    ];

    /// SCPI mnemonic used in `FUNC <k>` and returned by `FUNC?`.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Waveform::Sine => "SIN",
            Waveform::Square => "SQU",
            Waveform::Triangle => "TRI",
            Waveform::Ramp => "RAMP",
            Waveform::Noise => "NOIS",
            Waveform::Dc => "DC",
            Waveform::Arb => "ARB",
        }
    }

    /// Derived from the waveform alone, never stored.
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        Capabilities {
            duty_editable: self == Waveform::Square,
            arb_upload_enabled: self == Waveform::Arb,
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Waveform::ALL
            .into_iter()
            .find(|w| w.mnemonic() == upper)
            .ok_or_else(|| {
                format!(
                    "Invalid waveform '{}'. Must be one of: SIN, SQU, TRI, RAMP, NOIS, DC, ARB",
                    s.trim()
                )
            })
    }
}

/// Raw text from the user, before any scaling or clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInput<'a> {
    /// Selected waveform
    pub waveform: Waveform,
    /// Frequency magnitude text
    pub frequency: &'a str,
    /// Frequency unit label (μHz, Hz, kHz, MHz)
    pub frequency_unit: &'a str,
    /// Amplitude magnitude text
    pub amplitude: &'a str,
    /// Amplitude unit label (mV, V)
    pub amplitude_unit: &'a str,
    /// Duty cycle text, read only for square waves
    pub duty: &'a str,
}

/// One apply request, already scaled to Hz and Vpp and clamped to range.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSetting {
    waveform: Waveform,
    frequency_hz: f64,
    amplitude_vpp: f64,
    duty_percent: Option<f64>,
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn parse_or(text: &str, fallback: f64) -> f64 {
    text.trim()
        .parse::<f64>()
        .map_or(fallback, |v| finite_or(v, fallback))
}

impl OutputSetting {
    /// Clamp frequency to 0.1 Hz..15 MHz, amplitude to 0..10 Vpp and duty to
    /// 0..100 %. Duty is kept only for [`Waveform::Square`].
    ///
    /// NaN and infinite arguments are replaced by the defaults (1000 Hz,
    /// 2 Vpp, 50 %) before clamping.
    #[must_use]
    pub fn new(waveform: Waveform, frequency_hz: f64, amplitude_vpp: f64, duty_percent: f64) -> Self {
        let frequency_hz = finite_or(frequency_hz, DEFAULT_FREQUENCY);
        let amplitude_vpp = finite_or(amplitude_vpp, DEFAULT_AMPLITUDE);
        let duty_percent = waveform
            .capabilities()
            .duty_editable
            .then(|| finite_or(duty_percent, DEFAULT_DUTY_PERCENT).clamp(0.0, 100.0));

        Self {
            waveform,
            frequency_hz: frequency_hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ),
            amplitude_vpp: amplitude_vpp.clamp(MIN_AMPLITUDE_VPP, MAX_AMPLITUDE_VPP),
            duty_percent,
        }
    }

    /// Resolve raw user text. Unparseable numbers fall back to 1000, 2 and 50
    /// before unit scaling.
    #[must_use]
    pub fn from_user_input(input: &UserInput<'_>) -> Self {
        let frequency = scale_frequency(
            parse_or(input.frequency, DEFAULT_FREQUENCY),
            input.frequency_unit,
        );
        let amplitude = scale_voltage(
            parse_or(input.amplitude, DEFAULT_AMPLITUDE),
            input.amplitude_unit,
        );
        let duty = parse_or(input.duty, DEFAULT_DUTY_PERCENT);

        Self::new(input.waveform, frequency, amplitude, duty)
    }

    /// Selected waveform.
    #[must_use]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Frequency in Hz.
    #[must_use]
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Amplitude in Vpp.
    #[must_use]
    pub fn amplitude_vpp(&self) -> f64 {
        self.amplitude_vpp
    }

    /// Duty cycle in percent; `None` unless square.
    #[must_use]
    pub fn duty_percent(&self) -> Option<f64> {
        self.duty_percent
    }

    /// Status line shown after a successful apply.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Applied: {}, {} Hz, {} Vpp",
            self.waveform, self.frequency_hz, self.amplitude_vpp
        );
        if let Some(duty) = self.duty_percent {
            line.push_str(&format!(", Duty {duty}%"));
        }
        line
    }
}

/// Commands for an apply, in transmission order.
///
/// ARB selects the stored waveform `arb_name`; everything else sets function,
/// frequency, amplitude and (square only) duty cycle.
#[must_use]
pub fn apply_commands(setting: &OutputSetting, arb_name: &str) -> Vec<String> {
    if setting.waveform == Waveform::Arb {
        return select_arb_commands(arb_name).to_vec();
    }

    let mut commands = vec![
        format!("FUNC {}", setting.waveform),
        format!("FREQ {}", setting.frequency_hz),
        format!("VOLT {}", setting.amplitude_vpp),
    ];
    if let Some(duty) = setting.duty_percent {
        commands.push(format!("PULSe:DCYCle {duty}"));
    }
    commands
}

/// `FUNC ARB` followed by the quoted waveform selection.
#[must_use]
pub fn select_arb_commands(arb_name: &str) -> [String; 2] {
    ["FUNC ARB".to_string(), format!("FUNC:ARB \"{arb_name}\"")]
}

/// Four commands sent before any `DATA:ARB` chunk.
#[must_use]
pub fn arb_upload_preamble(arb_name: &str) -> Vec<String> {
    let [func, select] = select_arb_commands(arb_name);
    vec![
        "FORM REAL,32".to_string(),
        "FORM:BORD NORM".to_string(),
        func,
        select,
    ]
}

/// One `DATA:ARB` chunk, every value with six decimals.
#[must_use]
pub fn arb_data_command(arb_name: &str, values: &[f64]) -> String {
    let csv = values
        .iter()
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("DATA:ARB {arb_name},{csv}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(waveform: Waveform, freq: &'a str, freq_unit: &'a str) -> UserInput<'a> {
        UserInput {
            waveform,
            frequency: freq,
            frequency_unit: freq_unit,
            amplitude: "3",
            amplitude_unit: "V",
            duty: "30",
        }
    }

    #[test]
    fn square_wave_apply_sequence() {
        let setting = OutputSetting::from_user_input(&input(Waveform::Square, "20", "kHz"));
        assert_eq!(
            apply_commands(&setting, "VOLATILE"),
            vec!["FUNC SQU", "FREQ 20000", "VOLT 3", "PULSe:DCYCle 30"]
        );
    }

    #[test]
    fn non_square_has_no_duty_command() {
        for waveform in Waveform::ALL {
            if matches!(waveform, Waveform::Square | Waveform::Arb) {
                continue;
            }
            let setting = OutputSetting::new(waveform, 1000.0, 2.0, 30.0);
            let commands = apply_commands(&setting, "VOLATILE");
            assert_eq!(commands.len(), 3, "{waveform}");
            assert_eq!(commands[0], format!("FUNC {}", waveform.mnemonic()));
            assert!(setting.duty_percent().is_none());
        }
    }

    #[test]
    fn arb_apply_selects_named_waveform() {
        let setting = OutputSetting::new(Waveform::Arb, 1000.0, 2.0, 50.0);
        assert_eq!(
            apply_commands(&setting, "VOLATILE"),
            vec!["FUNC ARB", "FUNC:ARB \"VOLATILE\""]
        );
    }

    #[test]
    fn values_are_clamped() {
        let high = OutputSetting::new(Waveform::Square, 20e6, 12.0, 150.0);
        assert_eq!(high.frequency_hz(), MAX_FREQUENCY_HZ);
        assert_eq!(high.amplitude_vpp(), MAX_AMPLITUDE_VPP);
        assert_eq!(high.duty_percent(), Some(100.0));

        let low = OutputSetting::new(Waveform::Square, 0.0, -1.0, -5.0);
        assert_eq!(low.frequency_hz(), MIN_FREQUENCY_HZ);
        assert_eq!(low.amplitude_vpp(), MIN_AMPLITUDE_VPP);
        assert_eq!(low.duty_percent(), Some(0.0));
    }

    #[test]
    fn non_finite_arguments_fall_back_to_defaults() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let setting = OutputSetting::new(Waveform::Square, bad, bad, bad);
            assert_eq!(setting.frequency_hz(), DEFAULT_FREQUENCY, "{bad}");
            assert_eq!(setting.amplitude_vpp(), DEFAULT_AMPLITUDE, "{bad}");
            assert_eq!(setting.duty_percent(), Some(DEFAULT_DUTY_PERCENT), "{bad}");
            assert_eq!(
                apply_commands(&setting, "VOLATILE"),
                vec!["FUNC SQU", "FREQ 1000", "VOLT 2", "PULSe:DCYCle 50"]
            );
        }

        let sine = OutputSetting::new(Waveform::Sine, f64::NAN, f64::NAN, 50.0);
        assert!((MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&sine.frequency_hz()));
        assert!((MIN_AMPLITUDE_VPP..=MAX_AMPLITUDE_VPP).contains(&sine.amplitude_vpp()));
    }

    #[test]
    fn micro_hertz_input_clamps_to_floor() {
        let setting = OutputSetting::from_user_input(&input(Waveform::Sine, "5", "μHz"));
        assert_eq!(setting.frequency_hz(), MIN_FREQUENCY_HZ);
    }

    #[test]
    fn unparseable_text_uses_defaults() {
        let setting = OutputSetting::from_user_input(&UserInput {
            waveform: Waveform::Square,
            frequency: "abc",
            frequency_unit: "Hz",
            amplitude: "",
            amplitude_unit: "V",
            duty: "NaN",
        });
        assert_eq!(setting.frequency_hz(), DEFAULT_FREQUENCY);
        assert_eq!(setting.amplitude_vpp(), DEFAULT_AMPLITUDE);
        assert_eq!(setting.duty_percent(), Some(DEFAULT_DUTY_PERCENT));
    }

    #[test]
    fn millivolts_are_scaled() {
        let setting = OutputSetting::from_user_input(&UserInput {
            waveform: Waveform::Sine,
            frequency: "1",
            frequency_unit: "MHz",
            amplitude: "500",
            amplitude_unit: "mV",
            duty: "",
        });
        assert_eq!(
            apply_commands(&setting, "VOLATILE"),
            vec!["FUNC SIN", "FREQ 1000000", "VOLT 0.5"]
        );
    }

    #[test]
    fn summary_mentions_duty_only_for_square() {
        let square = OutputSetting::new(Waveform::Square, 20000.0, 3.0, 30.0);
        assert_eq!(square.summary(), "Applied: SQU, 20000 Hz, 3 Vpp, Duty 30%");

        let sine = OutputSetting::new(Waveform::Sine, 1000.0, 2.0, 30.0);
        assert_eq!(sine.summary(), "Applied: SIN, 1000 Hz, 2 Vpp");
    }

    #[test]
    fn upload_preamble_order() {
        assert_eq!(
            arb_upload_preamble("VOLATILE"),
            vec!["FORM REAL,32", "FORM:BORD NORM", "FUNC ARB", "FUNC:ARB \"VOLATILE\""]
        );
    }

    #[test]
    fn data_chunk_uses_six_decimals() {
        assert_eq!(
            arb_data_command("VOLATILE", &[1.0, -0.25, 0.0, 0.75]),
            "DATA:ARB VOLATILE,1.000000,-0.250000,0.000000,0.750000"
        );
    }

    #[test]
    fn capability_set_follows_waveform() {
        for waveform in Waveform::ALL {
            let caps = waveform.capabilities();
            assert_eq!(caps.duty_editable, waveform == Waveform::Square);
            assert_eq!(caps.arb_upload_enabled, waveform == Waveform::Arb);
        }
    }

    #[test]
    fn waveform_parses_case_insensitively() {
        assert_eq!("squ".parse::<Waveform>(), Ok(Waveform::Square));
        assert_eq!(" NOIS ".parse::<Waveform>(), Ok(Waveform::Noise));
        assert!("SAW".parse::<Waveform>().is_err());
    }
}
