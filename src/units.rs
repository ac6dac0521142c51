//! Unit scaling for user-facing magnitudes.
//!
//! Frequencies arrive as a number plus one of `μHz`, `Hz`, `kHz`, `MHz`;
//! amplitudes as a number plus `mV` or `V`. Both are converted to the
//! canonical SI value the instrument expects. An unrecognised label leaves the
//! value unchanged.

use std::fmt;
use std::str::FromStr;

/// Frequency unit selectable by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    /// Microhertz (1e-6 Hz)
    MicroHertz,
    /// Hertz
    Hertz,
    /// Kilohertz (1e3 Hz)
    KiloHertz,
    /// Megahertz (1e6 Hz)
    MegaHertz,
}

impl FrequencyUnit {
    /// Multiplier converting a value in this unit to Hz.
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            FrequencyUnit::MicroHertz => 1e-6,
            FrequencyUnit::Hertz => 1.0,
            FrequencyUnit::KiloHertz => 1e3,
            FrequencyUnit::MegaHertz => 1e6,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            // Both the micro sign (U+00B5) and Greek mu (U+03BC) show up in pasted text
            "μHz" | "µHz" | "uHz" => Ok(FrequencyUnit::MicroHertz),
            "Hz" => Ok(FrequencyUnit::Hertz),
            "kHz" => Ok(FrequencyUnit::KiloHertz),
            "MHz" => Ok(FrequencyUnit::MegaHertz),
            other => Err(format!("Unknown frequency unit '{other}'")),
        }
    }
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FrequencyUnit::MicroHertz => "μHz",
            FrequencyUnit::Hertz => "Hz",
            FrequencyUnit::KiloHertz => "kHz",
            FrequencyUnit::MegaHertz => "MHz",
        };
        f.write_str(label)
    }
}

/// Voltage unit selectable by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageUnit {
    /// Millivolts (1e-3 V)
    MilliVolt,
    /// Volts
    Volt,
}

impl VoltageUnit {
    /// Multiplier converting a value in this unit to volts.
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            VoltageUnit::MilliVolt => 1e-3,
            VoltageUnit::Volt => 1.0,
        }
    }
}

impl FromStr for VoltageUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mV" => Ok(VoltageUnit::MilliVolt),
            "V" => Ok(VoltageUnit::Volt),
            other => Err(format!("Unknown voltage unit '{other}'")),
        }
    }
}

impl fmt::Display for VoltageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoltageUnit::MilliVolt => "mV",
            VoltageUnit::Volt => "V",
        })
    }
}

/// Scale `value` given in `unit` to Hz. Unknown unit labels are identity.
#[must_use]
pub fn scale_frequency(value: f64, unit: &str) -> f64 {
    match unit.parse::<FrequencyUnit>() {
        Ok(unit) => value * unit.multiplier(),
        Err(_) => value,
    }
}

/// Scale `value` given in `unit` to volts. Unknown unit labels are identity.
#[must_use]
pub fn scale_voltage(value: f64, unit: &str) -> f64 {
    match unit.parse::<VoltageUnit>() {
        Ok(unit) => value * unit.multiplier(),
        Err(_) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_multipliers() {
        let cases = [
            ("μHz", 1e-6),
            ("µHz", 1e-6),
            ("Hz", 1.0),
            ("kHz", 1e3),
            ("MHz", 1e6),
        ];
        for (unit, mult) in cases {
            for f in [0.0, 1.0, 2.5, 20.0, 15.0, -3.0] {
                assert_eq!(scale_frequency(f, unit), f * mult, "unit {unit}");
            }
        }
    }

    #[test]
    fn voltage_multipliers() {
        assert_eq!(scale_voltage(500.0, "mV"), 500.0 * 1e-3);
        assert_eq!(scale_voltage(3.0, "V"), 3.0);
    }

    #[test]
    fn unknown_unit_is_identity() {
        assert_eq!(scale_frequency(42.0, "GHz"), 42.0);
        assert_eq!(scale_frequency(42.0, ""), 42.0);
        assert_eq!(scale_voltage(1.5, "kV"), 1.5);
    }

    #[test]
    fn twenty_kilohertz() {
        assert_eq!(scale_frequency(20.0, "kHz"), 20000.0);
    }

    #[test]
    fn unit_labels_round_trip_through_display() {
        for unit in [
            FrequencyUnit::MicroHertz,
            FrequencyUnit::Hertz,
            FrequencyUnit::KiloHertz,
            FrequencyUnit::MegaHertz,
        ] {
            assert_eq!(unit.to_string().parse::<FrequencyUnit>(), Ok(unit));
        }
        assert_eq!("mV".parse::<VoltageUnit>(), Ok(VoltageUnit::MilliVolt));
    }
}
