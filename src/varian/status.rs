//! Decoding of the operating-status and error-code windows.

use std::fmt;

use tracing::{debug, warn};

use super::error::{PumpError, Result};
use super::types::Window;

/// Run state reported by window 205.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationalStatus {
    Stopped,
    WaitingInterlock,
    Starting,
    AutoTuning,
    Braking,
    Normal,
    Fail,
    #[default]
    Unknown,
}

impl OperationalStatus {
    /// Map a raw status code; anything outside 0-6 is `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Stopped,
            1 => Self::WaitingInterlock,
            2 => Self::Starting,
            3 => Self::AutoTuning,
            4 => Self::Braking,
            5 => Self::Normal,
            6 => Self::Fail,
            _ => Self::Unknown,
        }
    }

    /// Operator-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::WaitingInterlock => "Waiting for interlock",
            Self::Starting => "Starting...",
            Self::AutoTuning => "Auto-tuning",
            Self::Braking => "Braking",
            Self::Normal => "Normal",
            Self::Fail => "! F A I L !",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One fault bit of window 206.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFlag {
    NoConnect,
    PumpOvertemp,
    ControllerOvertemp,
    Power,
    Aux,
    Overvoltage,
    Overcurrent,
    HighLoad,
}

impl ErrorFlag {
    /// All flags, bit 0 first.
    pub const ALL: [ErrorFlag; 8] = [
        ErrorFlag::NoConnect,
        ErrorFlag::PumpOvertemp,
        ErrorFlag::ControllerOvertemp,
        ErrorFlag::Power,
        ErrorFlag::Aux,
        ErrorFlag::Overvoltage,
        ErrorFlag::Overcurrent,
        ErrorFlag::HighLoad,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Short column heading.
    pub fn label(self) -> &'static str {
        match self {
            ErrorFlag::NoConnect => "CONNECT",
            ErrorFlag::PumpOvertemp => "PUMP TMP",
            ErrorFlag::ControllerOvertemp => "CTL TEMP",
            ErrorFlag::Power => "POWER",
            ErrorFlag::Aux => "AUX",
            ErrorFlag::Overvoltage => "Over Vol",
            ErrorFlag::Overcurrent => "Over Cur",
            ErrorFlag::HighLoad => "HI LOAD",
        }
    }
}

/// Raw fault mask with per-bit accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorBitmask(u8);

impl ErrorBitmask {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: ErrorFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_clear(self) -> bool {
        self.0 == 0
    }

    /// Flags that are set, bit 0 first.
    pub fn active(self) -> impl Iterator<Item = ErrorFlag> {
        ErrorFlag::ALL.into_iter().filter(move |flag| self.contains(*flag))
    }

    #[cfg(test)]
    pub fn set(&mut self, flag: ErrorFlag) {
        self.0 |= flag.bit();
    }
}

/// One status poll: both windows read back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpReading {
    pub operational: OperationalStatus,
    pub errors: ErrorBitmask,
}

/// Parse a numeric window value.
///
/// Anything that is not a finite number is an error, never a silent zero.
pub fn parse_numeric(window: Window, raw: &[u8]) -> Result<f64> {
    let not_a_number = || PumpError::NotANumber {
        window: window.number(),
        raw: String::from_utf8_lossy(raw).into_owned(),
    };

    let text = std::str::from_utf8(raw).map_err(|_| not_a_number())?.trim();
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => {
            debug!("Window {window}: cannot parse {text:?} as a number");
            Err(not_a_number())
        }
    }
}

/// Decode the operating-status window value.
pub fn decode_operational_status(raw: &[u8]) -> Result<OperationalStatus> {
    let value = parse_numeric(Window::OPERATING_STATUS, raw)?;
    Ok(OperationalStatus::from_code(value.trunc() as i64))
}

/// Decode the error-code window value as an 8-bit fault mask.
pub fn decode_error_bitmask(raw: &[u8]) -> Result<ErrorBitmask> {
    let value = parse_numeric(Window::ERROR_CODE, raw)?;
    let code = value.trunc();
    if !(0.0..=255.0).contains(&code) {
        warn!("Error code {value} does not fit 8 bits");
        return Err(PumpError::NotANumber {
            window: Window::ERROR_CODE.number(),
            raw: String::from_utf8_lossy(raw).into_owned(),
        });
    }
    Ok(ErrorBitmask(code as u8))
}
