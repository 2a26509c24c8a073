//! Cached pump status shown by the monitor.

use std::fmt;

use chrono::{DateTime, Local};

use crate::varian::{ErrorBitmask, ErrorFlag, OperationalStatus, PumpReading};

/// Last known pump state.
///
/// Fields only change through [`PumpStatus::apply`], so a failed poll leaves
/// the previous (now stale) values in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PumpStatus {
    pub last_update: Option<DateTime<Local>>,
    pub operational: OperationalStatus,
    pub errors: ErrorBitmask,
    /// Rotation frequency in Hz, if a frequency window is configured.
    pub frequency_hz: Option<f64>,
    /// Power draw in W, if a power window is configured.
    pub power_w: Option<f64>,
}

impl PumpStatus {
    /// Take over a successful reading and stamp the update time.
    pub fn apply(&mut self, reading: PumpReading) {
        self.operational = reading.operational;
        self.errors = reading.errors;
        self.last_update = Some(Local::now());
    }

    /// Seconds since the last successful update.
    pub fn age_secs(&self) -> Option<i64> {
        self.last_update.map(|t| (Local::now() - t).num_seconds())
    }
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"))
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let updated = self
            .last_update
            .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        writeln!(f, "========  Varian status updated {updated}  ========")?;
        writeln!(f)?;
        writeln!(f, "Operational status:   {}", self.operational)?;
        writeln!(f, "Error status:")?;

        // Highest bit first, as on the controller display.
        write!(f, "|")?;
        for flag in ErrorFlag::ALL.iter().rev() {
            write!(f, "{:<9}|", flag.label())?;
        }
        writeln!(f)?;
        write!(f, "|")?;
        for flag in ErrorFlag::ALL.iter().rev() {
            let cell = if self.errors.contains(*flag) { "ERROR" } else { " OK " };
            write!(f, "  {cell:<5}  |")?;
        }
        writeln!(f)?;
        writeln!(f)?;
        write!(
            f,
            "RPS [Hz]: {:>8}      Power [W]: {:>8}",
            optional(self.frequency_hz),
            optional(self.power_w)
        )
    }
}
