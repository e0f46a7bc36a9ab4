//! Turns one raw meter sample into the per-sensor readings.

use crate::homewizard_api::RawSample;
use crate::sensor::SensorKind;

/// Voltage assumed when the meter does not report phase 1 voltage.
pub const DEFAULT_VOLTAGE_V: f64 = 230.0;

/// Derived reading for one logical sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    /// Never negative
    pub instantaneous_w: f64,
    pub cumulative_kwh: f64,
    pub voltage_v: f64,
    pub timestamp_unix_seconds: i64,
}

/// Both readings derived from a single sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedSample {
    pub import: SensorReading,
    pub export: SensorReading,
}

impl MappedSample {
    pub fn reading(&self, kind: SensorKind) -> &SensorReading {
        match kind {
            SensorKind::Import => &self.import,
            SensorKind::Export => &self.export,
        }
    }
}

/// Maps `raw` using the current wall clock, floored to whole seconds.
pub fn map(raw: &RawSample) -> MappedSample {
    map_at(raw, chrono::Utc::now().timestamp())
}

/// Splits the signed power into import and export. At most one side is nonzero.
pub fn map_at(raw: &RawSample, timestamp_unix_seconds: i64) -> MappedSample {
    let voltage_v = raw.voltage_l1_v.unwrap_or(DEFAULT_VOLTAGE_V);
    MappedSample {
        import: SensorReading {
            kind: SensorKind::Import,
            instantaneous_w: raw.active_power_w.max(0.0),
            cumulative_kwh: raw.total_import_kwh,
            voltage_v,
            timestamp_unix_seconds,
        },
        export: SensorReading {
            kind: SensorKind::Export,
            instantaneous_w: (-raw.active_power_w).max(0.0),
            cumulative_kwh: raw.total_export_kwh,
            voltage_v,
            timestamp_unix_seconds,
        },
    }
}
