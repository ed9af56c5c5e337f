//! Shared types of the regulation loop

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Power that can flow in two directions across the grid connection.
///
/// Stored consumption-positive: positive watt values are power taken from
/// the grid, negative values are power injected into it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerFlow(f64);

impl PowerFlow {
    /// Wrap a consumption-positive watt reading.
    pub fn from_consumption(watts: f64) -> Self {
        Self(watts)
    }

    /// Watts, positive when consuming from the grid.
    pub fn consumption(&self) -> f64 {
        self.0
    }

    /// Watts, positive when producing into the grid.
    pub fn production(&self) -> f64 {
        -self.0
    }
}

impl fmt::Display for PowerFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 0.0 {
            write!(f, "Production({:.2})", -self.0)
        } else {
            write!(f, "Consumption({:.2})", self.0)
        }
    }
}

/// A power reading with the instant it was taken. `at == None` means no
/// valid reading has been observed (never polled, or the meter is failing).
#[derive(Debug, Clone, Copy, Default)]
pub struct Measurement {
    pub value: PowerFlow,
    pub at: Option<Instant>,
}

/// Latest meter value shared between the meter task (single writer) and
/// the controller (single reader).
#[derive(Clone, Default)]
pub struct SharedMeasurement {
    inner: Arc<Mutex<Measurement>>,
}

impl SharedMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: PowerFlow) {
        *self.inner.lock() = Measurement {
            value,
            at: Some(Instant::now()),
        };
    }

    pub fn set_invalid(&self) {
        *self.inner.lock() = Measurement::default();
    }

    pub fn get(&self) -> Measurement {
        *self.inner.lock()
    }
}

/// Read side of the energy meter, consumed by the controller.
pub trait EnergyMeter: Send + Sync {
    /// Snapshot of the last known measurement.
    fn last_measurement(&self) -> Measurement;
}

impl EnergyMeter for SharedMeasurement {
    fn last_measurement(&self) -> Measurement {
        self.get()
    }
}

/// Observational inverter statistics read alongside the regulation loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EssStats {
    /// Battery current in ampere, negative while discharging
    pub ibat: f64,
    /// Battery voltage in volt
    pub ubat: f64,
    /// Filtered inverter power in watt (RAM InverterPower1)
    pub inverter_power: i16,
}

/// Inverter-side operations the controller needs.
#[async_trait]
pub trait EssControl: Send + Sync {
    /// Write the ESS setpoint in watt. Positive = discharge to AC,
    /// negative = charge from AC.
    async fn setpoint_set(&self, cancel: &CancellationToken, value: i16) -> Result<()>;

    /// Read battery and inverter statistics.
    async fn stats(&self, cancel: &CancellationToken) -> Result<EssStats>;
}

/// Regulation parameters, all in watt.
#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    /// Maximum power to charge the battery with (bound for negative
    /// setpoints).
    pub max_charge: f64,
    /// Maximum power to generate (bound for positive setpoints).
    pub max_inverter: f64,
    /// Raised generation bound granted for a while after a deep charging
    /// phase.
    pub max_inverter_peak: f64,
    /// Constant offset applied to the metered power flow.
    pub power_offset: f64,
    /// The calculated setpoint is rounded to a multiple of this to lower
    /// the amount of ESS communication.
    pub setpoint_rounding: f64,
    /// Power window around zero in which the setpoint is forced to 0, also
    /// to lower the amount of ESS communication.
    pub zero_point_window: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_flow_directions() {
        let import = PowerFlow::from_consumption(500.0);
        assert_eq!(import.consumption(), 500.0);
        assert_eq!(import.production(), -500.0);
        assert_eq!(import.to_string(), "Consumption(500.00)");

        let export = PowerFlow::from_consumption(-123.456);
        assert_eq!(export.production(), 123.456);
        assert_eq!(export.to_string(), "Production(123.46)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_measurement_snapshot() {
        let shared = SharedMeasurement::new();
        assert!(shared.get().at.is_none());

        shared.set(PowerFlow::from_consumption(42.0));
        let m = shared.get();
        assert_eq!(m.value.consumption(), 42.0);
        assert!(m.at.is_some());

        shared.set_invalid();
        assert!(shared.get().at.is_none());
        assert_eq!(shared.get().value.consumption(), 0.0);
    }
}
