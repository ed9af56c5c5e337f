//! End-to-end regulation loop test
//!
//! Wires the meter poller and the controller together the way the service
//! does, with a scripted meter and a recording inverter, and walks through
//! a full session: regulation under grid import, meter outage, retry
//! exhaustion and the final setpoint reset.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use essrv::control::controller;
use essrv::control::types::{EssControl, EssStats, SharedMeasurement};
use essrv::error::{EssrvError, Result};
use essrv::meter::reader::MeterReader;
use essrv::meter::shelly::PowerMeter;

/// Reports a constant grid import, then fails every poll.
struct FlakyMeter {
    ok_polls: u32,
    watts: f64,
    polls: AtomicU32,
}

#[async_trait]
impl PowerMeter for FlakyMeter {
    async fn total_power(&self) -> Result<f64> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if poll < self.ok_polls {
            Ok(self.watts)
        } else {
            Err(EssrvError::meter("connection refused"))
        }
    }
}

#[derive(Default)]
struct RecordingEss {
    writes: Mutex<Vec<i16>>,
}

#[async_trait]
impl EssControl for RecordingEss {
    async fn setpoint_set(&self, _cancel: &CancellationToken, value: i16) -> Result<()> {
        self.writes.lock().push(value);
        Ok(())
    }

    async fn stats(&self, _cancel: &CancellationToken) -> Result<EssStats> {
        Ok(EssStats {
            ibat: -1.2,
            ubat: 51.9,
            inverter_power: 55,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_regulates_then_survives_meter_outage() {
    let cancel = CancellationToken::new();
    let shared = SharedMeasurement::new();
    let ess = Arc::new(RecordingEss::default());

    // 10 good polls (8 s of fresh data), then a permanent outage.
    let meter = FlakyMeter {
        ok_polls: 10,
        watts: 500.0,
        polls: AtomicU32::new(0),
    };

    let meter_task = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let reader = MeterReader::new(meter, shared);
            let result = reader.run(&cancel).await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        })
    };

    let settings = essrv::control::types::ControlSettings {
        max_charge: 250.0,
        max_inverter: 60.0,
        max_inverter_peak: 800.0,
        power_offset: 0.0,
        setpoint_rounding: 10.0,
        zero_point_window: 20.0,
    };

    let control_result = controller::run(settings, ess.as_ref(), &shared, &cancel).await;

    // Retry exhaustion cancelled the session; the controller exit itself
    // is clean, the meter task carries the fatal error.
    assert!(control_result.is_ok());
    let meter_result = meter_task.await.unwrap();
    assert!(matches!(meter_result, Err(EssrvError::Meter(_))));
    assert!(cancel.is_cancelled());

    let writes = ess.writes.lock().clone();
    assert!(!writes.is_empty());

    // Under 500 W import the controller saturates the 60 W discharge
    // bound.
    assert_eq!(writes[0], 60, "import must yield a positive setpoint");

    // Once the meter reading went invalid only zeros may follow.
    let first_zero = writes
        .iter()
        .position(|v| *v == 0)
        .expect("staleness must force a zero setpoint");
    assert!(
        writes[first_zero..].iter().all(|v| *v == 0),
        "no non-zero setpoint after the meter outage"
    );

    // The post-loop reset leaves the inverter at 0.
    assert_eq!(writes.last(), Some(&0));
}
