//! Meter polling task
//!
//! Polls the HTTP meter on a fixed interval, smooths the reading with a
//! short rolling mean and publishes it as the shared measurement. HTTP
//! failures invalidate the measurement and back off exponentially; when
//! the backoff runs into its ceiling the reader gives up and the session
//! ends.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::types::{PowerFlow, SharedMeasurement};
use crate::error::{EssrvError, Result};
use crate::meter::rolling::RollingMean;
use crate::meter::shelly::PowerMeter;

const READ_INTERVAL: Duration = Duration::from_millis(800);
const BACKOFF_BASE: Duration = READ_INTERVAL;
const BACKOFF_MAX: Duration = Duration::from_secs(40);
const MEAN_WINDOW: usize = 5;

/// Wait before retry number `retry` (1-based), or None once the ceiling is
/// reached and the reader should give up.
fn backoff(retry: u32) -> Option<Duration> {
    let wait = BACKOFF_BASE.saturating_mul(1u32.checked_shl(retry - 1).unwrap_or(u32::MAX));
    if wait >= BACKOFF_MAX {
        None
    } else {
        Some(wait)
    }
}

/// Polls `meter` and keeps [`SharedMeasurement`] current.
pub struct MeterReader<M> {
    meter: M,
    shared: SharedMeasurement,
}

impl<M: PowerMeter> MeterReader<M> {
    pub fn new(meter: M, shared: SharedMeasurement) -> Self {
        Self { meter, shared }
    }

    /// Poll until cancelled or out of retries.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut window = RollingMean::new(MEAN_WINDOW);
        let mut retry: u32 = 0;
        // First poll happens immediately.
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("meter reader exits");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.meter.total_power().await {
                Ok(watts) => {
                    retry = 0;
                    window.add(watts);
                    let mean = window.mean();
                    debug!(watts, mean, "meter reading");
                    self.shared.set(PowerFlow::from_consumption(mean));
                    wait = READ_INTERVAL;
                }
                Err(e) => {
                    retry += 1;
                    self.shared.set_invalid();
                    match backoff(retry) {
                        Some(delay) => {
                            warn!(retry, ?delay, "failed to read from meter, retrying: {e}");
                            wait = delay;
                        }
                        None => {
                            return Err(EssrvError::meter(format!("out of retries: {e}")));
                        }
                    }
                }
            }
        }
    }
}
