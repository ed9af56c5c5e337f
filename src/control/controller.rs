//! Regulation loop
//!
//! Drives the ESS setpoint from the grid meter reading so the net power at
//! the grid connection is regulated toward zero. The inverter disables ESS
//! if the setpoint is not refreshed for about 30 s, so an unchanged value
//! is re-written periodically as a keep-alive.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::control::pid::Pid;
use crate::control::types::{ControlSettings, EnergyMeter, EssControl, PowerFlow};
use crate::error::{EssrvError, Result};

const TICK: Duration = Duration::from_millis(25);
/// A meter value older than this is treated as absent.
const STALE_AFTER: Duration = Duration::from_secs(10);
/// Unchanged setpoints are re-written after this long; the inverter stops
/// ESS operation around 30 s without a write.
const KEEP_ALIVE: Duration = Duration::from_secs(20);
const STATS_INTERVAL: Duration = Duration::from_secs(10);
/// How long a deep charging phase keeps the raised inverter limit.
const PEAK_WINDOW: Duration = Duration::from_secs(15 * 60);
const SHUTDOWN_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const PID_KP: f64 = 0.15;
const PID_KI: f64 = 0.1;
const PID_KD: f64 = 0.15;

/// Run the regulation loop until `cancel` fires or an inverter operation
/// fails. Whatever the exit reason, a final setpoint of 0 is written under
/// a fresh 10 s deadline so the inverter returns to idle.
pub async fn run<E, M>(
    settings: ControlSettings,
    ess: &E,
    meter: &M,
    cancel: &CancellationToken,
) -> Result<()>
where
    E: EssControl,
    M: EnergyMeter,
{
    let mut pid = Pid::new(PID_KP, PID_KI, PID_KD);
    pid.set_output_limits(-settings.max_charge, settings.max_inverter);

    let mut pid_last_update: Option<Instant> = None;
    let mut last_stats_at: Option<Instant> = None;
    let mut last_written_at: Option<Instant> = None;
    let mut last_written_value = 0.0f64;
    let mut last_deep_charge_at: Option<Instant> = None;

    let result: Result<()> = 'control: loop {
        tokio::select! {
            _ = cancel.cancelled() => break 'control Ok(()),
            _ = tokio::time::sleep(TICK) => {}
        }

        let measurement = meter.last_measurement();
        let fresh = measurement
            .at
            .map(|at| at.elapsed() <= STALE_AFTER)
            .unwrap_or(false);
        if !fresh {
            info!("no energy meter information, forcing setpoint 0");
            match ess.setpoint_set(cancel, 0).await {
                Ok(()) => {}
                Err(EssrvError::Cancelled) => break 'control Ok(()),
                Err(e) => {
                    break 'control Err(EssrvError::protocol(format!(
                        "failed to write ESS setpoint: {e}"
                    )))
                }
            }
            // Start clean when measurements return, the integrator must
            // not carry wind-up from before the outage.
            pid.reset();
            pid_last_update = None;
            continue;
        }

        // The PID regulates production toward zero: grid import enters as
        // negative input and yields a positive (discharge) setpoint.
        let input = measurement.value.production() + settings.power_offset;

        let dt = pid_last_update.map(|at| at.elapsed()).unwrap_or(TICK);
        let mut output = pid.update(input, dt);
        pid_last_update = Some(Instant::now());

        // Round and apply the zero window, both suppress setpoint churn on
        // the wire for marginal changes.
        output = (output / settings.setpoint_rounding).round() * settings.setpoint_rounding;
        if output.abs() < settings.zero_point_window {
            output = 0.0;
        }

        let keep_alive_due = last_written_at
            .map(|at| at.elapsed() > KEEP_ALIVE)
            .unwrap_or(true);
        if output != last_written_value || keep_alive_due {
            match ess.setpoint_set(cancel, output as i16).await {
                Ok(()) => {}
                Err(EssrvError::Cancelled) => break 'control Ok(()),
                Err(e) => {
                    break 'control Err(EssrvError::protocol(format!(
                        "failed to write ESS setpoint: {e}"
                    )))
                }
            }
            last_written_value = output;
            last_written_at = Some(Instant::now());
            debug!(setpoint = output, "setpoint committed");
        }

        let stats_due = last_stats_at
            .map(|at| at.elapsed() > STATS_INTERVAL)
            .unwrap_or(true);
        if stats_due {
            match ess.stats(cancel).await {
                Ok(stats) => {
                    debug!(
                        ibat = stats.ibat,
                        ubat = stats.ubat,
                        inverter_power = stats.inverter_power,
                        "inverter stats"
                    );
                    last_stats_at = Some(Instant::now());
                }
                Err(EssrvError::Cancelled) => break 'control Ok(()),
                Err(e) => {
                    break 'control Err(EssrvError::protocol(format!(
                        "failed to read ESS stats: {e}"
                    )))
                }
            }
        }

        // Peak budget: a recent deep charging phase permits short
        // discharge bursts above the normal inverter limit.
        let requested = PowerFlow::from_consumption(output);
        if requested.production() >= settings.max_charge / 2.0 {
            last_deep_charge_at = Some(Instant::now());
            pid.set_output_limits(-settings.max_charge, settings.max_inverter_peak);
        } else if last_deep_charge_at
            .map(|at| at.elapsed() > PEAK_WINDOW)
            .unwrap_or(false)
        {
            pid.set_output_limits(-settings.max_charge, settings.max_inverter);
        }
    };

    info!("shutdown: reset ESS setpoint to 0");
    let shutdown_cancel = CancellationToken::new();
    match tokio::time::timeout(
        SHUTDOWN_WRITE_TIMEOUT,
        ess.setpoint_set(&shutdown_cancel, 0),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("failed to reset ESS setpoint to zero: {e}"),
        Err(_) => error!("timed out resetting ESS setpoint to zero"),
    }

    result
}
