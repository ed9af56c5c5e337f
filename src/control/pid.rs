//! Discrete PID controller
//!
//! Compact in-tree implementation with explicit `dt` and output clamping.
//! The integral accumulator is bounded by the output limits, so the
//! controller cannot wind up while saturated.

use std::time::Duration;

/// PID controller regulating its input toward a setpoint (0 by default).
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    integral: f64,
    prev_error: Option<f64>,
    output_min: f64,
    output_max: f64,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            integral: 0.0,
            prev_error: None,
            output_min: f64::NEG_INFINITY,
            output_max: f64::INFINITY,
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// Clamp the output to `[min, max]`. The integral accumulator is
    /// re-clamped immediately so a narrowed window takes effect on the
    /// next update.
    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        debug_assert!(min <= max);
        self.output_min = min;
        self.output_max = max;
        self.integral = self.integral.clamp(min, max);
    }

    pub fn output_limits(&self) -> (f64, f64) {
        (self.output_min, self.output_max)
    }

    /// Advance the controller by `dt` with the given input.
    pub fn update(&mut self, input: f64, dt: Duration) -> f64 {
        let dt_secs = dt.as_secs_f64();
        let error = self.setpoint - input;

        self.integral = (self.integral + self.ki * error * dt_secs)
            .clamp(self.output_min, self.output_max);

        let derivative = match self.prev_error {
            Some(prev) if dt_secs > 0.0 => self.kd * (error - prev) / dt_secs,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        (self.kp * error + self.integral + derivative).clamp(self.output_min, self.output_max)
    }

    /// Drop accumulated state, keeping gains and limits.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }
}
