//! Command line configuration

use clap::Parser;

use crate::control::types::ControlSettings;

/// Command line arguments for the ESS control service
#[derive(Parser, Debug)]
#[command(
    name = "essrv",
    version,
    about = "ESS control service for Victron MultiPlus inverters",
    long_about = "Regulates the ESS setpoint of a Victron MultiPlus (via an MK2/MK3 \
                  serial adapter) so the net grid power measured by a Shelly energy \
                  meter is driven toward zero"
)]
pub struct Args {
    /// Host or host:port of the Shelly energy meter
    pub meter_host: String,

    /// Serial device of the MK2/MK3 adapter
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub serial_device: String,

    /// Stay at 2400 baud, skip the MK3 high-speed upgrade
    #[arg(long)]
    pub baud_low: bool,

    /// VE.Bus device address to select
    #[arg(long, default_value_t = 0)]
    pub ve_address: u8,

    /// Shelly meter generation (1 = 3EM /status, 2 = Pro 3EM RPC)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub meter_gen: u8,

    /// Maximum ESS setpoint for charging in watt (negative setpoint)
    #[arg(long, default_value_t = 250.0)]
    pub max_charge: f64,

    /// Maximum ESS setpoint for inverting in watt (positive setpoint)
    #[arg(long, default_value_t = 60.0)]
    pub max_inverter: f64,

    /// Raised inverter maximum granted for a while after a deep charging
    /// phase
    #[arg(long, default_value_t = 800.0)]
    pub max_inverter_peak: f64,

    /// Constant offset in watt applied to the power measurement
    #[arg(long, default_value_t = -10.0, allow_negative_numbers = true)]
    pub power_offset: f64,

    /// Round the calculated setpoint to a multiple of this many watt
    #[arg(long, default_value_t = 10.0)]
    pub setpoint_rounding: f64,

    /// Force setpoint 0 when the calculated value is within +/- this many
    /// watt
    #[arg(long, default_value_t = 20.0)]
    pub zero_point_window: f64,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Args {
    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            max_charge: self.max_charge,
            max_inverter: self.max_inverter,
            max_inverter_peak: self.max_inverter_peak,
            power_offset: self.power_offset,
            setpoint_rounding: self.setpoint_rounding,
            zero_point_window: self.zero_point_window,
        }
    }
}
