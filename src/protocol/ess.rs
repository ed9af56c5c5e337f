//! ESS assistant access
//!
//! The ESS assistant stores its records in the assistant RAM area. The
//! record header word carries the assistant ID in its high 12 bits and the
//! record size in the low 4; the ESS setpoint lives in the slot after the
//! header. [`EssAdapter::locate`] scans for that header once at startup.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::control::types::{EssControl, EssStats};
use crate::error::{EssrvError, Result};
use crate::protocol::adapter::Mk2Adapter;
use crate::protocol::constants::{
    ASSISTANT_ID_ESS, ASSISTANT_RAM_FIRST, ASSISTANT_RAM_LAST, RAM_ID_IBAT,
    RAM_ID_INVERTER_POWER_1, RAM_ID_UBAT,
};

/// [`Mk2Adapter`] extended with the located ESS assistant RAM slot.
pub struct EssAdapter {
    adapter: Mk2Adapter,
    assistant_ram_id: u16,
}

impl EssAdapter {
    /// Scan the assistant RAM records for the ESS assistant.
    ///
    /// Probing stops at an all-zero header (end of the record table) or at
    /// the fixed upper bound of the assistant area.
    pub async fn locate(adapter: Mk2Adapter, cancel: &CancellationToken) -> Result<Self> {
        let mut slot = ASSISTANT_RAM_FIRST;
        while slot < ASSISTANT_RAM_LAST {
            debug!(slot, "probing assistant RAM record");
            let raw = adapter
                .read_ram_var(cancel, slot as u8, 0)
                .await
                .map_err(|e| {
                    EssrvError::protocol(format!(
                        "failed to enumerate ESS assistant RAM records: {e}"
                    ))
                })?;

            let (low, high) = (raw[0], raw[1]);
            if low == 0x00 && high == 0x00 {
                debug!("found end of assistant records in use");
                break;
            }

            let assistant_id = ((u16::from(high) << 8) | u16::from(low)) >> 4;
            debug!(slot, assistant_id, "assistant record header");
            if assistant_id == ASSISTANT_ID_ESS {
                info!(slot, "located ESS assistant record");
                return Ok(Self {
                    adapter,
                    assistant_ram_id: slot,
                });
            }

            // Not the ESS record: jump over it. The low nibble is the
            // record size; a zero size would stall the scan, so always
            // move at least one slot.
            slot += u16::from(low & 0x0F).max(1);
        }

        Err(EssrvError::EssNotFound)
    }

    /// RAM slot holding the ESS assistant record header.
    pub fn assistant_ram_id(&self) -> u16 {
        self.assistant_ram_id
    }
}

#[async_trait]
impl EssControl for EssAdapter {
    /// Write the ESS setpoint in watt. Positive discharges the battery to
    /// the AC side, negative charges it from AC.
    async fn setpoint_set(&self, cancel: &CancellationToken, value: i16) -> Result<()> {
        info!(value, record = self.assistant_ram_id, "write setpoint");
        self.adapter
            .write_ram_var_signed(cancel, self.assistant_ram_id + 1, value)
            .await
    }

    /// Read battery current/voltage and the filtered inverter power.
    async fn stats(&self, cancel: &CancellationToken) -> Result<EssStats> {
        let (ibat, ubat) = self
            .adapter
            .read_ram_var_i16(cancel, RAM_ID_IBAT, RAM_ID_UBAT)
            .await
            .map_err(|e| EssrvError::protocol(format!("failed to read IBat/UBat: {e}")))?;

        let (inverter_power, _) = self
            .adapter
            .read_ram_var_i16(cancel, RAM_ID_INVERTER_POWER_1, 0)
            .await
            .map_err(|e| EssrvError::protocol(format!("failed to read InverterPower1: {e}")))?;

        let stats = EssStats {
            ibat: f64::from(ibat) / 10.0,
            ubat: f64::from(ubat) / 100.0,
            inverter_power,
        };
        debug!(
            ibat = stats.ibat,
            ubat = stats.ubat,
            inverter_power = stats.inverter_power,
            "multiplus stats"
        );
        Ok(stats)
    }
}
