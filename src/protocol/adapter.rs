//! Typed VE.Bus operations
//!
//! [`Mk2Adapter`] builds request frames, runs them through
//! [`Mk2Client::transact`] and interprets the reply codes. One method per
//! documented operation, plus signed/unsigned convenience wrappers for the
//! 16 bit RAM values.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EssrvError, Result};
use crate::protocol::client::Mk2Client;
use crate::protocol::codec::{encode_command, encode_signed16, encode_w, parse_signed16, Frame};
use crate::protocol::constants::{
    WReply, CMD_ADDRESS, W_CMD_GET_SET_DEVICE_STATE, W_CMD_READ_RAM_VAR, W_CMD_READ_SETTING,
    W_CMD_WRITE_DATA, W_CMD_WRITE_RAM_VAR, W_CMD_WRITE_SETTING, W_CMD_WRITE_VIA_ID,
};

/// State change requested through `GetSetDeviceState`. `Inquiry` reads the
/// current state without changing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStateRequest {
    Inquiry,
    ForceToEqualise,
    ForceToAbsorption,
    ForceToFloat,
}

impl DeviceStateRequest {
    fn code(self) -> u8 {
        match self {
            DeviceStateRequest::Inquiry => 0x00,
            DeviceStateRequest::ForceToEqualise => 0x01,
            DeviceStateRequest::ForceToAbsorption => 0x02,
            DeviceStateRequest::ForceToFloat => 0x03,
        }
    }
}

/// Main device state reported by `GetSetDeviceState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Down,
    Startup,
    Off,
    SlaveMode,
    InvertFull,
    InvertHalf,
    InvertAes,
    PowerAssist,
    Bypass,
    Charge,
    Unknown(u8),
}

impl From<u8> for DeviceState {
    fn from(code: u8) -> Self {
        match code {
            0x00 => DeviceState::Down,
            0x01 => DeviceState::Startup,
            0x02 => DeviceState::Off,
            0x03 => DeviceState::SlaveMode,
            0x04 => DeviceState::InvertFull,
            0x05 => DeviceState::InvertHalf,
            0x06 => DeviceState::InvertAes,
            0x07 => DeviceState::PowerAssist,
            0x08 => DeviceState::Bypass,
            0x09 => DeviceState::Charge,
            other => DeviceState::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Down => write!(f, "down"),
            DeviceState::Startup => write!(f, "startup"),
            DeviceState::Off => write!(f, "off"),
            DeviceState::SlaveMode => write!(f, "slave-mode"),
            DeviceState::InvertFull => write!(f, "invert-full"),
            DeviceState::InvertHalf => write!(f, "invert-half"),
            DeviceState::InvertAes => write!(f, "invert-aes"),
            DeviceState::PowerAssist => write!(f, "power-assist"),
            DeviceState::Bypass => write!(f, "bypass"),
            DeviceState::Charge => write!(f, "charge"),
            DeviceState::Unknown(code) => write!(f, "<invalid-state 0x{code:02x}>"),
        }
    }
}

/// Charger sub-state reported by `GetSetDeviceState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSubState {
    Init,
    Bulk,
    Absorption,
    Float,
    Storage,
    RepeatedAbsorption,
    ForcedAbsorption,
    Equalise,
    BulkStopped,
    Unknown(u8),
}

impl From<u8> for DeviceSubState {
    fn from(code: u8) -> Self {
        match code {
            0x00 => DeviceSubState::Init,
            0x01 => DeviceSubState::Bulk,
            0x02 => DeviceSubState::Absorption,
            0x03 => DeviceSubState::Float,
            0x04 => DeviceSubState::Storage,
            0x05 => DeviceSubState::RepeatedAbsorption,
            0x06 => DeviceSubState::ForcedAbsorption,
            0x07 => DeviceSubState::Equalise,
            0x08 => DeviceSubState::BulkStopped,
            other => DeviceSubState::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceSubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSubState::Init => write!(f, "init"),
            DeviceSubState::Bulk => write!(f, "bulk"),
            DeviceSubState::Absorption => write!(f, "absorption"),
            DeviceSubState::Float => write!(f, "float"),
            DeviceSubState::Storage => write!(f, "storage"),
            DeviceSubState::RepeatedAbsorption => write!(f, "repeated-absorption"),
            DeviceSubState::ForcedAbsorption => write!(f, "forced-absorption"),
            DeviceSubState::Equalise => write!(f, "equalise"),
            DeviceSubState::BulkStopped => write!(f, "bulk-stopped"),
            DeviceSubState::Unknown(code) => write!(f, "<invalid-sub-state 0x{code:02x}>"),
        }
    }
}

/// Accepts any `W` response frame, yielding its reply code and payload.
fn accept_w(frame: &Frame) -> Option<(WReply, Vec<u8>)> {
    frame
        .as_w_reply()
        .map(|reply| (reply.reply, reply.data.to_vec()))
}

/// Typed command interface over [`Mk2Client`].
pub struct Mk2Adapter {
    client: Arc<Mk2Client>,
}

impl Mk2Adapter {
    pub fn new(client: Arc<Mk2Client>) -> Self {
        Self { client }
    }

    /// Select the VE.Bus device at `address`. Must complete before any RAM
    /// or setting operation.
    pub async fn set_address(&self, cancel: &CancellationToken, address: u8) -> Result<()> {
        debug!("SetAddress 0x{address:02x}");
        // 0x01 means "set"
        let frame = self
            .client
            .transact(cancel, encode_command(CMD_ADDRESS, &[0x01, address]), |f| {
                (f.command() == CMD_ADDRESS).then(|| f.clone())
            })
            .await?;

        let data = frame.data();
        if data.len() < 2 {
            return Err(EssrvError::protocol("short response to SetAddress"));
        }
        if data[0] != 0x01 {
            return Err(EssrvError::protocol(format!(
                "return action 0x{:02x} is not 0x01",
                data[0]
            )));
        }
        if data[1] != address {
            return Err(EssrvError::protocol(format!(
                "return address 0x{:02x} is not the requested 0x{address:02x}",
                data[1]
            )));
        }
        debug!("SetAddress selected 0x{address:02x}");
        Ok(())
    }

    /// Read the currently selected VE.Bus address.
    pub async fn get_address(&self, cancel: &CancellationToken) -> Result<u8> {
        // 0x00 means "not set", second byte ignored
        let frame = self
            .client
            .transact(cancel, encode_command(CMD_ADDRESS, &[0x00, 0x00]), |f| {
                (f.command() == CMD_ADDRESS).then(|| f.clone())
            })
            .await?;

        let data = frame.data();
        if data.is_empty() {
            return Err(EssrvError::protocol("short response to GetAddress"));
        }
        Ok(data[0])
    }

    /// Read the device state, optionally forcing a state change.
    pub async fn get_set_device_state(
        &self,
        cancel: &CancellationToken,
        request: DeviceStateRequest,
    ) -> Result<(DeviceState, DeviceSubState)> {
        debug!("GetSetDeviceState request {request:?}");
        let (reply, data) = self
            .client
            .transact(
                cancel,
                encode_w(W_CMD_GET_SET_DEVICE_STATE, &[request.code(), 0x00]),
                accept_w,
            )
            .await?;

        if reply != WReply::DeviceStateOk {
            return Err(EssrvError::protocol(format!(
                "unexpected response to GetSetDeviceState: {reply}"
            )));
        }
        if data.len() < 2 {
            return Err(EssrvError::protocol(
                "invalid response length to GetSetDeviceState",
            ));
        }

        let state = DeviceState::from(data[0]);
        let sub_state = DeviceSubState::from(data[1]);
        debug!("GetSetDeviceState state={state} sub-state={sub_state}");
        Ok((state, sub_state))
    }

    /// Read one or two settings.
    pub async fn read_setting(
        &self,
        cancel: &CancellationToken,
        low_setting_id: u8,
        high_setting_id: u8,
    ) -> Result<(u8, u8)> {
        let (reply, data) = self
            .client
            .transact(
                cancel,
                encode_w(W_CMD_READ_SETTING, &[low_setting_id, high_setting_id]),
                accept_w,
            )
            .await?;

        match reply {
            WReply::ReadSettingOk => {}
            WReply::SettingNotSupported => return Err(EssrvError::SettingNotSupported),
            other => {
                return Err(EssrvError::protocol(format!("unknown response: {other}")));
            }
        }

        if data.len() != 2 {
            return Err(EssrvError::protocol("invalid response length to ReadSetting"));
        }
        Ok((data[0], data[1]))
    }

    /// Read two RAM variables as raw (low, high) byte pairs.
    ///
    /// Old firmware answers with 4 data bytes, ignoring the second ID;
    /// newer firmware sends 6, the extra pair holding RAM ID 0 (UMains).
    /// Only the first two pairs are returned.
    pub async fn read_ram_var(
        &self,
        cancel: &CancellationToken,
        ram_id0: u8,
        ram_id1: u8,
    ) -> Result<[u8; 4]> {
        let (reply, data) = self
            .client
            .transact(cancel, encode_w(W_CMD_READ_RAM_VAR, &[ram_id0, ram_id1]), accept_w)
            .await?;

        match reply {
            WReply::ReadRamOk => {}
            WReply::VariableNotSupported => return Err(EssrvError::VariableNotSupported),
            other => {
                return Err(EssrvError::protocol(format!("unknown response: {other}")));
            }
        }

        if data.len() != 4 && data.len() != 6 {
            return Err(EssrvError::protocol(
                "invalid response length to ReadRAMVar",
            ));
        }
        Ok([data[0], data[1], data[2], data[3]])
    }

    /// Read two RAM variables as unsigned 16 bit values.
    pub async fn read_ram_var_u16(
        &self,
        cancel: &CancellationToken,
        ram_id0: u8,
        ram_id1: u8,
    ) -> Result<(u16, u16)> {
        let raw = self.read_ram_var(cancel, ram_id0, ram_id1).await?;
        Ok((
            u16::from_le_bytes([raw[0], raw[1]]),
            u16::from_le_bytes([raw[2], raw[3]]),
        ))
    }

    /// Read two RAM variables as signed 16 bit values.
    pub async fn read_ram_var_i16(
        &self,
        cancel: &CancellationToken,
        ram_id0: u8,
        ram_id1: u8,
    ) -> Result<(i16, i16)> {
        let raw = self.read_ram_var(cancel, ram_id0, ram_id1).await?;
        Ok((
            parse_signed16(raw[0], raw[1]),
            parse_signed16(raw[2], raw[3]),
        ))
    }

    /// Write a 16 bit value to a RAM variable.
    ///
    /// Two frames on the wire: `WriteRAMVar` selecting the slot (no reply)
    /// immediately followed by `WriteData` carrying the value. The command
    /// mutex is held across both so no other request can slip in between.
    pub async fn write_ram_var(
        &self,
        cancel: &CancellationToken,
        ram: u16,
        low: u8,
        high: u8,
    ) -> Result<()> {
        let select = encode_w(W_CMD_WRITE_RAM_VAR, &[(ram & 0xFF) as u8, (ram >> 8) as u8]);
        let (reply, _) = self
            .client
            .transact_with_prefix(
                cancel,
                Some(select),
                encode_w(W_CMD_WRITE_DATA, &[low, high]),
                accept_w,
            )
            .await?;

        match reply {
            WReply::RamWriteOk => Ok(()),
            other => Err(EssrvError::protocol(format!("unknown response: {other}"))),
        }
    }

    /// Write a signed 16 bit value to a RAM variable.
    pub async fn write_ram_var_signed(
        &self,
        cancel: &CancellationToken,
        ram: u16,
        value: i16,
    ) -> Result<()> {
        let (low, high) = encode_signed16(value);
        self.write_ram_var(cancel, ram, low, high).await
    }

    /// Write a 16 bit value to a setting, same two-frame sequence as
    /// [`write_ram_var`](Self::write_ram_var).
    pub async fn write_setting(
        &self,
        cancel: &CancellationToken,
        setting: u16,
        low: u8,
        high: u8,
    ) -> Result<()> {
        let select = encode_w(
            W_CMD_WRITE_SETTING,
            &[(setting & 0xFF) as u8, (setting >> 8) as u8],
        );
        let (reply, _) = self
            .client
            .transact_with_prefix(
                cancel,
                Some(select),
                encode_w(W_CMD_WRITE_DATA, &[low, high]),
                accept_w,
            )
            .await?;

        match reply {
            WReply::SettingWriteOk => Ok(()),
            other => Err(EssrvError::protocol(format!("unknown response: {other}"))),
        }
    }

    /// Single-frame write addressing a RAM variable or setting by ID.
    /// Flag bit 0 selects setting (1) or RAM variable (0), bit 1 restricts
    /// a setting write to RAM only instead of RAM and EEPROM.
    pub async fn write_via_id(
        &self,
        cancel: &CancellationToken,
        flags: u8,
        id: u8,
        low: u8,
        high: u8,
    ) -> Result<()> {
        let (reply, _) = self
            .client
            .transact(
                cancel,
                encode_w(W_CMD_WRITE_VIA_ID, &[flags, id, low, high]),
                accept_w,
            )
            .await?;

        match reply {
            WReply::RamWriteOk | WReply::SettingWriteOk => Ok(()),
            other => Err(EssrvError::protocol(format!("unknown response: {other}"))),
        }
    }
}
