//! VE.Bus protocol constants
//!
//! Command letters, `W` sub-command codes, `W` reply codes and the RAM
//! variable IDs documented in "Interfacing with VE Bus products - MK2
//! Protocol". Values are fixed by the device firmware.

use std::fmt;

// ============================================================================
// Frame layout
// ============================================================================

/// Marker byte following the length field in every frame
pub const FRAME_MARKER: u8 = 0xFF;

/// Minimum buffered bytes before attempting initial synchronization
pub const SYNC_MIN_BYTES: usize = 9;

/// A version broadcast is an 8 byte frame (length field 7) carrying 'V'
pub const VERSION_FRAME_LEN: usize = 8;

/// Maximum payload accepted when building a frame. The length field counts
/// marker + command + data and must fit in one byte.
pub const MAX_FRAME_DATA: usize = 253;

// ============================================================================
// Command letters
// ============================================================================

/// 'A': select/query the active VE.Bus device address
pub const CMD_ADDRESS: u8 = b'A';
/// 'W': container for the W sub-command set (RAM/setting access)
pub const CMD_W: u8 = b'W';
/// 'R': reset the adapter, provokes version broadcasts
pub const CMD_RESET: u8 = b'R';
/// 'V': periodic version broadcast sent by the adapter
pub const CMD_VERSION: u8 = b'V';

// ============================================================================
// W sub-commands
// ============================================================================

pub const W_CMD_SEND_SOFTWARE_VERSION_PART0: u8 = 0x05;
pub const W_CMD_SEND_SOFTWARE_VERSION_PART1: u8 = 0x06;
pub const W_CMD_GET_SET_DEVICE_STATE: u8 = 0x0E;
pub const W_CMD_READ_RAM_VAR: u8 = 0x30;
pub const W_CMD_READ_SETTING: u8 = 0x31;
pub const W_CMD_WRITE_RAM_VAR: u8 = 0x32;
pub const W_CMD_WRITE_SETTING: u8 = 0x33;
pub const W_CMD_WRITE_DATA: u8 = 0x34;
pub const W_CMD_WRITE_VIA_ID: u8 = 0x37;

// ============================================================================
// W reply codes
// ============================================================================

/// Reply code carried in the first payload byte of a `W` response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WReply {
    CommandNotSupported,
    ReadRamOk,
    ReadSettingOk,
    RamWriteOk,
    SettingWriteOk,
    VariableNotSupported,
    SettingNotSupported,
    DeviceStateOk,
    AccessLevelRequired,
    /// Any code outside the documented set, preserved numerically
    Unknown(u8),
}

impl From<u8> for WReply {
    fn from(code: u8) -> Self {
        match code {
            0x80 => WReply::CommandNotSupported,
            0x85 => WReply::ReadRamOk,
            0x86 => WReply::ReadSettingOk,
            0x87 => WReply::RamWriteOk,
            0x88 => WReply::SettingWriteOk,
            0x90 => WReply::VariableNotSupported,
            0x91 => WReply::SettingNotSupported,
            0x94 => WReply::DeviceStateOk,
            0x9B => WReply::AccessLevelRequired,
            other => WReply::Unknown(other),
        }
    }
}

impl fmt::Display for WReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WReply::CommandNotSupported => write!(f, "Command not supported"),
            WReply::ReadRamOk => write!(f, "Read RAM OK"),
            WReply::ReadSettingOk => write!(f, "Read setting OK"),
            WReply::RamWriteOk => write!(f, "Write ramvar OK"),
            WReply::SettingWriteOk => write!(f, "Write setting OK"),
            WReply::VariableNotSupported => write!(f, "Variable not supported"),
            WReply::SettingNotSupported => write!(f, "Setting not supported"),
            WReply::DeviceStateOk => write!(f, "Device state OK"),
            WReply::AccessLevelRequired => write!(f, "Access level required"),
            WReply::Unknown(code) => write!(f, "undefined reply 0x{code:02x}"),
        }
    }
}

// ============================================================================
// RAM variable IDs
// ============================================================================

pub const RAM_ID_UMAINS_RMS: u8 = 0;
pub const RAM_ID_IMAINS_RMS: u8 = 1;
pub const RAM_ID_UINVERTER_RMS: u8 = 2;
pub const RAM_ID_IINVERTER_RMS: u8 = 3;
pub const RAM_ID_UBAT: u8 = 4;
pub const RAM_ID_IBAT: u8 = 5;
/// RMS value of the battery ripple voltage
pub const RAM_ID_UBAT_RMS: u8 = 6;
/// Time base 0.1s
pub const RAM_ID_INVERTER_PERIOD_TIME: u8 = 7;
/// Time base 0.1s
pub const RAM_ID_MAINS_PERIOD_TIME: u8 = 8;
pub const RAM_ID_SIGNED_AC_LOAD_CURRENT: u8 = 9;
pub const RAM_ID_VIRTUAL_SWITCH_POSITION: u8 = 10;
pub const RAM_ID_IGNORE_AC_INPUT_STATE: u8 = 11;
pub const RAM_ID_MULTI_FUNCTIONAL_RELAY_STATE: u8 = 12;
/// Battery monitor function
pub const RAM_ID_CHARGE_STATE: u8 = 13;
/// Filtered 16 bit signed integer. Positive AC->DC, negative DC->AC.
pub const RAM_ID_INVERTER_POWER_1: u8 = 14;
pub const RAM_ID_INVERTER_POWER_2: u8 = 15;
/// AC output, 16 bit signed integer
pub const RAM_ID_OUTPUT_POWER: u8 = 16;
pub const RAM_ID_INVERTER_POWER_1_UNFILTERED: u8 = 17;
pub const RAM_ID_INVERTER_POWER_2_UNFILTERED: u8 = 18;
pub const RAM_ID_OUTPUT_POWER_UNFILTERED: u8 = 19;

// ============================================================================
// Assistant records
// ============================================================================

/// Assistant RAM records start at this slot
pub const ASSISTANT_RAM_FIRST: u16 = 128;
/// Upper bound for the assistant record scan (exclusive)
pub const ASSISTANT_RAM_LAST: u16 = 200;
/// Assistant ID of the ESS assistant, stored in the high 12 bits of a
/// record header word
pub const ASSISTANT_ID_ESS: u16 = 5;
