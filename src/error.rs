//! Error codes, system state, and the counters behind `GetStats`. Codes are
//! grouped by nibble range so a host can classify a fault without a lookup
//! table; 0xF0 and up is the severe class that latches the System AO into its
//! Error state.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// System-wide error codes, as reported in `Error` events and over the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    None = 0x00,

    // Communication errors (0x10-0x1F)
    CommTimeout = 0x10,
    CommCrc = 0x11,
    CommFraming = 0x12,
    CommOverflow = 0x13,

    // Command errors (0x20-0x2F)
    CmdInvalid = 0x20,
    CmdParam = 0x21,
    CmdLength = 0x22,
    CmdId = 0x23,

    // Servo errors (0x30-0x3F)
    ServoLimit = 0x30,
    ServoAngle = 0x31,
    ServoDisabled = 0x32,
    ServoBusy = 0x33,

    // Flash errors (0x40-0x4F)
    FlashRead = 0x40,
    FlashWrite = 0x41,
    FlashErase = 0x42,
    FlashVersion = 0x43,

    // System errors (0xF0-0xFF)
    SystemInit = 0xF0,
    SystemTask = 0xF1,
    SystemMemory = 0xF2,
    EmergencyStop = 0xFF,
}

impl ErrorCode {
    /// Severe codes drive the System AO out of its Normal state.
    pub fn is_severe(self) -> bool {
        u8::from(self) >= 0xF0
    }

    pub fn is_comm(self) -> bool {
        matches!(u8::from(self), 0x10..=0x1F)
    }
}

/// Coarse controller state, reported in the `Ping` response.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SystemState {
    Idle = 0,
    Running = 1,
    Moving = 2,
    Error = 3,
    EmergencyStop = 4,
}

/// Rolling error bookkeeping, owned by the System AO.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorStatus {
    pub last_error: Option<ErrorCode>,
    pub error_count: u32,
    pub comm_error_count: u32,
    pub crc_error_count: u32,
}

impl ErrorStatus {
    pub fn record(&mut self, code: ErrorCode) {
        self.last_error = Some(code);
        self.error_count = self.error_count.wrapping_add(1);
        if code.is_comm() {
            self.comm_error_count = self.comm_error_count.wrapping_add(1);
        }
        if code == ErrorCode::CommCrc {
            self.crc_error_count = self.crc_error_count.wrapping_add(1);
        }
    }

    pub fn clear(&mut self) {
        self.last_error = None;
    }
}
