//! Calibration and last-position persistence.
//!
//! One fixed 256-byte record in its own flash sector, little-endian
//! throughout, guarded by magic, version, servo count, and an arithmetic-sum
//! checksum that covers every byte except the checksum field itself. A save
//! is erase → program → read back → verify; a record that fails any check on
//! load is rejected whole and the caller falls back to defaults.

use crate::config::SERVO_COUNT;
use crate::hw::{FlashDevice, FlashIoError};
use crate::servo::Calibration;

/// "SVRP" little-endian.
const MAGIC: u32 = 0x5356_5250;
const VERSION: u8 = 0x01;

/// Total record size. Fits any sector ≥ 4096 B with plenty of reserve.
pub const RECORD_SIZE: usize = 256;

const OFFSET_MAGIC: usize = 0;
const OFFSET_VERSION: usize = 4;
const OFFSET_SERVO_COUNT: usize = 5;
const OFFSET_CHECKSUM: usize = 6;
const OFFSET_CALIBRATIONS: usize = 8;
/// Each entry: u16 min, u16 max, i16 offset, u8 reversed, u8 pad.
const CALIBRATION_STRIDE: usize = 8;
const OFFSET_POSITIONS: usize = OFFSET_CALIBRATIONS + SERVO_COUNT * CALIBRATION_STRIDE; // 152
const OFFSET_POSITIONS_VALID: usize = OFFSET_POSITIONS + SERVO_COUNT * 4; // 224

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Io(FlashIoError),
    BadMagic,
    VersionMismatch,
    BadServoCount,
    ChecksumMismatch,
    /// The programmed record read back wrong.
    VerifyFailed,
}

impl From<FlashIoError> for StoreError {
    fn from(err: FlashIoError) -> Self {
        Self::Io(err)
    }
}

/// The persisted state: per-axis calibration plus the last saved pose.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct StoreRecord {
    pub calibrations: [Calibration; SERVO_COUNT],
    pub saved_positions: [f32; SERVO_COUNT],
    pub positions_valid: bool,
}

impl Default for StoreRecord {
    /// Factory state: full pulse band, no trim, centered pose, positions not
    /// yet valid.
    fn default() -> Self {
        Self {
            calibrations: [Calibration::default(); SERVO_COUNT],
            saved_positions: [90.; SERVO_COUNT],
            positions_valid: false,
        }
    }
}

impl StoreRecord {
    /// Serializes into the on-flash layout, checksum included.
    pub fn encode(&self, buf: &mut [u8; RECORD_SIZE]) {
        buf.fill(0);
        buf[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[OFFSET_VERSION] = VERSION;
        buf[OFFSET_SERVO_COUNT] = SERVO_COUNT as u8;

        for (i, cal) in self.calibrations.iter().enumerate() {
            let at = OFFSET_CALIBRATIONS + i * CALIBRATION_STRIDE;
            buf[at..at + 2].copy_from_slice(&cal.pulse_min_us.to_le_bytes());
            buf[at + 2..at + 4].copy_from_slice(&cal.pulse_max_us.to_le_bytes());
            buf[at + 4..at + 6].copy_from_slice(&cal.offset_us.to_le_bytes());
            buf[at + 6] = cal.reversed as u8;
            // byte 7 stays zero (pad)
        }

        for (i, pos) in self.saved_positions.iter().enumerate() {
            let at = OFFSET_POSITIONS + i * 4;
            buf[at..at + 4].copy_from_slice(&pos.to_le_bytes());
        }

        buf[OFFSET_POSITIONS_VALID] = self.positions_valid as u8;

        let checksum = checksum_of(buf);
        buf[OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Deserializes and validates a record image.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Result<Self, StoreError> {
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(StoreError::BadMagic);
        }
        if buf[OFFSET_VERSION] != VERSION {
            return Err(StoreError::VersionMismatch);
        }
        if buf[OFFSET_SERVO_COUNT] != SERVO_COUNT as u8 {
            return Err(StoreError::BadServoCount);
        }

        let stored = u16::from_le_bytes([buf[OFFSET_CHECKSUM], buf[OFFSET_CHECKSUM + 1]]);
        if stored != checksum_of(buf) {
            return Err(StoreError::ChecksumMismatch);
        }

        let mut record = Self::default();
        for (i, cal) in record.calibrations.iter_mut().enumerate() {
            let at = OFFSET_CALIBRATIONS + i * CALIBRATION_STRIDE;
            cal.pulse_min_us = u16::from_le_bytes([buf[at], buf[at + 1]]);
            cal.pulse_max_us = u16::from_le_bytes([buf[at + 2], buf[at + 3]]);
            cal.offset_us = i16::from_le_bytes([buf[at + 4], buf[at + 5]]);
            cal.reversed = buf[at + 6] != 0;
        }
        for (i, pos) in record.saved_positions.iter_mut().enumerate() {
            let at = OFFSET_POSITIONS + i * 4;
            *pos = f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        }
        record.positions_valid = buf[OFFSET_POSITIONS_VALID] != 0;
        Ok(record)
    }
}

/// Wrapping byte sum over the record, skipping the checksum field.
fn checksum_of(buf: &[u8; RECORD_SIZE]) -> u16 {
    let mut sum = 0u16;
    for (i, &byte) in buf.iter().enumerate() {
        if (OFFSET_CHECKSUM..OFFSET_CHECKSUM + 2).contains(&i) {
            continue;
        }
        sum = sum.wrapping_add(byte as u16);
    }
    sum
}

/// The store: record (de)serialization glued to one flash slot.
pub struct Store<F: FlashDevice> {
    flash: F,
}

impl<F: FlashDevice> Store<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Persists a record and verifies it landed intact.
    pub fn save(&mut self, record: &StoreRecord) -> Result<(), StoreError> {
        let mut buf = [0u8; RECORD_SIZE];
        record.encode(&mut buf);
        self.flash.erase_and_program(&buf)?;

        let mut readback = [0u8; RECORD_SIZE];
        self.flash.read(&mut readback)?;
        if readback != buf {
            crate::fmt::error!("flash verify failed after program");
            return Err(StoreError::VerifyFailed);
        }
        // Paranoia on top of the byte compare: the image must also parse.
        StoreRecord::decode(&readback).map_err(|_| StoreError::VerifyFailed)?;
        crate::fmt::info!("flash record saved");
        Ok(())
    }

    /// Loads and validates the record.
    pub fn load(&mut self) -> Result<StoreRecord, StoreError> {
        let mut buf = [0u8; RECORD_SIZE];
        self.flash.read(&mut buf)?;
        StoreRecord::decode(&buf)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory flash sector. Starts erased (0xFF), like the real thing.
    pub struct MockFlash {
        pub sector: [u8; RECORD_SIZE],
        pub fail_program: bool,
        pub programs: usize,
    }

    impl MockFlash {
        pub fn new() -> Self {
            Self {
                sector: [0xFF; RECORD_SIZE],
                fail_program: false,
                programs: 0,
            }
        }
    }

    impl FlashDevice for MockFlash {
        fn read(&mut self, buf: &mut [u8]) -> Result<(), FlashIoError> {
            buf.copy_from_slice(&self.sector[..buf.len()]);
            Ok(())
        }

        fn erase_and_program(&mut self, data: &[u8]) -> Result<(), FlashIoError> {
            if self.fail_program {
                return Err(FlashIoError::Program);
            }
            self.sector.fill(0xFF);
            self.sector[..data.len()].copy_from_slice(data);
            self.programs += 1;
            Ok(())
        }
    }
}
