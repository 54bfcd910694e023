//! Event signals and payloads.
//!
//! `Signal` is the fixed system-wide signal enumeration (wire- and
//! diagnostic-visible, u8). `Event` is the runtime representation actually
//! posted between active objects: a value enum carrying each signal's
//! payload. Events are plain `Copy` values living in bounded per-AO queues —
//! posting to a full queue is refused and counted, never silently dropped or
//! overwritten, which is what keeps recycled-event bugs structurally
//! impossible.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::SERVO_COUNT;
use crate::error::ErrorCode;
use crate::motion::MotionParams;
use crate::store::StoreRecord;

/// Every signal in the system.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Signal {
    InitComplete = 0,
    Timeout,
    Tick1ms,
    UsbRxData,
    CmdMoveSingle,
    CmdMoveAll,
    CmdGetSingle,
    CmdGetAll,
    CmdEnable,
    CmdDisable,
    CmdFlashSave,
    CmdFlashLoad,
    CmdPing,
    MotionStart,
    MotionStop,
    MotionComplete,
    InterpTick,
    Error,
    EStop,
    LedUpdate,
    FlashComplete,
    // Extensions beyond the base set.
    CmdMoveTrapezoid,
    FlashLoaded,
    FactoryReset,
}

/// Identifies an active object, for routing and error attribution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AoId {
    Comm,
    Motion,
    System,
}

/// Payload of `MotionStart`: a synchronized multi-axis move.
#[derive(Clone, Copy, Debug)]
pub struct MotionStartEvt {
    pub axis_count: u8,
    pub axis_ids: [u8; SERVO_COUNT],
    pub target_positions: [f32; SERVO_COUNT],
    pub duration_ms: u32,
}

impl MotionStartEvt {
    /// A move covering all axes toward the given pose.
    pub fn all_axes(targets: [f32; SERVO_COUNT], duration_ms: u32) -> Self {
        let mut axis_ids = [0u8; SERVO_COUNT];
        for (i, id) in axis_ids.iter_mut().enumerate() {
            *id = i as u8;
        }
        Self {
            axis_count: SERVO_COUNT as u8,
            axis_ids,
            target_positions: targets,
            duration_ms,
        }
    }
}

/// A posted event: signal plus payload.
#[derive(Clone, Copy, Debug)]
pub enum Event {
    InitComplete,
    /// Generic time event; each AO knows what its own timeout drives.
    Timeout,
    Tick1ms,
    UsbRxData,
    CmdEnable { id: u8, enable: bool },
    CmdFlashSave,
    CmdFlashLoad,
    FactoryReset,
    CmdMoveTrapezoid {
        servo_id: u8,
        target_angle: f32,
        params: MotionParams,
    },
    MotionStart(MotionStartEvt),
    MotionStop,
    InterpTick,
    Error { code: ErrorCode, source: AoId },
    EStop,
    LedUpdate,
    /// A valid record came off flash; apply it to the servo bank.
    FlashLoaded(StoreRecord),
    /// Outcome of a flash save/load request.
    FlashComplete { ok: bool },
}

impl Event {
    pub fn signal(&self) -> Signal {
        match self {
            Event::InitComplete => Signal::InitComplete,
            Event::Timeout => Signal::Timeout,
            Event::Tick1ms => Signal::Tick1ms,
            Event::UsbRxData => Signal::UsbRxData,
            Event::CmdEnable { enable: true, .. } => Signal::CmdEnable,
            Event::CmdEnable { enable: false, .. } => Signal::CmdDisable,
            Event::CmdFlashSave => Signal::CmdFlashSave,
            Event::CmdFlashLoad => Signal::CmdFlashLoad,
            Event::FactoryReset => Signal::FactoryReset,
            Event::CmdMoveTrapezoid { .. } => Signal::CmdMoveTrapezoid,
            Event::MotionStart(_) => Signal::MotionStart,
            Event::MotionStop => Signal::MotionStop,
            Event::InterpTick => Signal::InterpTick,
            Event::Error { .. } => Signal::Error,
            Event::EStop => Signal::EStop,
            Event::LedUpdate => Signal::LedUpdate,
            Event::FlashLoaded(_) => Signal::FlashLoaded,
            Event::FlashComplete { .. } => Signal::FlashComplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_round_trip() {
        assert_eq!(Signal::try_from(0u8), Ok(Signal::InitComplete));
        let raw: u8 = Signal::EStop.into();
        assert_eq!(Signal::try_from(raw), Ok(Signal::EStop));
    }

    #[test]
    fn enable_and_disable_share_a_payload() {
        let enable = Event::CmdEnable { id: 3, enable: true };
        let disable = Event::CmdEnable { id: 3, enable: false };
        assert_eq!(enable.signal(), Signal::CmdEnable);
        assert_eq!(disable.signal(), Signal::CmdDisable);
    }

    #[test]
    fn all_axes_event_covers_every_axis() {
        let evt = MotionStartEvt::all_axes([45.; SERVO_COUNT], 1_000);
        assert_eq!(evt.axis_count as usize, SERVO_COUNT);
        assert_eq!(evt.axis_ids[17], 17);
        assert_eq!(evt.duration_ms, 1_000);
    }
}
