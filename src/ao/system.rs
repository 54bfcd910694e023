//! System active object: persistence requests, error bookkeeping, the status
//! LED, and the emergency-stop latch.
//!
//! Three states. Normal services flash commands and blinks slowly; Error (a
//! severe error code arrived) blinks fast until `InitComplete` clears it;
//! EStop kills the LED cadence to its fastest pattern and refuses to leave
//! until the recovery command (enable-all) arrives.

use crate::config::{
    LED_BLINK_ERROR_MS, LED_BLINK_ESTOP_MS, LED_BLINK_MOVING_MS, LED_BLINK_NORMAL_MS, SERVO_COUNT,
    SERVO_ID_ALL,
};
use crate::error::{ErrorCode, ErrorStatus};
use crate::hw::{FlashDevice, StatusLed};
use crate::runtime::{AoId, Event, Router};
use crate::servo::Calibration;
use crate::store::{Store, StoreRecord};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SystemAoState {
    #[default]
    Normal = 0,
    Error = 1,
    EStop = 2,
}

/// Servo-side data the System AO needs when servicing a save: provided by the
/// wiring at delivery time, so the AOs stay free of cross-references.
#[derive(Clone, Copy, Debug)]
pub struct ServoSnapshot {
    pub angles: [f32; SERVO_COUNT],
    pub calibrations: [Calibration; SERVO_COUNT],
    pub moving: bool,
}

impl Default for ServoSnapshot {
    fn default() -> Self {
        Self {
            angles: [90.; SERVO_COUNT],
            calibrations: [Calibration::default(); SERVO_COUNT],
            moving: false,
        }
    }
}

pub struct SystemAo<F: FlashDevice, L: StatusLed> {
    state: SystemAoState,
    store: Store<F>,
    led: L,
    led_on: bool,
    led_last_toggle_ms: u32,
    pub errors: ErrorStatus,
    /// Cached copy of the persisted record.
    record: StoreRecord,
}

impl<F: FlashDevice, L: StatusLed> SystemAo<F, L> {
    pub fn new(flash: F, led: L) -> Self {
        Self {
            state: SystemAoState::Normal,
            store: Store::new(flash),
            led,
            led_on: false,
            led_last_toggle_ms: 0,
            errors: ErrorStatus::default(),
            record: StoreRecord::default(),
        }
    }

    /// Boot-time parameter load: a valid record is applied (via the Motion
    /// AO); a missing or corrupt one is replaced with factory defaults.
    pub fn init(&mut self, router: &mut Router) {
        match self.store.load() {
            Ok(record) => {
                self.record = record;
                router.post(AoId::Motion, Event::FlashLoaded(record));
                crate::fmt::info!("boot: flash record loaded");
            }
            Err(_) => {
                crate::fmt::warn!("boot: no valid flash record, writing defaults");
                self.record = StoreRecord::default();
                if self.store.save(&self.record).is_err() {
                    self.errors.record(ErrorCode::FlashWrite);
                }
                router.post(AoId::Motion, Event::FlashLoaded(self.record));
            }
        }
    }

    pub fn state(&self) -> SystemAoState {
        self.state
    }

    pub fn is_estopped(&self) -> bool {
        self.state == SystemAoState::EStop
    }

    pub fn record(&self) -> &StoreRecord {
        &self.record
    }

    pub fn handle(
        &mut self,
        event: Event,
        now_ms: u32,
        snapshot: &ServoSnapshot,
        router: &mut Router,
    ) {
        match event {
            Event::CmdFlashSave => self.on_save(snapshot),
            Event::CmdFlashLoad => self.on_load(router),
            Event::FactoryReset => self.on_factory_reset(router),
            Event::LedUpdate => self.on_led_update(now_ms, snapshot.moving),
            Event::Error { code, .. } => {
                self.errors.record(code);
                if code.is_severe() && self.state == SystemAoState::Normal {
                    crate::fmt::error!("severe error, entering Error state");
                    self.state = SystemAoState::Error;
                }
            }
            Event::EStop => {
                self.errors.record(ErrorCode::EmergencyStop);
                self.state = SystemAoState::EStop;
            }
            Event::CmdEnable {
                id: SERVO_ID_ALL,
                enable: true,
            } => {
                // The decided recovery path: enable-all releases the latch.
                if self.state == SystemAoState::EStop {
                    crate::fmt::info!("emergency stop cleared");
                    self.state = SystemAoState::Normal;
                    self.errors.clear();
                }
            }
            Event::InitComplete => {
                if self.state == SystemAoState::Error {
                    self.state = SystemAoState::Normal;
                    self.errors.clear();
                }
            }
            _ => {}
        }
    }

    fn on_save(&mut self, snapshot: &ServoSnapshot) {
        if self.state == SystemAoState::EStop {
            return;
        }
        self.record.calibrations = snapshot.calibrations;
        self.record.saved_positions = snapshot.angles;
        self.record.positions_valid = true;

        if self.store.save(&self.record).is_err() {
            self.errors.record(ErrorCode::FlashWrite);
        }
    }

    fn on_load(&mut self, router: &mut Router) {
        match self.store.load() {
            Ok(record) => {
                self.record = record;
                router.post(AoId::Motion, Event::FlashLoaded(record));
            }
            Err(_) => {
                self.errors.record(ErrorCode::FlashRead);
            }
        }
    }

    fn on_factory_reset(&mut self, router: &mut Router) {
        self.record = StoreRecord::default();
        if self.store.save(&self.record).is_err() {
            self.errors.record(ErrorCode::FlashWrite);
        }
        router.post(AoId::Motion, Event::FlashLoaded(self.record));
        crate::fmt::info!("factory reset applied");
    }

    fn on_led_update(&mut self, now_ms: u32, moving: bool) {
        let half_period = match self.state {
            SystemAoState::EStop => LED_BLINK_ESTOP_MS,
            SystemAoState::Error => LED_BLINK_ERROR_MS,
            SystemAoState::Normal if moving => LED_BLINK_MOVING_MS,
            SystemAoState::Normal => LED_BLINK_NORMAL_MS,
        };
        if now_ms.wrapping_sub(self.led_last_toggle_ms) >= half_period / 2 {
            self.led_on = !self.led_on;
            self.led.set(self.led_on);
            self.led_last_toggle_ms = now_ms;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Counts LED writes.
    pub struct MockLed {
        pub toggles: usize,
    }

    impl MockLed {
        pub fn new() -> Self {
            Self { toggles: 0 }
        }
    }

    impl StatusLed for MockLed {
        fn set(&mut self, _on: bool) {
            self.toggles += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockLed;
    use super::*;
    use crate::store::test_support::MockFlash;

    fn ao() -> SystemAo<MockFlash, MockLed> {
        SystemAo::new(MockFlash::new(), MockLed::new())
    }

    fn snapshot() -> ServoSnapshot {
        ServoSnapshot::default()
    }

    #[test]
    fn first_boot_writes_defaults() {
        let mut system = ao();
        let mut router = Router::new();
        system.init(&mut router);

        // Defaults persisted and pushed toward the servo bank.
        assert_eq!(system.store.load().unwrap(), StoreRecord::default());
        assert!(matches!(
            router.drain(),
            Some((AoId::Motion, Event::FlashLoaded(_)))
        ));
    }

    #[test]
    fn save_then_load_round_trips_through_events() {
        let mut system = ao();
        let mut router = Router::new();

        let mut snap = snapshot();
        snap.angles[0] = 123.25;
        snap.calibrations[0].offset_us = -33;
        system.handle(Event::CmdFlashSave, 0, &snap, &mut router);

        system.handle(Event::CmdFlashLoad, 0, &snapshot(), &mut router);
        match router.drain() {
            Some((AoId::Motion, Event::FlashLoaded(record))) => {
                assert_eq!(record.saved_positions[0], 123.25);
                assert_eq!(record.calibrations[0].offset_us, -33);
                assert!(record.positions_valid);
            }
            other => panic!("expected FlashLoaded, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn severe_errors_latch_error_state() {
        let mut system = ao();
        let mut router = Router::new();

        system.handle(
            Event::Error {
                code: ErrorCode::CommCrc,
                source: AoId::Comm,
            },
            0,
            &snapshot(),
            &mut router,
        );
        assert_eq!(system.state(), SystemAoState::Normal);

        system.handle(
            Event::Error {
                code: ErrorCode::SystemInit,
                source: AoId::System,
            },
            0,
            &snapshot(),
            &mut router,
        );
        assert_eq!(system.state(), SystemAoState::Error);

        system.handle(Event::InitComplete, 0, &snapshot(), &mut router);
        assert_eq!(system.state(), SystemAoState::Normal);
    }

    #[test]
    fn estop_latches_until_enable_all() {
        let mut system = ao();
        let mut router = Router::new();

        system.handle(Event::EStop, 0, &snapshot(), &mut router);
        assert!(system.is_estopped());

        // A single-axis enable does not clear it.
        system.handle(
            Event::CmdEnable { id: 3, enable: true },
            0,
            &snapshot(),
            &mut router,
        );
        assert!(system.is_estopped());

        // Saves are refused while latched.
        system.handle(Event::CmdFlashSave, 0, &snapshot(), &mut router);
        assert!(!system.record().positions_valid);

        system.handle(
            Event::CmdEnable {
                id: SERVO_ID_ALL,
                enable: true,
            },
            0,
            &snapshot(),
            &mut router,
        );
        assert!(!system.is_estopped());
        assert_eq!(system.state(), SystemAoState::Normal);
    }

    #[test]
    fn factory_reset_restores_defaults() {
        let mut system = ao();
        let mut router = Router::new();

        let mut snap = snapshot();
        snap.angles[5] = 12.;
        system.handle(Event::CmdFlashSave, 0, &snap, &mut router);
        assert!(system.record().positions_valid);

        system.handle(Event::FactoryReset, 0, &snapshot(), &mut router);
        assert_eq!(*system.record(), StoreRecord::default());
        assert_eq!(system.store.load().unwrap(), StoreRecord::default());
    }

    #[test]
    fn led_cadence_follows_state() {
        let mut system = ao();
        let mut router = Router::new();

        // Normal: 1000 ms half-period / 2 = toggle every 500 ms.
        system.handle(Event::LedUpdate, 500, &snapshot(), &mut router);
        assert_eq!(system.led.toggles, 1);
        system.handle(Event::LedUpdate, 700, &snapshot(), &mut router);
        assert_eq!(system.led.toggles, 1);

        // EStop: 50 ms pattern toggles every 25 ms.
        system.handle(Event::EStop, 700, &snapshot(), &mut router);
        system.handle(Event::LedUpdate, 730, &snapshot(), &mut router);
        assert_eq!(system.led.toggles, 2);
    }
}
