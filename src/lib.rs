//! Ardea: the motion, protocol, and persistence core of an 18-channel
//! hobby-servo controller.
//!
//! A host sends framed binary commands over USB-CDC; one core owns the USB
//! endpoint and shuttles bytes through a pair of lock-free rings, the other
//! runs three cooperative active objects: Communication (parse + dispatch),
//! Motion (interpolators, look-ahead planner, timestamp scheduler, the servo
//! bank), and System (flash persistence, error state, the status LED).
//!
//! Hardware lives behind the contracts in [`hw`]: a PWM bank, a flash record
//! slot, and a serial byte pipe. The firmware entry point supplies real
//! implementations and the clock; tests supply mocks, which is why the whole
//! crate builds and tests on the host.
//!
//! ```text
//! USB ↔ Ring pair ↔ Comm AO → parser → dispatch → Motion AO → planner
//!                                            ↘ System AO → flash   ↓
//!                                  PWM ← servo bank ← interpolators
//! ```

#![cfg_attr(not(test), no_std)]

pub(crate) mod fmt;

pub mod ao;
pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod hw;
pub mod motion;
pub mod protocol;
pub mod ring;
pub mod runtime;
pub mod servo;
pub mod store;

pub use ao::App;
pub use bridge::UsbLink;
