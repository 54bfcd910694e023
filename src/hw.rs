//! Hardware contracts. The core never touches a peripheral register; the
//! firmware entry point supplies implementations of these traits (hardware
//! PWM slices, the flash sector holding the parameter record, and the USB-CDC
//! endpoint). Tests supply mocks.

/// An 18-channel, 50 Hz hardware PWM bank. Pulse widths are in microseconds.
///
/// Written only from the motion pipeline on the control core. A disabled
/// channel must drive its line idle-low (no pulses) until re-enabled.
pub trait PwmBank {
    fn set_pulse_us(&mut self, channel: usize, pulse_us: u16);
    fn set_enabled(&mut self, channel: usize, enabled: bool);
}

/// One fixed-size record slot in on-chip flash.
///
/// `erase_and_program` must erase the backing sector and program `data` at its
/// start, with interrupts disabled on the executing core for the duration
/// (≤ 10 ms). The store sequences read-back verification itself.
pub trait FlashDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), FlashIoError>;
    fn erase_and_program(&mut self, data: &[u8]) -> Result<(), FlashIoError>;
}

/// Raw flash access failures, mapped onto the error taxonomy by the store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashIoError {
    Read,
    Erase,
    Program,
}

/// Non-blocking byte pipe over USB-CDC, owned exclusively by the bridge loop
/// on the USB core. Both calls return the number of bytes actually moved and
/// must never block.
pub trait SerialPipe {
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn write(&mut self, data: &[u8]) -> usize;
}

/// Status LED. Indication patterns are decided by the System AO; only the
/// level set lives behind hardware.
pub trait StatusLed {
    fn set(&mut self, on: bool);
}
