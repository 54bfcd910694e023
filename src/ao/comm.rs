//! Communication active object.
//!
//! Single Active state. Its 10 ms time event drains the receive ring through
//! the frame parser, dispatches every completed frame, and queues response
//! frames back into the transmit ring. Broadcast frames (id 0x00) execute
//! silently. Parser recovery (CRC, timeout) happens inside the parser; this
//! AO only keeps the counters that feed `GetStats`.

use crate::bridge::HostPort;
use crate::command::{self, LinkStats, Response};
use crate::config::{PROTOCOL_ID_BROADCAST, PROTOCOL_MAX_FRAME_LEN};
use crate::hw::{FlashDevice, PwmBank, StatusLed};
use crate::protocol::{build_response, FrameParser};
use crate::runtime::{Event, Router};

use super::{MotionAo, SystemAo};

pub struct CommAo<'a> {
    port: HostPort<'a>,
    parser: FrameParser,
    cmd_errors: u32,
}

impl<'a> CommAo<'a> {
    pub fn new(port: HostPort<'a>) -> Self {
        Self {
            port,
            parser: FrameParser::new(),
            cmd_errors: 0,
        }
    }

    pub fn stats(&self) -> LinkStats {
        let parser = self.parser.stats();
        LinkStats {
            frames: parser.frame_count,
            crc_errors: parser.error_count,
            timeouts: parser.timeout_count,
            rx_overflow: self.port.rx_overflow(),
            cmd_errors: self.cmd_errors,
        }
    }

    pub fn handle<P: PwmBank, F: FlashDevice, L: StatusLed>(
        &mut self,
        event: Event,
        now_ms: u32,
        motion: &mut MotionAo<P>,
        system: &SystemAo<F, L>,
        router: &mut Router,
    ) {
        match event {
            // The 10 ms poll and an explicit rx kick do the same work.
            Event::Timeout | Event::UsbRxData => self.poll(now_ms, motion, system, router),
            _ => {}
        }
    }

    fn poll<P: PwmBank, F: FlashDevice, L: StatusLed>(
        &mut self,
        now_ms: u32,
        motion: &mut MotionAo<P>,
        system: &SystemAo<F, L>,
        router: &mut Router,
    ) {
        let mut chunk = [0u8; 64];
        loop {
            let n = self.port.recv(&mut chunk);
            if n == 0 {
                break;
            }
            for &byte in &chunk[..n] {
                let Some(frame) = self.parser.push(byte, now_ms) else {
                    continue;
                };

                let stats = self.stats();
                let result = command::dispatch(&frame, now_ms, motion, system, &stats, router);
                if result.resp != Response::Ok {
                    self.cmd_errors = self.cmd_errors.wrapping_add(1);
                }

                // Broadcast frames are consumed without an answer.
                if frame.id == PROTOCOL_ID_BROADCAST {
                    continue;
                }

                let mut wire = [0u8; PROTOCOL_MAX_FRAME_LEN];
                match build_response(
                    &mut wire,
                    frame.id,
                    frame.cmd,
                    result.resp.into(),
                    &result.data,
                ) {
                    Ok(len) => {
                        self.port.send(&wire[..len]);
                    }
                    Err(_) => {
                        crate::fmt::error!("response did not fit a frame");
                    }
                }
            }
        }

        self.parser.poll_timeout(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ao::system::test_support::MockLed;
    use crate::bridge::UsbLink;
    use crate::hw::SerialPipe;
    use crate::protocol::build_frame;
    use crate::runtime::AoId;
    use crate::servo::test_support::MockPwm;
    use crate::store::test_support::MockFlash;

    struct HostSide {
        to_device: Vec<u8>,
        from_device: Vec<u8>,
    }

    impl SerialPipe for HostSide {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.to_device.len());
            buf[..n].copy_from_slice(&self.to_device[..n]);
            self.to_device.drain(..n);
            n
        }

        fn write(&mut self, data: &[u8]) -> usize {
            self.from_device.extend_from_slice(data);
            data.len()
        }
    }

    fn wire_frame(id: u8, cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; 160];
        let n = build_frame(&mut buf, id, cmd, payload).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn frames_in_responses_out() {
        let link = UsbLink::new();
        let (host_port, mut bridge_end) = link.split().unwrap();
        let mut comm = CommAo::new(host_port);
        let mut motion = MotionAo::new(MockPwm::new());
        let system = SystemAo::new(MockFlash::new(), MockLed::new());
        let mut router = Router::new();
        let mut pipe = HostSide {
            to_device: wire_frame(0x01, 0xFE, &[]), // Ping
            from_device: Vec::new(),
        };

        bridge_end.service(&mut pipe);
        comm.handle(Event::Timeout, 10, &mut motion, &system, &mut router);
        bridge_end.service(&mut pipe);

        // Response frame: FF FE 01 FE len=5 [resp ver ver ver state] crc crc.
        let resp = &pipe.from_device;
        assert_eq!(&resp[..4], &[0xFF, 0xFE, 0x01, 0xFE]);
        assert_eq!(resp[4], 5);
        assert_eq!(resp[5], u8::from(Response::Ok));
        assert_eq!(comm.stats().frames, 1);
    }

    #[test]
    fn broadcast_is_silent() {
        let link = UsbLink::new();
        let (host_port, mut bridge_end) = link.split().unwrap();
        let mut comm = CommAo::new(host_port);
        let mut motion = MotionAo::new(MockPwm::new());
        let system = SystemAo::new(MockFlash::new(), MockLed::new());
        let mut router = Router::new();
        let mut pipe = HostSide {
            to_device: wire_frame(0x00, 0x01, &[0x01, 0x23, 0x28, 0x01, 0xF4]),
            from_device: Vec::new(),
        };

        bridge_end.service(&mut pipe);
        comm.handle(Event::Timeout, 10, &mut motion, &system, &mut router);
        bridge_end.service(&mut pipe);

        // The command executed (an event was posted) but nothing went back.
        assert!(pipe.from_device.is_empty());
        assert!(matches!(
            router.drain(),
            Some((AoId::Motion, Event::MotionStart(_)))
        ));
    }

    #[test]
    fn command_errors_are_counted() {
        let link = UsbLink::new();
        let (host_port, mut bridge_end) = link.split().unwrap();
        let mut comm = CommAo::new(host_port);
        let mut motion = MotionAo::new(MockPwm::new());
        let system = SystemAo::new(MockFlash::new(), MockLed::new());
        let mut router = Router::new();
        let mut pipe = HostSide {
            to_device: wire_frame(0x01, 0x77, &[]), // unknown command
            from_device: Vec::new(),
        };

        bridge_end.service(&mut pipe);
        comm.handle(Event::Timeout, 10, &mut motion, &system, &mut router);
        bridge_end.service(&mut pipe);

        assert_eq!(comm.stats().cmd_errors, 1);
        // Response carries INVALID_CMD.
        assert_eq!(pipe.from_device[5], u8::from(Response::InvalidCmd));
    }
}
