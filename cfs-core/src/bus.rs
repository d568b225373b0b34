//! Port bus: routes guest port operations to channels.
//!
//! The guest's only window on the outside world is single-byte reads and
//! writes on numbered ports. The bus multiplexes the console, the block
//! device's 24-bit cursor, an optional seekable input tape and a diagnostic
//! port through that interface, using small per-channel state machines.
//!
//! All violations (unknown ports, out-of-bounds device access, data access
//! in the middle of an address sequence) are reported to the diagnostic
//! sink and degraded: reads return 0, writes are dropped. Only the console
//! channel can end a session.

use crate::console::Console;
use crate::device::{AdvancePolicy, BlockDevice, ReadOutcome, WriteOutcome};
use crate::diag::DiagnosticSink;

/// End-of-session byte on the console port (CTRL+D).
pub const EOT: u8 = 0x04;

/// How the guest addresses the block device's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// One port; the 24-bit cursor is set by three consecutive writes,
    /// most-significant byte first. Reading it mid-sequence returns the
    /// phase count; reading it when idle returns a bounds indicator.
    Phased { port: u8 },
    /// Three independent ports exposing the low, middle and high cursor
    /// bytes directly, each readable and writable, with no phase state.
    ByteLanes { low: u8, mid: u8, high: u8 },
}

impl Addressing {
    /// The data-port advance policy this addressing mode pairs with.
    pub fn advance_policy(self) -> AdvancePolicy {
        match self {
            Addressing::Phased { .. } => AdvancePolicy::NoAdvance,
            Addressing::ByteLanes { .. } => AdvancePolicy::AutoAdvance,
        }
    }
}

/// Port assignment for one bus. Exact numbers are a deployment choice;
/// the channel behavior is fixed.
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    pub console_port: u8,
    pub data_port: u8,
    pub addressing: Addressing,
    /// Two-phase seek/tell channel over the input tape, if any.
    pub seek_port: Option<u8>,
    /// Write-only diagnostic port, if any.
    pub diag_port: Option<u8>,
}

impl BusConfig {
    /// Shell-style layout: console 0, no-advance data 1, phased address 2.
    pub fn shell() -> Self {
        Self {
            console_port: 0,
            data_port: 1,
            addressing: Addressing::Phased { port: 2 },
            seek_port: None,
            diag_port: None,
        }
    }

    /// Streaming layout: console 0, auto-advance data 1, byte lanes 2..4.
    pub fn streaming() -> Self {
        Self {
            console_port: 0,
            data_port: 1,
            addressing: Addressing::ByteLanes {
                low: 2,
                mid: 3,
                high: 4,
            },
            seek_port: None,
            diag_port: None,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::shell()
    }
}

/// Buffered input source with a 16-bit position, repositionable through the
/// two-phase seek/tell channel. When installed it replaces console input;
/// running past its end ends the session like exhausted console input.
struct Tape {
    data: Vec<u8>,
    pos: u16,
    /// High byte received, low byte pending (seek discipline).
    seek_high: Option<u8>,
    /// Low byte latched at the first tell access, pending return.
    tell_low: Option<u8>,
}

impl Tape {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            seek_high: None,
            tell_low: None,
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos as usize).copied()?;
        self.pos = self.pos.wrapping_add(1);
        Some(byte)
    }

    fn seek_write(&mut self, val: u8) {
        match self.seek_high.take() {
            None => self.seek_high = Some(val),
            Some(high) => self.pos = u16::from_be_bytes([high, val]),
        }
    }

    fn tell_read(&mut self) -> u8 {
        match self.tell_low.take() {
            None => {
                let [high, low] = self.pos.to_be_bytes();
                self.tell_low = Some(low);
                high
            }
            Some(low) => low,
        }
    }
}

/// The bus owns every channel's state; the CPU engine only ever sees the
/// `io_read`/`io_write` callback surface.
pub struct PortBus<C: Console, S: DiagnosticSink> {
    config: BusConfig,
    device: BlockDevice,
    console: C,
    sink: S,
    tape: Option<Tape>,
    /// Phased addressing: 0 = idle, 1 = got MSB, 2 = got middle byte.
    addr_phase: u8,
    ended: bool,
}

impl<C: Console, S: DiagnosticSink> PortBus<C, S> {
    pub fn new(config: BusConfig, device: BlockDevice, console: C, sink: S) -> Self {
        Self {
            config,
            device,
            console,
            sink,
            tape: None,
            addr_phase: 0,
            ended: false,
        }
    }

    /// Install a seekable input tape; console-port reads drain it from
    /// then on.
    pub fn install_tape(&mut self, data: Vec<u8>) {
        self.tape = Some(Tape::new(data));
    }

    /// Whether the console channel has signalled end of session.
    pub fn session_ended(&self) -> bool {
        self.ended
    }

    pub fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut BlockDevice {
        &mut self.device
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the bus, keeping the device (for harness teardown).
    pub fn into_device(self) -> BlockDevice {
        self.device
    }

    /// Guest port read.
    pub fn io_read(&mut self, port: u8) -> u8 {
        if port == self.config.console_port {
            return self.console_read();
        }
        if port == self.config.data_port {
            return self.data_read();
        }
        match self.config.addressing {
            Addressing::Phased { port: addr } if port == addr => return self.phased_read(),
            Addressing::ByteLanes { low, .. } if port == low => return self.device.tell() as u8,
            Addressing::ByteLanes { mid, .. } if port == mid => {
                return (self.device.tell() >> 8) as u8
            }
            Addressing::ByteLanes { high, .. } if port == high => {
                return (self.device.tell() >> 16) as u8
            }
            _ => {}
        }
        if self.config.seek_port == Some(port) {
            return self.tell_read();
        }
        self.sink
            .report(&format!("Out of bounds I/O read: {}", port));
        0
    }

    /// Guest port write.
    pub fn io_write(&mut self, port: u8, val: u8) {
        if port == self.config.console_port {
            self.console_write(val);
            return;
        }
        if port == self.config.data_port {
            self.data_write(val);
            return;
        }
        match self.config.addressing {
            Addressing::Phased { port: addr } if port == addr => {
                self.phased_write(val);
                return;
            }
            Addressing::ByteLanes { low, .. } if port == low => {
                self.device.seek((self.device.tell() & !0xff) | val as u32);
                return;
            }
            Addressing::ByteLanes { mid, .. } if port == mid => {
                self.device
                    .seek((self.device.tell() & !0xff00) | ((val as u32) << 8));
                return;
            }
            Addressing::ByteLanes { high, .. } if port == high => {
                self.device
                    .seek((self.device.tell() & 0x00ffff) | ((val as u32) << 16));
                return;
            }
            _ => {}
        }
        if self.config.seek_port == Some(port) {
            self.seek_write(val);
            return;
        }
        if self.config.diag_port == Some(port) {
            self.sink.forward(val);
            return;
        }
        self.sink
            .report(&format!("Out of bounds I/O write: {} / {}", port, val));
    }

    fn console_read(&mut self) -> u8 {
        let byte = match self.tape.as_mut() {
            Some(tape) => tape.next_byte(),
            None => self.console.read_byte(),
        };
        match byte {
            Some(b) => b,
            None => {
                self.ended = true;
                0
            }
        }
    }

    fn console_write(&mut self, val: u8) {
        if val == EOT {
            // Session-end signal, never emitted.
            self.ended = true;
        } else {
            self.console.write_byte(val);
        }
    }

    fn data_read(&mut self) -> u8 {
        if self.addr_phase != 0 {
            self.sink.report(&format!(
                "Reading the data port in the middle of an addr op ({})",
                self.device.tell()
            ));
            return 0;
        }
        match self.device.read() {
            ReadOutcome::Data(byte) => byte,
            ReadOutcome::Edge => 0,
            ReadOutcome::OutOfBounds => {
                self.sink.report(&format!(
                    "Out of bounds device read at {}",
                    self.device.tell()
                ));
                0
            }
        }
    }

    fn data_write(&mut self, val: u8) {
        if self.addr_phase != 0 {
            self.sink.report(&format!(
                "Writing to the data port in the middle of an addr op ({})",
                self.device.tell()
            ));
            return;
        }
        match self.device.write(val) {
            WriteOutcome::Stored | WriteOutcome::Grew => {}
            WriteOutcome::OutOfBounds => {
                self.sink.report(&format!(
                    "Out of bounds device write at {}",
                    self.device.tell()
                ));
            }
        }
    }

    fn phased_read(&mut self) -> u8 {
        if self.addr_phase != 0 {
            // Busy indicator: the phase count.
            self.addr_phase
        } else if self.device.tell() as usize >= self.device.size() {
            1
        } else {
            0
        }
    }

    fn phased_write(&mut self, val: u8) {
        match self.addr_phase {
            0 => {
                self.device.seek((val as u32) << 16);
                self.addr_phase = 1;
            }
            1 => {
                self.device.seek(self.device.tell() | ((val as u32) << 8));
                self.addr_phase = 2;
            }
            _ => {
                self.device.seek(self.device.tell() | val as u32);
                self.addr_phase = 0;
            }
        }
    }

    fn seek_write(&mut self, val: u8) {
        match self.tape.as_mut() {
            Some(tape) => tape.seek_write(val),
            None => self.sink.report("Seek port write with no tape installed"),
        }
    }

    fn tell_read(&mut self) -> u8 {
        match self.tape.as_mut() {
            Some(tape) => tape.tell_read(),
            None => {
                self.sink.report("Seek port read with no tape installed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::diag::BufferSink;

    fn shell_bus(contents: Vec<u8>) -> PortBus<HeadlessConsole, BufferSink> {
        let config = BusConfig::shell();
        let device = BlockDevice::with_contents(contents, 16, config.addressing.advance_policy());
        PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new())
    }

    fn streaming_bus(contents: Vec<u8>) -> PortBus<HeadlessConsole, BufferSink> {
        let config = BusConfig::streaming();
        let device = BlockDevice::with_contents(contents, 16, config.addressing.advance_policy());
        PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new())
    }

    #[test]
    fn test_console_output_and_eot() {
        let mut bus = shell_bus(vec![]);
        bus.io_write(0, b'H');
        bus.io_write(0, b'i');
        assert!(!bus.session_ended());
        bus.io_write(0, EOT);
        assert!(bus.session_ended());
        // EOT itself is never emitted.
        assert_eq!(bus.console().output(), b"Hi");
    }

    #[test]
    fn test_console_input_exhaustion_ends_session() {
        let config = BusConfig::shell();
        let device = BlockDevice::new(16, config.addressing.advance_policy());
        let console = HeadlessConsole::with_input(b"A");
        let mut bus = PortBus::new(config, device, console, BufferSink::new());

        assert_eq!(bus.io_read(0), b'A');
        assert!(!bus.session_ended());
        assert_eq!(bus.io_read(0), 0);
        assert!(bus.session_ended());
    }

    #[test]
    fn test_phased_address_sequence() {
        let mut bus = shell_bus(vec![]);
        bus.io_write(2, 0x01);
        bus.io_write(2, 0x02);
        bus.io_write(2, 0x03);
        assert_eq!(bus.device().tell(), 0x010203);
    }

    #[test]
    fn test_phased_busy_indicator() {
        let mut bus = shell_bus(vec![0xAA; 4]);
        bus.io_write(2, 0x00);
        assert_eq!(bus.io_read(2), 1);
        bus.io_write(2, 0x00);
        assert_eq!(bus.io_read(2), 2);
        bus.io_write(2, 0x02);
        // Sequence complete: the read is a bounds indicator again.
        assert_eq!(bus.io_read(2), 0); // cursor 2 < size 4
        bus.io_write(2, 0x00);
        bus.io_write(2, 0x00);
        bus.io_write(2, 0x04);
        assert_eq!(bus.io_read(2), 1); // cursor 4 == size 4
    }

    #[test]
    fn test_data_access_mid_sequence_is_reported() {
        let mut bus = shell_bus(vec![0xAA; 4]);
        bus.io_write(2, 0x00);
        assert_eq!(bus.io_read(1), 0);
        bus.io_write(1, 0x55);
        assert_eq!(bus.sink().reports().len(), 2);
        assert_eq!(bus.device().contents(), &[0xAA; 4]);
    }

    #[test]
    fn test_phased_data_port_does_not_advance() {
        let mut bus = shell_bus(vec![1, 2, 3]);
        assert_eq!(bus.io_read(1), 1);
        assert_eq!(bus.io_read(1), 1);
        assert_eq!(bus.device().tell(), 0);
    }

    #[test]
    fn test_byte_lanes_set_and_read_cursor() {
        let mut bus = streaming_bus(vec![]);
        bus.io_write(2, 0x34);
        bus.io_write(3, 0x12);
        bus.io_write(4, 0x01);
        assert_eq!(bus.device().tell(), 0x011234);
        assert_eq!(bus.io_read(2), 0x34);
        assert_eq!(bus.io_read(3), 0x12);
        assert_eq!(bus.io_read(4), 0x01);
    }

    #[test]
    fn test_byte_lane_data_port_streams() {
        let mut bus = streaming_bus(vec![10, 20, 30]);
        assert_eq!(bus.io_read(1), 10);
        assert_eq!(bus.io_read(1), 20);
        assert_eq!(bus.io_read(1), 30);
        // Edge probe: zero, not reported.
        assert_eq!(bus.io_read(1), 0);
        assert!(bus.sink().reports().is_empty());
    }

    #[test]
    fn test_sequential_writes_grow_then_overflow_is_reported() {
        let config = BusConfig::streaming();
        let device = BlockDevice::new(4, config.addressing.advance_policy());
        let mut bus = PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new());

        for i in 0..4u8 {
            bus.io_write(1, i);
        }
        assert_eq!(bus.device().size(), 4);
        assert!(bus.sink().reports().is_empty());

        bus.io_write(1, 99);
        assert_eq!(bus.sink().reports().len(), 1);
        assert_eq!(bus.device().contents(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_out_of_bounds_read_is_reported() {
        let mut bus = shell_bus(vec![1]);
        bus.io_write(2, 0x00);
        bus.io_write(2, 0x00);
        bus.io_write(2, 0x02); // cursor 2, size 1
        assert_eq!(bus.io_read(1), 0);
        assert_eq!(bus.sink().reports().len(), 1);
    }

    #[test]
    fn test_tape_seek_and_tell() {
        let mut config = BusConfig::shell();
        config.seek_port = Some(5);
        let device = BlockDevice::new(16, config.addressing.advance_policy());
        let mut bus = PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new());

        let tape: Vec<u8> = (0..0x2000).map(|i| (i & 0xff) as u8).collect();
        bus.install_tape(tape);

        // Seek to 0x1234: high byte first.
        bus.io_write(5, 0x12);
        bus.io_write(5, 0x34);
        // Tell reproduces the position high byte first.
        assert_eq!(bus.io_read(5), 0x12);
        assert_eq!(bus.io_read(5), 0x34);

        // Console reads drain the tape from the new position.
        assert_eq!(bus.io_read(0), 0x34);
        assert_eq!(bus.io_read(5), 0x12);
        assert_eq!(bus.io_read(5), 0x35);
    }

    #[test]
    fn test_tape_exhaustion_ends_session() {
        let config = BusConfig::shell();
        let device = BlockDevice::new(16, config.addressing.advance_policy());
        let mut bus = PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new());
        bus.install_tape(vec![b'x']);

        assert_eq!(bus.io_read(0), b'x');
        assert_eq!(bus.io_read(0), 0);
        assert!(bus.session_ended());
    }

    #[test]
    fn test_diag_port_forwards_verbatim() {
        let mut config = BusConfig::shell();
        config.diag_port = Some(7);
        let device = BlockDevice::new(16, config.addressing.advance_policy());
        let mut bus = PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new());

        bus.io_write(7, 0xAA);
        bus.io_write(7, EOT);
        assert_eq!(bus.sink().forwarded(), &[0xAA, EOT]);
        assert!(!bus.session_ended());
        assert!(bus.sink().reports().is_empty());
    }

    #[test]
    fn test_unknown_port_is_reported_non_fatally() {
        let mut bus = shell_bus(vec![]);
        assert_eq!(bus.io_read(9), 0);
        bus.io_write(9, 1);
        assert_eq!(bus.sink().reports().len(), 2);
        assert!(!bus.session_ended());
    }
}
