//! Harness run loop - integrates the Z80 CPU with the port bus.
//!
//! The CPU engine is an external component; it only ever touches the
//! harness through four callbacks (memory read/write, port read/write)
//! plus its halt state. One memory or port operation completes fully
//! before the next instruction runs.

use std::num::NonZeroU16;

use z80emu::host::TsCounter;
use z80emu::{Clock, Cpu, Io, Memory, Z80NMOS};

use crate::bus::PortBus;
use crate::console::Console;
use crate::diag::DiagnosticSink;
use crate::{ExitInfo, ExitReason};

/// Type alias for the clock.
type TsClock = TsCounter<i32>;

/// Memory + I/O surface handed to the CPU for one step.
struct Bus<'a, C: Console, S: DiagnosticSink> {
    memory: &'a mut [u8; 65536],
    ports: &'a mut PortBus<C, S>,
    trace: bool,
}

impl<C: Console, S: DiagnosticSink> Memory for Bus<'_, C, S> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory[addr as usize]
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory[addr as usize]
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.memory[addr as usize] = value;
    }
}

impl<C: Console, S: DiagnosticSink> Io for Bus<'_, C, S> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        // Only the low byte selects the port.
        let value = self.ports.io_read(port as u8);
        if self.trace {
            eprintln!("[IO] IN {:#04X} -> {:#04X}", port as u8, value);
        }
        (value, None)
    }

    fn write_io(
        &mut self,
        port: u16,
        value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        if self.trace {
            eprintln!("[IO] OUT {:#04X} <- {:#04X}", port as u8, value);
        }
        self.ports.io_write(port as u8, value);
        (None, None)
    }
}

/// Emulator state: CPU, 64KB memory, and the port bus.
pub struct Emulator<C: Console, S: DiagnosticSink> {
    /// Z80 CPU.
    cpu: Z80NMOS,
    /// Clock/T-state counter.
    clock: TsClock,
    /// 64KB memory.
    memory: Box<[u8; 65536]>,
    /// Port bus.
    ports: PortBus<C, S>,
    /// Enable I/O tracing.
    pub trace: bool,
}

impl<C: Console, S: DiagnosticSink> Emulator<C, S> {
    /// Create a new emulator around the given bus. Memory starts zeroed.
    pub fn new(ports: PortBus<C, S>) -> Self {
        Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            memory: Box::new([0; 65536]),
            ports,
            trace: false,
        }
    }

    /// Load a kernel image at address 0.
    pub fn load_kernel(&mut self, data: &[u8]) {
        self.load_at(0, data);
    }

    /// Load binary data into memory at a specific address.
    pub fn load_at(&mut self, address: u16, data: &[u8]) {
        let start = address as usize;
        let end = (start + data.len()).min(self.memory.len());
        self.memory[start..end].copy_from_slice(&data[..end - start]);
    }

    /// Get bus reference.
    pub fn bus(&self) -> &PortBus<C, S> {
        &self.ports
    }

    /// Get mutable bus reference.
    pub fn bus_mut(&mut self) -> &mut PortBus<C, S> {
        &mut self.ports
    }

    /// Consume the emulator, keeping the bus (for harness teardown).
    pub fn into_bus(self) -> PortBus<C, S> {
        self.ports
    }

    /// Run from address 0 until the CPU halts or the console session ends.
    pub fn run(&mut self) -> ExitInfo {
        self.cpu.reset();

        loop {
            if self.ports.session_ended() {
                return self.exit_info(ExitReason::EndOfSession);
            }

            let mut bus = Bus {
                memory: &mut self.memory,
                ports: &mut self.ports,
                trace: self.trace,
            };
            let _ = self
                .cpu
                .execute_next(&mut bus, &mut self.clock, None::<fn(z80emu::CpuDebug)>);

            if self.cpu.is_halt() {
                return self.exit_info(ExitReason::Halt);
            }
        }
    }

    fn exit_info(&self, reason: ExitReason) -> ExitInfo {
        ExitInfo {
            reason,
            t_states: self.clock.as_timestamp() as u64,
            pc: self.cpu.get_pc(),
            acc: self.cpu.get_acc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::console::HeadlessConsole;
    use crate::device::BlockDevice;
    use crate::diag::BufferSink;

    fn emulator_with(contents: Vec<u8>) -> Emulator<HeadlessConsole, BufferSink> {
        let config = BusConfig::shell();
        let device =
            BlockDevice::with_contents(contents, 256, config.addressing.advance_policy());
        let bus = PortBus::new(config, device, HeadlessConsole::new(), BufferSink::new());
        Emulator::new(bus)
    }

    #[test]
    fn test_hello_to_console_then_halt() {
        let program = [
            0x3E, b'H', // LD A, 'H'
            0xD3, 0x00, // OUT (0), A
            0x3E, b'i', // LD A, 'i'
            0xD3, 0x00, // OUT (0), A
            0x76, // HALT
        ];

        let mut emu = emulator_with(vec![]);
        emu.load_kernel(&program);
        let info = emu.run();

        assert_eq!(info.reason, ExitReason::Halt);
        assert_eq!(emu.bus().console().output_string(), "Hi");
    }

    #[test]
    fn test_eot_ends_session_before_looping_forever() {
        let program = [
            0x3E, 0x04, // LD A, EOT
            0xD3, 0x00, // OUT (0), A
            0x18, 0xFE, // JR -2 (never escapes on its own)
        ];

        let mut emu = emulator_with(vec![]);
        emu.load_kernel(&program);
        let info = emu.run();

        assert_eq!(info.reason, ExitReason::EndOfSession);
        assert!(emu.bus().console().output().is_empty());
    }

    #[test]
    fn test_halt_exposes_accumulator() {
        let program = [
            0x3E, 0x07, // LD A, 7
            0x76, // HALT
        ];

        let mut emu = emulator_with(vec![]);
        emu.load_kernel(&program);
        let info = emu.run();

        assert_eq!(info.reason, ExitReason::Halt);
        assert_eq!(info.acc, 0x07);
    }

    #[test]
    fn test_device_read_through_phased_bus() {
        // Select address 0x000000 with three writes, read the data port,
        // echo the byte to the console.
        let program = [
            0x3E, 0x00, // LD A, 0
            0xD3, 0x02, // OUT (2), A
            0xD3, 0x02, // OUT (2), A
            0xD3, 0x02, // OUT (2), A
            0xDB, 0x01, // IN A, (1)
            0xD3, 0x00, // OUT (0), A
            0x76, // HALT
        ];

        let mut emu = emulator_with(vec![0xAB]);
        emu.load_kernel(&program);
        let info = emu.run();

        assert_eq!(info.reason, ExitReason::Halt);
        assert_eq!(emu.bus().console().output(), &[0xAB]);
        assert!(emu.bus().sink().reports().is_empty());
    }

    #[test]
    fn test_device_write_grows_store() {
        // Write one byte at the end of an empty device.
        let program = [
            0x3E, 0x00, // LD A, 0
            0xD3, 0x02, // OUT (2), A
            0xD3, 0x02, // OUT (2), A
            0xD3, 0x02, // OUT (2), A
            0x3E, 0x5A, // LD A, 0x5A
            0xD3, 0x01, // OUT (1), A
            0x76, // HALT
        ];

        let mut emu = emulator_with(vec![]);
        emu.load_kernel(&program);
        emu.run();

        assert_eq!(emu.bus().device().contents(), &[0x5A]);
    }
}
