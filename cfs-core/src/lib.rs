//! CFS container codec and block-device harness core
//!
//! This crate provides the core components for block-structured storage
//! behind a byte-wide port interface:
//! - The CFS container codec: packs a directory tree into a flat stream of
//!   fixed-size headers and padded 256-byte blocks, and unpacks it back
//! - A growable, seekable virtual block device with explicit bounds outcomes
//! - A port bus that multiplexes 24-bit addressing, seek/tell and console
//!   I/O through single-byte port operations
//! - A z80 harness run loop that wires the bus to the CPU's callback surface
//!
//! # Architecture
//!
//! The harness uses a layered design:
//! - `container`: standalone codec, no dependency on the bus
//! - `BlockDevice`: byte store with cursor and advance policy
//! - `PortBus`: routes guest port operations to channels in front of the
//!   device, a console and a diagnostic sink
//! - `Emulator`: integrates the Z80 CPU with the bus

pub mod bus;
pub mod console;
pub mod container;
pub mod device;
pub mod diag;
pub mod emulator;
pub mod error;

pub use bus::{Addressing, BusConfig, PortBus, EOT};
pub use console::{Console, HeadlessConsole};
pub use container::{
    block_count, pack_dir, pack_entries, parse_entries, unpack_to_dir, ContainerEntry, BLOCK_SIZE,
    HEADER_SIZE, MAX_FILE_SIZE, MAX_NAME_LEN,
};
pub use device::{AdvancePolicy, BlockDevice, ReadOutcome, WriteOutcome, DEFAULT_CAPACITY};
pub use diag::{BufferSink, DiagnosticSink, StderrSink};
pub use emulator::Emulator;
pub use error::{CfsError, CfsResult};

/// Reason a harness run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// CPU executed HALT
    Halt,
    /// Console session ended (EOT written, or input exhausted)
    EndOfSession,
}

/// Information about a finished run.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub t_states: u64,
    pub pc: u16,
    /// Accumulator at exit; the guest's exit status on HALT.
    pub acc: u8,
}
