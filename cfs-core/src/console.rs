//! Console abstraction for the port bus.
//!
//! The `Console` trait is the byte-wide contract of the console port: it
//! works identically for tests (HeadlessConsole) and real terminals.

use std::collections::VecDeque;

/// Console interface for guest character I/O.
pub trait Console: Send {
    /// Emit a byte to console output.
    fn write_byte(&mut self, byte: u8);

    /// Pull the next input byte, blocking until one arrives.
    /// Returns `None` once input is exhausted.
    fn read_byte(&mut self) -> Option<u8>;
}

/// Headless console for testing - captures output, provides queued input.
#[derive(Default)]
pub struct HeadlessConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl HeadlessConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-queued input.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            output: Vec::new(),
            input: input.iter().copied().collect(),
        }
    }

    /// Queue input bytes.
    pub fn queue_input(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    /// Queue a string as input.
    pub fn queue_string(&mut self, s: &str) {
        self.queue_input(s.as_bytes());
    }

    /// Get all output as bytes.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Get output as string (lossy UTF-8 conversion).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Clear output buffer.
    pub fn clear_output(&mut self) {
        self.output.clear();
    }
}

impl Console for HeadlessConsole {
    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}
