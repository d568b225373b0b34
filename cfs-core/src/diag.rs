//! Diagnostic sink: the side channel for bus anomalies and guest
//! diagnostic-port bytes.
//!
//! Nothing that flows through here affects guest control flow; reads
//! degrade to zero and writes become no-ops while the run keeps going.

use std::io::Write;

/// Receiver for diagnostic traffic.
pub trait DiagnosticSink: Send {
    /// A byte the guest wrote to the diagnostic port, forwarded verbatim.
    fn forward(&mut self, byte: u8);

    /// A bounds or protocol violation detected by the bus or device.
    fn report(&mut self, message: &str);
}

/// Production sink: everything goes to stderr.
#[derive(Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn forward(&mut self, byte: u8) {
        let _ = std::io::stderr().write_all(&[byte]);
    }

    fn report(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Capturing sink for tests.
#[derive(Default)]
pub struct BufferSink {
    forwarded: Vec<u8>,
    reports: Vec<String>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes the guest sent to the diagnostic port.
    pub fn forwarded(&self) -> &[u8] {
        &self.forwarded
    }

    /// Anomaly reports, one line each.
    pub fn reports(&self) -> &[String] {
        &self.reports
    }
}

impl DiagnosticSink for BufferSink {
    fn forward(&mut self, byte: u8) {
        self.forwarded.push(byte);
    }

    fn report(&mut self, message: &str) {
        self.reports.push(message.to_string());
    }
}
