//! Virtual block device: a growable byte store with a cursor.
//!
//! The device never fails hard; every access yields an outcome the bus
//! turns into a degraded value plus a diagnostic report where needed.

/// Whether the cursor auto-increments after an access.
///
/// `NoAdvance` pairs with the phase-addressed channel (the guest repositions
/// explicitly for every access); `AutoAdvance` pairs with the byte-lane
/// channel and streams through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePolicy {
    NoAdvance,
    AutoAdvance,
}

/// Outcome of a device read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// In-bounds byte.
    Data(u8),
    /// Cursor exactly at the logical end: a legitimate boundary probe,
    /// reads as zero without being reported.
    Edge,
    /// Cursor past the logical end; reads as zero, reported.
    OutOfBounds,
}

/// Outcome of a device write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Overwrote an in-bounds byte.
    Stored,
    /// Appended at the logical end, growing the store by one byte.
    Grew,
    /// Past the end or at capacity; state unchanged, reported.
    OutOfBounds,
}

/// Default backing capacity (128 KiB).
pub const DEFAULT_CAPACITY: usize = 0x2_0000;

/// Growable byte store with a cursor and a fixed capacity.
///
/// The logical size only ever grows one byte at a time, by writing at the
/// current end. The cursor is plain storage: the address channels may park
/// it anywhere in 24 bits, and bounds apply at access time.
pub struct BlockDevice {
    backing: Vec<u8>,
    capacity: usize,
    cursor: u32,
    policy: AdvancePolicy,
}

impl BlockDevice {
    /// Create an empty device.
    pub fn new(capacity: usize, policy: AdvancePolicy) -> Self {
        Self {
            backing: Vec::new(),
            capacity,
            cursor: 0,
            policy,
        }
    }

    /// Create a device pre-loaded with `contents` (typically a packed
    /// container stream). Capacity is widened to fit if necessary.
    pub fn with_contents(contents: Vec<u8>, capacity: usize, policy: AdvancePolicy) -> Self {
        let capacity = capacity.max(contents.len());
        Self {
            backing: contents,
            capacity,
            cursor: 0,
            policy,
        }
    }

    /// Read the byte under the cursor.
    pub fn read(&mut self) -> ReadOutcome {
        let cursor = self.cursor as usize;
        if cursor < self.backing.len() {
            let byte = self.backing[cursor];
            self.advance();
            ReadOutcome::Data(byte)
        } else if cursor == self.backing.len() {
            ReadOutcome::Edge
        } else {
            ReadOutcome::OutOfBounds
        }
    }

    /// Write a byte at the cursor, growing by one when exactly at the end.
    pub fn write(&mut self, byte: u8) -> WriteOutcome {
        let cursor = self.cursor as usize;
        if cursor < self.backing.len() {
            self.backing[cursor] = byte;
            self.advance();
            WriteOutcome::Stored
        } else if cursor == self.backing.len() && cursor < self.capacity {
            self.backing.push(byte);
            self.advance();
            WriteOutcome::Grew
        } else {
            WriteOutcome::OutOfBounds
        }
    }

    fn advance(&mut self) {
        if self.policy == AdvancePolicy::AutoAdvance {
            self.cursor += 1;
        }
    }

    /// Reposition the cursor.
    pub fn seek(&mut self, cursor: u32) {
        self.cursor = cursor;
    }

    /// Current cursor position.
    pub fn tell(&self) -> u32 {
        self.cursor
    }

    /// Current logical size.
    pub fn size(&self) -> usize {
        self.backing.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> AdvancePolicy {
        self.policy
    }

    /// The store's live contents.
    pub fn contents(&self) -> &[u8] {
        &self.backing
    }

    /// Consume the device, keeping its contents.
    pub fn into_contents(self) -> Vec<u8> {
        self.backing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_growth_to_capacity() {
        let mut dev = BlockDevice::new(4, AdvancePolicy::AutoAdvance);
        for i in 0..4u8 {
            assert_eq!(dev.write(i), WriteOutcome::Grew);
        }
        assert_eq!(dev.size(), 4);
        assert_eq!(dev.contents(), &[0, 1, 2, 3]);

        // One write past capacity changes nothing.
        assert_eq!(dev.write(9), WriteOutcome::OutOfBounds);
        assert_eq!(dev.size(), 4);
        assert_eq!(dev.tell(), 4);
    }

    #[test]
    fn test_growth_is_single_step_only() {
        let mut dev = BlockDevice::new(16, AdvancePolicy::NoAdvance);
        dev.seek(2); // hole: cursor past the end
        assert_eq!(dev.write(1), WriteOutcome::OutOfBounds);
        assert_eq!(dev.size(), 0);
    }

    #[test]
    fn test_read_edge_and_out_of_bounds() {
        let mut dev =
            BlockDevice::with_contents(vec![0xAB], DEFAULT_CAPACITY, AdvancePolicy::NoAdvance);
        assert_eq!(dev.read(), ReadOutcome::Data(0xAB));
        dev.seek(1);
        assert_eq!(dev.read(), ReadOutcome::Edge);
        dev.seek(2);
        assert_eq!(dev.read(), ReadOutcome::OutOfBounds);
    }

    #[test]
    fn test_no_advance_rereads_same_byte() {
        let mut dev =
            BlockDevice::with_contents(vec![1, 2], DEFAULT_CAPACITY, AdvancePolicy::NoAdvance);
        assert_eq!(dev.read(), ReadOutcome::Data(1));
        assert_eq!(dev.read(), ReadOutcome::Data(1));
        assert_eq!(dev.tell(), 0);
    }

    #[test]
    fn test_auto_advance_streams() {
        let mut dev =
            BlockDevice::with_contents(vec![1, 2], DEFAULT_CAPACITY, AdvancePolicy::AutoAdvance);
        assert_eq!(dev.read(), ReadOutcome::Data(1));
        assert_eq!(dev.read(), ReadOutcome::Data(2));
        assert_eq!(dev.read(), ReadOutcome::Edge);
        // An edge probe doesn't advance; it stays repeatable.
        assert_eq!(dev.tell(), 2);
        assert_eq!(dev.read(), ReadOutcome::Edge);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let mut dev =
            BlockDevice::with_contents(vec![1, 2, 3], DEFAULT_CAPACITY, AdvancePolicy::NoAdvance);
        dev.seek(1);
        assert_eq!(dev.write(9), WriteOutcome::Stored);
        assert_eq!(dev.size(), 3);
        assert_eq!(dev.contents(), &[1, 9, 3]);
    }

    #[test]
    fn test_capacity_widened_for_contents() {
        let dev = BlockDevice::with_contents(vec![0; 64], 16, AdvancePolicy::NoAdvance);
        assert_eq!(dev.capacity(), 64);
    }
}
