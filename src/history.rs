use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::buffer::{EncodeFormat, PixelBuffer};
use crate::error::CanvasError;

pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Immutable encoded copy of the buffer at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    seq: u64,
    width: u32,
    height: u32,
    encoded: Vec<u8>,
}

impl HistoryEntry {
    pub fn capture(seq: u64, buffer: &PixelBuffer) -> Result<Self, CanvasError> {
        Ok(Self {
            seq,
            width: buffer.width(),
            height: buffer.height(),
            encoded: buffer.encode(EncodeFormat::Png)?,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn decode(&self) -> Result<PixelBuffer, CanvasError> {
        PixelBuffer::decode(&self.encoded)
    }
}

// ============================================================================
// HISTORY MANAGER - linear undo/redo over encoded buffer states
// ============================================================================

/// Undo/redo over encoded snapshots with a current-position index.
///
/// Recording after an undo drops every entry past the index. The stack holds
/// at most `cap` entries; the oldest is evicted and the index shifted so that
/// `0 <= index < len` holds whenever the stack is non-empty.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    index: usize,
    cap: usize,
    next_seq: u64,
    /// Total successful records since creation, never decremented.
    recorded: u64,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl HistoryManager {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: 0,
            cap: cap.max(1),
            next_seq: 0,
            recorded: 0,
        }
    }

    /// Encode `buffer` and make it the current entry. On encode failure the
    /// stack is left exactly as it was.
    pub fn record(&mut self, buffer: &PixelBuffer) -> Result<&HistoryEntry, CanvasError> {
        let entry = HistoryEntry::capture(self.next_seq, buffer)?;
        self.next_seq += 1;
        self.recorded += 1;

        if !self.entries.is_empty() {
            self.entries.truncate(self.index + 1);
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        self.index = self.entries.len() - 1;
        debug!(
            seq = self.next_seq - 1,
            len = self.entries.len(),
            "history entry recorded"
        );
        Ok(&self.entries[self.index])
    }

    /// Step back one entry and return its decoded buffer. The index only
    /// moves when decoding succeeds.
    pub fn undo(&mut self) -> Option<PixelBuffer> {
        if !self.can_undo() {
            return None;
        }
        self.restore(self.index - 1)
    }

    pub fn redo(&mut self) -> Option<PixelBuffer> {
        if !self.can_redo() {
            return None;
        }
        self.restore(self.index + 1)
    }

    fn restore(&mut self, target: usize) -> Option<PixelBuffer> {
        let entry = &self.entries[target];
        match entry.decode() {
            Ok(buffer) => {
                self.index = target;
                Some(buffer)
            }
            Err(e) => {
                warn!(seq = entry.seq, "history entry could not be decoded: {}", e);
                None
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.entries.is_empty() && self.index + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Bytes held by encoded entries.
    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(|e| e.encoded.len()).sum()
    }
}
