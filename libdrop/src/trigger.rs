use std::collections::VecDeque;

use super::error::CaenFileError;

/// Samples from one channel of one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTrace {
    pub channel: u8,
    pub samples: Vec<i16>,
}

/// One board's acquisition for one logical event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trigger {
    pub event_counter: u32,
    pub board_id: u8,
    pub trigger_time_tag: u64,
    /// Byte offset of the record in its source, for locating raw data when debugging
    pub file_position: u64,
    pub traces: Vec<BoardTrace>,
}

impl Trigger {
    pub fn new(event_counter: u32, board_id: u8, trigger_time_tag: u64) -> Self {
        Self {
            event_counter,
            board_id,
            trigger_time_tag,
            ..Default::default()
        }
    }

    /// Builder-style helper to attach a trace
    pub fn with_trace(mut self, channel: u8, samples: Vec<i16>) -> Self {
        self.traces.push(BoardTrace { channel, samples });
        self
    }
}

/// Anything that produces triggers one at a time in acquisition order.
///
/// `Ok(None)` marks the end of the stream.
pub trait TriggerSource {
    fn next_trigger(&mut self) -> Result<Option<Trigger>, CaenFileError>;

    /// Bytes consumed so far, for progress reporting
    fn bytes_read(&self) -> u64 {
        0
    }

    /// Total bytes available, or zero if unknown
    fn total_bytes(&self) -> u64 {
        0
    }
}

impl TriggerSource for VecDeque<Trigger> {
    fn next_trigger(&mut self) -> Result<Option<Trigger>, CaenFileError> {
        Ok(self.pop_front())
    }
}
