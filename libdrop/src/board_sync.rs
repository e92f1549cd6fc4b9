use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::channel_map::ChannelMap;
use super::config::Config;
use super::error::{EventError, SyncError};
use super::event::Event;
use super::trigger::{Trigger, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    WaitFirstBoard,
    CollectRemainingBoards,
    Done,
}

/// Why the synchronizer stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    /// The first board did not show up within one board cycle
    Desync,
    /// The trigger source failed to produce a record
    SourceError,
    /// The requested last event id was reached
    EndId,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Desync => write!(f, "unrecoverable board desynchronization"),
            Self::EndId => write!(f, "reached the requested end event id"),
            Self::SourceError => write!(f, "trigger source failure"),
        }
    }
}

/// Why an in-progress event was abandoned
#[derive(Debug)]
pub enum SkipReason {
    /// A board arrived out of order
    BoardOrder {
        event_id: u32,
        expected: u8,
        found: u8,
    },
    /// Every board arrived but their channels did not make a complete event
    Assembly(EventError),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BoardOrder {
                event_id,
                expected,
                found,
            } => write!(
                f,
                "event {event_id} expected board {expected} but received board {found}"
            ),
            Self::Assembly(e) => write!(f, "{e}"),
        }
    }
}

/// Outcome of one synchronizer step
#[derive(Debug)]
pub enum SyncStatus {
    Event(Event),
    Skip(SkipReason),
    Stop(StopReason),
}

/// BoardSynchronizer takes Triggers and composes them into Events.
///
/// Boards write their records in a fixed round-robin order. Each call to `step` reads
/// one board cycle and produces exactly one Event, SKIP, or STOP. A trigger that breaks
/// the order is not thrown away; it becomes the first-board candidate of the next step,
/// so a dropped record costs at most one event.
#[derive(Debug)]
pub struct BoardSynchronizer {
    board_order: Vec<u8>,
    channel_map: ChannelMap,
    state: SyncState,
    stop_reason: Option<StopReason>,
    pending: Option<Trigger>,
    current_event_id: Option<u32>,
    n_triggers: u64,
    n_events: u64,
    n_skipped: u64,
    n_discarded: u64,
}

impl BoardSynchronizer {
    /// Create a new BoardSynchronizer.
    ///
    /// Requires a ChannelMap built from the same config
    pub fn new(config: &Config, channel_map: ChannelMap) -> Self {
        Self {
            board_order: config.board_id_order.clone(),
            channel_map,
            state: SyncState::WaitFirstBoard,
            stop_reason: None,
            pending: None,
            current_event_id: None,
            n_triggers: 0,
            n_events: 0,
            n_skipped: 0,
            n_discarded: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Id of the last event emitted
    pub fn current_event_id(&self) -> Option<u32> {
        self.current_event_id
    }

    /// Triggers read from the source so far
    pub fn n_triggers(&self) -> u64 {
        self.n_triggers
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    pub fn n_skipped(&self) -> u64 {
        self.n_skipped
    }

    /// Triggers thrown away while waiting for the first board
    pub fn n_discarded(&self) -> u64 {
        self.n_discarded
    }

    fn read<S: TriggerSource>(&mut self, source: &mut S) -> Result<Option<Trigger>, SyncError> {
        let trigger = source.next_trigger()?;
        if trigger.is_some() {
            self.n_triggers += 1;
        }
        Ok(trigger)
    }

    fn stop(&mut self, reason: StopReason) -> SyncStatus {
        self.state = SyncState::Done;
        self.stop_reason = Some(reason);
        self.pending = None;
        SyncStatus::Stop(reason)
    }

    /// Run the state machine for one board cycle.
    ///
    /// Returns `Stop` forever once the synchronizer is Done. Only trigger source failures
    /// are returned as errors.
    pub fn step<S: TriggerSource>(&mut self, source: &mut S) -> Result<SyncStatus, SyncError> {
        if let Some(reason) = self.stop_reason {
            return Ok(SyncStatus::Stop(reason));
        }
        let Some(first_board) = self.board_order.first().copied() else {
            return Ok(self.stop(StopReason::EndOfStream));
        };

        self.state = SyncState::WaitFirstBoard;
        let max_discards = (self.board_order.len() - 1).max(1);
        let mut discards = 0;
        let first = loop {
            let candidate = match self.pending.take() {
                Some(trigger) => trigger,
                None => match self.read(source)? {
                    Some(trigger) => trigger,
                    None => return Ok(self.stop(StopReason::EndOfStream)),
                },
            };
            if candidate.board_id == first_board {
                break candidate;
            }
            discards += 1;
            self.n_discarded += 1;
            log::debug!(
                "Discarding event counter {} from board {} while waiting for board {}",
                candidate.event_counter,
                candidate.board_id,
                first_board
            );
            if discards >= max_discards {
                log::error!(
                    "Board {} did not appear within {} triggers after event {:?}",
                    first_board,
                    discards,
                    self.current_event_id
                );
                return Ok(self.stop(StopReason::Desync));
            }
        };

        self.state = SyncState::CollectRemainingBoards;
        let event_id = first.event_counter;
        let mut triggers = Vec::with_capacity(self.board_order.len());
        triggers.push(first);
        for idx in 1..self.board_order.len() {
            let expected = self.board_order[idx];
            let trigger = match self.read(source)? {
                Some(trigger) => trigger,
                None => {
                    log::warn!(
                        "Stream ended while collecting event {}; waiting on board {}",
                        event_id,
                        expected
                    );
                    return Ok(self.stop(StopReason::EndOfStream));
                }
            };
            if trigger.board_id != expected {
                let found = trigger.board_id;
                self.pending = Some(trigger);
                self.state = SyncState::WaitFirstBoard;
                self.n_skipped += 1;
                return Ok(SyncStatus::Skip(SkipReason::BoardOrder {
                    event_id,
                    expected,
                    found,
                }));
            }
            if trigger.event_counter != event_id {
                log::warn!(
                    "Event {} received event counter {} from board {}",
                    event_id,
                    trigger.event_counter,
                    trigger.board_id
                );
            }
            triggers.push(trigger);
        }

        self.state = SyncState::WaitFirstBoard;
        match Event::new(&self.channel_map, triggers) {
            Ok(event) => {
                self.current_event_id = Some(event.event_id);
                self.n_events += 1;
                Ok(SyncStatus::Event(event))
            }
            Err(e) => {
                self.n_skipped += 1;
                Ok(SyncStatus::Skip(SkipReason::Assembly(e)))
            }
        }
    }
}
