use super::channel_map::ChannelMap;
use super::error::EventError;
use super::trigger::Trigger;

/// An Event is the union of one Trigger from every configured board.
///
/// Traces are stored densely, indexed by ChannelDescriptor::index, so every later stage
/// works on plain vectors instead of name lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_id: u32,
    /// Time tag of the reference (first) board
    pub trigger_time_tag: u64,
    pub traces: Vec<Vec<i16>>,
}

impl Event {
    /// Make a new event from a set of Triggers, one per board, in board order.
    ///
    /// Every configured channel must be present exactly once. The samples are moved out of
    /// the triggers.
    pub fn new(map: &ChannelMap, triggers: Vec<Trigger>) -> Result<Self, EventError> {
        let first = triggers.first().ok_or(EventError::NoTriggers)?;
        let event_id = first.event_counter;
        let trigger_time_tag = first.trigger_time_tag;
        let mut traces: Vec<Option<Vec<i16>>> = vec![None; map.len()];

        for trigger in triggers.into_iter() {
            for trace in trigger.traces.into_iter() {
                let index = map
                    .get_index(trigger.board_id, trace.channel)
                    .ok_or(EventError::UnknownChannel(
                        event_id,
                        trigger.board_id,
                        trace.channel,
                    ))?;
                let slot = &mut traces[index];
                if slot.is_some() {
                    return Err(EventError::DuplicateChannel(
                        event_id,
                        map.channels()[index].name.clone(),
                    ));
                }
                *slot = Some(trace.samples);
            }
        }

        let traces = traces
            .into_iter()
            .zip(map.channels())
            .map(|(trace, descriptor)| {
                trace.ok_or_else(|| EventError::MissingChannel(event_id, descriptor.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Event {
            event_id,
            trigger_time_tag,
            traces,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.traces.len()
    }
}
