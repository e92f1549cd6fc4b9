// Channel names (adc_b1_ch0, ...) are only for humans and for the calibration table.
// Each configured channel gets a dense index, a board id, and a role when the map is
// built, and everything downstream indexes arrays by that dense index. The one hash
// lookup left is (board, channel) -> index, done once per trace at event assembly.
use fxhash::FxHashMap;

use super::channel::{generate_uuid, ChannelAddress, ChannelDescriptor, ChannelRole};
use super::config::Config;
use super::error::ChannelMapError;

/// ChannelMap is the ordered list of channels active in a run.
///
/// Channels are ordered by board (in `board_id_order`) and then by channel number. Signal
/// channels and auxiliary channels share the same index space.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    channels: Vec<ChannelDescriptor>,
    lookup: FxHashMap<u32, usize>,
}

impl ChannelMap {
    /// Create a new ChannelMap from the run configuration
    pub fn new(config: &Config) -> Result<Self, ChannelMapError> {
        let mut non_signal: Vec<ChannelAddress> = Vec::new();
        for name in config.non_signal_channels.iter() {
            non_signal.push(name.parse::<ChannelAddress>()?);
        }

        let mut map = ChannelMap::default();
        for board in config.board_id_order.iter() {
            let Some(channels) = config.active_channels.get(board) else {
                return Err(ChannelMapError::BoardWithoutChannels(*board));
            };
            let mut channels = channels.clone();
            channels.sort_unstable();
            channels.dedup();
            for ch in channels {
                let addr = ChannelAddress::new(*board, ch)?;
                let role = if non_signal.contains(&addr) {
                    ChannelRole::Auxiliary
                } else {
                    ChannelRole::Signal
                };
                let index = map.channels.len();
                map.lookup.insert(generate_uuid(*board, ch), index);
                map.channels.push(ChannelDescriptor::new(index, addr, role));
            }
        }

        for addr in non_signal.iter() {
            if !map.lookup.contains_key(&generate_uuid(addr.board_id, addr.channel)) {
                return Err(ChannelMapError::UnknownNonSignalChannel(addr.name()));
            }
        }

        Ok(map)
    }

    /// Get the dense index for a given hardware address.
    ///
    /// If returns None the address does not exist in the map
    pub fn get_index(&self, board_id: u8, channel: u8) -> Option<usize> {
        self.lookup.get(&generate_uuid(board_id, channel)).copied()
    }

    pub fn get(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn signal_channels(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter().filter(|ch| ch.is_signal())
    }

    /// Channels belonging to one board
    pub fn board_channels(&self, board_id: u8) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels
            .iter()
            .filter(move |ch| ch.board_id() == board_id)
    }

    /// Channel ids in the boardId*100 + channel convention
    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels
            .iter()
            .map(|ch| generate_uuid(ch.address.board_id, ch.address.channel))
            .collect()
    }
}
