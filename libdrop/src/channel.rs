use super::constants::NUMBER_OF_CHANNELS;
use super::error::ChannelMapError;
use std::hash::Hash;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// PMT channel; normalized by its SPE mean and included in the sum
    Signal,
    /// Trigger paddles and other non-PMT inputs; kept in mV
    Auxiliary,
}

/// Hardware address of a digitizer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelAddress {
    pub board_id: u8,
    pub channel: u8,
}

impl ChannelAddress {
    pub fn new(board_id: u8, channel: u8) -> Result<Self, ChannelMapError> {
        if channel >= NUMBER_OF_CHANNELS {
            return Err(ChannelMapError::BadChannel(board_id, channel));
        }
        Ok(Self { board_id, channel })
    }

    /// Canonical name, `adc_b<board>_ch<channel>`
    pub fn name(&self) -> String {
        format!("adc_b{}_ch{}", self.board_id, self.channel)
    }
}

impl FromStr for ChannelAddress {
    type Err = ChannelMapError;

    /// Parse a channel name. The `adc_` prefix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad_name = || ChannelMapError::BadChannelName(s.to_string());
        let stripped = s.strip_prefix("adc_").unwrap_or(s);
        let (board, channel) = stripped.split_once("_ch").ok_or_else(bad_name)?;
        let board_id: u8 = board
            .strip_prefix('b')
            .ok_or_else(bad_name)?
            .parse()
            .map_err(|_| bad_name())?;
        let channel: u8 = channel.parse().map_err(|_| bad_name())?;
        Self::new(board_id, channel)
    }
}

/// Everything the reconstruction needs to know about one channel, resolved once at
/// config-load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub index: usize,
    pub name: String,
    pub address: ChannelAddress,
    pub role: ChannelRole,
}

impl ChannelDescriptor {
    pub fn new(index: usize, address: ChannelAddress, role: ChannelRole) -> Self {
        Self {
            index,
            name: address.name(),
            address,
            role,
        }
    }

    pub fn board_id(&self) -> u8 {
        self.address.board_id
    }

    pub fn is_signal(&self) -> bool {
        self.role == ChannelRole::Signal
    }
}

impl Hash for ChannelDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state)
    }
}

/// Generate a unique key for a hardware location
pub fn generate_uuid(board_id: u8, channel: u8) -> u32 {
    (channel as u32) + (board_id as u32) * 100
}
