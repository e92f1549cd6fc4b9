// V1730 header layout
pub const HEADER_WORDS: usize = 4;
pub const HEADER_SIZE_BYTES: u32 = 16;
pub const HEADER_MARKER: u32 = 0xA000_0000;
pub const HEADER_MARKER_MASK: u32 = 0xF000_0000;
pub const EVENT_SIZE_MASK: u32 = 0x0FFF_FFFF;
pub const BOARD_ID_MASK: u32 = 0xF800_0000;
pub const BOARD_ID_SHIFT: u32 = 27;
pub const ZLE_FLAG: u32 = 0x0100_0000;
pub const CHANNEL_MASK_LOW: u32 = 0x0000_00FF;
pub const CHANNEL_MASK_HIGH: u32 = 0xFF00_0000;
pub const CHANNEL_MASK_HIGH_SHIFT: u32 = 16;
pub const PATTERN_SHIFT: u32 = 8;
pub const PATTERN_MASK: u32 = 0xFFFF;
pub const EVENT_COUNTER_MASK: u32 = 0x00FF_FFFF;
pub const TIME_TAG_MASK: u32 = 0x7FFF_FFFF;
pub const NUMBER_OF_CHANNELS: u8 = 16; // per V1730 board

// Rollover periods of the trigger time tag
pub const TIME_TAG_ROLLOVER: u64 = 1 << 31;
pub const EXTENDED_TIME_TAG_ROLLOVER: u64 = 1 << 48;

// Header recovery
pub const MAX_RESYNC_BYTES: u64 = 64016;
pub const MAX_COUNTER_JUMP: u32 = 10;

// Digitizer constants
pub const SAMPLE_PERIOD_NS: f64 = 2.0; // 500 MS/s
pub const ADC_BITS: u32 = 14;
pub const MAX_ADC_BITS: u32 = 15; // full scale must fit an i16
pub const SAMPLE_MASK: u16 = 0x3FFF;
pub const DYNAMIC_RANGE_MV: f64 = 2000.0;
pub const TERMINATION_OHM: f64 = 50.0;
pub const TRIGGER_DELAY_SAMPLES: usize = 20; // daisy chain trigger delay

// Robust +-1 sigma quantiles of a normal distribution
pub const LOWER_SIGMA_QUANTILE: f64 = 0.15865;
pub const MEDIAN_QUANTILE: f64 = 0.5;
pub const UPPER_SIGMA_QUANTILE: f64 = 0.84135;

pub const DEFAULT_MAX_PULSES: usize = 100;
