use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has {0} roi_start entries but {1} roi_end entries")]
    RoiLengthMismatch(usize, usize),
    #[error("ROI {0} is invalid: roi_end ({2}) must be strictly larger than roi_start ({1})")]
    EmptyRoi(usize, usize, usize),
    #[error("ROI {0} starts at {1}, which leaves no room for a pre-ROI window of {2} samples")]
    NoPreRoiWindow(usize, usize, usize),
    #[error("ROI {0} ends at {1}, beyond the analysis window of {2} samples")]
    RoiOutOfWindow(usize, usize, usize),
    #[error("Config declares n_boards = {0} but board_id_order has {1} entries")]
    BoardCountMismatch(usize, usize),
    #[error("Board {0} appears more than once in board_id_order")]
    DuplicateBoard(u8),
    #[error("Board {0} is in board_id_order but has no active channels")]
    BoardWithoutChannels(u8),
    #[error("post_trigger must lie in [0, 1], found {0}")]
    BadPostTrigger(f64),
    #[error("analysis_length ({0}) shifted by up to {1} samples exceeds daq_length ({2})")]
    AnalysisWindowTooLong(usize, usize, usize),
    #[error("integration_width must be at least 2 samples, found {0}")]
    BadIntegrationWidth(usize),
    #[error("batch_size must be at least 1")]
    BadBatchSize,
    #[error("sample_period_ns must be a positive number, found {0}")]
    BadSamplePeriod(f64),
    #[error("termination_ohm must be a positive number, found {0}")]
    BadTermination(f64),
    #[error("adc_bits must lie in [1, 15] to fit a signed 16-bit sample, found {0}")]
    BadAdcBits(u32),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("Channel {1} on board {0} is not a valid V1730 channel")]
    BadChannel(u8, u8),
    #[error("Channel name {0} does not follow the adc_b<board>_ch<channel> format")]
    BadChannelName(String),
    #[error("Non-signal channel {0} does not name an active channel")]
    UnknownNonSignalChannel(String),
    #[error("Board {0} is in board_id_order but has no active channels")]
    BoardWithoutChannels(u8),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration failed to parse a number: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
    #[error("Calibration was given a file with the incorrect format at line {0}; expected ch_name,spe_mean,time_correction")]
    BadFileFormat(usize),
    #[error("Signal channel {0} has no spe_mean in the calibration table")]
    MissingChannel(String),
    #[error("Signal channel {0} has non-positive spe_mean {1}; photoelectron conversion is undefined")]
    NonPositiveSpe(String, f64),
}

#[derive(Debug, Error)]
pub enum CaenFileError {
    #[error("Could not open CaenFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("CaenFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Board {0} sent a zero-length-encoded record at byte {1}, which is not supported")]
    UnsupportedZle(u8, u64),
    #[error("Board {0} sent a record with an empty channel mask at byte {1}")]
    EmptyChannelMask(u8, u64),
    #[error("Record at byte {0} declares {1} words, fewer than its header")]
    BadEventSize(u64, u32),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event {0} received channel {2} from board {1}, which is not in the channel map")]
    UnknownChannel(u32, u8, u8),
    #[error("Event {0} received channel {1} twice")]
    DuplicateChannel(u32, String),
    #[error("Event {0} is missing channel {1}")]
    MissingChannel(u32, String),
    #[error("An Event cannot be built without triggers")]
    NoTriggers,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("BoardSynchronizer failed due to trigger source error: {0}")]
    SourceError(#[from] CaenFileError),
}

#[derive(Debug, Error)]
pub enum WaveformError {
    #[error("Event {0} has a malformed trace on channel {1} (board {2}): expected {3} samples, found {4}")]
    MalformedTrace(u32, String, u8, usize, usize),
}

#[derive(Debug, Error)]
pub enum RqWriterError {
    #[error("RQWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RQWriter failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("RQWriter could not derive an output name from input path {0:?}")]
    BadInputPath(PathBuf),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to Calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to CaenFile error: {0}")]
    CaenFileError(#[from] CaenFileError),
    #[error("Processor failed due to BoardSynchronizer error: {0}")]
    SyncError(#[from] SyncError),
    #[error("Processor failed due to RQWriter error: {0}")]
    RqWriterError(#[from] RqWriterError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
