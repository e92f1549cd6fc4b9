use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::constants::*;
use super::error::ConfigError;

/// Which DAQ software wrote the binary file. Only the word ordering differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaqSoftware {
    #[default]
    ToolDaq,
    LabView,
}

/// Pulse finding algorithm run over the summed waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseAlgorithm {
    /// Threshold crossings of the sliding-window charge series
    #[default]
    ChargeThreshold,
    /// Local maxima with fixed pre/post windows
    PeakWindow,
}

/// Samples excluded from the baseline estimate around the trigger position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineExclusion {
    pub before: usize,
    pub after: usize,
}

/// Parameters of the peak-window mode. Threshold and height are in units of the
/// baseline spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakFinderParams {
    pub distance: usize,
    pub threshold: f64,
    pub height: f64,
}

/// A region of interest in analysis-window samples, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub start: usize,
    pub end: usize,
}

/// Structure representing the reconstruction configuration. Contains the board layout,
/// digitizer constants, and algorithm parameters.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub n_boards: usize,
    pub board_id_order: Vec<u8>,
    pub active_channels: BTreeMap<u8, Vec<u8>>,
    pub non_signal_channels: Vec<String>,
    pub calibration_path: PathBuf,
    pub board_time_offset: BTreeMap<u8, f64>,
    pub daq_software: DaqSoftware,
    pub extended_time_tag: bool,
    pub daq_length: usize,
    pub analysis_length: usize,
    pub post_trigger: f64,
    pub baseline_exclusion: BaselineExclusion,
    pub sample_period_ns: f64,
    pub adc_bits: u32,
    pub dynamic_range_mv: f64,
    pub termination_ohm: f64,
    pub rolling_length: usize,
    pub sigma_above_baseline: f64,
    pub roi_start: Vec<usize>,
    pub roi_end: Vec<usize>,
    pub pre_roi_length: usize,
    pub pulse_algorithm: PulseAlgorithm,
    pub pulse_threshold: f64,
    pub integration_width: usize,
    pub max_pulses: usize,
    pub pre_pulse: usize,
    pub post_pulse: usize,
    pub scipy_find_peaks: PeakFinderParams,
    pub batch_size: usize,
}

impl Default for Config {
    /// Generate a template Config for a three board, 48 channel setup
    fn default() -> Self {
        let board_id_order = vec![1, 2, 3];
        let active_channels = board_id_order
            .iter()
            .map(|board| (*board, (0..NUMBER_OF_CHANNELS).collect()))
            .collect();
        Self {
            n_boards: 3,
            board_id_order,
            active_channels,
            non_signal_channels: vec![],
            calibration_path: PathBuf::from("None"),
            board_time_offset: BTreeMap::from([(1, 144.0), (2, 96.0), (3, 48.0)]),
            daq_software: DaqSoftware::ToolDaq,
            extended_time_tag: false,
            daq_length: 2000,
            analysis_length: 1800,
            post_trigger: 0.5,
            baseline_exclusion: BaselineExclusion {
                before: 50,
                after: 200,
            },
            sample_period_ns: SAMPLE_PERIOD_NS,
            adc_bits: ADC_BITS,
            dynamic_range_mv: DYNAMIC_RANGE_MV,
            termination_ohm: TERMINATION_OHM,
            rolling_length: 100,
            sigma_above_baseline: 3.0,
            roi_start: vec![700],
            roi_end: vec![900],
            pre_roi_length: 50,
            pulse_algorithm: PulseAlgorithm::ChargeThreshold,
            pulse_threshold: 10.0,
            integration_width: 30,
            max_pulses: DEFAULT_MAX_PULSES,
            pre_pulse: 10,
            post_pulse: 50,
            scipy_find_peaks: PeakFinderParams {
                distance: 20,
                threshold: 0.0,
                height: 5.0,
            },
            batch_size: 1000,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Sanity checks that do not need the calibration table
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board_id_order.len() != self.n_boards {
            return Err(ConfigError::BoardCountMismatch(
                self.n_boards,
                self.board_id_order.len(),
            ));
        }
        let mut seen = BTreeSet::new();
        for board in self.board_id_order.iter() {
            if !seen.insert(*board) {
                return Err(ConfigError::DuplicateBoard(*board));
            }
            if self
                .active_channels
                .get(board)
                .map_or(true, |chans| chans.is_empty())
            {
                return Err(ConfigError::BoardWithoutChannels(*board));
            }
        }

        if !(0.0..=1.0).contains(&self.post_trigger) {
            return Err(ConfigError::BadPostTrigger(self.post_trigger));
        }

        if self.roi_start.len() != self.roi_end.len() {
            return Err(ConfigError::RoiLengthMismatch(
                self.roi_start.len(),
                self.roi_end.len(),
            ));
        }
        for (idx, roi) in self.rois().iter().enumerate() {
            if roi.end <= roi.start {
                return Err(ConfigError::EmptyRoi(idx, roi.start, roi.end));
            }
            if roi.start < self.pre_roi_length {
                return Err(ConfigError::NoPreRoiWindow(
                    idx,
                    roi.start,
                    self.pre_roi_length,
                ));
            }
            if roi.end > self.analysis_length {
                return Err(ConfigError::RoiOutOfWindow(
                    idx,
                    roi.end,
                    self.analysis_length,
                ));
            }
        }

        if self.analysis_length > self.daq_length {
            return Err(ConfigError::AnalysisWindowTooLong(
                self.analysis_length,
                0,
                self.daq_length,
            ));
        }

        if self.integration_width < 2 {
            return Err(ConfigError::BadIntegrationWidth(self.integration_width));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::BadBatchSize);
        }

        if !(self.sample_period_ns.is_finite() && self.sample_period_ns > 0.0) {
            return Err(ConfigError::BadSamplePeriod(self.sample_period_ns));
        }
        if !(self.termination_ohm.is_finite() && self.termination_ohm > 0.0) {
            return Err(ConfigError::BadTermination(self.termination_ohm));
        }
        if !(1..=MAX_ADC_BITS).contains(&self.adc_bits) {
            return Err(ConfigError::BadAdcBits(self.adc_bits));
        }

        Ok(())
    }

    /// Regions of interest as (start, end) pairs
    pub fn rois(&self) -> Vec<Roi> {
        self.roi_start
            .iter()
            .zip(self.roi_end.iter())
            .map(|(start, end)| Roi {
                start: *start,
                end: *end,
            })
            .collect()
    }

    /// Trigger sample position in the raw trace, corrected for the daisy chain delay
    pub fn trigger_position(&self) -> usize {
        let position = (self.daq_length as f64 * (1.0 - self.post_trigger)) as usize;
        position.saturating_sub(TRIGGER_DELAY_SAMPLES)
    }

    /// Conversion from ADC counts to mV
    pub fn adc_to_mv(&self) -> f64 {
        self.dynamic_range_mv / self.adc_full_scale() as f64
    }

    /// Largest value the ADC can report
    pub fn adc_full_scale(&self) -> i16 {
        ((1u32 << self.adc_bits.min(MAX_ADC_BITS)) - 1) as i16
    }

    /// Factor converting a trapezoidal sum of mV samples into pC
    pub fn charge_scale(&self) -> f64 {
        self.sample_period_ns / self.termination_ohm
    }

    /// Daisy-chain offset of a board, in the same units as the calibration time corrections
    pub fn board_offset(&self, board_id: u8) -> f64 {
        self.board_time_offset
            .get(&board_id)
            .copied()
            .unwrap_or_default()
    }
}
