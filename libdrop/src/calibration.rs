use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::channel::ChannelAddress;
use super::channel_map::ChannelMap;
use super::config::Config;
use super::error::CalibrationError;

const ENTRIES_PER_LINE: usize = 3; // ch_name, spe_mean, time_correction

/// Per-channel calibration constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    /// Mean single-photoelectron charge, pC
    pub spe_mean: f64,
    /// Total delay correction (channel + board daisy-chain offset), same units as the
    /// sample period
    pub time_correction_ticks: f64,
}

impl ChannelCalibration {
    /// Whole samples the trace is shifted by before cropping to the analysis window
    pub fn shift_samples(&self, sample_period: f64) -> usize {
        if self.time_correction_ticks <= 0.0 {
            0
        } else {
            (self.time_correction_ticks / sample_period) as usize
        }
    }
}

/// Calibration for every channel of a run, indexed like the ChannelMap.
///
/// Read-only once built. Auxiliary channels carry a unit SPE mean since they are never
/// converted to photoelectrons.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    channels: Vec<ChannelCalibration>,
}

impl CalibrationTable {
    /// Load the calibration CSV at path and resolve it against the channel map
    pub fn new(path: &Path, map: &ChannelMap, config: &Config) -> Result<Self, CalibrationError> {
        let mut contents = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut contents)?;
        Self::from_csv(&contents, map, config)
    }

    /// Build the table from CSV contents already in memory
    pub fn from_csv(contents: &str, map: &ChannelMap, config: &Config) -> Result<Self, CalibrationError> {
        let rows = parse_table(contents)?;
        Self::from_rows(&rows, map, config)
    }

    /// Resolve parsed calibration rows (address -> (spe_mean, time_correction))
    pub fn from_rows(
        rows: &FxHashMap<ChannelAddress, (f64, f64)>,
        map: &ChannelMap,
        config: &Config,
    ) -> Result<Self, CalibrationError> {
        let mut table = CalibrationTable::default();
        for ch in map.channels() {
            let board_offset = config.board_offset(ch.board_id());
            let calib = match (rows.get(&ch.address), ch.is_signal()) {
                (Some((spe_mean, correction)), true) => {
                    if *spe_mean <= 0.0 || !spe_mean.is_finite() {
                        return Err(CalibrationError::NonPositiveSpe(ch.name.clone(), *spe_mean));
                    }
                    ChannelCalibration {
                        spe_mean: *spe_mean,
                        time_correction_ticks: correction + board_offset,
                    }
                }
                (None, true) => return Err(CalibrationError::MissingChannel(ch.name.clone())),
                (row, false) => ChannelCalibration {
                    spe_mean: 1.0,
                    time_correction_ticks: row.map_or(0.0, |(_, corr)| *corr) + board_offset,
                },
            };
            table.channels.push(calib);
        }
        Ok(table)
    }

    pub fn get(&self, index: usize) -> Option<&ChannelCalibration> {
        self.channels.get(index)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Largest shift applied to any channel
    pub fn max_shift(&self, sample_period: f64) -> usize {
        self.channels
            .iter()
            .map(|c| c.shift_samples(sample_period))
            .max()
            .unwrap_or(0)
    }
}

/// Parse a calibration CSV with the header `ch_name,spe_mean,time_correction`
fn parse_table(contents: &str) -> Result<FxHashMap<ChannelAddress, (f64, f64)>, CalibrationError> {
    let mut rows = FxHashMap::default();
    let mut lines = contents.lines().enumerate();
    lines.next(); // Skip the header
    for (line_number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
        if entries.len() != ENTRIES_PER_LINE {
            return Err(CalibrationError::BadFileFormat(line_number + 1));
        }
        let addr: ChannelAddress = entries[0]
            .parse()
            .map_err(|_| CalibrationError::BadFileFormat(line_number + 1))?;
        rows.insert(addr, (entries[1].parse()?, entries[2].parse()?));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn two_board_config() -> Config {
        let mut config = Config::default();
        config.n_boards = 2;
        config.board_id_order = vec![1, 2];
        config.active_channels = BTreeMap::from([(1, vec![0, 1]), (2, vec![0])]);
        config.non_signal_channels = vec![String::from("adc_b2_ch0")];
        config.board_time_offset = BTreeMap::from([(1, 96.0), (2, 48.0)]);
        config
    }

    #[test]
    fn test_load_table() {
        let config = two_board_config();
        let map = ChannelMap::new(&config).unwrap();
        let rows = parse_table(
            "ch_name,spe_mean,time_correction\nadc_b1_ch0,1.5,4.0\nadc_b1_ch1, 2.0, 5.0\n",
        )
        .unwrap();
        let table = CalibrationTable::from_rows(&rows, &map, &config).unwrap();
        assert_eq!(table.len(), 3);
        let ch1 = table.get(1).unwrap();
        assert_eq!(ch1.spe_mean, 2.0);
        assert_eq!(ch1.time_correction_ticks, 101.0);
        assert_eq!(ch1.shift_samples(2.0), 50);
        // Auxiliary channel needs no row and only gets its board offset
        let aux = table.get(2).unwrap();
        assert_eq!(aux.spe_mean, 1.0);
        assert_eq!(aux.shift_samples(2.0), 24);
        assert_eq!(table.max_shift(2.0), 50);
    }

    #[test]
    fn test_zero_spe_rejected() {
        let config = two_board_config();
        let map = ChannelMap::new(&config).unwrap();
        let rows = parse_table("ch_name,spe_mean,time_correction\nadc_b1_ch0,0.0,0\nadc_b1_ch1,1,0\n")
            .unwrap();
        assert!(matches!(
            CalibrationTable::from_rows(&rows, &map, &config),
            Err(CalibrationError::NonPositiveSpe(name, _)) if name == "adc_b1_ch0"
        ));
    }

    #[test]
    fn test_missing_signal_channel() {
        let config = two_board_config();
        let map = ChannelMap::new(&config).unwrap();
        let rows = parse_table("ch_name,spe_mean,time_correction\nadc_b1_ch0,1.0,0\n").unwrap();
        assert!(matches!(
            CalibrationTable::from_rows(&rows, &map, &config),
            Err(CalibrationError::MissingChannel(name)) if name == "adc_b1_ch1"
        ));
    }

    #[test]
    fn test_bad_format() {
        assert!(matches!(
            parse_table("ch_name,spe_mean,time_correction\nadc_b1_ch0,1.0\n"),
            Err(CalibrationError::BadFileFormat(2))
        ));
        assert!(matches!(
            parse_table("ch_name,spe_mean,time_correction\nadc_b1_ch0,abc,1\n"),
            Err(CalibrationError::ParsingError(_))
        ));
    }
}
